//! Cross-referencing a snapped trace against the local street catalog.
//!
//! The service and the catalog come from different map sources and often
//! disagree on street names, so the primary strategy relates them purely by
//! location: snapped coordinates go through the same candidate / assignment /
//! coverage pipeline as raw GPS points. The name-based strategy is kept as a
//! legacy option and is off by default.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::coverage::{match_indexed, sort_results, SNAPPED_MIN_PROJECTIONS};
use crate::geo_utils::{densify, round_distance, round_ratio};
use crate::merge::normalize_street_name;
use crate::snapping::SnapResult;
use crate::{CoverageConfig, CoverageResult, IndexedPoint, StreetIndex};

/// Which cross-reference strategy the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossReferenceMode {
    /// Match snapped coordinates to catalog streets by location
    Geometry,
    /// Match service step names to catalog street names (legacy)
    LegacyName,
}

impl CrossReferenceMode {
    /// Strategy implementing this mode.
    pub fn strategy(&self) -> Box<dyn CrossReferenceStrategy + Send + Sync> {
        match self {
            CrossReferenceMode::Geometry => Box::new(GeometryCrossReference),
            CrossReferenceMode::LegacyName => Box::new(NameCrossReference),
        }
    }
}

/// Turns a snapped trace into catalog coverage.
pub trait CrossReferenceStrategy {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Coverage of catalog streets by `snapped`.
    ///
    /// `snapped` is the sequence of snapped coordinates to evaluate, each
    /// carrying its sequence position; `snap` is the full service result it
    /// was taken from.
    fn cross_reference(
        &self,
        snapped: &[IndexedPoint],
        snap: &SnapResult,
        index: &StreetIndex<'_>,
        config: &CoverageConfig,
    ) -> Vec<CoverageResult>;
}

/// Location-based cross-reference (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryCrossReference;

impl CrossReferenceStrategy for GeometryCrossReference {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn cross_reference(
        &self,
        snapped: &[IndexedPoint],
        _snap: &SnapResult,
        index: &StreetIndex<'_>,
        config: &CoverageConfig,
    ) -> Vec<CoverageResult> {
        match_indexed(snapped, index, config, SNAPPED_MIN_PROJECTIONS)
    }
}

/// Densified snapped route geometry as a fresh indexed sequence.
///
/// Service geometry can have long straight stretches between vertices; filling
/// them in keeps consecutive runs intact when matched against the catalog.
pub fn densified_route(snap: &SnapResult, spacing: f64) -> Vec<IndexedPoint> {
    IndexedPoint::from_trace(&densify(&snap.geometry, spacing))
}

/// Name-based cross-reference (legacy).
///
/// Sums service step distances per normalized name and credits them to every
/// catalog street with the same normalized name, capped at the street length.
/// Streets sharing a name across several segments are each credited in full,
/// which over-reports coverage; this is why geometry matching replaced it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameCrossReference;

impl CrossReferenceStrategy for NameCrossReference {
    fn name(&self) -> &'static str {
        "legacy-name"
    }

    fn cross_reference(
        &self,
        _snapped: &[IndexedPoint],
        snap: &SnapResult,
        index: &StreetIndex<'_>,
        config: &CoverageConfig,
    ) -> Vec<CoverageResult> {
        let mut by_name: HashMap<String, (f64, u32)> = HashMap::new();
        for step in &snap.steps {
            let Some(name) = step.name.as_deref().map(normalize_street_name) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let entry = by_name.entry(name).or_insert((0.0, 0));
            entry.0 += step.distance;
            entry.1 += step.geometry.len() as u32;
        }

        let classifier = config.classifier();
        let mut results: Vec<CoverageResult> = index
            .streets()
            .iter()
            .filter_map(|street| {
                let name = normalize_street_name(street.name.as_deref()?);
                let &(distance, points) = by_name.get(&name)?;
                let total = street.length_meters;
                let covered = round_distance(distance.min(total.max(0.0)));
                let ratio = if total > 0.0 { round_ratio(covered / total) } else { 0.0 };

                Some(CoverageResult {
                    street_id: street.id.clone(),
                    name: street.name.clone(),
                    highway: street.highway.clone(),
                    total_length_meters: round_distance(total),
                    distance_covered_meters: covered,
                    projected_distance_meters: covered,
                    coverage_ratio: ratio,
                    projected_coverage_ratio: ratio,
                    completion_status: classifier.classify(ratio, total, None, points),
                    matched_points_count: points,
                    coverage_interval: None,
                    geometry: street.geometry.clone(),
                })
            })
            .collect();

        debug!(
            "[NameCrossReference] {} step names -> {} catalog streets",
            by_name.len(),
            results.len()
        );
        sort_results(&mut results);
        results
    }
}
