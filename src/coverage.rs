//! Coverage measurement.
//!
//! Two measures are computed per street from the points assigned to it:
//!
//! 1. **Consecutive distance**: point-to-point haversine distance, summed only
//!    inside runs of consecutive original indices. Leaving a street and coming
//!    back later never counts the straight-line jump between the two visits.
//! 2. **Projected distance**: every point is projected onto the street
//!    centerline and the change in distance-along-street is summed inside the
//!    same runs. Lateral zig-zag from GPS drift disappears in the projection.
//!
//! The projections also give the coverage interval, the `[start%, end%]`
//! span of the centerline the points touched, across all runs.
//!
//! Distances are rounded to 2 decimals and ratios to 3 before being returned
//! so identical input always produces identical output.

use std::collections::HashMap;

use log::{debug, warn};

use crate::geo_utils::{
    haversine_distance, polyline_length, project_onto_polyline, round_distance, round_ratio,
};
use crate::grouping::{consecutive_runs, group_by_street};
use crate::{
    assign_points, CoverageConfig, CoverageInterval, CoverageResult, GpsPoint, IndexedPoint,
    StreetIndex, StreetSegment,
};

/// Projections needed for a coverage interval when matching raw trace points.
pub const TRACE_MIN_PROJECTIONS: usize = 1;

/// Projections needed for a coverage interval when matching snapped service geometry.
pub const SNAPPED_MIN_PROJECTIONS: usize = 2;

/// A trace point projected onto a street centerline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPoint {
    /// Original position of the point in the trace
    pub index: usize,
    /// Path length from the start of the centerline to the projection, meters
    pub distance_along: f64,
    /// Distance from the point to the centerline, meters
    pub offset: f64,
}

// ============================================================================
// Phase 1: consecutive distance
// ============================================================================

/// Distance covered within runs of consecutive original indices, meters.
///
/// Points may arrive in any order; they are sorted by index first. Single
/// points contribute nothing.
pub fn consecutive_distance(points: &[IndexedPoint]) -> f64 {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.index);

    consecutive_runs(&sorted)
        .iter()
        .map(|run| {
            run.windows(2)
                .map(|w| haversine_distance(&w[0].point, &w[1].point))
                .sum::<f64>()
        })
        .sum()
}

// ============================================================================
// Phase 2: projection
// ============================================================================

/// Project points onto a centerline. Invalid points are skipped.
pub fn project_points(points: &[IndexedPoint], centerline: &[GpsPoint]) -> Vec<ProjectedPoint> {
    points
        .iter()
        .filter(|p| p.point.is_valid())
        .filter_map(|p| {
            project_onto_polyline(&p.point, centerline).map(|proj| ProjectedPoint {
                index: p.index,
                distance_along: proj.distance_along,
                offset: proj.distance,
            })
        })
        .collect()
}

/// Distance along the centerline covered within consecutive-index runs, meters.
///
/// Movement in either direction counts, so an out-and-back on the same
/// street measures twice its length.
pub fn projected_distance(projected: &[ProjectedPoint]) -> f64 {
    let mut sorted = projected.to_vec();
    sorted.sort_by_key(|p| p.index);

    sorted
        .windows(2)
        .filter(|w| w[1].index == w[0].index + 1)
        .map(|w| (w[1].distance_along - w[0].distance_along).abs())
        .sum()
}

/// Span of the centerline touched by the projections, in percent.
///
/// Uses the minimum and maximum positions across all projections, floors the
/// start and ceils the end. `None` when there are fewer than
/// `min_projections` projections, the centerline has no length, or the span
/// collapses to nothing.
pub fn coverage_interval(
    projected: &[ProjectedPoint],
    centerline_length: f64,
    min_projections: usize,
) -> Option<CoverageInterval> {
    if projected.len() < min_projections.max(1) || centerline_length <= 0.0 {
        return None;
    }

    let (min_pct, max_pct) = projected
        .iter()
        .map(|p| (p.distance_along / centerline_length * 100.0).clamp(0.0, 100.0))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), pct| {
            (lo.min(pct), hi.max(pct))
        });

    CoverageInterval::new(min_pct.floor(), max_pct.ceil())
}

// ============================================================================
// Result assembly
// ============================================================================

/// Coverage of one street from the points assigned to it.
pub fn street_coverage(
    street: &StreetSegment,
    centerline: &[GpsPoint],
    points: &[IndexedPoint],
    config: &CoverageConfig,
    min_projections: usize,
) -> CoverageResult {
    let total = street.length_meters;

    let consecutive = round_distance(consecutive_distance(points));
    let projected = project_points(points, centerline);
    let projected_dist = round_distance(projected_distance(&projected));

    let (ratio, projected_ratio) = if total > 0.0 {
        (round_ratio(consecutive / total), round_ratio(projected_dist / total))
    } else {
        (0.0, 0.0)
    };

    let interval = coverage_interval(&projected, polyline_length(centerline), min_projections);
    let matched_points = points.len() as u32;

    if projected_ratio > 1.0 || ratio > 1.0 {
        warn!(
            "[street_coverage] {} ratio over 100%: consecutive {:.3}, projected {:.3}, {:?}",
            street.id,
            ratio,
            projected_ratio,
            interval
        );
    }

    let completion_status =
        config
            .classifier()
            .classify(projected_ratio, total, interval.as_ref(), matched_points);

    CoverageResult {
        street_id: street.id.clone(),
        name: street.name.clone(),
        highway: street.highway.clone(),
        total_length_meters: round_distance(total),
        distance_covered_meters: consecutive,
        projected_distance_meters: projected_dist,
        coverage_ratio: ratio,
        projected_coverage_ratio: projected_ratio,
        completion_status,
        matched_points_count: matched_points,
        coverage_interval: interval,
        geometry: street.geometry.clone(),
    }
}

/// Sort results by distance covered, longest first; street id breaks ties.
pub(crate) fn sort_results(results: &mut [CoverageResult]) {
    results.sort_by(|a, b| {
        b.distance_covered_meters
            .partial_cmp(&a.distance_covered_meters)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.street_id.cmp(&b.street_id))
    });
}

/// Coverage results for every street that received at least one point.
pub fn build_coverage_results(
    index: &StreetIndex<'_>,
    groups: &HashMap<String, Vec<IndexedPoint>>,
    config: &CoverageConfig,
    min_projections: usize,
) -> Vec<CoverageResult> {
    let positions: HashMap<&str, usize> = index
        .streets()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut results: Vec<CoverageResult> = groups
        .iter()
        .filter_map(|(street_id, points)| {
            let &idx = positions.get(street_id.as_str())?;
            Some(street_coverage(
                &index.streets()[idx],
                index.polyline(idx),
                points,
                config,
                min_projections,
            ))
        })
        .collect();

    sort_results(&mut results);
    results
}

/// Full local pipeline over an indexed trace: candidates, assignment,
/// grouping, coverage and classification.
pub fn match_indexed(
    trace: &[IndexedPoint],
    index: &StreetIndex<'_>,
    config: &CoverageConfig,
    min_projections: usize,
) -> Vec<CoverageResult> {
    if trace.is_empty() || index.is_empty() {
        return Vec::new();
    }

    let points: Vec<GpsPoint> = trace.iter().map(|p| p.point).collect();
    let candidates = index.candidates_for_trace(&points, config.proximity_threshold);
    let assignments = assign_points(trace, &candidates, config.proximity_threshold);
    let groups = group_by_street(trace, &assignments);

    let results = build_coverage_results(index, &groups, config, min_projections);
    debug!(
        "[match_indexed] {} points -> {} streets ({} full)",
        trace.len(),
        results.len(),
        results.iter().filter(|r| r.is_full()).count()
    );
    results
}

/// Match a raw GPS trace against a street catalog using local geometry only.
///
/// Returns one result per street with at least one assigned point, longest
/// covered distance first. An empty trace or catalog yields an empty list.
pub fn match_local(
    points: &[GpsPoint],
    streets: &[StreetSegment],
    config: &CoverageConfig,
) -> Vec<CoverageResult> {
    let index = StreetIndex::new(streets);
    match_indexed(
        &IndexedPoint::from_trace(points),
        &index,
        config,
        TRACE_MIN_PROJECTIONS,
    )
}
