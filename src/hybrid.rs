//! Hybrid orchestration of service-based and local matching.
//!
//! One call to [`HybridMatcher::match_trace`] walks this decision tree:
//!
//! ```text
//! provider missing / not configured ──────────────► local matching
//! provider error (any kind) ──────────────────────► local matching (fallback)
//! confidence >= medium (0.30) ────────────────────► snapped route cross-referenced
//! confidence >= low (0.10) ───────────────────────► matched points cross-referenced
//!                                                   + unmatched points matched locally
//!                                                   + merged
//! confidence <  low ──────────────────────────────► local matching (fallback)
//! ```
//!
//! Service failures are logged and never surface to the caller.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::coverage::{match_indexed, TRACE_MIN_PROJECTIONS};
use crate::error::CoverageError;
use crate::merge::merge_coverage_results_with;
use crate::snapping::{SnapProvider, SnapResult};
use crate::strategy::{densified_route, CrossReferenceStrategy};
use crate::{CoverageConfig, CoverageResult, GpsPoint, IndexedPoint, StreetIndex, StreetSegment};

/// Confidence band of a service result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    /// Band for a confidence score under the given thresholds.
    pub fn from_score(score: f64, config: &CoverageConfig) -> Self {
        if score >= config.high_confidence {
            ConfidenceLevel::High
        } else if score >= config.medium_confidence {
            ConfidenceLevel::Medium
        } else if score >= config.low_confidence {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

/// How a result list was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    /// Service not configured; local geometry only
    Local,
    /// Service route cross-referenced against the catalog
    Snapped,
    /// Service-matched points plus locally matched remainder
    Hybrid,
    /// Service failed or was not confident enough; local geometry only
    LocalFallback,
}

/// Result of one matching invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub results: Vec<CoverageResult>,
    pub method: MatchMethod,
    /// Service confidence, when the service answered
    pub confidence: Option<f64>,
}

/// Orchestrates the external map-matching service and local matching.
pub struct HybridMatcher {
    provider: Option<Box<dyn SnapProvider + Send + Sync>>,
    strategy: Box<dyn CrossReferenceStrategy + Send + Sync>,
    config: CoverageConfig,
}

impl HybridMatcher {
    /// Matcher backed by a map-matching service.
    pub fn new(provider: Box<dyn SnapProvider + Send + Sync>, config: CoverageConfig) -> Self {
        Self {
            provider: Some(provider),
            strategy: config.cross_reference.strategy(),
            config,
        }
    }

    /// Matcher without a service; always matches locally.
    pub fn local_only(config: CoverageConfig) -> Self {
        Self {
            provider: None,
            strategy: config.cross_reference.strategy(),
            config,
        }
    }

    /// Matcher backed by the Mapbox client built from `snap_config`.
    ///
    /// Invalid service settings are logged and yield a local-only matcher.
    #[cfg(feature = "http")]
    pub fn from_snap_config(snap_config: crate::SnapConfig, config: CoverageConfig) -> Self {
        match crate::http::MapboxMatcher::new(snap_config) {
            Ok(matcher) => Self::new(Box::new(matcher), config),
            Err(e) => {
                warn!(
                    "[HybridMatcher] Map matching misconfigured [{}]: {}; matching locally only",
                    e.code(),
                    e
                );
                Self::local_only(config)
            }
        }
    }

    /// Replace the cross-reference strategy chosen from the config.
    pub fn with_strategy(
        mut self,
        strategy: Box<dyn CrossReferenceStrategy + Send + Sync>,
    ) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Match a completed trace against the street catalog for its area.
    pub fn match_trace(&self, points: &[GpsPoint], streets: &[StreetSegment]) -> MatchOutcome {
        let index = StreetIndex::new(streets);
        let trace = IndexedPoint::from_trace(points);

        let provider = match &self.provider {
            Some(p) if p.is_configured() => p,
            _ => {
                info!(
                    "[HybridMatcher] Map matching not configured, matching {} points locally",
                    points.len()
                );
                return self.local(&trace, &index, MatchMethod::Local, None);
            }
        };

        let snap = match provider.snap(points) {
            Ok(snap) => snap,
            Err(e) => {
                self.log_service_error(&e);
                return self.local(&trace, &index, MatchMethod::LocalFallback, None);
            }
        };

        let confidence = snap.confidence;
        let level = ConfidenceLevel::from_score(confidence, &self.config);
        info!(
            "[HybridMatcher] Service confidence {:.2} ({:?}), strategy {}",
            confidence,
            level,
            self.strategy.name()
        );

        match level {
            ConfidenceLevel::High | ConfidenceLevel::Medium => {
                let route = densified_route(&snap, self.config.densify_spacing);
                if route.len() < 2 {
                    warn!("[HybridMatcher] Service returned no usable geometry, matching locally");
                    return self.local(&trace, &index, MatchMethod::LocalFallback, Some(confidence));
                }
                MatchOutcome {
                    results: self.strategy.cross_reference(&route, &snap, &index, &self.config),
                    method: MatchMethod::Snapped,
                    confidence: Some(confidence),
                }
            }
            ConfidenceLevel::Low => MatchOutcome {
                results: self.split_and_merge(&trace, &snap, &index),
                method: MatchMethod::Hybrid,
                confidence: Some(confidence),
            },
            ConfidenceLevel::VeryLow => {
                info!(
                    "[HybridMatcher] Confidence below {:.2}, discarding service result",
                    self.config.low_confidence
                );
                self.local(&trace, &index, MatchMethod::LocalFallback, Some(confidence))
            }
        }
    }

    fn local(
        &self,
        trace: &[IndexedPoint],
        index: &StreetIndex<'_>,
        method: MatchMethod,
        confidence: Option<f64>,
    ) -> MatchOutcome {
        MatchOutcome {
            results: match_indexed(trace, index, &self.config, TRACE_MIN_PROJECTIONS),
            method,
            confidence,
        }
    }

    /// Low confidence: trust only the points the service matched, match the
    /// rest locally, and merge. Both subsets keep their original indices so
    /// consecutive runs never bridge across the other subset.
    fn split_and_merge(
        &self,
        trace: &[IndexedPoint],
        snap: &SnapResult,
        index: &StreetIndex<'_>,
    ) -> Vec<CoverageResult> {
        let matched: Vec<IndexedPoint> = snap
            .matched_points()
            .into_iter()
            .filter(|(i, _)| *i < trace.len())
            .map(|(i, location)| IndexedPoint::new(i, location))
            .collect();

        let unmatched: Vec<IndexedPoint> = trace
            .iter()
            .filter(|tp| snap.tracepoints.get(tp.index).map_or(true, Option::is_none))
            .copied()
            .collect();

        info!(
            "[HybridMatcher] Splitting trace: {} service-matched, {} unmatched",
            matched.len(),
            unmatched.len()
        );

        let snapped_results = self.strategy.cross_reference(&matched, snap, index, &self.config);
        let local_results = match_indexed(&unmatched, index, &self.config, TRACE_MIN_PROJECTIONS);
        merge_coverage_results_with(snapped_results, local_results, &self.config.classifier())
    }

    fn log_service_error(&self, error: &CoverageError) {
        warn!(
            "[HybridMatcher] Map matching failed [{}] ({:?}): {}; falling back to local matching",
            error.code(),
            error.kind(),
            error
        );
    }
}
