//! # Street Coverage
//!
//! Decides which streets a runner or walker physically covered, from a
//! completed GPS trace and a catalog of street segments for the area.
//!
//! This library provides:
//! - Candidate search and trajectory-aware point-to-street assignment
//! - Two-phase coverage measurement (consecutive runs + centerline projection)
//! - Length-aware FULL/PARTIAL completion classification
//! - A hybrid orchestrator that combines an external map-matching service
//!   with local geometric matching, falling back to local on any failure
//!
//! ## Features
//!
//! - **`parallel`** - Parallel candidate search with rayon
//! - **`http`** - HTTP client for the Mapbox-compatible map-matching service
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use street_coverage::{match_local, CoverageConfig, GpsPoint, StreetSegment};
//!
//! // A ~220m street running north
//! let street = StreetSegment::new(
//!     "way/1",
//!     Some("Station Road".to_string()),
//!     "residential",
//!     vec![[-0.1000, 51.5000], [-0.1000, 51.5020]],
//! );
//!
//! // A runner covering it end to end
//! let trace: Vec<GpsPoint> = (0..=20)
//!     .map(|i| GpsPoint::new(51.5000 + i as f64 * 0.0001, -0.10002))
//!     .collect();
//!
//! let results = match_local(&trace, &[street], &CoverageConfig::default());
//! assert_eq!(results.len(), 1);
//! println!("{}: {:?}", results[0].street_id, results[0].completion_status);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{CoverageError, Result, SnapErrorKind};

// Geographic utilities (distance, bearing, projection)
pub mod geo_utils;

// Candidate street search
pub mod candidates;
pub use candidates::{find_candidates, StreetIndex};

// Trajectory-aware point assignment
pub mod assignment;
pub use assignment::{assign_points, score_candidate, trajectory_bearing};

// Grouping assigned points by street
pub mod grouping;
pub use grouping::{consecutive_runs, group_by_street};

// Coverage measurement (consecutive + projected)
pub mod coverage;
pub use coverage::{
    build_coverage_results, consecutive_distance, coverage_interval, match_indexed, match_local,
    project_points, projected_distance, ProjectedPoint,
};

// Completion classification
pub mod classifier;
pub use classifier::{classify_completion, completion_threshold, CompletionClassifier};

// Merging coverage from two sources
pub mod merge;
pub use merge::{merge_coverage_results, merge_coverage_results_with, normalize_street_name};

// Map-matching service model (provider-neutral)
pub mod snapping;
pub use snapping::{SnapConfig, SnapProvider, SnapResult, SnapStep, Tracepoint};

// Cross-reference of snapped geometry against the local catalog
pub mod strategy;
pub use strategy::{CrossReferenceStrategy, GeometryCrossReference, NameCrossReference};

// Hybrid orchestration
pub mod hybrid;
pub use hybrid::{ConfidenceLevel, HybridMatcher, MatchMethod, MatchOutcome};

// HTTP client for the map-matching service
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{MapboxMatcher, RateLimiter, RateLimiterConfig};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS fix from the trace.
///
/// Position in the trace is significant: the index of a point in the input
/// slice is its sequence number for every downstream calculation.
///
/// # Example
/// ```
/// use street_coverage::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278).with_timestamp(1_700_000_000);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Unix timestamp (seconds), if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            timestamp: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build from a `[longitude, latitude]` pair (GeoJSON order).
    pub fn from_lng_lat(coord: [f64; 2]) -> Self {
        Self::new(coord[1], coord[0])
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// A street segment from the area catalog.
///
/// Supplied by the catalog collaborator and never modified during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetSegment {
    /// Stable identifier (e.g. an OSM way id)
    pub id: String,
    /// Display name, if the street has one
    #[serde(default)]
    pub name: Option<String>,
    /// Road class tag ("residential", "footway", ...)
    pub highway: String,
    /// Total length in meters
    pub length_meters: f64,
    /// Centerline as `[longitude, latitude]` vertices
    pub geometry: Vec<[f64; 2]>,
}

impl StreetSegment {
    /// Create a segment, measuring its length from the geometry.
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        highway: impl Into<String>,
        geometry: Vec<[f64; 2]>,
    ) -> Self {
        let centerline: Vec<GpsPoint> =
            geometry.iter().copied().map(GpsPoint::from_lng_lat).collect();
        let length_meters = geo_utils::polyline_length(&centerline);
        Self {
            id: id.into(),
            name,
            highway: highway.into(),
            length_meters,
            geometry,
        }
    }

    /// Override the catalog length (the catalog may carry its own measurement).
    pub fn with_length(mut self, length_meters: f64) -> Self {
        self.length_meters = length_meters;
        self
    }

    /// Centerline as GPS points.
    pub fn points(&self) -> Vec<GpsPoint> {
        self.geometry.iter().copied().map(GpsPoint::from_lng_lat).collect()
    }
}

/// A street near one GPS point. Lives only inside candidate search and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct StreetCandidate {
    pub street_id: String,
    /// Distance from the point to the street centerline, meters
    pub distance: f64,
    /// Bearing of the street at the closest point, degrees
    pub bearing: f64,
}

/// Street assigned to one trace point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointAssignment {
    /// Original position of the point in the trace
    pub point_index: usize,
    /// Assigned street, `None` when no street was within range
    pub street_id: Option<String>,
}

/// A trace point paired with its original sequence position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint {
    pub index: usize,
    pub point: GpsPoint,
}

impl IndexedPoint {
    pub fn new(index: usize, point: GpsPoint) -> Self {
        Self { index, point }
    }

    /// Number every point of a trace by its position.
    pub fn from_trace(points: &[GpsPoint]) -> Vec<Self> {
        points
            .iter()
            .enumerate()
            .map(|(index, &point)| Self { index, point })
            .collect()
    }
}

/// Binary completion decision for a street.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    Full,
    Partial,
}

/// Span of a street's centerline that was traversed, in percent of its length.
///
/// Invariant: `0 <= start < end <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageInterval {
    pub start: f64,
    pub end: f64,
}

impl CoverageInterval {
    /// Build an interval, rejecting anything outside `0 <= start < end <= 100`.
    pub fn new(start: f64, end: f64) -> Option<Self> {
        if start.is_finite() && end.is_finite() && 0.0 <= start && start < end && end <= 100.0 {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Width of the interval in percentage points.
    pub fn span(&self) -> f64 {
        self.end - self.start
    }
}

/// Coverage of one street by one activity.
///
/// Created fresh per matching run and handed to the progress store, which
/// decides whether it improves on what was stored before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub street_id: String,
    pub name: Option<String>,
    pub highway: String,
    pub total_length_meters: f64,
    /// Distance summed only within consecutive runs of trace points
    pub distance_covered_meters: f64,
    /// Distance along the centerline, from projected positions
    pub projected_distance_meters: f64,
    /// `distance_covered_meters / total_length_meters`, may exceed 1.0
    pub coverage_ratio: f64,
    /// `projected_distance_meters / total_length_meters`, may exceed 1.0
    pub projected_coverage_ratio: f64,
    pub completion_status: CompletionStatus,
    pub matched_points_count: u32,
    pub coverage_interval: Option<CoverageInterval>,
    /// Centerline geometry, passed through from the catalog
    pub geometry: Vec<[f64; 2]>,
}

impl CoverageResult {
    pub fn is_full(&self) -> bool {
        self.completion_status == CompletionStatus::Full
    }
}

/// Configuration for street matching and coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Maximum distance from a point to a street for it to be a candidate.
    /// Default: 25.0 meters
    pub proximity_threshold: f64,

    /// Minimum matched points before a street can be FULL.
    /// Default: 3
    pub min_points_per_street: u32,

    /// Largest gap (percentage points) allowed before the start or after the
    /// end of the coverage interval when an inflated ratio needs verification.
    /// Default: 5.0
    pub interval_edge_tolerance: f64,

    /// Service confidence at or above which the snapped route is trusted.
    /// Default: 0.70
    pub high_confidence: f64,

    /// Service confidence at or above which the snapped route is still used.
    /// Default: 0.30
    pub medium_confidence: f64,

    /// Service confidence at or above which matched points are used and the
    /// rest is matched locally. Below this the service result is discarded.
    /// Default: 0.10
    pub low_confidence: f64,

    /// Spacing used to densify snapped service geometry before it is matched
    /// against the catalog. Default: 10.0 meters
    pub densify_spacing: f64,

    /// How snapped geometry is related back to catalog streets.
    /// Default: geometry-based
    pub cross_reference: strategy::CrossReferenceMode,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 25.0,
            min_points_per_street: 3,
            interval_edge_tolerance: 5.0,
            high_confidence: 0.70,
            medium_confidence: 0.30,
            low_confidence: 0.10,
            densify_spacing: 10.0,
            cross_reference: strategy::CrossReferenceMode::Geometry,
        }
    }
}

impl CoverageConfig {
    /// Classifier configured from these settings.
    pub fn classifier(&self) -> CompletionClassifier {
        CompletionClassifier {
            min_points: self.min_points_per_street,
            edge_tolerance: self.interval_edge_tolerance,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
