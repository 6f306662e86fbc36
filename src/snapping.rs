//! Map-matching service model.
//!
//! Provider-neutral types for a snapped trace, the [`SnapProvider`] seam the
//! orchestrator calls through, and the pieces of the request/response cycle
//! that do not need a network: splitting oversized traces into overlapping
//! chunks, stitching chunk results back together, and decoding the
//! Mapbox-compatible JSON response.

use std::ops::Range;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};
use crate::geo_utils::haversine_distance;
use crate::GpsPoint;

/// Environment variable holding the service access token.
pub const ACCESS_TOKEN_ENV: &str = "MAPBOX_ACCESS_TOKEN";

/// Fewest coordinates the service accepts in one request.
pub const MIN_SERVICE_POINTS: usize = 2;

/// Snapped coordinates closer than this at a chunk boundary are duplicates.
const DUPLICATE_TOLERANCE_M: f64 = 0.5;

/// How many trailing coordinates of the merged geometry are checked for duplicates.
const DUPLICATE_WINDOW: usize = 64;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the external map-matching service.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapConfig {
    /// Access token. `None` or empty means the service is not configured.
    pub access_token: Option<String>,
    /// Service base URL.
    /// Default: "https://api.mapbox.com"
    pub base_url: String,
    /// Routing profile.
    /// Default: "walking"
    pub profile: String,
    /// Maximum coordinates per request.
    /// Default: 100
    pub max_coordinates: usize,
    /// Coordinates shared between consecutive chunks.
    /// Default: 5
    pub chunk_overlap: usize,
    /// Per-point search radius in meters.
    /// Default: 25.0
    pub search_radius: f64,
    /// Request timeout.
    /// Default: 30s
    pub timeout: Duration,
    /// Minimum delay between request starts.
    /// Default: 200ms
    pub min_request_interval: Duration,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: "https://api.mapbox.com".to_string(),
            profile: "walking".to_string(),
            max_coordinates: 100,
            chunk_overlap: 5,
            search_radius: 25.0,
            timeout: Duration::from_secs(30),
            min_request_interval: Duration::from_millis(200),
        }
    }
}

impl SnapConfig {
    /// Default configuration with the token read from `MAPBOX_ACCESS_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            access_token: std::env::var(ACCESS_TOKEN_ENV).ok(),
            ..Self::default()
        }
    }

    /// Whether a usable access token is present.
    pub fn is_configured(&self) -> bool {
        self.access_token
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty())
    }

    /// Reject settings the chunking and request code cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_coordinates < MIN_SERVICE_POINTS {
            return Err(CoverageError::Config {
                message: format!(
                    "max_coordinates must be at least {}, got {}",
                    MIN_SERVICE_POINTS, self.max_coordinates
                ),
            });
        }
        if self.search_radius <= 0.0 || !self.search_radius.is_finite() {
            return Err(CoverageError::Config {
                message: format!("search_radius must be positive, got {}", self.search_radius),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Snapped trace model
// ============================================================================

/// One named step of a snapped route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapStep {
    pub name: Option<String>,
    /// Step length in meters
    pub distance: f64,
    pub geometry: Vec<GpsPoint>,
}

/// Where the service placed one input coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tracepoint {
    /// Snapped location
    pub location: GpsPoint,
    /// Which matching (route) of the response this point belongs to
    pub matchings_index: usize,
}

/// A whole trace as snapped by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapResult {
    /// Service confidence in `[0, 1]`
    pub confidence: f64,
    /// Snapped route geometry, in travel order
    pub geometry: Vec<GpsPoint>,
    /// Route length reported by the service, meters
    pub distance: f64,
    pub steps: Vec<SnapStep>,
    /// One entry per input coordinate; `None` where the service dropped it
    pub tracepoints: Vec<Option<Tracepoint>>,
}

impl SnapResult {
    /// Input positions the service matched, paired with their snapped location.
    pub fn matched_points(&self) -> Vec<(usize, GpsPoint)> {
        self.tracepoints
            .iter()
            .enumerate()
            .filter_map(|(i, tp)| tp.map(|t| (i, t.location)))
            .collect()
    }

    /// Input positions the service did not match.
    pub fn unmatched_indices(&self) -> Vec<usize> {
        self.tracepoints
            .iter()
            .enumerate()
            .filter(|(_, tp)| tp.is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

/// An external service that snaps a GPS trace onto its road network.
pub trait SnapProvider {
    /// Whether the provider has what it needs (credentials) to be called.
    fn is_configured(&self) -> bool;

    /// Snap a complete trace. Oversized traces are chunked by the provider.
    fn snap(&self, points: &[GpsPoint]) -> Result<SnapResult>;
}

// ============================================================================
// Chunking
// ============================================================================

/// Split `len` coordinates into request-sized ranges that share `overlap`
/// coordinates with their predecessor.
///
/// Every range holds at least 2 coordinates when `len >= 2`. The overlap is
/// clamped to `[1, max / 2]` so chunking always makes progress.
pub fn chunk_ranges(len: usize, max_coordinates: usize, overlap: usize) -> Vec<Range<usize>> {
    let max = max_coordinates.max(MIN_SERVICE_POINTS);
    if len <= max {
        return vec![0..len];
    }

    let overlap = overlap.clamp(1, max / 2);
    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max).min(len);
        ranges.push(start..end);
        if end == len {
            break;
        }
        start = end - overlap;
    }
    ranges
}

/// Stitch per-chunk results into one result for the whole trace.
///
/// Chunks must be passed in order with the ranges from [`chunk_ranges`].
/// Geometry is concatenated with leading coordinates of each later chunk
/// dropped while they duplicate the tail already collected. Tracepoints of
/// overlapped input coordinates come from the earlier chunk, and later
/// chunks' `matchings_index` values continue the earlier numbering.
/// Confidence is the mean weighted by chunk distance.
pub fn merge_chunk_results(chunks: Vec<(Range<usize>, SnapResult)>) -> Option<SnapResult> {
    let mut iter = chunks.into_iter();
    let (first_range, mut merged) = iter.next()?;

    let mut covered_until = first_range.end;
    let mut weighted_confidence = merged.confidence * merged.distance;
    let mut chunk_confidences = vec![merged.confidence];

    for (range, chunk) in iter {
        let tail_start = merged.geometry.len().saturating_sub(DUPLICATE_WINDOW);
        let skip = chunk
            .geometry
            .iter()
            .take_while(|c| {
                merged.geometry[tail_start..]
                    .iter()
                    .any(|t| haversine_distance(t, c) < DUPLICATE_TOLERANCE_M)
            })
            .count();
        debug!(
            "[merge_chunk_results] chunk {:?}: trimmed {} duplicate coordinates",
            range, skip
        );
        merged.geometry.extend_from_slice(&chunk.geometry[skip..]);

        // Matchings of this chunk are numbered after those already collected
        let matchings_before = merged
            .tracepoints
            .iter()
            .flatten()
            .map(|t| t.matchings_index + 1)
            .max()
            .unwrap_or(0);
        let already = covered_until.saturating_sub(range.start);
        merged.tracepoints.extend(
            chunk
                .tracepoints
                .into_iter()
                .skip(already)
                .map(|tp| {
                    tp.map(|t| Tracepoint {
                        matchings_index: t.matchings_index + matchings_before,
                        ..t
                    })
                }),
        );
        covered_until = range.end;

        merged.steps.extend(chunk.steps);
        merged.distance += chunk.distance;
        weighted_confidence += chunk.confidence * chunk.distance;
        chunk_confidences.push(chunk.confidence);
    }

    merged.confidence = if merged.distance > 0.0 {
        weighted_confidence / merged.distance
    } else {
        chunk_confidences.iter().sum::<f64>() / chunk_confidences.len() as f64
    };

    Some(merged)
}

// ============================================================================
// Response decoding (Mapbox Map Matching v5)
// ============================================================================

#[derive(Debug, Deserialize)]
struct MatchResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    matchings: Vec<ApiMatching>,
    #[serde(default)]
    tracepoints: Vec<Option<ApiTracepoint>>,
}

#[derive(Debug, Deserialize)]
struct ApiMatching {
    confidence: f64,
    #[serde(default)]
    distance: f64,
    geometry: ApiGeometry,
    #[serde(default)]
    legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    #[serde(default)]
    steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
struct ApiStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    distance: f64,
    geometry: Option<ApiGeometry>,
}

#[derive(Debug, Deserialize)]
struct ApiTracepoint {
    location: [f64; 2],
    #[serde(default)]
    matchings_index: usize,
}

fn to_points(coords: &[[f64; 2]]) -> Vec<GpsPoint> {
    coords.iter().copied().map(GpsPoint::from_lng_lat).collect()
}

/// Decode a map-matching response body.
///
/// Non-`Ok` codes become typed errors. Several matchings in one response are
/// concatenated, with confidence weighted by matching distance.
pub fn parse_match_response(body: &str) -> Result<SnapResult> {
    let response: MatchResponse = serde_json::from_str(body)?;
    let message = response.message.clone().unwrap_or_default();

    match response.code.as_str() {
        "Ok" => {}
        "NoMatch" | "NoSegment" => {
            return Err(CoverageError::NoMatch {
                code: response.code.clone(),
                message,
            })
        }
        "InvalidToken" | "NotAuthorized" => {
            return Err(CoverageError::MissingCredentials { message })
        }
        "TooManyCoordinates" | "InvalidInput" | "ProfileNotFound" => {
            return Err(CoverageError::RequestFailed {
                message: format!("{}: {}", response.code, message),
                status_code: None,
            })
        }
        other => {
            return Err(CoverageError::InvalidResponse {
                message: format!("unexpected code {}: {}", other, message),
            })
        }
    }

    if response.matchings.is_empty() {
        return Err(CoverageError::NoMatch {
            code: "NoMatch".to_string(),
            message: "response contained no matchings".to_string(),
        });
    }

    let mut geometry = Vec::new();
    let mut steps = Vec::new();
    let mut distance = 0.0;
    let mut weighted = 0.0;
    let mut confidence_sum = 0.0;

    for m in &response.matchings {
        geometry.extend(to_points(&m.geometry.coordinates));
        distance += m.distance;
        weighted += m.confidence * m.distance;
        confidence_sum += m.confidence;
        for leg in &m.legs {
            steps.extend(leg.steps.iter().map(|s| SnapStep {
                name: Some(s.name.clone()).filter(|n| !n.is_empty()),
                distance: s.distance,
                geometry: s
                    .geometry
                    .as_ref()
                    .map(|g| to_points(&g.coordinates))
                    .unwrap_or_default(),
            }));
        }
    }

    let confidence = if distance > 0.0 {
        weighted / distance
    } else {
        confidence_sum / response.matchings.len() as f64
    };

    let tracepoints = response
        .tracepoints
        .iter()
        .map(|tp| {
            tp.as_ref().map(|t| Tracepoint {
                location: GpsPoint::from_lng_lat(t.location),
                matchings_index: t.matchings_index,
            })
        })
        .collect();

    Ok(SnapResult {
        confidence: confidence.clamp(0.0, 1.0),
        geometry,
        distance,
        steps,
        tracepoints,
    })
}
