//! HTTP client for the Mapbox Map Matching API with request spacing.
//!
//! - Traces over the per-request coordinate cap are split into overlapping
//!   chunks and sent one after another, never concurrently
//! - Every request waits for its dispatch slot on an owned [`RateLimiter`]
//! - No automatic retries; the first failing chunk aborts the whole match

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;

use crate::error::{CoverageError, Result};
use crate::snapping::{
    chunk_ranges, merge_chunk_results, parse_match_response, SnapConfig, SnapProvider, SnapResult,
    MIN_SERVICE_POINTS,
};
use crate::GpsPoint;

// ============================================================================
// Rate limiting
// ============================================================================

/// Configuration for [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Minimum delay between the start of two requests.
    /// Default: 200ms
    pub min_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
        }
    }
}

/// Spaces out when requests START.
///
/// Each caller reserves the next free dispatch slot under the lock and then
/// sleeps outside it, so callers are queued in arrival order rather than
/// rejected. Owned by whichever component issues the requests.
#[derive(Debug)]
pub struct RateLimiter {
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait for this caller's dispatch slot. Returns the 1-based dispatch number.
    pub async fn acquire(&self) -> u32 {
        let (wait, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.config.min_interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at.saturating_duration_since(now), num)
        };

        if wait > Duration::from_millis(5) {
            debug!("[RateLimiter] Dispatch #{} waiting {:?} for slot", dispatch_num, wait);
            tokio::time::sleep(wait).await;
        }

        dispatch_num
    }

    /// Number of slots handed out so far.
    pub fn dispatched(&self) -> u32 {
        self.dispatched_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Mapbox client
// ============================================================================

/// [`SnapProvider`] backed by the Mapbox Map Matching API v5.
///
/// The blocking [`SnapProvider::snap`] works with or without an ambient tokio
/// runtime; async callers use [`MapboxMatcher::match_trace_async`] directly.
pub struct MapboxMatcher {
    client: Client,
    config: SnapConfig,
    rate_limiter: RateLimiter,
}

impl MapboxMatcher {
    /// Create a matcher. Fails only on invalid settings or if the HTTP
    /// client cannot be built; a missing token is reported per request.
    pub fn new(config: SnapConfig) -> Result<Self> {
        config.validate()?;

        // Pooled connections are tied to the runtime that opened them, and
        // blocking calls may each run on a fresh runtime
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| CoverageError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            min_interval: config.min_request_interval,
        });

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Matcher configured from `MAPBOX_ACCESS_TOKEN` and default settings.
    pub fn from_env() -> Result<Self> {
        Self::new(SnapConfig::from_env())
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    /// Snap a full trace, chunking it sequentially when it exceeds the
    /// coordinate cap.
    pub async fn match_trace_async(&self, points: &[GpsPoint]) -> Result<SnapResult> {
        let token = self.token()?;
        if points.len() < MIN_SERVICE_POINTS {
            return Err(CoverageError::InsufficientPoints {
                point_count: points.len(),
                minimum_required: MIN_SERVICE_POINTS,
            });
        }

        let ranges = chunk_ranges(
            points.len(),
            self.config.max_coordinates,
            self.config.chunk_overlap,
        );
        info!(
            "[MapboxMatcher] Matching {} points in {} request(s)",
            points.len(),
            ranges.len()
        );

        let start = Instant::now();
        let mut chunks = Vec::with_capacity(ranges.len());
        for (i, range) in ranges.into_iter().enumerate() {
            let dispatch = self.rate_limiter.acquire().await;
            debug!(
                "[MapboxMatcher] Chunk {} ({:?}) dispatch #{}",
                i + 1,
                range,
                dispatch
            );
            let result = self.match_chunk(token, &points[range.clone()]).await?;
            chunks.push((range, result));
        }

        let merged =
            merge_chunk_results(chunks).ok_or_else(|| CoverageError::InvalidResponse {
                message: "no chunk results".to_string(),
            })?;

        info!(
            "[MapboxMatcher] Matched in {:.2}s: confidence {:.2}, {:.0}m, {} geometry points",
            start.elapsed().as_secs_f64(),
            merged.confidence,
            merged.distance,
            merged.geometry.len()
        );
        Ok(merged)
    }

    fn token(&self) -> Result<&str> {
        self.config
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoverageError::MissingCredentials {
                message: "access token not set".to_string(),
            })
    }

    async fn match_chunk(&self, token: &str, points: &[GpsPoint]) -> Result<SnapResult> {
        let url = format!(
            "{}/matching/v5/mapbox/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coordinate_path(points)
        );

        let mut query: Vec<(&str, String)> = vec![
            ("access_token", token.to_string()),
            ("geometries", "geojson".to_string()),
            ("overview", "full".to_string()),
            ("steps", "true".to_string()),
            ("radiuses", radiuses_param(points.len(), self.config.search_radius)),
        ];
        if let Some(timestamps) = timestamps_param(points) {
            query.push(("timestamps", timestamps));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(request_error)?;

        classify_response(status, retry_after.as_deref(), &body)
    }

    /// Run the async match to completion on a private current-thread runtime.
    fn block_on_fresh_runtime(&self, points: &[GpsPoint]) -> Result<SnapResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CoverageError::Config {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;
        runtime.block_on(self.match_trace_async(points))
    }
}

impl SnapProvider for MapboxMatcher {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn snap(&self, points: &[GpsPoint]) -> Result<SnapResult> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.match_trace_async(points)))
            }
            Ok(_) => {
                // A current-thread runtime cannot be blocked in place
                debug!("[MapboxMatcher] Current-thread runtime, matching on a worker thread");
                std::thread::scope(|scope| {
                    scope
                        .spawn(|| self.block_on_fresh_runtime(points))
                        .join()
                        .unwrap_or_else(|_| {
                            Err(CoverageError::RequestFailed {
                                message: "map matching worker thread panicked".to_string(),
                                status_code: None,
                            })
                        })
                })
            }
            Err(_) => self.block_on_fresh_runtime(points),
        }
    }
}

/// Turn an HTTP status, its `Retry-After` header and body into a snap result.
///
/// 401/403 mean the token was rejected and 429 means rate limited. Other
/// client errors carry a JSON body with the provider's code (`NoMatch`,
/// `InvalidInput`, ...); anything undecodable or any server error becomes
/// `RequestFailed` with the status.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> Result<SnapResult> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(CoverageError::MissingCredentials {
                message: format!("HTTP {}", status),
            });
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = retry_after.and_then(|v| v.trim().parse().ok());
            warn!("[MapboxMatcher] Got 429, retry after {:?}s", retry_after_secs);
            return Err(CoverageError::RateLimited { retry_after_secs });
        }
        _ => {}
    }

    if status.is_success() {
        return parse_match_response(body);
    }

    let failed = CoverageError::RequestFailed {
        message: format!("HTTP {}", status),
        status_code: Some(status.as_u16()),
    };
    if !status.is_client_error() {
        return Err(failed);
    }

    match parse_match_response(body) {
        Err(CoverageError::InvalidResponse { message }) => {
            debug!("[MapboxMatcher] Undecodable error body: {}", message);
            Err(failed)
        }
        Err(err) => Err(err),
        Ok(_) => Err(failed),
    }
}

fn request_error(e: reqwest::Error) -> CoverageError {
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    CoverageError::RequestFailed {
        message,
        status_code: e.status().map(|s| s.as_u16()),
    }
}

/// `lon,lat;lon,lat;...` path segment.
fn coordinate_path(points: &[GpsPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{:.6},{:.6}", p.longitude, p.latitude))
        .collect::<Vec<_>>()
        .join(";")
}

fn radiuses_param(count: usize, radius: f64) -> String {
    vec![format!("{}", radius); count].join(";")
}

/// Timestamps are sent only when every point carries one.
fn timestamps_param(points: &[GpsPoint]) -> Option<String> {
    points
        .iter()
        .map(|p| p.timestamp.map(|t| t.to_string()))
        .collect::<Option<Vec<_>>>()
        .map(|ts| ts.join(";"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoverageConfig, HybridMatcher, MatchMethod, StreetSegment};
    use std::sync::Arc;

    const OK_BODY: &str = r#"{
        "code": "Ok",
        "matchings": [{
            "confidence": 0.9,
            "distance": 222.4,
            "geometry": {"type": "LineString", "coordinates": [[-0.1, 51.5], [-0.1, 51.502]]},
            "legs": []
        }],
        "tracepoints": [{"location": [-0.1, 51.5], "matchings_index": 0}, null]
    }"#;

    /// Matcher pointed at a local port nothing listens on.
    fn unreachable_matcher() -> MapboxMatcher {
        MapboxMatcher::new(SnapConfig {
            access_token: Some("pk.test".into()),
            base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(2),
            ..SnapConfig::default()
        })
        .unwrap()
    }

    fn mill_road() -> StreetSegment {
        StreetSegment::new(
            "way/1",
            Some("Mill Road".into()),
            "residential",
            vec![[-0.1, 51.500], [-0.1, 51.502]],
        )
    }

    fn northbound() -> Vec<GpsPoint> {
        (0..=20)
            .map(|i| GpsPoint::new(51.500 + i as f64 * 0.0001, -0.10002))
            .collect()
    }

    #[tokio::test]
    async fn test_rate_limiter_first_request_immediate() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());

        let start = Instant::now();
        assert_eq!(limiter.acquire().await, 1);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            min_interval: Duration::from_millis(50),
        });

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Third dispatch starts two intervals after the first
        assert!(start.elapsed() >= Duration::from_millis(95));
        assert_eq!(limiter.dispatched(), 3);
    }

    #[tokio::test]
    async fn test_rate_limiter_queues_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            min_interval: Duration::from_millis(30),
        }));

        let start = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();

        let mut nums = Vec::new();
        for task in tasks {
            nums.push(task.await.unwrap());
        }
        nums.sort_unstable();
        assert_eq!(nums, vec![1, 2, 3, 4]);
        assert!(start.elapsed() >= Duration::from_millis(85));
    }

    #[test]
    fn test_query_params() {
        let points = vec![
            GpsPoint::new(51.5, -0.1).with_timestamp(100),
            GpsPoint::new(51.501, -0.1).with_timestamp(105),
        ];
        assert_eq!(coordinate_path(&points), "-0.100000,51.500000;-0.100000,51.501000");
        assert_eq!(radiuses_param(2, 25.0), "25;25");
        assert_eq!(timestamps_param(&points).as_deref(), Some("100;105"));

        let partial = vec![
            GpsPoint::new(51.5, -0.1).with_timestamp(100),
            GpsPoint::new(51.501, -0.1),
        ];
        assert_eq!(timestamps_param(&partial), None);
    }

    #[test]
    fn test_unconfigured_matcher_reports_missing_credentials() {
        let matcher = MapboxMatcher::new(SnapConfig::default()).unwrap();
        assert!(!matcher.is_configured());

        let points = vec![GpsPoint::new(51.5, -0.1), GpsPoint::new(51.501, -0.1)];
        let err = matcher.snap(&points).unwrap_err();
        assert_eq!(err.code(), "InvalidToken");
    }

    #[test]
    fn test_too_few_points() {
        let matcher = MapboxMatcher::new(SnapConfig {
            access_token: Some("pk.test".into()),
            ..SnapConfig::default()
        })
        .unwrap();

        let err = matcher.snap(&[GpsPoint::new(51.5, -0.1)]).unwrap_err();
        assert_eq!(
            err,
            CoverageError::InsufficientPoints {
                point_count: 1,
                minimum_required: 2
            }
        );
    }

    #[test]
    fn test_classify_rejected_token() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_response(status, None, "{}").unwrap_err();
            assert_eq!(err.code(), "InvalidToken");
        }
    }

    #[test]
    fn test_classify_rate_limited() {
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, Some(" 60 "), "").unwrap_err();
        assert_eq!(err, CoverageError::RateLimited { retry_after_secs: Some(60) });

        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, None, "").unwrap_err();
        assert_eq!(err, CoverageError::RateLimited { retry_after_secs: None });
    }

    #[test]
    fn test_classify_success_decodes_body() {
        let snap = classify_response(StatusCode::OK, None, OK_BODY).unwrap();
        assert!((snap.confidence - 0.9).abs() < 1e-9);
        assert_eq!(snap.unmatched_indices(), vec![1]);
    }

    #[test]
    fn test_classify_client_error_uses_provider_code() {
        let body = r#"{"code": "NoMatch", "message": "Could not match the trace."}"#;
        let err = classify_response(StatusCode::UNPROCESSABLE_ENTITY, None, body).unwrap_err();
        assert_eq!(err.code(), "NoMatch");

        let body = r#"{"code": "InvalidInput", "message": "Too few coordinates"}"#;
        let err = classify_response(StatusCode::UNPROCESSABLE_ENTITY, None, body).unwrap_err();
        assert_eq!(err.kind(), crate::SnapErrorKind::RequestFailed);
    }

    #[test]
    fn test_classify_undecodable_or_server_error() {
        let err = classify_response(StatusCode::NOT_FOUND, None, "<html>").unwrap_err();
        assert_eq!(
            err,
            CoverageError::RequestFailed {
                message: "HTTP 404 Not Found".into(),
                status_code: Some(404)
            }
        );

        // A 4xx claiming success is still a failure
        let err = classify_response(StatusCode::BAD_REQUEST, None, OK_BODY).unwrap_err();
        assert_eq!(err.kind(), crate::SnapErrorKind::RequestFailed);

        let body = r#"{"code": "NoMatch"}"#;
        let err = classify_response(StatusCode::BAD_GATEWAY, None, body).unwrap_err();
        assert_eq!(
            err,
            CoverageError::RequestFailed {
                message: "HTTP 502 Bad Gateway".into(),
                status_code: Some(502)
            }
        );
    }

    #[test]
    fn test_snap_without_runtime_reports_request_failure() {
        let err = unreachable_matcher().snap(&northbound()).unwrap_err();
        assert_eq!(err.kind(), crate::SnapErrorKind::RequestFailed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hybrid_inside_multi_thread_runtime_falls_back() {
        let provider = Box::new(unreachable_matcher());
        let matcher = HybridMatcher::new(provider, CoverageConfig::default());
        let outcome = matcher.match_trace(&northbound(), &[mill_road()]);

        assert_eq!(outcome.method, MatchMethod::LocalFallback);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_inside_current_thread_runtime_falls_back() {
        let provider = Box::new(unreachable_matcher());
        let matcher = HybridMatcher::new(provider, CoverageConfig::default());
        let outcome = matcher.match_trace(&northbound(), &[mill_road()]);

        assert_eq!(outcome.method, MatchMethod::LocalFallback);
        assert_eq!(outcome.results.len(), 1);
    }
}
