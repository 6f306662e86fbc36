//! End-to-end tests of the public matching API on synthetic street grids.

use street_coverage::strategy::CrossReferenceMode;
use street_coverage::{
    classify_completion, consecutive_distance, match_local, merge_coverage_results,
    CompletionStatus, CoverageConfig, CoverageError, CoverageInterval, GpsPoint, HybridMatcher,
    IndexedPoint, MatchMethod, SnapProvider, SnapResult, SnapStep, StreetSegment, Tracepoint,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// ~222m street running north along lon -0.1.
fn mill_road() -> StreetSegment {
    StreetSegment::new(
        "way/1",
        Some("Mill Road".to_string()),
        "residential",
        vec![[-0.1, 51.500], [-0.1, 51.502]],
    )
}

/// ~208m street running east, crossing Mill Road at its midpoint.
fn cross_street() -> StreetSegment {
    StreetSegment::new(
        "way/2",
        Some("Cross Street".to_string()),
        "residential",
        vec![[-0.1015, 51.501], [-0.0985, 51.501]],
    )
}

/// Points every ~11m heading north along Mill Road, slightly off-center.
fn northbound(from_step: usize, to_step: usize) -> Vec<GpsPoint> {
    (from_step..=to_step)
        .map(|i| GpsPoint::new(51.500 + i as f64 * 0.0001, -0.10002))
        .collect()
}

fn southbound(from_step: usize, to_step: usize) -> Vec<GpsPoint> {
    let mut pts = northbound(from_step, to_step);
    pts.reverse();
    pts
}

struct FakeProvider {
    response: Result<SnapResult, CoverageError>,
}

impl SnapProvider for FakeProvider {
    fn is_configured(&self) -> bool {
        true
    }

    fn snap(&self, _points: &[GpsPoint]) -> street_coverage::Result<SnapResult> {
        self.response.clone()
    }
}

fn snapped_mill_road(confidence: f64) -> SnapResult {
    let geometry = vec![GpsPoint::new(51.500, -0.1), GpsPoint::new(51.502, -0.1)];
    SnapResult {
        confidence,
        distance: 222.4,
        steps: vec![SnapStep {
            name: Some("Mill Rd".to_string()),
            distance: 222.4,
            geometry: geometry.clone(),
        }],
        tracepoints: vec![],
        geometry,
    }
}

// ============================================================================
// Local matching
// ============================================================================

#[test]
fn test_full_street_with_crossing() {
    init_logging();
    let streets = vec![mill_road(), cross_street()];
    let results = match_local(&northbound(0, 20), &streets, &CoverageConfig::default());

    assert_eq!(results[0].street_id, "way/1");
    assert_eq!(results[0].completion_status, CompletionStatus::Full);
    assert_eq!(results[0].matched_points_count, 21);

    // Heading north, the intersection points stay on Mill Road
    assert!(results.iter().all(|r| r.street_id != "way/2" || !r.is_full()));
}

#[test]
fn test_empty_inputs() {
    let config = CoverageConfig::default();
    assert!(match_local(&[], &[mill_road()], &config).is_empty());
    assert!(match_local(&northbound(0, 20), &[], &config).is_empty());
}

#[test]
fn test_trace_far_from_catalog() {
    let far: Vec<GpsPoint> = (0..10)
        .map(|i| GpsPoint::new(51.6 + i as f64 * 0.0001, -0.2))
        .collect();
    assert!(match_local(&far, &[mill_road()], &CoverageConfig::default()).is_empty());
}

#[test]
fn test_revisit_does_not_bridge_gap() {
    // Bottom quarter, a detour away from every street, then the top quarter
    let mut trace = northbound(0, 5);
    trace.extend((0..5).map(|i| GpsPoint::new(51.501, -0.105 - i as f64 * 0.0001)));
    trace.extend(northbound(15, 20));

    let results = match_local(&trace, &[mill_road()], &CoverageConfig::default());
    assert_eq!(results.len(), 1);
    let r = &results[0];

    // Two runs of 5 gaps each (~111m), never the ~111m jump between them
    assert!(r.distance_covered_meters > 100.0 && r.distance_covered_meters < 120.0);
    assert_eq!(r.completion_status, CompletionStatus::Partial);
}

#[test]
fn test_out_and_back_full_length_is_full() {
    let mut trace = northbound(0, 20);
    trace.extend(southbound(0, 19));

    let results = match_local(&trace, &[mill_road()], &CoverageConfig::default());
    let r = &results[0];
    assert!(r.projected_coverage_ratio > 1.5);
    assert_eq!(r.coverage_interval, CoverageInterval::new(0.0, 100.0));
    assert_eq!(r.completion_status, CompletionStatus::Full);
}

#[test]
fn test_out_and_back_part_way_is_partial() {
    let mut trace = northbound(0, 12);
    trace.extend(southbound(0, 11));

    let results = match_local(&trace, &[mill_road()], &CoverageConfig::default());
    let r = &results[0];
    assert!(r.projected_coverage_ratio > 1.0);
    let interval = r.coverage_interval.unwrap();
    assert!(interval.end <= 62.0);
    assert_eq!(r.completion_status, CompletionStatus::Partial);
}

#[test]
fn test_results_serialize_for_progress_store() {
    let results = match_local(&northbound(0, 20), &[mill_road()], &CoverageConfig::default());
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json[0]["completion_status"], "FULL");
    assert_eq!(json[0]["street_id"], "way/1");
}

// ============================================================================
// Laws and classification scenarios
// ============================================================================

#[test]
fn test_consecutive_distance_law() {
    let trace = northbound(0, 21);
    let points: Vec<IndexedPoint> = [5, 6, 7, 20, 21]
        .iter()
        .map(|&i| IndexedPoint::new(i, trace[i]))
        .collect();

    let step = street_coverage::geo_utils::haversine_distance(&trace[0], &trace[1]);
    assert!((consecutive_distance(&points) - 3.0 * step).abs() < 0.01);
}

#[test]
fn test_classification_scenarios() {
    assert_eq!(classify_completion(0.96, 200.0, None, 10), CompletionStatus::Full);
    assert_eq!(
        classify_completion(1.5, 200.0, CoverageInterval::new(0.0, 60.0).as_ref(), 10),
        CompletionStatus::Partial
    );
    assert_eq!(classify_completion(0.30, 40.0, None, 5), CompletionStatus::Partial);
    assert_eq!(classify_completion(0.99, 500.0, None, 2), CompletionStatus::Partial);
}

#[test]
fn test_merge_identity_and_dedup() {
    let config = CoverageConfig::default();
    let full = match_local(&northbound(0, 20), &[mill_road(), cross_street()], &config);
    assert_eq!(merge_coverage_results(full.clone(), vec![]), full);

    let half = match_local(&northbound(0, 10), &[mill_road()], &config);
    let merged = merge_coverage_results(half, full.clone());
    let mill: Vec<_> = merged.iter().filter(|r| r.street_id == "way/1").collect();
    assert_eq!(mill.len(), 1);
    assert_eq!(mill[0].distance_covered_meters, full[0].distance_covered_meters);
}

// ============================================================================
// Hybrid orchestration
// ============================================================================

#[test]
fn test_hybrid_local_only_matches_local() {
    let streets = vec![mill_road(), cross_street()];
    let trace = northbound(0, 20);
    let config = CoverageConfig::default();

    let outcome = HybridMatcher::local_only(config.clone()).match_trace(&trace, &streets);
    assert_eq!(outcome.method, MatchMethod::Local);
    assert_eq!(outcome.results, match_local(&trace, &streets, &config));
}

#[test]
fn test_hybrid_service_failure_falls_back() {
    init_logging();
    let streets = vec![mill_road(), cross_street()];
    let trace = northbound(0, 20);
    let config = CoverageConfig::default();

    let provider = FakeProvider {
        response: Err(CoverageError::RateLimited { retry_after_secs: Some(30) }),
    };
    let outcome =
        HybridMatcher::new(Box::new(provider), config.clone()).match_trace(&trace, &streets);

    assert_eq!(outcome.method, MatchMethod::LocalFallback);
    assert_eq!(outcome.results, match_local(&trace, &streets, &config));
}

#[test]
fn test_hybrid_confident_service_route() {
    let streets = vec![mill_road(), cross_street()];
    // The raw trace is noisy and short; the service route is trusted instead
    let trace = northbound(0, 4);

    let provider = FakeProvider {
        response: Ok(snapped_mill_road(0.92)),
    };
    let outcome = HybridMatcher::new(Box::new(provider), CoverageConfig::default())
        .match_trace(&trace, &streets);

    assert_eq!(outcome.method, MatchMethod::Snapped);
    assert_eq!(outcome.results[0].street_id, "way/1");
    assert!(outcome.results[0].is_full());
}

#[test]
fn test_hybrid_legacy_name_strategy() {
    let config = CoverageConfig {
        cross_reference: CrossReferenceMode::LegacyName,
        ..CoverageConfig::default()
    };
    let provider = FakeProvider {
        response: Ok(snapped_mill_road(0.5)),
    };
    let outcome = HybridMatcher::new(Box::new(provider), config)
        .match_trace(&northbound(0, 20), &[mill_road(), cross_street()]);

    assert_eq!(outcome.method, MatchMethod::Snapped);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].street_id, "way/1");
    assert!(outcome.results[0].coverage_interval.is_none());
}

#[test]
fn test_hybrid_low_confidence_keeps_unmatched_points() {
    let trace = northbound(0, 20);
    // Service matched only the southern half
    let mut snap = snapped_mill_road(0.15);
    snap.tracepoints = trace
        .iter()
        .enumerate()
        .map(|(i, p)| {
            (i <= 10).then(|| Tracepoint {
                location: GpsPoint::new(p.latitude, -0.1),
                matchings_index: 0,
            })
        })
        .collect();

    let provider = FakeProvider { response: Ok(snap) };
    let outcome = HybridMatcher::new(Box::new(provider), CoverageConfig::default())
        .match_trace(&trace, &[mill_road()]);

    assert_eq!(outcome.method, MatchMethod::Hybrid);
    assert_eq!(outcome.confidence, Some(0.15));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].completion_status, CompletionStatus::Partial);
}

#[test]
fn test_hybrid_very_low_confidence_ignores_service() {
    let streets = vec![mill_road()];
    let trace = northbound(0, 20);
    let config = CoverageConfig::default();

    let provider = FakeProvider {
        response: Ok(snapped_mill_road(0.02)),
    };
    let outcome =
        HybridMatcher::new(Box::new(provider), config.clone()).match_trace(&trace, &streets);

    assert_eq!(outcome.method, MatchMethod::LocalFallback);
    assert_eq!(outcome.results, match_local(&trace, &streets, &config));
}
