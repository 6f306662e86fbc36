//! Merging coverage results from two sources.
//!
//! Used when part of a trace was matched through the external service and
//! the rest locally. Entries are deduplicated by street id; entries without
//! an id fall back to the normalized street name. On a collision the entry
//! with the longer consecutive distance wins and its ratios are recomputed
//! against the unchanged street length.

use std::collections::HashMap;

use crate::classifier::CompletionClassifier;
use crate::coverage::sort_results;
use crate::geo_utils::{round_distance, round_ratio};
use crate::CoverageResult;

/// Abbreviations expanded when normalizing street names.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("rd", "road"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("blvd", "boulevard"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("ct", "court"),
    ("pl", "place"),
    ("sq", "square"),
    ("hwy", "highway"),
    ("pkwy", "parkway"),
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
];

/// Normalize a street name for comparison across data sources.
///
/// Lowercases, strips punctuation, collapses whitespace and expands common
/// abbreviations, so `"Main St."` and `"main  street"` compare equal.
///
/// # Example
/// ```
/// use street_coverage::normalize_street_name;
/// assert_eq!(normalize_street_name("  N. Main St. "), "north main street");
/// ```
pub fn normalize_street_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| {
            ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == word)
                .map_or(word, |(_, full)| full)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Key used to detect two results describing the same street.
fn dedup_key(result: &CoverageResult) -> Option<String> {
    if !result.street_id.is_empty() {
        return Some(format!("id:{}", result.street_id));
    }
    result
        .name
        .as_deref()
        .map(normalize_street_name)
        .filter(|n| !n.is_empty())
        .map(|n| format!("name:{}", n))
}

/// Combine a colliding pair into one entry.
fn combine(
    existing: &CoverageResult,
    incoming: &CoverageResult,
    classifier: &CompletionClassifier,
) -> CoverageResult {
    let mut merged = if incoming.distance_covered_meters > existing.distance_covered_meters {
        incoming.clone()
    } else {
        existing.clone()
    };

    let total = merged.total_length_meters;
    let distance = existing.distance_covered_meters.max(incoming.distance_covered_meters);
    let projected = existing
        .projected_distance_meters
        .max(incoming.projected_distance_meters);

    merged.distance_covered_meters = round_distance(distance);
    merged.projected_distance_meters = round_distance(projected);
    merged.matched_points_count = existing.matched_points_count.max(incoming.matched_points_count);

    if total > 0.0 {
        merged.coverage_ratio = round_ratio(distance / total);
        merged.projected_coverage_ratio = round_ratio(projected / total);
    } else {
        merged.coverage_ratio = 0.0;
        merged.projected_coverage_ratio = 0.0;
    }

    merged.completion_status = classifier.classify(
        merged.projected_coverage_ratio,
        total,
        merged.coverage_interval.as_ref(),
        merged.matched_points_count,
    );
    merged
}

/// Merge two result lists with explicit classification rules.
///
/// Merging with an empty `secondary` returns `primary` untouched, order
/// included. Otherwise the result is sorted by distance covered, longest first.
pub fn merge_coverage_results_with(
    primary: Vec<CoverageResult>,
    secondary: Vec<CoverageResult>,
    classifier: &CompletionClassifier,
) -> Vec<CoverageResult> {
    if secondary.is_empty() {
        return primary;
    }

    let mut merged: Vec<CoverageResult> = Vec::with_capacity(primary.len() + secondary.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in primary.into_iter().chain(secondary) {
        match dedup_key(&result) {
            Some(key) => match positions.get(&key) {
                Some(&pos) => {
                    merged[pos] = combine(&merged[pos], &result, classifier);
                }
                None => {
                    positions.insert(key, merged.len());
                    merged.push(result);
                }
            },
            None => merged.push(result),
        }
    }

    sort_results(&mut merged);
    merged
}

/// Merge two result lists with the default classification rules.
pub fn merge_coverage_results(
    primary: Vec<CoverageResult>,
    secondary: Vec<CoverageResult>,
) -> Vec<CoverageResult> {
    merge_coverage_results_with(primary, secondary, &CompletionClassifier::default())
}
