//! Completion classification.
//!
//! Turns a coverage ratio into a FULL/PARTIAL decision. Short streets get a
//! lower bar because GPS drift is a larger share of their length:
//!
//! | Street length | Threshold |
//! |---------------|-----------|
//! | < 50 m | 0.85 |
//! | 50 - 100 m | 0.90 |
//! | 100 - 300 m | 0.95 |
//! | > 300 m | 0.98 |
//!
//! A ratio above 1.0 is a measurement artifact (drift, repeated passes,
//! service interpolation), so it is only trusted when the coverage interval
//! shows the whole street was actually traversed.

use crate::{CompletionStatus, CoverageInterval};

/// Default minimum matched points for a FULL street.
pub const MIN_POINTS_PER_STREET: u32 = 3;

/// Default allowed gap before the start / after the end of the interval, percent.
pub const INTERVAL_EDGE_TOLERANCE: f64 = 5.0;

/// Ratio a street of this length must reach to count as FULL.
///
/// Boundaries: 50 m belongs to the 0.90 band, 100 m and 300 m to the 0.95 band.
pub fn completion_threshold(length_meters: f64) -> f64 {
    if length_meters < 50.0 {
        0.85
    } else if length_meters < 100.0 {
        0.90
    } else if length_meters <= 300.0 {
        0.95
    } else {
        0.98
    }
}

/// FULL/PARTIAL decision rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionClassifier {
    /// Minimum matched points before a street can be FULL
    pub min_points: u32,
    /// Maximum gap at either end of the coverage interval, percentage points
    pub edge_tolerance: f64,
}

impl Default for CompletionClassifier {
    fn default() -> Self {
        Self {
            min_points: MIN_POINTS_PER_STREET,
            edge_tolerance: INTERVAL_EDGE_TOLERANCE,
        }
    }
}

impl CompletionClassifier {
    /// Classify a street.
    ///
    /// `ratio` is the uncapped projected coverage ratio. Pure function of its
    /// inputs.
    pub fn classify(
        &self,
        ratio: f64,
        length_meters: f64,
        interval: Option<&CoverageInterval>,
        matched_points: u32,
    ) -> CompletionStatus {
        if matched_points < self.min_points || !ratio.is_finite() {
            return CompletionStatus::Partial;
        }

        let threshold = completion_threshold(length_meters);
        if ratio.min(1.0) < threshold {
            return CompletionStatus::Partial;
        }

        if ratio <= 1.0 {
            return CompletionStatus::Full;
        }

        // Inflated ratio: require the interval to span (almost) the whole street
        let Some(interval) = interval else {
            return CompletionStatus::Partial;
        };
        let start_gap = interval.start;
        let end_gap = 100.0 - interval.end;
        if start_gap > self.edge_tolerance
            || end_gap > self.edge_tolerance
            || interval.span() < threshold * 100.0
        {
            return CompletionStatus::Partial;
        }

        CompletionStatus::Full
    }
}

/// Classify with the default rules (3 points, 5% edge tolerance).
///
/// # Example
/// ```
/// use street_coverage::{classify_completion, CompletionStatus};
///
/// assert_eq!(classify_completion(0.96, 200.0, None, 10), CompletionStatus::Full);
/// assert_eq!(classify_completion(0.99, 500.0, None, 2), CompletionStatus::Partial);
/// ```
pub fn classify_completion(
    ratio: f64,
    length_meters: f64,
    interval: Option<&CoverageInterval>,
    matched_points: u32,
) -> CompletionStatus {
    CompletionClassifier::default().classify(ratio, length_meters, interval, matched_points)
}
