//! Trajectory-aware point assignment.
//!
//! Each point gets at most one street. With a single candidate the choice is
//! trivial; with several (typically at intersections) every candidate is
//! scored on three terms:
//!
//! | Term | Weight | Meaning |
//! |------|--------|---------|
//! | distance | 40 | `1 - distance / threshold` |
//! | bearing | 40 | `max(0, 1 - diff / 90)`, diff folded into `[0, 90]` |
//! | continuity | 20 | 1 if the previous point was assigned to the same street |
//!
//! The highest score wins. Candidates arrive sorted by distance and only a
//! strictly higher score replaces the current best, so ties go to the nearer
//! street.

use log::debug;

use crate::geo_utils::{bearing, haversine_distance};
use crate::{IndexedPoint, PointAssignment, StreetCandidate};

const DISTANCE_WEIGHT: f64 = 40.0;
const BEARING_WEIGHT: f64 = 40.0;
const CONTINUITY_WEIGHT: f64 = 20.0;

/// Neighbors closer than this carry no usable direction.
const MIN_TRAJECTORY_SPAN: f64 = 0.5;

/// Direction of travel at position `pos` of a trace, in degrees.
///
/// Uses the previous and next points (central difference); the first and
/// last points use their only neighbor. Returns `None` for a single-point
/// trace or when the neighbors coincide.
pub fn trajectory_bearing(trace: &[IndexedPoint], pos: usize) -> Option<f64> {
    if trace.len() < 2 || pos >= trace.len() {
        return None;
    }
    let from = &trace[pos.saturating_sub(1)].point;
    let to = &trace[(pos + 1).min(trace.len() - 1)].point;

    if haversine_distance(from, to) < MIN_TRAJECTORY_SPAN {
        return None;
    }
    Some(bearing(from, to))
}

/// Angle between a direction of travel and a street, folded into `[0, 90]`.
///
/// Streets are undirected, so running north on a north-south street and
/// running south on it are both a perfect match.
pub fn bearing_difference(trajectory: f64, street_bearing: f64) -> f64 {
    let diff = (trajectory - street_bearing).abs() % 360.0;
    let diff = diff.min(360.0 - diff);
    diff.min(180.0 - diff)
}

/// Score one candidate for a point. Higher is better, range `[0, 100]`.
///
/// Without a trajectory the bearing term contributes nothing.
pub fn score_candidate(
    candidate: &StreetCandidate,
    trajectory: Option<f64>,
    previous_street: Option<&str>,
    threshold: f64,
) -> f64 {
    let distance_score = if threshold > 0.0 {
        (1.0 - candidate.distance / threshold).max(0.0)
    } else {
        0.0
    };

    let bearing_score = trajectory
        .map(|t| (1.0 - bearing_difference(t, candidate.bearing) / 90.0).max(0.0))
        .unwrap_or(0.0);

    let continuity = match previous_street {
        Some(prev) if prev == candidate.street_id => 1.0,
        _ => 0.0,
    };

    DISTANCE_WEIGHT * distance_score
        + BEARING_WEIGHT * bearing_score
        + CONTINUITY_WEIGHT * continuity
}

/// Assign every point of a trace to at most one street.
///
/// `candidates[i]` holds the distance-sorted candidates of `trace[i]`.
/// Returns one assignment per point, in trace order. The continuity bonus
/// looks at the immediately preceding point only.
pub fn assign_points(
    trace: &[IndexedPoint],
    candidates: &[Vec<StreetCandidate>],
    threshold: f64,
) -> Vec<PointAssignment> {
    let mut assignments: Vec<PointAssignment> = Vec::with_capacity(trace.len());
    let mut ambiguous = 0usize;

    for (pos, tp) in trace.iter().enumerate() {
        let previous_street = assignments.last().and_then(|a| a.street_id.as_deref());
        let point_candidates = candidates.get(pos).map(Vec::as_slice).unwrap_or(&[]);

        let street_id = match point_candidates {
            [] => None,
            [only] => Some(only.street_id.clone()),
            many => {
                ambiguous += 1;
                let trajectory = trajectory_bearing(trace, pos);
                let mut best = &many[0];
                let mut best_score = score_candidate(best, trajectory, previous_street, threshold);
                for c in &many[1..] {
                    let score = score_candidate(c, trajectory, previous_street, threshold);
                    if score > best_score {
                        best = c;
                        best_score = score;
                    }
                }
                Some(best.street_id.clone())
            }
        };

        assignments.push(PointAssignment {
            point_index: tp.index,
            street_id,
        });
    }

    debug!(
        "[assign_points] {} points, {} assigned, {} needed disambiguation",
        trace.len(),
        assignments.iter().filter(|a| a.street_id.is_some()).count(),
        ambiguous
    );

    assignments
}
