//! Grouping assigned points by street.
//!
//! Downstream coverage math depends on the original sequence position of
//! every point, so groups are kept in trace order and runs are split on any
//! gap in that position.

use std::collections::HashMap;

use crate::{IndexedPoint, PointAssignment};

/// Group trace points by their assigned street, dropping unassigned points.
///
/// `assignments[i]` must belong to `trace[i]`. Each group is sorted by
/// original index, independent of the order the assignments were produced in.
pub fn group_by_street(
    trace: &[IndexedPoint],
    assignments: &[PointAssignment],
) -> HashMap<String, Vec<IndexedPoint>> {
    let mut groups: HashMap<String, Vec<IndexedPoint>> = HashMap::new();

    for (tp, assignment) in trace.iter().zip(assignments) {
        if let Some(street_id) = &assignment.street_id {
            groups
                .entry(street_id.clone())
                .or_default()
                .push(IndexedPoint::new(assignment.point_index, tp.point));
        }
    }

    for points in groups.values_mut() {
        points.sort_by_key(|p| p.index);
    }

    groups
}

/// Split index-sorted points into maximal runs of consecutive original indices.
///
/// Runs are never bridged: `[5, 6, 7, 20, 21]` yields `[5, 6, 7]` and `[20, 21]`.
pub fn consecutive_runs(points: &[IndexedPoint]) -> Vec<&[IndexedPoint]> {
    let mut runs = Vec::new();
    let mut start = 0;

    for i in 1..=points.len() {
        let breaks = i == points.len() || points[i].index != points[i - 1].index + 1;
        if breaks {
            runs.push(&points[start..i]);
            start = i;
        }
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    fn at(index: usize) -> IndexedPoint {
        IndexedPoint::new(index, GpsPoint::new(51.5 + index as f64 * 0.0001, -0.1))
    }

    fn assigned(index: usize, street: Option<&str>) -> PointAssignment {
        PointAssignment {
            point_index: index,
            street_id: street.map(str::to_string),
        }
    }

    #[test]
    fn test_group_by_street_drops_unassigned() {
        let trace: Vec<IndexedPoint> = (0..5).map(at).collect();
        let assignments = vec![
            assigned(0, Some("a")),
            assigned(1, None),
            assigned(2, Some("b")),
            assigned(3, Some("a")),
            assigned(4, None),
        ];
        let groups = group_by_street(&trace, &assignments);

        assert_eq!(groups.len(), 2);
        let a: Vec<usize> = groups["a"].iter().map(|p| p.index).collect();
        assert_eq!(a, vec![0, 3]);
        assert_eq!(groups["b"].len(), 1);
    }

    #[test]
    fn test_group_sorted_by_original_index() {
        // Assignments produced out of order still come back in trace order
        let trace = vec![at(9), at(2), at(5)];
        let assignments = vec![
            assigned(9, Some("a")),
            assigned(2, Some("a")),
            assigned(5, Some("a")),
        ];
        let groups = group_by_street(&trace, &assignments);
        let idx: Vec<usize> = groups["a"].iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![2, 5, 9]);
    }

    #[test]
    fn test_consecutive_runs_split_on_gaps() {
        let points: Vec<IndexedPoint> = [5, 6, 7, 20, 21].into_iter().map(at).collect();
        let runs = consecutive_runs(&points);

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].iter().map(|p| p.index).collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(runs[1].iter().map(|p| p.index).collect::<Vec<_>>(), vec![20, 21]);
    }

    #[test]
    fn test_consecutive_runs_edge_cases() {
        assert!(consecutive_runs(&[]).is_empty());

        let singles: Vec<IndexedPoint> = [1, 3, 5].into_iter().map(at).collect();
        let runs = consecutive_runs(&singles);
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.len() == 1));
    }
}
