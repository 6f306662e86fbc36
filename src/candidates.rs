//! Candidate street search.
//!
//! For one GPS point, find every street whose centerline lies within the
//! proximity threshold, with the distance and the street's local bearing at
//! the closest point. Results are sorted by distance, nearest first.
//!
//! [`StreetIndex`] pre-filters streets with an R-tree over their bounding
//! boxes before doing exact projections. [`find_candidates`] is the plain
//! linear scan; both return the same candidates.

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::{compute_bounds, meters_to_degrees, project_onto_polyline, segment_bearing};
use crate::{GpsPoint, StreetCandidate, StreetSegment};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Bounding box of one catalog street, for R-tree indexing.
#[derive(Debug, Clone)]
struct StreetEnvelope {
    street_idx: usize,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl RTreeObject for StreetEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Measure one street against one point.
fn candidate_for(
    point: &GpsPoint,
    street_id: &str,
    polyline: &[GpsPoint],
    threshold: f64,
) -> Option<StreetCandidate> {
    let proj = project_onto_polyline(point, polyline)?;
    if proj.distance > threshold {
        return None;
    }
    Some(StreetCandidate {
        street_id: street_id.to_string(),
        distance: proj.distance,
        bearing: segment_bearing(polyline, proj.segment_index),
    })
}

fn sort_by_distance(candidates: &mut [StreetCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.street_id.cmp(&b.street_id))
    });
}

/// Find every street within `threshold` meters of `point`, nearest first.
///
/// Invalid points and an empty catalog yield no candidates.
///
/// # Example
/// ```
/// use street_coverage::{find_candidates, GpsPoint, StreetSegment};
///
/// let streets = vec![StreetSegment::new(
///     "way/1", None, "residential",
///     vec![[-0.1, 51.500], [-0.1, 51.501]],
/// )];
/// let near = GpsPoint::new(51.5005, -0.10005);
/// let far = GpsPoint::new(51.5005, -0.102);
///
/// assert_eq!(find_candidates(&near, &streets, 25.0).len(), 1);
/// assert!(find_candidates(&far, &streets, 25.0).is_empty());
/// ```
pub fn find_candidates(
    point: &GpsPoint,
    streets: &[StreetSegment],
    threshold: f64,
) -> Vec<StreetCandidate> {
    if !point.is_valid() {
        return Vec::new();
    }

    let mut candidates: Vec<StreetCandidate> = streets
        .iter()
        .filter_map(|s| candidate_for(point, &s.id, &s.points(), threshold))
        .collect();
    sort_by_distance(&mut candidates);
    candidates
}

/// Spatial index over a street catalog for repeated candidate queries.
pub struct StreetIndex<'a> {
    streets: &'a [StreetSegment],
    polylines: Vec<Vec<GpsPoint>>,
    tree: RTree<StreetEnvelope>,
}

impl<'a> StreetIndex<'a> {
    /// Build the index. Streets without geometry are skipped.
    pub fn new(streets: &'a [StreetSegment]) -> Self {
        let polylines: Vec<Vec<GpsPoint>> = streets.iter().map(|s| s.points()).collect();

        let envelopes: Vec<StreetEnvelope> = polylines
            .iter()
            .enumerate()
            .filter(|(_, pts)| !pts.is_empty())
            .map(|(street_idx, pts)| {
                let b = compute_bounds(pts);
                StreetEnvelope {
                    street_idx,
                    min_lat: b.min_lat,
                    max_lat: b.max_lat,
                    min_lng: b.min_lng,
                    max_lng: b.max_lng,
                }
            })
            .collect();

        debug!("[StreetIndex] Indexed {} of {} streets", envelopes.len(), streets.len());

        Self {
            streets,
            polylines,
            tree: RTree::bulk_load(envelopes),
        }
    }

    /// The catalog this index was built from.
    pub fn streets(&self) -> &'a [StreetSegment] {
        self.streets
    }

    /// Number of streets in the catalog.
    pub fn len(&self) -> usize {
        self.streets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streets.is_empty()
    }

    /// Centerline of a street, looked up by catalog position.
    pub fn polyline(&self, street_idx: usize) -> &[GpsPoint] {
        &self.polylines[street_idx]
    }

    /// Find every street within `threshold` meters of `point`, nearest first.
    pub fn candidates(&self, point: &GpsPoint, threshold: f64) -> Vec<StreetCandidate> {
        if !point.is_valid() {
            return Vec::new();
        }

        let buffer = meters_to_degrees(threshold, point.latitude);
        let search = AABB::from_corners(
            [point.longitude - buffer, point.latitude - buffer],
            [point.longitude + buffer, point.latitude + buffer],
        );

        let mut candidates: Vec<StreetCandidate> = self
            .tree
            .locate_in_envelope_intersecting(&search)
            .filter_map(|env| {
                candidate_for(
                    point,
                    &self.streets[env.street_idx].id,
                    &self.polylines[env.street_idx],
                    threshold,
                )
            })
            .collect();
        sort_by_distance(&mut candidates);
        candidates
    }

    /// Candidates for every point of a trace, in trace order.
    #[cfg(not(feature = "parallel"))]
    pub fn candidates_for_trace(
        &self,
        points: &[GpsPoint],
        threshold: f64,
    ) -> Vec<Vec<StreetCandidate>> {
        points.iter().map(|p| self.candidates(p, threshold)).collect()
    }

    /// Candidates for every point of a trace, in trace order.
    #[cfg(feature = "parallel")]
    pub fn candidates_for_trace(
        &self,
        points: &[GpsPoint],
        threshold: f64,
    ) -> Vec<Vec<StreetCandidate>> {
        points.par_iter().map(|p| self.candidates(p, threshold)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two parallel north-south streets ~70m apart and one east-west street.
    fn grid() -> Vec<StreetSegment> {
        vec![
            StreetSegment::new(
                "ns-west",
                Some("West Lane".into()),
                "residential",
                vec![[-0.1000, 51.500], [-0.1000, 51.502]],
            ),
            StreetSegment::new(
                "ns-east",
                Some("East Lane".into()),
                "residential",
                vec![[-0.0990, 51.500], [-0.0990, 51.502]],
            ),
            StreetSegment::new(
                "ew",
                Some("Cross Street".into()),
                "tertiary",
                vec![[-0.1010, 51.501], [-0.0980, 51.501]],
            ),
        ]
    }

    #[test]
    fn test_no_candidates_far_away() {
        let streets = grid();
        let p = GpsPoint::new(51.6, -0.2);
        assert!(find_candidates(&p, &streets, 25.0).is_empty());
        assert!(StreetIndex::new(&streets).candidates(&p, 25.0).is_empty());
    }

    #[test]
    fn test_empty_catalog() {
        let p = GpsPoint::new(51.5, -0.1);
        assert!(find_candidates(&p, &[], 25.0).is_empty());
        let index = StreetIndex::new(&[]);
        assert!(index.is_empty());
        assert!(index.candidates(&p, 25.0).is_empty());
    }

    #[test]
    fn test_intersection_yields_two_sorted_candidates() {
        let streets = grid();
        // Just east of the West Lane / Cross Street intersection
        let p = GpsPoint::new(51.50102, -0.09995);
        let found = StreetIndex::new(&streets).candidates(&p, 25.0);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].street_id, "ew");
        assert_eq!(found[1].street_id, "ns-west");
        assert!(found[0].distance <= found[1].distance);
        assert!((found[0].bearing - 90.0).abs() < 1.0);
        assert!(found[1].bearing < 1.0 || found[1].bearing > 359.0);
    }

    #[test]
    fn test_index_matches_linear_scan() {
        let streets = grid();
        let index = StreetIndex::new(&streets);
        for i in 0..40 {
            let p = GpsPoint::new(51.4995 + i as f64 * 0.00007, -0.1003 + i as f64 * 0.00004);
            assert_eq!(index.candidates(&p, 25.0), find_candidates(&p, &streets, 25.0));
        }
    }

    #[test]
    fn test_threshold_is_inclusive_limit() {
        let streets = grid();
        // ~13.9m east of West Lane (0.0002 deg lon at 51.5N)
        let p = GpsPoint::new(51.5005, -0.0998);
        assert!(find_candidates(&p, &streets, 10.0).is_empty());
        let found = find_candidates(&p, &streets, 25.0);
        assert_eq!(found.len(), 1);
        assert!(found[0].distance <= 25.0);
    }

    #[test]
    fn test_invalid_point_has_no_candidates() {
        let streets = grid();
        let p = GpsPoint::new(f64::NAN, -0.1);
        assert!(find_candidates(&p, &streets, 25.0).is_empty());
        assert!(StreetIndex::new(&streets).candidates(&p, 25.0).is_empty());
    }

    #[test]
    fn test_candidates_for_trace_keeps_order() {
        let streets = grid();
        let index = StreetIndex::new(&streets);
        let trace = vec![
            GpsPoint::new(51.5005, -0.10001),
            GpsPoint::new(51.7, -0.1),
            GpsPoint::new(51.5005, -0.09901),
        ];
        let all = index.candidates_for_trace(&trace, 25.0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0][0].street_id, "ns-west");
        assert!(all[1].is_empty());
        assert_eq!(all[2][0].street_id, "ns-east");
    }
}
