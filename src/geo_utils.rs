//! # Geographic Utilities
//!
//! Geometry primitives used by every matching stage.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a polyline in meters |
//! | [`bearing`] | Initial bearing from one point to another, degrees in `[0, 360)` |
//! | [`project_onto_polyline`] | Closest point on a polyline plus distance along it |
//! | [`point_to_polyline_distance`] | Minimum distance from a point to a polyline |
//! | [`densify`] | Insert intermediate points so no gap exceeds a spacing |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`compute_bounds`] | Bounding box of a set of points |
//!
//! ## Projection
//!
//! Closest-point search works segment by segment in a local equirectangular
//! plane centred on the query point. At street scale (a few hundred meters)
//! the planar error is far below GPS noise. Distances reported back are
//! haversine distances to the projected point, so they agree with
//! [`haversine_distance`].
//!
//! All functions expect WGS84 coordinates in degrees.

use crate::{Bounds, GpsPoint};
use geo::{Bearing, Distance, Haversine, Point};

/// Mean Earth radius in meters (same value geo uses for haversine).
const EARTH_RADIUS: f64 = 6_371_008.8;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two GPS points in meters.
///
/// # Example
///
/// ```rust
/// use street_coverage::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 5000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters. Empty or single-point input returns 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Initial bearing from `from` to `to` in degrees, normalized to `[0, 360)`.
///
/// North is 0, east is 90. Identical points return 0.
pub fn bearing(from: &GpsPoint, to: &GpsPoint) -> f64 {
    if from.latitude == to.latitude && from.longitude == to.longitude {
        return 0.0;
    }
    let origin = Point::new(from.longitude, from.latitude);
    let destination = Point::new(to.longitude, to.latitude);
    normalize_bearing(Haversine::bearing(origin, destination))
}

/// Fold any angle in degrees into `[0, 360)`.
#[inline]
pub fn normalize_bearing(degrees: f64) -> f64 {
    let b = degrees % 360.0;
    if b < 0.0 {
        b + 360.0
    } else {
        b
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Result of projecting a point onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolylineProjection {
    /// Closest point on the polyline
    pub closest: GpsPoint,
    /// Distance from the query point to `closest`, meters
    pub distance: f64,
    /// Path length from the first vertex to `closest`, meters
    pub distance_along: f64,
    /// Index of the segment (vertex `i` to `i + 1`) containing `closest`
    pub segment_index: usize,
}

/// Local planar coordinates (meters) of `p` relative to `origin`.
#[inline]
fn to_local(origin: &GpsPoint, p: &GpsPoint, cos_lat: f64) -> (f64, f64) {
    let x = (p.longitude - origin.longitude).to_radians() * EARTH_RADIUS * cos_lat;
    let y = (p.latitude - origin.latitude).to_radians() * EARTH_RADIUS;
    (x, y)
}

/// Parameter `t` in `[0, 1]` of the closest point to `p` on segment `a -> b`.
fn closest_fraction(p: &GpsPoint, a: &GpsPoint, b: &GpsPoint) -> f64 {
    let cos_lat = p.latitude.to_radians().cos();
    let (ax, ay) = to_local(p, a, cos_lat);
    let (bx, by) = to_local(p, b, cos_lat);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return 0.0;
    }
    // p is the local origin, so (p - a) = (-ax, -ay)
    ((-ax * dx - ay * dy) / len_sq).clamp(0.0, 1.0)
}

#[inline]
fn interpolate(a: &GpsPoint, b: &GpsPoint, t: f64) -> GpsPoint {
    GpsPoint::new(
        a.latitude + t * (b.latitude - a.latitude),
        a.longitude + t * (b.longitude - a.longitude),
    )
}

/// Project a point onto a polyline.
///
/// Returns `None` for an empty polyline. A single-vertex polyline projects
/// onto that vertex with `distance_along = 0`.
///
/// # Example
///
/// ```rust
/// use street_coverage::{GpsPoint, geo_utils};
///
/// let street = vec![GpsPoint::new(51.5000, -0.1300), GpsPoint::new(51.5000, -0.1200)];
/// let runner = GpsPoint::new(51.5001, -0.1250);
///
/// let proj = geo_utils::project_onto_polyline(&runner, &street).unwrap();
/// assert!(proj.distance < 15.0);
/// assert!(proj.distance_along > 300.0 && proj.distance_along < 400.0);
/// ```
pub fn project_onto_polyline(
    point: &GpsPoint,
    polyline: &[GpsPoint],
) -> Option<PolylineProjection> {
    let first = polyline.first()?;
    if polyline.len() == 1 {
        return Some(PolylineProjection {
            closest: *first,
            distance: haversine_distance(point, first),
            distance_along: 0.0,
            segment_index: 0,
        });
    }

    let mut best: Option<PolylineProjection> = None;
    let mut walked = 0.0;

    for (i, w) in polyline.windows(2).enumerate() {
        let seg_len = haversine_distance(&w[0], &w[1]);
        let t = closest_fraction(point, &w[0], &w[1]);
        let closest = interpolate(&w[0], &w[1], t);
        let distance = haversine_distance(point, &closest);

        if best.map_or(true, |b| distance < b.distance) {
            best = Some(PolylineProjection {
                closest,
                distance,
                distance_along: walked + t * seg_len,
                segment_index: i,
            });
        }
        walked += seg_len;
    }

    best
}

/// Minimum distance in meters from a point to a polyline (`f64::INFINITY` if empty).
pub fn point_to_polyline_distance(point: &GpsPoint, polyline: &[GpsPoint]) -> f64 {
    project_onto_polyline(point, polyline).map_or(f64::INFINITY, |p| p.distance)
}

/// Bearing of the polyline segment containing a projection.
///
/// Degenerate polylines (fewer than 2 vertices) report 0.
pub fn segment_bearing(polyline: &[GpsPoint], segment_index: usize) -> f64 {
    match (polyline.get(segment_index), polyline.get(segment_index + 1)) {
        (Some(a), Some(b)) => bearing(a, b),
        _ => 0.0,
    }
}

/// Insert interpolated points so consecutive points are at most `spacing` meters apart.
///
/// Original vertices are kept. A non-positive spacing returns the input unchanged.
pub fn densify(points: &[GpsPoint], spacing: f64) -> Vec<GpsPoint> {
    if points.len() < 2 || spacing <= 0.0 {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(points.len());
    out.push(points[0]);
    for w in points.windows(2) {
        let seg = haversine_distance(&w[0], &w[1]);
        let steps = (seg / spacing).ceil() as usize;
        for s in 1..steps {
            out.push(interpolate(&w[0], &w[1], s as f64 / steps as f64));
        }
        out.push(w[1]);
    }
    out
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale (`cos(latitude)`), which is always the larger of
/// the two, so the result is conservative for square search windows.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

/// Bounding box of a set of points.
///
/// Empty input yields inverted MIN/MAX bounds that intersect nothing.
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    }
}

// =============================================================================
// Rounding
// =============================================================================

/// Round to a fixed number of decimal places.
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Distances are reported with 2 decimals.
#[inline]
pub fn round_distance(meters: f64) -> f64 {
    round_to(meters, 2)
}

/// Ratios are reported with 3 decimals.
#[inline]
pub fn round_ratio(ratio: f64) -> f64 {
    round_to(ratio, 3)
}

// =============================================================================
// Unit Tests
// =============================================================================
