//! # Algorithm Toolbox
//!
//! Direct access to the geometry used by the recorder, for callers that want
//! the algorithms without a session.
//!
//! ## Geographic Utilities
//!
//! - **Haversine Distance**: Great-circle distance between track points
//! - **Bearing**: Initial great-circle bearing, `[0, 360)`
//! - **Polyline Length**: Total distance along a path
//! - **Bounds Computation**: Bounding box for a track
//!
//! ## Line Simplification
//!
//! - **Douglas-Peucker**: [`simplify`] reduces a track before rendering or export
//!
//! # Example
//!
//! ```rust
//! use hike_tracker::algorithms::{distance, simplify, TrackPoint};
//!
//! let a = TrackPoint::new(0.0, 0.0, 100.0, 0, 5.0, 1.0);
//! let b = TrackPoint::new(0.0, 0.001, 110.0, 3_000, 5.0, 1.0);
//! println!("{:.2} m", distance(&a, &b));
//!
//! let simplified = simplify(&[a, b], 1e-5);
//! assert_eq!(simplified.len(), 2);
//! ```

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{Bounds, Track, TrackPoint};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    bearing, cardinal_direction, direction_arrow, distance, distance_coords, polyline_length,
};

// =============================================================================
// Line Simplification
// =============================================================================

/// Douglas-Peucker line simplification.
///
/// Works on raw (longitude, latitude) pairs as planar coordinates, so
/// `tolerance` is in degrees. A longitude degree shrinks with latitude while
/// the tolerance does not; tracks far from the equator keep slightly more
/// east-west detail than north-south.
///
/// Inputs of 0, 1 or 2 points come back unchanged. The first and last point
/// are always kept and the output never has more points than the input.
///
/// # Example
/// ```rust
/// use hike_tracker::algorithms::{simplify, TrackPoint};
///
/// let track: Vec<TrackPoint> = (0..5)
///     .map(|i| TrackPoint::new(0.0, i as f64 * 0.001, 0.0, i, 5.0, 0.0))
///     .collect();
/// // Colinear points collapse to the two endpoints
/// assert_eq!(simplify(&track, 0.0).len(), 2);
/// ```
pub fn simplify(points: &[TrackPoint], tolerance: f64) -> Vec<TrackPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    simplify_indices(points, tolerance)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

/// [`simplify`] with the default tolerance of 1e-5 degrees.
pub fn simplify_default(points: &[TrackPoint]) -> Vec<TrackPoint> {
    simplify(points, crate::DEFAULT_SIMPLIFY_TOLERANCE)
}

/// Indices of the points [`simplify`] keeps, ascending.
pub fn simplify_indices(points: &[TrackPoint], tolerance: f64) -> Vec<usize> {
    if points.len() <= 2 {
        return (0..points.len()).collect();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    // Explicit stack of (start, end) index ranges instead of recursion, so a
    // pathological track cannot exhaust the call stack.
    let mut ranges = vec![(0, points.len() - 1)];

    while let Some((start, end)) = ranges.pop() {
        if end <= start + 1 {
            continue;
        }

        let line_start = &points[start];
        let line_end = &points[end];

        let mut max_dist = 0.0;
        let mut max_idx = start;

        for (i, point) in points.iter().enumerate().take(end).skip(start + 1) {
            let dist = perpendicular_distance(point, line_start, line_end);
            if dist > max_dist {
                max_dist = dist;
                max_idx = i;
            }
        }

        if max_idx > start && max_dist > tolerance {
            keep[max_idx] = true;
            ranges.push((max_idx, end));
            ranges.push((start, max_idx));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, &k)| if k { Some(i) } else { None })
        .collect()
}

/// Planar distance in degrees from `point` to the segment between
/// `line_start` and `line_end`, clamped to the segment ends.
fn perpendicular_distance(
    point: &TrackPoint,
    line_start: &TrackPoint,
    line_end: &TrackPoint,
) -> f64 {
    let dx = line_end.longitude - line_start.longitude;
    let dy = line_end.latitude - line_start.latitude;

    let mag_sq = dx * dx + dy * dy;
    if mag_sq == 0.0 {
        return 0.0;
    }

    let u = ((point.longitude - line_start.longitude) * dx
        + (point.latitude - line_start.latitude) * dy)
        / mag_sq;

    let (closest_x, closest_y) = if u < 0.0 {
        (line_start.longitude, line_start.latitude)
    } else if u > 1.0 {
        (line_end.longitude, line_end.latitude)
    } else {
        (line_start.longitude + u * dx, line_start.latitude + u * dy)
    };

    ((point.longitude - closest_x).powi(2) + (point.latitude - closest_y).powi(2)).sqrt()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lng: f64) -> TrackPoint {
        TrackPoint::new(lat, lng, 0.0, 0, 5.0, 0.0)
    }

    /// Reference implementation that slices sub-lists, for cross-checking.
    fn simplify_by_slicing(points: &[TrackPoint], tolerance: f64) -> Vec<TrackPoint> {
        if points.len() <= 2 {
            return points.to_vec();
        }
        let first = points[0];
        let last = points[points.len() - 1];
        let mut max_dist = 0.0;
        let mut max_idx = 0;
        for i in 1..points.len() - 1 {
            let d = perpendicular_distance(&points[i], &first, &last);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }
        if max_dist > tolerance {
            let mut left = simplify_by_slicing(&points[..=max_idx], tolerance);
            let right = simplify_by_slicing(&points[max_idx..], tolerance);
            left.pop();
            left.extend(right);
            left
        } else {
            vec![first, last]
        }
    }

    fn zigzag(n: usize) -> Vec<TrackPoint> {
        (0..n)
            .map(|i| {
                let wobble = ((i * 7919) % 13) as f64 * 3e-6;
                at(46.5 + i as f64 * 1e-5 + wobble, 7.8 + (i as f64 * 0.37).sin() * 4e-5)
            })
            .collect()
    }

    #[test]
    fn test_small_inputs_unchanged() {
        assert!(simplify(&[], 1e-5).is_empty());
        let one = vec![at(1.0, 2.0)];
        assert_eq!(simplify(&one, 1e-5), one);
        let two = vec![at(1.0, 2.0), at(1.1, 2.1)];
        assert_eq!(simplify(&two, 1e-5), two);
    }

    #[test]
    fn test_colinear_middle_point_dropped_at_zero_tolerance() {
        let points = vec![at(0.0, 0.0), at(0.0, 0.001), at(0.0, 0.002)];
        let simplified = simplify(&points, 0.0);
        assert_eq!(simplified, vec![points[0], points[2]]);
    }

    #[test]
    fn test_corner_kept() {
        let points = vec![at(0.0, 0.0), at(0.001, 0.0005), at(0.0, 0.001)];
        assert_eq!(simplify(&points, 1e-5).len(), 3);
        // A large tolerance flattens the corner
        assert_eq!(simplify(&points, 0.01).len(), 2);
    }

    #[test]
    fn test_endpoints_kept_and_never_grows() {
        let points = zigzag(500);
        for tolerance in [0.0, 1e-6, 1e-5, 1e-4, 1.0] {
            let simplified = simplify(&points, tolerance);
            assert!(simplified.len() <= points.len());
            assert_eq!(simplified.first(), points.first());
            assert_eq!(simplified.last(), points.last());
        }
    }

    #[test]
    fn test_matches_slicing_reference() {
        let points = zigzag(300);
        for tolerance in [0.0, 2e-6, 1e-5, 5e-5] {
            assert_eq!(
                simplify(&points, tolerance),
                simplify_by_slicing(&points, tolerance),
                "tolerance {tolerance}"
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let points = zigzag(200);
        assert_eq!(simplify(&points, 1e-5), simplify(&points, 1e-5));
    }

    #[test]
    fn test_negative_tolerance_terminates() {
        let points = vec![at(0.0, 0.0), at(0.0, 0.0), at(0.0, 0.0), at(0.0, 0.0)];
        assert_eq!(simplify(&points, -1.0).len(), 2);
    }

    #[test]
    fn test_segment_clamping() {
        // Point beyond the end of the segment measures to the endpoint
        let d = perpendicular_distance(&at(0.0, 3.0), &at(0.0, 0.0), &at(0.0, 1.0));
        assert!((d - 2.0).abs() < 1e-12);
        // Degenerate segment
        assert_eq!(perpendicular_distance(&at(5.0, 5.0), &at(1.0, 1.0), &at(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_long_track_does_not_overflow() {
        // A spiral keeps splitting at one end, the worst case for recursion depth
        let points: Vec<TrackPoint> = (0..5_000)
            .map(|i| {
                let t = i as f64 * 0.05;
                at(t.sin() * t * 1e-4, t.cos() * t * 1e-4)
            })
            .collect();
        let simplified = simplify(&points, 1e-7);
        assert!(simplified.len() > 2);
        assert!(simplified.len() <= points.len());
    }

    #[test]
    fn test_simplify_indices_ascending() {
        let indices = simplify_indices(&zigzag(100), 1e-6);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(indices[0], 0);
        assert_eq!(*indices.last().unwrap(), 99);
    }
}
