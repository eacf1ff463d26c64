//! Geographic utilities: great-circle distance, bearing and compass helpers.

use geo::{Distance, Haversine, Point};

use crate::TrackPoint;

/// Great-circle distance between two points in meters.
///
/// Haversine on the mean Earth radius; sub-meter agreement with an ellipsoidal
/// model over the tens of meters between consecutive hiking fixes.
pub fn distance(a: &TrackPoint, b: &TrackPoint) -> f64 {
    distance_coords(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Great-circle distance between raw (lat, lng) pairs in meters.
pub fn distance_coords(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let p1 = Point::new(lng1, lat1);
    let p2 = Point::new(lng2, lat2);
    Haversine::distance(p1, p2)
}

/// Initial bearing from `a` to `b` in degrees, in `[0, 360)`.
///
/// 0° is north, 90° east. Coincident points give 0°.
pub fn bearing(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let diff_lng = (b.longitude - a.longitude).to_radians();

    let x = diff_lng.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * diff_lng.cos();

    let degrees = x.atan2(y).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

/// Total length along a sequence of points in meters.
pub fn polyline_length(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance(&pair[0], &pair[1]))
        .sum()
}

const CARDINALS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
const ARROWS: [&str; 8] = ["↑", "↗", "→", "↘", "↓", "↙", "←", "↖"];

fn octant(bearing: f64) -> usize {
    ((bearing.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8
}

/// Eight-point compass direction for a bearing in degrees.
pub fn cardinal_direction(bearing: f64) -> &'static str {
    CARDINALS[octant(bearing)]
}

/// Arrow glyph pointing along a bearing in degrees.
pub fn direction_arrow(bearing: f64) -> &'static str {
    ARROWS[octant(bearing)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lng: f64) -> TrackPoint {
        TrackPoint::new(lat, lng, 0.0, 0, 5.0, 0.0)
    }

    #[test]
    fn test_distance_equator_millidegree() {
        let d = distance(&at(0.0, 0.0), &at(0.0, 0.001));
        assert!((d - 111.19).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let a = at(46.5580, 7.8350);
        let b = at(46.5590, 7.8361);
        assert!((distance(&a, &b) - distance(&b, &a)).abs() < 1e-9);
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn test_distance_antipodal_is_finite() {
        let d = distance(&at(0.0, 0.0), &at(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - 20_015_114.4).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_bearing_cardinal_points() {
        let origin = at(0.0, 0.0);
        assert!((bearing(&origin, &at(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((bearing(&origin, &at(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing(&origin, &at(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(&origin, &at(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_range() {
        let origin = at(46.0, 7.0);
        for i in 0..36 {
            let angle = (i as f64 * 10.0).to_radians();
            let target = at(46.0 + 0.01 * angle.cos(), 7.0 + 0.01 * angle.sin());
            let b = bearing(&origin, &target);
            assert!((0.0..360.0).contains(&b), "bearing {b} out of range");
        }
        assert_eq!(bearing(&origin, &origin), 0.0);
    }

    #[test]
    fn test_polyline_length() {
        let points = vec![at(0.0, 0.0), at(0.0, 0.001), at(0.0, 0.002)];
        let expected = distance(&points[0], &points[1]) + distance(&points[1], &points[2]);
        assert!((polyline_length(&points) - expected).abs() < 1e-9);
        assert_eq!(polyline_length(&points[..1]), 0.0);
    }

    #[test]
    fn test_compass_helpers() {
        assert_eq!(cardinal_direction(0.0), "N");
        assert_eq!(cardinal_direction(44.0), "NE");
        assert_eq!(cardinal_direction(350.0), "N");
        assert_eq!(cardinal_direction(225.0), "SW");
        assert_eq!(direction_arrow(90.0), "→");
        assert_eq!(direction_arrow(-90.0), "←");
    }
}
