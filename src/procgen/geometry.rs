//! Polygon and polyline helpers shared by the generators.

use bevy::math::DVec2;
use clipper2::{EndType, JoinType, Paths};

/// Average of all vertices.
pub fn average_point(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }

    points.iter().copied().sum::<DVec2>() / points.len() as f64
}

/// Shoelace area, positive for counter-clockwise winding in a y-up frame.
pub fn signed_area(points: &[DVec2]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        area += a.perp_dot(b);
    }

    area * 0.5
}

pub fn area(points: &[DVec2]) -> f64 {
    signed_area(points).abs()
}

/// Closed perimeter length.
pub fn perimeter(points: &[DVec2]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| points[i].distance(points[(i + 1) % n])).sum()
}

/// Even-odd ray cast.
pub fn inside_polygon(point: DVec2, polygon: &[DVec2]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Axis-aligned bounding box of a point set.
pub fn polygon_bounds(points: &[DVec2]) -> (DVec2, DVec2) {
    let mut min = DVec2::splat(f64::MAX);
    let mut max = DVec2::splat(f64::MIN);

    for &p in points {
        min = min.min(p);
        max = max.max(p);
    }

    (min, max)
}

/// Proper segment intersection.
/// Returns the point and the parameters along both segments.
pub fn segment_intersection(
    a1: DVec2,
    a2: DVec2,
    b1: DVec2,
    b2: DVec2,
) -> Option<(DVec2, f64, f64)> {
    let d1 = a2 - a1;
    let d2 = b2 - b1;

    let cross = d1.perp_dot(d2);

    // Parallel or degenerate
    if cross.abs() < 1e-10 {
        return None;
    }

    let d = b1 - a1;
    let t = d.perp_dot(d2) / cross;
    let u = d.perp_dot(d1) / cross;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((a1 + d1 * t, t, u))
    } else {
        None
    }
}

/// Unsigned angle between two directions, in `[0, π]`.
pub fn angle_between(a: DVec2, b: DVec2) -> f64 {
    let denom = a.length() * b.length();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

fn segment_distance_sq(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f64::EPSILON {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance_squared(a + ab * t)
}

/// Radial-distance pre-pass followed by Douglas-Peucker.
/// Endpoints are always kept.
pub fn simplify_polyline(points: &[DVec2], tolerance: f64) -> Vec<DVec2> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let tol_sq = tolerance * tolerance;

    let mut radial = Vec::with_capacity(points.len());
    radial.push(points[0]);
    for &p in &points[1..points.len() - 1] {
        if let Some(last) = radial.last() {
            if p.distance_squared(*last) > tol_sq {
                radial.push(p);
            }
        }
    }
    let end = points[points.len() - 1];
    if radial.len() == 1 || radial.last() != Some(&end) {
        radial.push(end);
    }

    let mut keep = vec![false; radial.len()];
    keep[0] = true;
    keep[radial.len() - 1] = true;
    let mut stack = vec![(0usize, radial.len() - 1)];

    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut max_sq = 0.0;
        let mut index = first;
        for i in first + 1..last {
            let d = segment_distance_sq(radial[i], radial[first], radial[last]);
            if d > max_sq {
                max_sq = d;
                index = i;
            }
        }
        if max_sq > tol_sq {
            keep[index] = true;
            stack.push((first, index));
            stack.push((index, last));
        }
    }

    radial
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

pub(crate) fn to_paths(polygons: &[&[DVec2]]) -> Paths {
    let coords: Vec<Vec<(f64, f64)>> = polygons
        .iter()
        .map(|poly| poly.iter().map(|p| (p.x, p.y)).collect())
        .collect();
    coords.into()
}

pub(crate) fn from_paths(paths: Paths) -> Vec<Vec<DVec2>> {
    let output: Vec<Vec<(f64, f64)>> = paths.into();
    output
        .into_iter()
        .filter(|path| path.len() >= 3)
        .map(|path| path.into_iter().map(|(x, y)| DVec2::new(x, y)).collect())
        .collect()
}

fn largest(polygons: Vec<Vec<DVec2>>) -> Option<Vec<DVec2>> {
    polygons
        .into_iter()
        .max_by(|a, b| area(a).total_cmp(&area(b)))
}

/// Grow (positive) or shrink (negative) a polygon with mitred corners.
/// Returns the largest resulting piece, or `None` when it vanishes.
pub fn offset_polygon(polygon: &[DVec2], delta: f64) -> Option<Vec<DVec2>> {
    if polygon.len() < 3 {
        return None;
    }
    if delta.abs() < 1e-9 {
        return Some(polygon.to_vec());
    }

    let result = to_paths(&[polygon]).inflate(delta, JoinType::Miter, EndType::Polygon, 2.0);
    largest(from_paths(result))
        .filter(|p| area(p) > 1e-6)
}

/// Outline of an open polyline buffered by `distance` on both sides.
pub fn buffer_polyline(line: &[DVec2], distance: f64) -> Option<Vec<DVec2>> {
    if line.len() < 2 || distance <= 0.0 {
        return None;
    }

    let result = to_paths(&[line]).inflate(distance, JoinType::Round, EndType::Round, 2.0);
    largest(from_paths(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(size, 0.0),
            DVec2::new(size, size),
            DVec2::new(0.0, size),
        ]
    }

    #[test]
    fn signed_area_follows_winding() {
        let ccw = square(2.0);
        let mut cw = ccw.clone();
        cw.reverse();
        assert_eq!(signed_area(&ccw), 4.0);
        assert_eq!(signed_area(&cw), -4.0);
        assert_eq!(perimeter(&ccw), 8.0);
    }

    #[test]
    fn ray_cast_containment() {
        let poly = square(10.0);
        assert!(inside_polygon(DVec2::new(5.0, 5.0), &poly));
        assert!(!inside_polygon(DVec2::new(15.0, 5.0), &poly));
        assert!(!inside_polygon(DVec2::new(5.0, 5.0), &poly[..2]));
    }

    #[test]
    fn crossing_segments_intersect_at_midpoint() {
        let (p, t, u) = segment_intersection(
            DVec2::new(0.0, 0.0),
            DVec2::new(2.0, 2.0),
            DVec2::new(0.0, 2.0),
            DVec2::new(2.0, 0.0),
        )
        .unwrap();
        assert!((p - DVec2::ONE).length() < 1e-12);
        assert!((t - 0.5).abs() < 1e-12 && (u - 0.5).abs() < 1e-12);

        assert!(segment_intersection(
            DVec2::ZERO,
            DVec2::X,
            DVec2::Y,
            DVec2::new(1.0, 1.0)
        )
        .is_none());
    }

    #[test]
    fn simplify_drops_colinear_points_only() {
        let line = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(2.0, 0.0),
            DVec2::new(3.0, 1.0),
        ];
        let exact = simplify_polyline(&line, 0.0);
        assert_eq!(
            exact,
            vec![DVec2::new(0.0, 0.0), DVec2::new(2.0, 0.0), DVec2::new(3.0, 1.0)]
        );

        let coarse = simplify_polyline(&line, 10.0);
        assert_eq!(coarse, vec![DVec2::new(0.0, 0.0), DVec2::new(3.0, 1.0)]);
    }

    #[test]
    fn inward_offset_shrinks_area() {
        let shrunk = offset_polygon(&square(10.0), -1.0).unwrap();
        assert!((area(&shrunk) - 64.0).abs() < 0.5);
        assert!(offset_polygon(&square(1.0), -2.0).is_none());
    }

    #[test]
    fn buffered_line_surrounds_it() {
        let outline = buffer_polyline(&[DVec2::new(0.0, 0.0), DVec2::new(10.0, 0.0)], 2.0).unwrap();
        assert!(inside_polygon(DVec2::new(5.0, 1.0), &outline));
        assert!(!inside_polygon(DVec2::new(5.0, 3.0), &outline));
    }

    #[test]
    fn right_angle_between_axes() {
        assert!((angle_between(DVec2::X, DVec2::Y) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
