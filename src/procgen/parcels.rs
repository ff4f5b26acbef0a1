//! Recursive lot subdivision.
//!
//! Converts city blocks into buildable lots by cutting each polygon across its
//! longest side until the pieces approach the target area.

use bevy::log::error;
use bevy::math::DVec2;
use clipper2::{intersect, FillRule};
use rand::Rng;

use super::geometry::{area, from_paths, perimeter, polygon_bounds, to_paths};

/// Rectangles thinner than about 1:4 fall below this `area / perimeter²`.
const MIN_SHAPE_INDEX: f64 = 0.04;

/// Recursion guard for pathological inputs.
const MAX_DEPTH: usize = 24;

/// Split a polygon by the infinite line through `point` along `direction`.
///
/// Concave polygons may produce more than two pieces.
pub fn slice_polygon(polygon: &[DVec2], point: DVec2, direction: DVec2) -> Vec<Vec<DVec2>> {
    let Some(dir) = direction.try_normalize() else {
        return Vec::new();
    };
    if polygon.len() < 3 {
        return Vec::new();
    }

    let (min, max) = polygon_bounds(polygon);
    let reach = (max - min).length() + (point - min).length() + 1.0;
    let normal = dir.perp();

    let half_plane = |side: f64| -> Vec<DVec2> {
        let n = normal * side * reach;
        vec![
            point - dir * reach,
            point + dir * reach,
            point + dir * reach + n,
            point - dir * reach + n,
        ]
    };

    let mut pieces = Vec::new();
    for side in [1.0, -1.0] {
        let clip = half_plane(side);
        match intersect(to_paths(&[polygon]), to_paths(&[&clip]), FillRule::NonZero) {
            Ok(result) => pieces.extend(from_paths(result)),
            Err(e) => {
                error!("Polygon slice failed: {:?}", e);
                return Vec::new();
            }
        }
    }
    pieces
}

/// Recursively divide `polygon` into lots of roughly `min_area`..`2 * min_area`.
///
/// Slivers (area below half of `min_area` or a thin shape) are dropped.
pub fn subdivide_polygon(polygon: &[DVec2], min_area: f64, rng: &mut impl Rng) -> Vec<Vec<DVec2>> {
    let mut lots = Vec::new();
    subdivide_recursive(polygon, min_area, rng, 0, &mut lots);
    lots
}

fn subdivide_recursive(
    polygon: &[DVec2],
    min_area: f64,
    rng: &mut impl Rng,
    depth: usize,
    lots: &mut Vec<Vec<DVec2>>,
) {
    if polygon.len() < 3 {
        return;
    }
    let poly_area = area(polygon);
    if poly_area < 0.5 * min_area {
        return;
    }

    let poly_perimeter = perimeter(polygon);
    if poly_area / (poly_perimeter * poly_perimeter) < MIN_SHAPE_INDEX {
        return;
    }

    if poly_area < 2.0 * min_area || depth >= MAX_DEPTH {
        lots.push(polygon.to_vec());
        return;
    }

    let n = polygon.len();
    let (a, b) = (0..n)
        .map(|i| (polygon[i], polygon[(i + 1) % n]))
        .max_by(|x, y| x.0.distance(x.1).total_cmp(&y.0.distance(y.1)))
        .unwrap_or((polygon[0], polygon[1]));

    // Between 0.4 and 0.6 along the longest side
    let deviation = rng.gen_range(0.4..0.6);
    let cut_point = a.lerp(b, deviation);
    let cut_direction = (b - a).perp();

    let pieces = slice_polygon(polygon, cut_point, cut_direction);
    if pieces.len() < 2 {
        lots.push(polygon.to_vec());
        return;
    }
    for piece in pieces {
        subdivide_recursive(&piece, min_area, rng, depth + 1, lots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rect(w: f64, h: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(w, 0.0),
            DVec2::new(w, h),
            DVec2::new(0.0, h),
        ]
    }

    #[test]
    fn slice_splits_square_in_two() {
        let pieces = slice_polygon(&rect(10.0, 10.0), DVec2::new(4.0, 0.0), DVec2::Y);
        assert_eq!(pieces.len(), 2);
        let mut areas: Vec<f64> = pieces.iter().map(|p| area(p)).collect();
        areas.sort_by(f64::total_cmp);
        assert!((areas[0] - 40.0).abs() < 0.1);
        assert!((areas[1] - 60.0).abs() < 0.1);
    }

    #[test]
    fn small_polygon_is_kept_whole() {
        let mut rng = StdRng::seed_from_u64(1);
        let lots = subdivide_polygon(&rect(10.0, 10.0), 60.0, &mut rng);
        assert_eq!(lots, vec![rect(10.0, 10.0)]);
    }

    #[test]
    fn slivers_are_dropped() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(subdivide_polygon(&rect(2.0, 2.0), 50.0, &mut rng).is_empty());
        // 100 x 1 strip has shape index 100 / 202² < 0.04
        assert!(subdivide_polygon(&rect(100.0, 1.0), 10.0, &mut rng).is_empty());
    }

    #[test]
    fn large_block_divides_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let min_area = 50.0;
        let lots = subdivide_polygon(&rect(40.0, 40.0), min_area, &mut rng);

        assert!(lots.len() > 4);
        let total: f64 = lots.iter().map(|l| area(l)).sum();
        assert!(total <= 1600.0 + 1.0);
        for lot in &lots {
            let a = area(lot);
            assert!(a >= 0.5 * min_area - 0.1);
            assert!(a < 2.0 * min_area + 0.1);
        }
    }
}
