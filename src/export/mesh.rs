//! Extrusion of 2D polygons into triangle meshes.

use bevy::log::error;
use bevy::math::{DVec2, Vec3};

use crate::procgen::geometry::signed_area;

/// Scale from screen units to export units.
pub const EXPORT_SCALE: f64 = 0.02;

/// Triangle soup in export space (z up).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleMesh {
    pub triangles: Vec<[Vec3; 3]>,
}

impl TriangleMesh {
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn merge(&mut self, other: TriangleMesh) {
        self.triangles.extend(other.triangles);
    }
}

fn export_point(p: DVec2, z: f64) -> Vec3 {
    Vec3::new(
        (p.x * EXPORT_SCALE) as f32,
        (p.y * EXPORT_SCALE) as f32,
        (z * EXPORT_SCALE) as f32,
    )
}

/// Prism with `polygon` as its base, from z = 0 up to `height`.
///
/// A height of zero gives the top cap alone. Returns `None` for polygons with
/// fewer than three vertices or that cannot be triangulated.
pub fn extrude_polygon(polygon: &[DVec2], height: f64) -> Option<TriangleMesh> {
    if polygon.len() < 3 {
        error!("Tried to export a polygon with {} vertices", polygon.len());
        return None;
    }
    if polygon.iter().any(|p| !p.is_finite()) || !height.is_finite() {
        error!("Tried to export a polygon with non-finite coordinates");
        return None;
    }

    // Counter-clockwise so caps face up and sides face out
    let mut ring = polygon.to_vec();
    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }

    let coords: Vec<f64> = ring.iter().flat_map(|p| [p.x, p.y]).collect();
    let indices = match earcutr::earcut(&coords, &[], 2) {
        Ok(indices) if !indices.is_empty() => indices,
        Ok(_) => {
            error!("Polygon of {} vertices produced no triangles", ring.len());
            return None;
        }
        Err(e) => {
            error!("Failed to triangulate polygon: {:?}", e);
            return None;
        }
    };

    let mut mesh = TriangleMesh::default();
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (ring[tri[0]], ring[tri[1]], ring[tri[2]]);
        let (b, c) = if (b - a).perp_dot(c - a) < 0.0 { (c, b) } else { (b, c) };
        mesh.triangles
            .push([export_point(a, height), export_point(b, height), export_point(c, height)]);
        if height > 0.0 {
            mesh.triangles
                .push([export_point(a, 0.0), export_point(c, 0.0), export_point(b, 0.0)]);
        }
    }

    if height > 0.0 {
        let n = ring.len();
        for i in 0..n {
            let (p, q) = (ring[i], ring[(i + 1) % n]);
            let (p0, q0) = (export_point(p, 0.0), export_point(q, 0.0));
            let (p1, q1) = (export_point(p, height), export_point(q, height));
            mesh.triangles.push([p0, q0, q1]);
            mesh.triangles.push([p0, q1, p1]);
        }
    }

    Some(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(50.0, 0.0),
            DVec2::new(50.0, 50.0),
            DVec2::new(0.0, 50.0),
        ]
    }

    fn normal(t: &[Vec3; 3]) -> Vec3 {
        (t[1] - t[0]).cross(t[2] - t[0])
    }

    #[test]
    fn prism_triangle_count() {
        let mesh = extrude_polygon(&square(), 10.0).unwrap();
        // Two caps of two triangles plus two per side
        assert_eq!(mesh.len(), 12);
    }

    #[test]
    fn flat_polygon_is_top_cap_only() {
        let mesh = extrude_polygon(&square(), 0.0).unwrap();
        assert_eq!(mesh.len(), 2);
        assert!(mesh.triangles.iter().all(|t| normal(t).z > 0.0));
        assert!(mesh.triangles.iter().flatten().all(|v| v.z == 0.0));
    }

    #[test]
    fn scaled_and_oriented_outwards() {
        let mut clockwise = square();
        clockwise.reverse();
        let mesh = extrude_polygon(&clockwise, 50.0).unwrap();

        let max = mesh
            .triangles
            .iter()
            .flatten()
            .fold(Vec3::ZERO, |acc, v| acc.max(*v));
        assert!((max - Vec3::splat(1.0)).length() < 1e-6);

        // Every face normal points away from the prism centre
        let centre = Vec3::splat(0.5);
        for t in &mesh.triangles {
            let mid = (t[0] + t[1] + t[2]) / 3.0;
            assert!(normal(t).dot(mid - centre) > 0.0);
        }
    }

    #[test]
    fn degenerate_polygons_yield_nothing() {
        assert!(extrude_polygon(&[DVec2::ZERO, DVec2::X], 5.0).is_none());
        assert!(extrude_polygon(&[], 0.0).is_none());
    }
}
