//! Camera/zoom context used to map world space to screen space.
//!
//! Passed explicitly into projection and export code instead of living in a
//! process-wide singleton.

use bevy::math::DVec2;
use bevy::prelude::*;

/// Axis-aligned rectangle that generation happens inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Domain {
    pub origin: DVec2,
    pub dimensions: DVec2,
}

impl Domain {
    pub fn new(origin: DVec2, dimensions: DVec2) -> Self {
        Self { origin, dimensions }
    }

    pub fn max(&self) -> DVec2 {
        self.origin + self.dimensions
    }

    pub fn center(&self) -> DVec2 {
        self.origin + self.dimensions * 0.5
    }

    /// Half-open containment test.
    pub fn contains(&self, point: DVec2) -> bool {
        let max = self.max();
        point.x >= self.origin.x && point.y >= self.origin.y && point.x < max.x && point.y < max.y
    }

    /// True on or outside the boundary.
    pub fn is_off_edge(&self, point: DVec2) -> bool {
        let local = point - self.origin;
        local.x <= 0.0
            || local.y <= 0.0
            || local.x >= self.dimensions.x
            || local.y >= self.dimensions.y
    }

    /// Corners in counter-clockwise order starting at the origin.
    pub fn corners(&self) -> [DVec2; 4] {
        let max = self.max();
        [
            self.origin,
            DVec2::new(max.x, self.origin.y),
            max,
            DVec2::new(self.origin.x, max.y),
        ]
    }

    /// Position of a (clamped) point along the perimeter, counter-clockwise
    /// from the origin corner, in `[0, perimeter)`.
    pub fn perimeter_position(&self, point: DVec2) -> f64 {
        let max = self.max();
        let p = point.clamp(self.origin, max);
        let (w, h) = (self.dimensions.x, self.dimensions.y);

        // Snap to the nearest edge so interior points still map somewhere sensible.
        let distances = [
            p.y - self.origin.y,
            max.x - p.x,
            max.y - p.y,
            p.x - self.origin.x,
        ];
        let edge = distances
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        match edge {
            0 => p.x - self.origin.x,
            1 => w + (p.y - self.origin.y),
            2 => w + h + (max.x - p.x),
            _ => 2.0 * w + h + (max.y - p.y),
        }
    }

    /// Perimeter positions of the four corners, matching [`Domain::corners`].
    pub fn corner_positions(&self) -> [f64; 4] {
        let (w, h) = (self.dimensions.x, self.dimensions.y);
        [0.0, w, w + h, 2.0 * w + h]
    }

    pub fn perimeter(&self) -> f64 {
        2.0 * (self.dimensions.x + self.dimensions.y)
    }
}

/// Screen mapping and camera parameters.
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct Viewport {
    /// World position shown at the top-left of the screen.
    pub origin: DVec2,
    pub zoom: f64,
    pub screen_dimensions: DVec2,
    /// Offset of the pseudo-3D camera from the screen centre.
    pub camera_direction: DVec2,
    pub orthographic: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            origin: DVec2::ZERO,
            zoom: 1.0,
            screen_dimensions: DVec2::new(1440.0, 900.0),
            camera_direction: DVec2::ZERO,
            orthographic: false,
        }
    }
}

impl Viewport {
    pub fn world_dimensions(&self) -> DVec2 {
        self.screen_dimensions / self.zoom.max(1e-4)
    }

    /// World-space rectangle visible on screen.
    pub fn domain(&self) -> Domain {
        Domain::new(self.origin, self.world_dimensions())
    }

    pub fn world_to_screen(&self, v: DVec2) -> DVec2 {
        (v - self.origin) * self.zoom
    }

    pub fn screen_to_world(&self, v: DVec2) -> DVec2 {
        v / self.zoom.max(1e-4) + self.origin
    }

    /// Screen-space camera position for pseudo-3D projection.
    pub fn camera_position(&self) -> DVec2 {
        let centre = self.screen_dimensions * 0.5;
        if self.orthographic {
            centre + centre * self.camera_direction * 100.0
        } else {
            centre + centre * self.camera_direction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_screen_round_trip_respects_zoom() {
        let viewport = Viewport {
            origin: DVec2::new(10.0, 20.0),
            zoom: 2.0,
            ..default()
        };
        let screen = viewport.world_to_screen(DVec2::new(15.0, 25.0));
        assert_eq!(screen, DVec2::new(10.0, 10.0));
        assert_eq!(viewport.screen_to_world(screen), DVec2::new(15.0, 25.0));
        assert_eq!(viewport.world_dimensions(), DVec2::new(720.0, 450.0));
    }

    #[test]
    fn perimeter_positions_run_counter_clockwise() {
        let domain = Domain::new(DVec2::ZERO, DVec2::new(10.0, 5.0));
        assert_eq!(domain.perimeter_position(DVec2::new(4.0, -3.0)), 4.0);
        assert_eq!(domain.perimeter_position(DVec2::new(12.0, 2.0)), 12.0);
        assert_eq!(domain.perimeter_position(DVec2::new(7.0, 9.0)), 18.0);
        assert_eq!(domain.perimeter_position(DVec2::new(-1.0, 1.0)), 29.0);
        assert_eq!(domain.perimeter(), 30.0);
    }

    #[test]
    fn off_edge_includes_boundary() {
        let domain = Domain::new(DVec2::ZERO, DVec2::new(10.0, 10.0));
        assert!(domain.is_off_edge(DVec2::new(0.0, 5.0)));
        assert!(domain.is_off_edge(DVec2::new(5.0, 12.0)));
        assert!(!domain.is_off_edge(DVec2::new(5.0, 5.0)));
        assert!(domain.contains(DVec2::new(0.0, 0.0)));
        assert!(!domain.contains(DVec2::new(10.0, 5.0)));
    }
}
