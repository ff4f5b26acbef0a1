//! Pseudo-3D buildings.
//!
//! Each lot gets a height and is projected to screen space as a footprint, a
//! roof displaced toward or away from the camera, and one shaded quad per side.

use bevy::math::DVec2;
use rand::Rng;

use crate::error::ConfigError;
use crate::world::viewport::Viewport;

/// Camera distance at zoom 1 and camera height factor 1.
const BASE_EYE_DISTANCE: f64 = 1000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct BuildingModel {
    pub height: f64,
    /// Footprint in world space.
    pub lot_world: Vec<DVec2>,
    /// Footprint in screen space.
    pub lot_screen: Vec<DVec2>,
    /// Screen space.
    pub roof: Vec<DVec2>,
    /// Quads `[ground_i, ground_next, roof_next, roof_i]` in screen space.
    pub sides: Vec<[DVec2; 4]>,
    /// Shade per side, in `[0, 1]`.
    pub side_shades: Vec<f64>,
}

/// Projection and shading knobs.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionConfig {
    camera_height_factor: f64,
    height_scale: f64,
    ortho_height_factor: f64,
    light_direction: DVec2,
    ambient_shade: f64,
    specular_boost: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            camera_height_factor: 1.0,
            height_scale: 1.0,
            ortho_height_factor: 1.0,
            light_direction: DVec2::new(0.5, -0.7).normalize(),
            ambient_shade: 0.55,
            specular_boost: 0.3,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidTuning { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidTuning { name, value })
    }
}

impl ProjectionConfig {
    pub fn camera_height_factor(&self) -> f64 {
        self.camera_height_factor
    }

    pub fn height_scale(&self) -> f64 {
        self.height_scale
    }

    pub fn light_direction(&self) -> DVec2 {
        self.light_direction
    }

    /// Larger values move the camera away and flatten the perspective.
    pub fn set_camera_height_factor(&mut self, f: f64) -> Result<(), ConfigError> {
        self.camera_height_factor = positive("camera_height_factor", f)?;
        Ok(())
    }

    pub fn set_height_scale(&mut self, s: f64) -> Result<(), ConfigError> {
        self.height_scale = positive("height_scale", s)?;
        Ok(())
    }

    pub fn set_ortho_height_factor(&mut self, f: f64) -> Result<(), ConfigError> {
        self.ortho_height_factor = positive("ortho_height_factor", f)?;
        Ok(())
    }

    pub fn set_light_direction(&mut self, direction: DVec2) -> Result<(), ConfigError> {
        self.light_direction = direction
            .try_normalize()
            .ok_or(ConfigError::ZeroDirection("light"))?;
        Ok(())
    }

    pub fn set_shading(&mut self, ambient: f64, specular: f64) -> Result<(), ConfigError> {
        let ambient = non_negative("ambient_shade", ambient)?;
        let specular = non_negative("specular_boost", specular)?;
        self.ambient_shade = ambient;
        self.specular_boost = specular;
        Ok(())
    }

    /// Shade of a wall whose ground edge runs from `g0` to `g1`.
    pub fn side_shade(&self, g0: DVec2, g1: DVec2) -> f64 {
        let Some(edge) = (g1 - g0).try_normalize() else {
            return self.ambient_shade;
        };
        let normal = edge.perp();
        let dot = normal.dot(self.light_direction).clamp(-1.0, 1.0);
        (self.ambient_shade + 0.5 * (dot + 1.0) * self.specular_boost).clamp(0.0, 1.0)
    }

    /// Roof position of the screen point `v` for a building of height `h`.
    fn project_height(&self, v: DVec2, h: f64, eye_z: f64, viewport: &Viewport, camera: DVec2) -> DVec2 {
        if viewport.orthographic {
            v - viewport.camera_direction * (h * self.ortho_height_factor)
        } else {
            let scale = eye_z / (eye_z - h).max(1e-4);
            (v - camera) * scale + camera
        }
    }
}

/// All buildings of the current city.
#[derive(Clone, Debug, Default)]
pub struct BuildingModels {
    models: Vec<BuildingModel>,
    pub config: ProjectionConfig,
}

impl BuildingModels {
    /// Heights in `[20, 40)`, sorted ascending so taller buildings draw last.
    pub fn new(lots: &[Vec<DVec2>], config: ProjectionConfig, rng: &mut impl Rng) -> Self {
        let mut models: Vec<BuildingModel> = lots
            .iter()
            .map(|lot| BuildingModel {
                height: rng.gen_range(20.0..40.0),
                lot_world: lot.clone(),
                lot_screen: Vec::new(),
                roof: Vec::new(),
                sides: Vec::new(),
                side_shades: Vec::new(),
            })
            .collect();
        models.sort_by(|a, b| a.height.total_cmp(&b.height));
        Self { models, config }
    }

    pub fn models(&self) -> &[BuildingModel] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Recompute screen footprints, roofs, sides and shades for `viewport`.
    pub fn set_projections(&mut self, viewport: &Viewport) {
        let eye_z = (BASE_EYE_DISTANCE * self.config.camera_height_factor / viewport.zoom.max(1e-4)).max(1.0);
        let camera = viewport.camera_position();

        for building in &mut self.models {
            building.lot_screen = building
                .lot_world
                .iter()
                .map(|&v| viewport.world_to_screen(v))
                .collect();

            let h = building.height * self.config.height_scale;
            building.roof = building
                .lot_screen
                .iter()
                .map(|&v| self.config.project_height(v, h, eye_z, viewport, camera))
                .collect();

            let n = building.lot_screen.len();
            building.sides = (0..n)
                .map(|i| {
                    let next = (i + 1) % n;
                    [
                        building.lot_screen[i],
                        building.lot_screen[next],
                        building.roof[next],
                        building.roof[i],
                    ]
                })
                .collect();

            building.side_shades = building
                .sides
                .iter()
                .map(|side| self.config.side_shade(side[0], side[1]))
                .collect();
        }
    }
}
