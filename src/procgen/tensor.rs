//! Tensor field implementation for road network generation.
//!
//! Reference: Chen et al. 2008 - "Interactive Procedural Street Modeling"
//! https://www.sci.utah.edu/~chengu/street_sig08/street_sig08.pdf

use std::f64::consts::{FRAC_PI_2, PI};
use std::iter::Sum;
use std::ops::Add;

use bevy::math::DVec2;
use noise::{NoiseFn, Perlin};
use rand::Rng;

use super::geometry::inside_polygon;
use crate::error::ConfigError;
use crate::world::viewport::Domain;

/// Upper bound on a single field's weight, reached near a smooth field's centre.
const WEIGHT_CAP: f64 = 1e6;

/// A 2x2 symmetric traceless tensor representing road orientation at a point.
///
/// Stored as a magnitude `r` and the components `[cos 2θ, sin 2θ]` (up to scale).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tensor {
    pub r: f64,
    pub matrix: [f64; 2],
}

impl Tensor {
    pub const ZERO: Tensor = Tensor {
        r: 0.0,
        matrix: [0.0, 0.0],
    };

    pub fn new(r: f64, matrix: [f64; 2]) -> Self {
        Self { r, matrix }
    }

    /// Unit tensor whose major eigenvector points along `theta` (radians).
    pub fn from_angle(theta: f64) -> Self {
        Self {
            r: 1.0,
            matrix: [(2.0 * theta).cos(), (2.0 * theta).sin()],
        }
    }

    /// No usable direction: zero magnitude, zero components or non-finite values.
    pub fn is_degenerate(&self) -> bool {
        self.r == 0.0
            || (self.matrix[0] == 0.0 && self.matrix[1] == 0.0)
            || !self.r.is_finite()
            || !self.matrix.iter().all(|v| v.is_finite())
    }

    pub fn theta(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.matrix[1].atan2(self.matrix[0]) / 2.0
    }

    /// Get the major eigenvector (primary road direction).
    pub fn major(&self) -> DVec2 {
        if self.is_degenerate() {
            return DVec2::ZERO;
        }
        let theta = self.theta();
        DVec2::new(theta.cos(), theta.sin())
    }

    /// Get the minor eigenvector (cross-street direction).
    pub fn minor(&self) -> DVec2 {
        if self.is_degenerate() {
            return DVec2::ZERO;
        }
        let theta = self.theta() + FRAC_PI_2;
        DVec2::new(theta.cos(), theta.sin())
    }

    pub fn scale(mut self, s: f64) -> Self {
        self.r *= s;
        self
    }

    /// Turn the major direction by `angle` radians, keeping the magnitude.
    pub fn rotate(self, angle: f64) -> Self {
        if angle == 0.0 || self.is_degenerate() {
            return self;
        }
        let mut theta = self.theta() + angle;
        theta = theta.rem_euclid(PI);
        let len = self.matrix[0].hypot(self.matrix[1]);
        Self {
            r: self.r,
            matrix: [(2.0 * theta).cos() * len, (2.0 * theta).sin() * len],
        }
    }

    /// Component-wise sum weighted by each magnitude.
    pub fn combine(self, other: Tensor) -> Tensor {
        let matrix = [
            self.matrix[0] * self.r + other.matrix[0] * other.r,
            self.matrix[1] * self.r + other.matrix[1] * other.r,
        ];
        let r = if matrix[0] == 0.0 && matrix[1] == 0.0 {
            0.0
        } else {
            1.0
        };
        Tensor { r, matrix }
    }
}

impl Add for Tensor {
    type Output = Tensor;

    fn add(self, rhs: Tensor) -> Tensor {
        self.combine(rhs)
    }
}

impl Sum for Tensor {
    fn sum<I: Iterator<Item = Tensor>>(iter: I) -> Tensor {
        iter.fold(Tensor::ZERO, Tensor::combine)
    }
}

/// The closed set of basis field shapes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldKind {
    /// Uniform grid aligned to `theta`.
    Grid { theta: f64 },
    /// Circular roads around the centre.
    Radial,
}

/// One contributor to the tensor field.
#[derive(Clone, Debug, PartialEq)]
pub struct BasisField {
    pub kind: FieldKind,
    center: DVec2,
    size: f64,
    pub decay: f64,
}

fn validate_size(size: f64) -> Result<f64, ConfigError> {
    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(ConfigError::NonPositiveSize(size))
    }
}

impl BasisField {
    pub fn grid(center: DVec2, size: f64, decay: f64, theta: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            kind: FieldKind::Grid { theta },
            center,
            size: validate_size(size)?,
            decay,
        })
    }

    pub fn radial(center: DVec2, size: f64, decay: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            kind: FieldKind::Radial,
            center,
            size: validate_size(size)?,
            decay,
        })
    }

    pub fn center(&self) -> DVec2 {
        self.center
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn set_center(&mut self, center: DVec2) {
        self.center = center;
    }

    pub fn set_size(&mut self, size: f64) -> Result<(), ConfigError> {
        self.size = validate_size(size)?;
        Ok(())
    }

    pub fn set_decay(&mut self, decay: f64) {
        self.decay = decay;
    }

    /// Only meaningful for grids; radial fields ignore it.
    pub fn set_theta(&mut self, theta: f64) {
        if let FieldKind::Grid { theta: ref mut t } = self.kind {
            *t = theta;
        }
    }

    /// Move the centre by a world-space delta.
    pub fn drag_move(&mut self, delta: DVec2) {
        self.center += delta;
    }

    /// Sample the basis field at a point.
    pub fn tensor(&self, point: DVec2) -> Tensor {
        match self.kind {
            FieldKind::Grid { theta } => {
                Tensor::new(1.0, [(2.0 * theta).cos(), (2.0 * theta).sin()])
            }
            FieldKind::Radial => {
                let t = point - self.center;
                Tensor::new(1.0, [t.y * t.y - t.x * t.x, -2.0 * t.x * t.y])
            }
        }
    }

    /// Influence of the field at `point`, falling off with distance from the centre.
    pub fn tensor_weight(&self, point: DVec2, smooth: bool) -> f64 {
        let d = point.distance(self.center) / self.size;

        let weight = if smooth {
            d.powf(-self.decay)
        } else if self.decay == 0.0 && d >= 1.0 {
            // 1 - d clamps to 0 and 0^0 would otherwise fill the whole plane
            0.0
        } else {
            let base = (1.0 - d).max(0.0);
            if base == 0.0 && self.decay < 0.0 {
                0.0
            } else {
                base.powf(self.decay)
            }
        };

        if weight.is_nan() {
            0.0
        } else {
            weight.min(WEIGHT_CAP)
        }
    }

    pub fn weighted_tensor(&self, point: DVec2, smooth: bool) -> Tensor {
        self.tensor(point).scale(self.tensor_weight(point, smooth))
    }
}

/// Rotational noise applied inside parks and, optionally, everywhere.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseParams {
    pub global_noise: bool,
    pub noise_size_park: f64,
    /// Degrees.
    pub noise_angle_park: f64,
    pub noise_size_global: f64,
    /// Degrees.
    pub noise_angle_global: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            global_noise: false,
            noise_size_park: 20.0,
            noise_angle_park: 90.0,
            noise_size_global: 30.0,
            noise_angle_global: 20.0,
        }
    }
}

/// The composite tensor field: basis fields plus noise and water/park regions.
#[derive(Clone)]
pub struct TensorField {
    pub fields: Vec<BasisField>,
    pub noise: NoiseParams,
    pub smooth: bool,
    /// Ignore the river polygon when testing for land.
    pub ignore_river: bool,
    pub parks: Vec<Vec<DVec2>>,
    pub sea: Vec<DVec2>,
    pub river: Vec<DVec2>,
    perlin: Perlin,
    /// (angle, size) temporarily replacing the configured global noise.
    noise_override: Option<(f64, f64)>,
}

impl Default for TensorField {
    fn default() -> Self {
        Self::new(NoiseParams::default(), 0)
    }
}

impl TensorField {
    pub fn new(noise: NoiseParams, seed: u32) -> Self {
        Self {
            fields: Vec::new(),
            noise,
            smooth: false,
            ignore_river: false,
            parks: Vec::new(),
            sea: Vec::new(),
            river: Vec::new(),
            perlin: Perlin::new(seed),
            noise_override: None,
        }
    }

    pub fn add_field(&mut self, field: BasisField) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn remove_field(&mut self, index: usize) -> Option<BasisField> {
        (index < self.fields.len()).then(|| self.fields.remove(index))
    }

    /// Add a grid basis field.
    pub fn add_grid(
        &mut self,
        center: DVec2,
        size: f64,
        decay: f64,
        theta: f64,
    ) -> Result<usize, ConfigError> {
        Ok(self.add_field(BasisField::grid(center, size, decay, theta)?))
    }

    /// Add a radial basis field.
    pub fn add_radial(&mut self, center: DVec2, size: f64, decay: f64) -> Result<usize, ConfigError> {
        Ok(self.add_field(BasisField::radial(center, size, decay)?))
    }

    /// Force rotational noise everywhere with the given angle (degrees) and size.
    pub fn enable_global_noise(&mut self, angle: f64, size: f64) {
        self.noise_override = Some((angle, size));
    }

    pub fn disable_global_noise(&mut self) {
        self.noise_override = None;
    }

    /// Drop every field and override region.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.parks.clear();
        self.sea.clear();
        self.river.clear();
        self.ignore_river = false;
        self.noise_override = None;
    }

    /// Rotation in radians from Perlin noise at `point`.
    pub fn rotational_noise(&self, point: DVec2, noise_size: f64, noise_angle: f64) -> f64 {
        let size = noise_size.max(1e-6);
        self.perlin.get([point.x / size, point.y / size]) * noise_angle.to_radians()
    }

    pub fn on_land(&self, point: DVec2) -> bool {
        let in_sea = inside_polygon(point, &self.sea);
        if self.ignore_river {
            !in_sea
        } else {
            !in_sea && !inside_polygon(point, &self.river)
        }
    }

    pub fn in_parks(&self, point: DVec2) -> bool {
        self.parks.iter().any(|park| inside_polygon(point, park))
    }

    /// Sample the composite field at a position.
    pub fn sample_point(&self, point: DVec2) -> Tensor {
        // Water has no roads
        if !self.on_land(point) {
            return Tensor::ZERO;
        }

        if self.fields.is_empty() {
            return Tensor::from_angle(0.0);
        }

        let mut tensor: Tensor = self
            .fields
            .iter()
            .map(|field| field.weighted_tensor(point, self.smooth))
            .sum();

        if self.in_parks(point) {
            tensor = tensor.rotate(self.rotational_noise(
                point,
                self.noise.noise_size_park,
                self.noise.noise_angle_park,
            ));
        }

        if let Some((angle, size)) = self.noise_override {
            tensor = tensor.rotate(self.rotational_noise(point, size, angle));
        } else if self.noise.global_noise {
            tensor = tensor.rotate(self.rotational_noise(
                point,
                self.noise.noise_size_global,
                self.noise.noise_angle_global,
            ));
        }

        tensor
    }

    /// Four grids near the corners of the central 70% of the domain plus one radial field.
    ///
    /// Field sizes scale with the domain width: grids cover a quarter to all of
    /// it, the radial field a tenth to a fifth.
    pub fn set_recommended(&mut self, domain: &Domain, rng: &mut impl Rng) -> Result<(), ConfigError> {
        const SPAWN_SCALE: f64 = 0.7;
        const MAX_DECAY: f64 = 50.0;

        self.reset();
        let width = domain.dimensions.x;
        let size = domain.dimensions * SPAWN_SCALE;
        let origin = domain.origin + domain.dimensions * ((1.0 - SPAWN_SCALE) / 2.0);

        for corner in [
            origin,
            origin + size,
            origin + DVec2::new(size.x, 0.0),
            origin + DVec2::new(0.0, size.y),
        ] {
            let field_size = rng.gen_range(width / 4.0..width);
            let decay = rng.gen_range(0.0..MAX_DECAY);
            let theta = rng.gen_range(0.0..FRAC_PI_2);
            self.add_grid(corner, field_size, decay, theta)?;
        }

        let center = origin + DVec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)) * size;
        let field_size = rng.gen_range(width / 10.0..width / 5.0);
        let decay = rng.gen_range(0.0..MAX_DECAY);
        self.add_radial(center, field_size, decay)?;

        Ok(())
    }
}
