//! Road tiers traced from the tensor field.
//!
//! Each tier is a streamline generator with its own spacing. Later tiers see
//! the samples of earlier ones, so minor roads fill the gaps left between major
//! roads instead of running alongside them.

use bevy::math::DVec2;

use super::geometry::buffer_polyline;
use super::streamline::{StreamlineGenerator, StreamlineParams};
use super::tensor::TensorField;
use crate::error::ConfigError;
use crate::world::viewport::Domain;

/// Band half-width of the exported coastline, before zoom.
pub const COASTLINE_WIDTH: f64 = 15.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoadTier {
    Main,
    Major,
    Minor,
}

impl RoadTier {
    pub const ALL: [RoadTier; 3] = [RoadTier::Main, RoadTier::Major, RoadTier::Minor];

    pub fn default_params(self) -> StreamlineParams {
        match self {
            RoadTier::Main => StreamlineParams::main(),
            RoadTier::Major => StreamlineParams::major(),
            RoadTier::Minor => StreamlineParams::minor(),
        }
    }

    /// Band half-width of exported road polygons, before zoom.
    pub fn width(self) -> f64 {
        match self {
            RoadTier::Main => 2.5,
            RoadTier::Major => 2.0,
            RoadTier::Minor => 1.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RoadTier::Main => "main",
            RoadTier::Major => "major",
            RoadTier::Minor => "minor",
        }
    }
}

/// One tier of roads.
pub struct RoadGenerator {
    pub tier: RoadTier,
    generator: StreamlineGenerator,
}

impl RoadGenerator {
    pub fn new(tier: RoadTier, params: StreamlineParams, domain: Domain, seed: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            tier,
            generator: StreamlineGenerator::new(params, domain, seed)?,
        })
    }

    /// Keep clear of the roads already traced by `others`.
    pub fn set_existing(&mut self, others: &[&StreamlineGenerator]) {
        for other in others {
            self.generator.add_existing(other);
        }
    }

    pub fn generator(&self) -> &StreamlineGenerator {
        &self.generator
    }

    /// Simplified road centrelines.
    pub fn roads(&self) -> &[Vec<DVec2>] {
        &self.generator.all_streamlines_simple
    }

    pub fn is_empty(&self) -> bool {
        self.generator.all_streamlines.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.generator.is_finished()
    }

    /// Trace one road. Returns whether work remains.
    pub fn update(&mut self, field: &TensorField) -> bool {
        self.generator.update(field)
    }

    pub fn generate(&mut self, field: &TensorField) {
        self.generator.create_all_streamlines(field);
    }
}

/// Buffer every line into a band, skipping lines too short to have one.
pub fn band_polygons(lines: &[Vec<DVec2>], half_width: f64) -> Vec<Vec<DVec2>> {
    lines
        .iter()
        .filter_map(|line| buffer_polyline(line, half_width))
        .collect()
}
