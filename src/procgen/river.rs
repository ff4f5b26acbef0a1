//! Coastline and river generation.
//!
//! Both are traced as streamlines through the tensor field with extra
//! rotational noise, then turned into a sea polygon, a river polygon and the
//! roads that run along the water.

use bevy::log::{debug, error, info, warn};
use bevy::math::DVec2;
use clipper2::{intersect, FillRule};
use rand::Rng;

use super::geometry::{area, buffer_polyline, from_paths, inside_polygon, simplify_polyline, to_paths};
use super::streamline::{Streamline, StreamlineGenerator, StreamlineParams};
use super::tensor::TensorField;
use crate::error::ConfigError;
use crate::world::viewport::Domain;

/// Attempts at finding a coastline or river that crosses the whole domain.
const TRIES: usize = 100;

/// Steps added past each end of a traced water line.
const EXTEND_STEPS: f64 = 5.0;

/// Rotational noise applied everywhere while tracing one water feature.
#[derive(Clone, Debug, PartialEq)]
pub struct WaterNoise {
    pub enabled: bool,
    pub size: f64,
    /// Degrees.
    pub angle: f64,
}

impl Default for WaterNoise {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 30.0,
            angle: 20.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaterParams {
    pub streamline: StreamlineParams,
    pub coast_noise: WaterNoise,
    pub river_noise: WaterNoise,
    /// Width of land between the river and its bank roads.
    pub river_bank_size: f64,
    /// Distance from the river centreline to the bank roads.
    pub river_size: f64,
}

impl Default for WaterParams {
    fn default() -> Self {
        Self {
            streamline: StreamlineParams {
                path_iterations: 10000,
                simplify_tolerance: 10.0,
                ..StreamlineParams::minor()
            },
            coast_noise: WaterNoise::default(),
            river_noise: WaterNoise::default(),
            river_bank_size: 10.0,
            river_size: 30.0,
        }
    }
}

impl WaterParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.streamline.validate()?;
        if !(self.river_size.is_finite() && self.river_size > 0.0) {
            return Err(ConfigError::InvalidTuning {
                name: "river_size",
                value: self.river_size,
            });
        }
        if !(self.river_bank_size.is_finite() && self.river_bank_size >= 0.0) {
            return Err(ConfigError::InvalidTuning {
                name: "river_bank_size",
                value: self.river_bank_size,
            });
        }
        Ok(())
    }
}

/// Traces the coast and river and keeps the resulting geometry.
pub struct WaterGenerator {
    pub params: WaterParams,
    generator: StreamlineGenerator,
    coastline: Vec<DVec2>,
    coastline_major: bool,
    sea_polygon: Vec<DVec2>,
    river_polygon: Vec<DVec2>,
    secondary_road: Vec<DVec2>,
}

impl WaterGenerator {
    pub fn new(params: WaterParams, domain: Domain, seed: u64) -> Result<Self, ConfigError> {
        params.validate()?;
        let generator = StreamlineGenerator::new(params.streamline.clone(), domain, seed)?;
        Ok(Self {
            params,
            generator,
            coastline: Vec::new(),
            coastline_major: true,
            sea_polygon: Vec::new(),
            river_polygon: Vec::new(),
            secondary_road: Vec::new(),
        })
    }

    /// Sample grids of the water roads, for seeding later tiers.
    pub fn generator(&self) -> &StreamlineGenerator {
        &self.generator
    }

    /// The coastline as traced, before simplification.
    pub fn coastline(&self) -> &[DVec2] {
        &self.coastline
    }

    pub fn sea_polygon(&self) -> &[DVec2] {
        &self.sea_polygon
    }

    pub fn river_polygon(&self) -> &[DVec2] {
        &self.river_polygon
    }

    /// Bank road on the far side of the river. Drawn, but kept out of the road graph.
    pub fn secondary_road(&self) -> &[DVec2] {
        &self.secondary_road
    }

    /// Coastline road and primary bank road.
    pub fn roads(&self) -> &[Vec<DVec2>] {
        &self.generator.all_streamlines_simple
    }

    pub fn streamlines_with_secondary_road(&self) -> Vec<Vec<DVec2>> {
        let mut lines = self.roads().to_vec();
        if !self.secondary_road.is_empty() {
            lines.push(self.secondary_road.clone());
        }
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.generator.all_streamlines.is_empty()
    }

    /// Trace the coastline and register the sea with `field`.
    pub fn create_coast(&mut self, field: &mut TensorField) {
        let noise = self.params.coast_noise.clone();
        if noise.enabled {
            field.enable_global_noise(noise.angle, noise.size);
        }
        let traced = self.trace_to_edges(field, None);
        field.disable_global_noise();

        let Some((line, major)) = traced else {
            warn!("No seed found for the coastline");
            return;
        };

        let tolerance = self.params.streamline.simplify_tolerance;
        let road = simplify_polyline(&line, tolerance);
        self.sea_polygon = split_domain(&self.generator.domain, &road);
        field.sea = self.sea_polygon.clone();

        // Intermediate samples so later tiers keep their distance along the whole coast
        let complex = complexify(&road, self.params.streamline.dstep);
        self.generator.push_streamline(Streamline {
            points: complex,
            major,
        });

        self.coastline = line;
        self.coastline_major = major;
        info!("Coastline traced, sea polygon has {} vertices", self.sea_polygon.len());
    }

    /// Trace the river across the coastline's orientation and register it with `field`.
    pub fn create_river(&mut self, field: &mut TensorField) {
        // The river may run out to sea
        let old_sea = std::mem::take(&mut field.sea);
        let noise = self.params.river_noise.clone();
        if noise.enabled {
            field.enable_global_noise(noise.angle, noise.size);
        }
        let traced = self.trace_to_edges(field, Some(!self.coastline_major));
        field.disable_global_noise();
        field.sea = old_sea;

        let Some((river_line, _)) = traced else {
            warn!("No seed found for the river");
            return;
        };

        let inner_size = self.params.river_size - self.params.river_bank_size;
        self.river_polygon = if inner_size > 0.0 {
            buffer_polyline(&river_line, inner_size).unwrap_or_default()
        } else {
            Vec::new()
        };

        let Some(outline) = buffer_polyline(&river_line, self.params.river_size) else {
            warn!("River of {} points has no outline", river_line.len());
            return;
        };
        let domain = self.generator.domain;
        let mut expanded = complexify_ring(&outline, self.params.streamline.dstep);

        // Start off screen so each bank comes out as one run
        if let Some(first_off) = expanded.iter().position(|&v| domain.is_off_edge(v)) {
            expanded.rotate_left(first_off);
        }

        let side = split_domain(&domain, &river_line);
        let on_bank = |v: DVec2| !inside_polygon(v, &field.sea) && !domain.is_off_edge(v);
        let bank: Vec<DVec2> = expanded
            .iter()
            .filter(|&&v| on_bank(v) && inside_polygon(v, &side))
            .copied()
            .collect();
        let far_bank: Vec<DVec2> = expanded
            .iter()
            .filter(|&&v| on_bank(v) && !inside_polygon(v, &side))
            .copied()
            .collect();

        if bank.is_empty() || far_bank.is_empty() {
            warn!("River bank roads are missing, leaving the river out of the field");
            return;
        }

        let tolerance = self.params.streamline.simplify_tolerance;
        let bank_simple = simplify_polyline(&bank, tolerance);
        let mut far_simple = simplify_polyline(&far_bank, tolerance);
        if bank[0].distance_squared(far_bank[0]) < bank[0].distance_squared(far_bank[far_bank.len() - 1]) {
            far_simple.reverse();
        }

        field.river = bank_simple.iter().chain(&far_simple).copied().collect();

        self.generator.push_streamline(Streamline {
            points: bank.clone(),
            major: true,
        });
        self.generator.grid_mut(false).add_polyline(&bank);
        self.generator.grid_mut(true).add_polyline(&far_bank);
        self.generator.grid_mut(false).add_polyline(&far_bank);
        self.secondary_road = far_simple;

        info!(
            "River traced, bank roads of {} and {} points",
            bank_simple.len(),
            self.secondary_road.len()
        );
    }

    /// Trace until a line reaches off the domain at both ends. Falls back to the
    /// last attempt; `None` only when no seed could be placed at all.
    fn trace_to_edges(&mut self, field: &TensorField, orientation: Option<bool>) -> Option<(Vec<DVec2>, bool)> {
        let mut last = None;
        for attempt in 0..TRIES {
            let major = orientation.unwrap_or_else(|| self.generator.rng().gen_bool(0.5));
            let Some(seed) = self.generator.get_seed(field, major) else {
                continue;
            };
            let line = self.extend_streamline(self.generator.integrate_streamline(field, seed, major));
            let reaches = self.reaches_edges(&line);
            last = Some((line, major));
            if reaches {
                debug!("Water line reached both edges after {} tries", attempt + 1);
                return last;
            }
        }
        if last.is_some() {
            warn!("No water line reached both edges in {} tries, using the last one", TRIES);
        }
        last
    }

    fn extend_streamline(&self, mut line: Vec<DVec2>) -> Vec<DVec2> {
        let n = line.len();
        if n < 2 {
            return line;
        }
        let reach = self.params.streamline.dstep * EXTEND_STEPS;
        let start = line[0] + (line[0] - line[1]).normalize_or_zero() * reach;
        let end = line[n - 1] + (line[n - 1] - line[n - 2]).normalize_or_zero() * reach;
        line.insert(0, start);
        line.push(end);
        line
    }

    fn reaches_edges(&self, line: &[DVec2]) -> bool {
        let domain = &self.generator.domain;
        match (line.first(), line.last()) {
            (Some(&first), Some(&last)) => line.len() > 1 && domain.is_off_edge(first) && domain.is_off_edge(last),
            _ => false,
        }
    }
}

/// The part of `domain` on one side of `line`: the line followed by the domain
/// corners met walking counter-clockwise from its end back to its start,
/// clipped to the domain.
pub fn split_domain(domain: &Domain, line: &[DVec2]) -> Vec<DVec2> {
    let (Some(&first), Some(&last)) = (line.first(), line.last()) else {
        return Vec::new();
    };
    if line.len() < 2 {
        return Vec::new();
    }

    let perimeter = domain.perimeter();
    let start_position = domain.perimeter_position(first);
    let end_position = domain.perimeter_position(last);
    let span = (start_position - end_position).rem_euclid(perimeter);

    let mut corners: Vec<(f64, DVec2)> = domain
        .corners()
        .into_iter()
        .zip(domain.corner_positions())
        .filter_map(|(corner, position)| {
            let offset = (position - end_position).rem_euclid(perimeter);
            (offset > 0.0 && offset < span).then_some((offset, corner))
        })
        .collect();
    corners.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut ring = line.to_vec();
    ring.extend(corners.into_iter().map(|(_, corner)| corner));

    let bounds = domain.corners();
    match intersect(to_paths(&[&ring]), to_paths(&[&bounds]), FillRule::NonZero) {
        Ok(result) => from_paths(result)
            .into_iter()
            .max_by(|a, b| area(a).total_cmp(&area(b)))
            .unwrap_or_default(),
        Err(e) => {
            error!("Failed to split the domain along a water line: {:?}", e);
            Vec::new()
        }
    }
}

/// Insert points so no gap along the polyline exceeds `spacing`.
pub fn complexify(points: &[DVec2], spacing: f64) -> Vec<DVec2> {
    let mut out = Vec::with_capacity(points.len());
    for w in points.windows(2) {
        let steps = (w[0].distance(w[1]) / spacing).ceil().max(1.0) as usize;
        for i in 0..steps {
            out.push(w[0].lerp(w[1], i as f64 / steps as f64));
        }
    }
    if let Some(&last) = points.last() {
        out.push(last);
    }
    out
}

fn complexify_ring(ring: &[DVec2], spacing: f64) -> Vec<DVec2> {
    let Some(&first) = ring.first() else {
        return Vec::new();
    };
    let mut closed = ring.to_vec();
    closed.push(first);
    let mut out = complexify(&closed, spacing);
    out.pop();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new(DVec2::ZERO, DVec2::new(200.0, 200.0))
    }

    fn quiet_params() -> WaterParams {
        WaterParams {
            coast_noise: WaterNoise {
                enabled: false,
                ..Default::default()
            },
            river_noise: WaterNoise {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn grid_field() -> TensorField {
        let mut field = TensorField::default();
        field.add_grid(DVec2::new(100.0, 100.0), 1000.0, 0.0, 0.0).unwrap();
        field
    }

    #[test]
    fn split_domain_keeps_the_counter_clockwise_side() {
        let domain = Domain::new(DVec2::ZERO, DVec2::new(100.0, 100.0));
        let line = vec![DVec2::new(-1.0, 50.0), DVec2::new(101.0, 50.0)];
        let half = split_domain(&domain, &line);

        assert!((area(&half) - 5000.0).abs() < 1.0);
        assert!(inside_polygon(DVec2::new(50.0, 75.0), &half));
        assert!(!inside_polygon(DVec2::new(50.0, 25.0), &half));

        let mut reversed = line.clone();
        reversed.reverse();
        let other = split_domain(&domain, &reversed);
        assert!(inside_polygon(DVec2::new(50.0, 25.0), &other));
    }

    #[test]
    fn complexify_bounds_spacing() {
        let points = complexify(&[DVec2::ZERO, DVec2::new(10.0, 0.0), DVec2::new(10.0, 2.5)], 1.0);
        assert_eq!(points.first(), Some(&DVec2::ZERO));
        assert_eq!(points.last(), Some(&DVec2::new(10.0, 2.5)));
        assert_eq!(points.len(), 14);
        assert!(points.windows(2).all(|w| w[0].distance(w[1]) <= 1.0 + 1e-9));
    }

    #[test]
    fn no_seeds_leave_the_water_empty() {
        let mut params = quiet_params();
        params.streamline.seed_tries = 0;
        let mut water = WaterGenerator::new(params, domain(), 1).unwrap();
        let mut field = grid_field();

        water.create_coast(&mut field);
        water.create_river(&mut field);

        assert!(water.is_empty());
        assert!(water.sea_polygon().is_empty());
        assert!(water.river_polygon().is_empty());
        assert!(field.sea.is_empty());
        assert!(field.river.is_empty());
    }

    #[test]
    fn coastline_crosses_the_domain_and_defines_the_sea() {
        let mut water = WaterGenerator::new(quiet_params(), domain(), 7).unwrap();
        let mut field = grid_field();
        water.create_coast(&mut field);

        let coast = water.coastline();
        assert!(domain().is_off_edge(coast[0]));
        assert!(domain().is_off_edge(coast[coast.len() - 1]));
        assert_eq!(water.roads().len(), 1);

        let sea_area = area(water.sea_polygon());
        assert!(sea_area > 0.0 && sea_area < 200.0 * 200.0);
        assert_eq!(field.sea, water.sea_polygon());
    }

    #[test]
    fn river_banks_stay_on_land_inside_the_domain() {
        let mut water = WaterGenerator::new(quiet_params(), domain(), 7).unwrap();
        let mut field = grid_field();
        water.create_coast(&mut field);
        let sea = field.sea.clone();
        water.create_river(&mut field);

        assert_eq!(field.sea, sea);
        assert!(!water.river_polygon().is_empty());
        for &v in water.secondary_road() {
            assert!(!domain().is_off_edge(v));
            assert!(!inside_polygon(v, &field.sea));
        }
        assert!(water.streamlines_with_secondary_road().len() >= water.roads().len());
    }

    #[test]
    fn invalid_river_size_is_rejected() {
        let params = WaterParams {
            river_size: 0.0,
            ..Default::default()
        };
        assert!(WaterGenerator::new(params, domain(), 1).is_err());
    }
}
