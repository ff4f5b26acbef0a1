//! The staged city pipeline: water, main roads, major roads, minor roads, then
//! lots and buildings.
//!
//! Each stage can run to completion in one call or be spread over many calls to
//! [`CityGenerator::update`] when animating.

use bevy::log::{debug, info};
use bevy::math::DVec2;
use bevy::prelude::Resource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::block_extractor::{PolygonFinder, PolygonParams};
use super::buildings::{BuildingModel, BuildingModels, ProjectionConfig};
use super::geometry::buffer_polyline;
use super::parks::{park_candidates, select_big_parks, select_small_parks, ParkConfig};
use super::river::{WaterGenerator, WaterParams};
use super::road_generator::{band_polygons, RoadGenerator, RoadTier, COASTLINE_WIDTH};
use super::roads::RoadGraph;
use super::streamline::StreamlineParams;
use super::tensor::{NoiseParams, TensorField};
use crate::error::{ConfigError, GenerationError};
use crate::export::model_generator::ModelInputs;
use crate::export::ExportConfig;
use crate::world::viewport::{Domain, Viewport};

/// Every knob of a generation run.
#[derive(Resource, Clone, Debug)]
pub struct CityConfig {
    pub seed: u64,
    pub main: StreamlineParams,
    pub major: StreamlineParams,
    pub minor: StreamlineParams,
    pub water: WaterParams,
    pub noise: NoiseParams,
    pub parks: ParkConfig,
    pub buildings: PolygonParams,
    pub projection: ProjectionConfig,
    pub viewport: Viewport,
    pub export: ExportConfig,
    /// Spread each stage over many updates.
    pub animate: bool,
    /// Updates one stage may take before it is considered stuck.
    pub max_stage_steps: usize,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            main: RoadTier::Main.default_params(),
            major: RoadTier::Major.default_params(),
            minor: RoadTier::Minor.default_params(),
            water: WaterParams::default(),
            noise: NoiseParams::default(),
            parks: ParkConfig::default(),
            buildings: PolygonParams::default(),
            projection: ProjectionConfig::default(),
            viewport: Viewport::default(),
            export: ExportConfig::default(),
            animate: true,
            max_stage_steps: 200_000,
        }
    }
}

impl CityConfig {
    pub fn params(&self, tier: RoadTier) -> &StreamlineParams {
        match tier {
            RoadTier::Main => &self.main,
            RoadTier::Major => &self.major,
            RoadTier::Minor => &self.minor,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in RoadTier::ALL {
            self.params(tier).validate()?;
        }
        self.water.validate()?;
        if !(self.viewport.zoom.is_finite() && self.viewport.zoom > 0.0) {
            return Err(ConfigError::InvalidTuning {
                name: "zoom",
                value: self.viewport.zoom,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Water,
    Main,
    Major,
    Minor,
    Buildings,
    Done,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Water => "water",
            Stage::Main => "main roads",
            Stage::Major => "major roads",
            Stage::Minor => "minor roads",
            Stage::Buildings => "buildings",
            Stage::Done => "done",
        }
    }

    fn next(self) -> Stage {
        match self {
            Stage::Idle => Stage::Water,
            Stage::Water => Stage::Main,
            Stage::Main => Stage::Major,
            Stage::Major => Stage::Minor,
            Stage::Minor => Stage::Buildings,
            Stage::Buildings | Stage::Done => Stage::Done,
        }
    }
}

/// Generated geometry mapped through a caller-supplied transform.
#[derive(Clone, Debug, Default)]
pub struct CityLayout {
    pub sea: Vec<DVec2>,
    pub coastline: Vec<DVec2>,
    pub river: Vec<DVec2>,
    pub coastline_roads: Vec<Vec<DVec2>>,
    pub secondary_river: Vec<DVec2>,
    pub main_roads: Vec<Vec<DVec2>>,
    pub major_roads: Vec<Vec<DVec2>>,
    pub minor_roads: Vec<Vec<DVec2>>,
    pub parks: Vec<Vec<DVec2>>,
    pub lots: Vec<Vec<DVec2>>,
    pub intersections: Vec<DVec2>,
}

#[derive(Resource)]
pub struct CityGenerator {
    config: CityConfig,
    field: TensorField,
    domain: Domain,
    water: WaterGenerator,
    main_roads: RoadGenerator,
    major_roads: RoadGenerator,
    minor_roads: RoadGenerator,
    big_parks: Vec<Vec<DVec2>>,
    small_parks: Vec<Vec<DVec2>>,
    intersections: Vec<DVec2>,
    lots: PolygonFinder,
    lots_divided: bool,
    models: BuildingModels,
    rng: StdRng,
    stage: Stage,
    animate: bool,
    stage_steps: usize,
}

impl CityGenerator {
    /// A generator with the recommended tensor field for the viewport's domain.
    pub fn new(config: CityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let domain = config.viewport.domain();

        let mut field = TensorField::new(config.noise.clone(), rng.gen());
        field.set_recommended(&domain, &mut rng)?;

        let water = WaterGenerator::new(config.water.clone(), domain, rng.gen())?;
        let main_roads = RoadGenerator::new(RoadTier::Main, config.main.clone(), domain, rng.gen())?;
        let major_roads = RoadGenerator::new(RoadTier::Major, config.major.clone(), domain, rng.gen())?;
        let minor_roads = RoadGenerator::new(RoadTier::Minor, config.minor.clone(), domain, rng.gen())?;
        let lots = PolygonFinder::new(config.buildings.clone(), rng.gen());
        let models = BuildingModels::new(&[], config.projection.clone(), &mut rng);

        Ok(Self {
            animate: config.animate,
            config,
            field,
            domain,
            water,
            main_roads,
            major_roads,
            minor_roads,
            big_parks: Vec::new(),
            small_parks: Vec::new(),
            intersections: Vec::new(),
            lots,
            lots_divided: false,
            models,
            rng,
            stage: Stage::Idle,
            stage_steps: 0,
        })
    }

    pub fn config(&self) -> &CityConfig {
        &self.config
    }

    pub fn field(&self) -> &TensorField {
        &self.field
    }

    /// Edit the field between runs.
    pub fn field_mut(&mut self) -> &mut TensorField {
        &mut self.field
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.stage, Stage::Idle | Stage::Done)
    }

    pub fn water(&self) -> &WaterGenerator {
        &self.water
    }

    pub fn roads(&self, tier: RoadTier) -> &RoadGenerator {
        match tier {
            RoadTier::Main => &self.main_roads,
            RoadTier::Major => &self.major_roads,
            RoadTier::Minor => &self.minor_roads,
        }
    }

    pub fn parks(&self) -> impl Iterator<Item = &Vec<DVec2>> {
        self.big_parks.iter().chain(&self.small_parks)
    }

    pub fn intersections(&self) -> &[DVec2] {
        &self.intersections
    }

    /// Building lots in world space.
    pub fn lots(&self) -> &[Vec<DVec2>] {
        self.lots.polygons()
    }

    pub fn building_models(&self) -> &[BuildingModel] {
        self.models.models()
    }

    /// Run every stage to completion.
    pub fn generate_everything(&mut self) -> Result<(), GenerationError> {
        self.begin(false)?;
        while self.update()? {}
        Ok(())
    }

    /// Start a run from the water stage, discarding all previous output.
    pub fn begin(&mut self, animate: bool) -> Result<(), GenerationError> {
        self.animate = animate;
        self.domain = self.config.viewport.domain();
        self.stage = Stage::Water;
        self.enter_stage()?;
        info!("City generation started (animate: {})", animate);
        Ok(())
    }

    /// Do one unit of work. Returns whether the run continues.
    pub fn update(&mut self) -> Result<bool, GenerationError> {
        if !self.is_running() {
            return Ok(false);
        }

        self.stage_steps += 1;
        if self.stage_steps > self.config.max_stage_steps {
            let stage = self.stage.name();
            self.stage = Stage::Idle;
            return Err(GenerationError::Stalled {
                stage,
                limit: self.config.max_stage_steps,
            });
        }

        if !self.step_stage() {
            self.exit_stage();
            self.stage = self.stage.next();
            self.enter_stage()?;
        }
        Ok(self.is_running())
    }

    fn fresh_tier(&mut self, tier: RoadTier) -> Result<RoadGenerator, ConfigError> {
        RoadGenerator::new(tier, self.config.params(tier).clone(), self.domain, self.rng.gen())
    }

    fn clear_buildings(&mut self) {
        self.lots.reset();
        self.lots_divided = false;
        self.models = BuildingModels::new(&[], self.config.projection.clone(), &mut self.rng);
    }

    fn enter_stage(&mut self) -> Result<(), GenerationError> {
        self.stage_steps = 0;
        debug!("Entering {} stage", self.stage.name());

        match self.stage {
            Stage::Idle | Stage::Done => {}
            Stage::Water => {
                self.field.parks.clear();
                self.field.sea.clear();
                self.field.river.clear();
                self.water = WaterGenerator::new(self.config.water.clone(), self.domain, self.rng.gen())?;
                self.main_roads = self.fresh_tier(RoadTier::Main)?;
                self.major_roads = self.fresh_tier(RoadTier::Major)?;
                self.minor_roads = self.fresh_tier(RoadTier::Minor)?;
                self.big_parks.clear();
                self.small_parks.clear();
                self.intersections.clear();
                self.clear_buildings();
            }
            Stage::Main => {
                self.main_roads = self.fresh_tier(RoadTier::Main)?;
                self.major_roads = self.fresh_tier(RoadTier::Major)?;
                self.minor_roads = self.fresh_tier(RoadTier::Minor)?;
                self.big_parks.clear();
                self.small_parks.clear();
                self.clear_buildings();
                self.field.parks.clear();
                self.field.ignore_river = true;
                self.main_roads.set_existing(&[self.water.generator()]);
            }
            Stage::Major => {
                self.major_roads = self.fresh_tier(RoadTier::Major)?;
                self.minor_roads = self.fresh_tier(RoadTier::Minor)?;
                self.big_parks.clear();
                self.small_parks.clear();
                self.clear_buildings();
                self.field.parks.clear();
                self.field.ignore_river = true;
                self.major_roads
                    .set_existing(&[self.water.generator(), self.main_roads.generator()]);
            }
            Stage::Minor => {
                self.minor_roads = self.fresh_tier(RoadTier::Minor)?;
                self.clear_buildings();
                self.small_parks.clear();
                self.field.parks = self.big_parks.clone();
                self.minor_roads.set_existing(&[
                    self.water.generator(),
                    self.main_roads.generator(),
                    self.major_roads.generator(),
                ]);
            }
            Stage::Buildings => {
                self.clear_buildings();
                let graph = RoadGraph::from_streamlines(&self.all_streamlines(), true);
                self.lots = PolygonFinder::new(self.config.buildings.clone(), self.rng.gen());
                self.lots.find_polygons(&graph, &self.field);
                self.lots.shrink(self.animate);
            }
        }
        Ok(())
    }

    /// Returns whether the current stage has more work.
    fn step_stage(&mut self) -> bool {
        match self.stage {
            Stage::Idle | Stage::Done => false,
            Stage::Water => {
                self.water.create_coast(&mut self.field);
                self.water.create_river(&mut self.field);
                false
            }
            Stage::Main | Stage::Major | Stage::Minor => {
                let tier = match self.stage {
                    Stage::Main => &mut self.main_roads,
                    Stage::Major => &mut self.major_roads,
                    _ => &mut self.minor_roads,
                };
                if self.animate {
                    tier.update(&self.field)
                } else {
                    tier.generate(&self.field);
                    false
                }
            }
            Stage::Buildings => {
                if self.lots.is_busy() {
                    self.lots.update();
                    return true;
                }
                if !self.lots_divided {
                    self.lots.divide(self.animate);
                    self.lots_divided = true;
                    return true;
                }
                false
            }
        }
    }

    fn exit_stage(&mut self) {
        match self.stage {
            Stage::Main => {
                self.field.ignore_river = false;
                info!("Traced {} {} roads", self.main_roads.roads().len(), RoadTier::Main.name());
            }
            Stage::Major => {
                self.field.ignore_river = false;
                info!("Traced {} {} roads", self.major_roads.roads().len(), RoadTier::Major.name());
                self.add_parks();
            }
            Stage::Minor => {
                info!("Traced {} {} roads", self.minor_roads.roads().len(), RoadTier::Minor.name());
                self.add_parks();
            }
            Stage::Buildings => {
                self.models = BuildingModels::new(self.lots.polygons(), self.config.projection.clone(), &mut self.rng);
                self.models.set_projections(&self.config.viewport);
                info!("Created {} buildings", self.models.models().len());
            }
            Stage::Idle | Stage::Water | Stage::Done => {}
        }
    }

    /// Big parks after the major tier, small parks once minor roads exist.
    fn add_parks(&mut self) {
        let lines: Vec<Vec<DVec2>> = [&self.major_roads, &self.main_roads, &self.minor_roads]
            .into_iter()
            .flat_map(|tier| tier.roads().iter().cloned())
            .collect();
        let (polygons, intersections) = park_candidates(&lines, &self.field, self.rng.gen());
        self.intersections = intersections;

        if self.minor_roads.is_empty() {
            self.big_parks = select_big_parks(&polygons, &self.config.parks, &mut self.rng);
            self.small_parks.clear();
        } else {
            self.small_parks = select_small_parks(&polygons, &self.config.parks, &mut self.rng);
        }

        self.field.parks = self.parks().cloned().collect();
        debug!(
            "{} big and {} small parks from {} candidates",
            self.big_parks.len(),
            self.small_parks.len(),
            polygons.len()
        );
    }

    /// Every road centreline lots are cut from, including the far river bank.
    fn all_streamlines(&self) -> Vec<Vec<DVec2>> {
        let mut lines: Vec<Vec<DVec2>> = RoadTier::ALL
            .iter()
            .flat_map(|&tier| self.roads(tier).roads().iter().cloned())
            .collect();
        lines.extend(self.water.streamlines_with_secondary_road());
        lines
    }

    /// Move or zoom the view and reproject the buildings.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.config.viewport = viewport;
        self.models.set_projections(&self.config.viewport);
    }

    pub fn layout(&self, transform: impl Fn(DVec2) -> DVec2) -> CityLayout {
        let map = |points: &[DVec2]| -> Vec<DVec2> { points.iter().map(|&p| transform(p)).collect() };
        let map_all = |lines: &[Vec<DVec2>]| -> Vec<Vec<DVec2>> { lines.iter().map(|l| map(l.as_slice())).collect() };

        CityLayout {
            sea: map(self.water.sea_polygon()),
            coastline: map(self.water.coastline()),
            river: map(self.water.river_polygon()),
            coastline_roads: map_all(self.water.roads()),
            secondary_river: map(self.water.secondary_road()),
            main_roads: map_all(self.main_roads.roads()),
            major_roads: map_all(self.major_roads.roads()),
            minor_roads: map_all(self.minor_roads.roads()),
            parks: self.parks().map(|p| map(p.as_slice())).collect(),
            lots: map_all(self.lots.polygons()),
            intersections: map(self.intersections.as_slice()),
        }
    }

    /// Coarse blocks used to give roads their width in the exported model, in screen space.
    pub fn blocks(&self) -> Vec<Vec<DVec2>> {
        let graph = RoadGraph::from_streamlines(&self.all_streamlines(), true);
        let params = PolygonParams {
            shrink_spacing: self.config.buildings.shrink_spacing / 2.0,
            ..self.config.buildings.clone()
        };
        let mut finder = PolygonFinder::new(params, self.config.seed);
        finder.find_polygons(&graph, &self.field);
        finder.shrink(false);

        let viewport = &self.config.viewport;
        finder
            .polygons()
            .iter()
            .map(|p| p.iter().map(|&v| viewport.world_to_screen(v)).collect())
            .collect()
    }

    /// Screen-space polygons for the model exporter.
    pub fn model_inputs(&self) -> ModelInputs {
        let viewport = &self.config.viewport;
        let zoom = viewport.zoom;
        let layout = self.layout(|v| viewport.world_to_screen(v));

        let mut main = layout.main_roads;
        main.extend(layout.coastline_roads);
        let mut major = layout.major_roads;
        if !layout.secondary_river.is_empty() {
            major.push(layout.secondary_river);
        }

        ModelInputs {
            ground: self.domain.corners().iter().map(|&c| viewport.world_to_screen(c)).collect(),
            sea: layout.sea,
            coastline: buffer_polyline(&layout.coastline, COASTLINE_WIDTH * zoom).unwrap_or_default(),
            river: layout.river,
            main_roads: band_polygons(&main, RoadTier::Main.width() * zoom),
            major_roads: band_polygons(&major, RoadTier::Major.width() * zoom),
            minor_roads: band_polygons(&layout.minor_roads, RoadTier::Minor.width() * zoom),
            buildings: self.models.models().to_vec(),
            blocks: self.blocks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::DVec2;
    use crate::export::model_generator::ModelGenerator;

    fn small_config() -> CityConfig {
        let mut config = CityConfig {
            seed: 5,
            viewport: Viewport {
                screen_dimensions: DVec2::new(300.0, 300.0),
                ..Default::default()
            },
            ..Default::default()
        };
        config.main.dsep = 150.0;
        config.main.dtest = 75.0;
        config.major.dsep = 60.0;
        config.major.dtest = 30.0;
        config.water.streamline.path_iterations = 2000;
        for params in [&mut config.main, &mut config.major, &mut config.minor] {
            params.seed_tries = 40;
        }
        config
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = small_config();
        config.minor.dtest = config.minor.dsep;
        assert!(CityGenerator::new(config).is_err());

        let mut config = small_config();
        config.viewport.zoom = 0.0;
        assert!(CityGenerator::new(config).is_err());
    }

    #[test]
    fn full_run_reaches_done() {
        let mut city = CityGenerator::new(small_config()).unwrap();
        assert_eq!(city.stage(), Stage::Idle);
        assert!(!city.update().unwrap());

        city.generate_everything().unwrap();
        assert_eq!(city.stage(), Stage::Done);
        assert!(!city.update().unwrap());

        assert!(!city.roads(RoadTier::Minor).roads().is_empty());
        assert_eq!(city.building_models().len(), city.lots().len());
        assert!(!city.field().ignore_river);
    }

    #[test]
    fn runs_are_deterministic_for_a_seed() {
        let mut a = CityGenerator::new(small_config()).unwrap();
        let mut b = CityGenerator::new(small_config()).unwrap();
        a.generate_everything().unwrap();
        b.generate_everything().unwrap();

        let (la, lb) = (a.layout(|v| v), b.layout(|v| v));
        assert_eq!(la.sea, lb.sea);
        assert_eq!(la.main_roads, lb.main_roads);
        assert_eq!(la.minor_roads, lb.minor_roads);
        assert_eq!(la.lots, lb.lots);
    }

    #[test]
    fn animated_run_traces_the_same_roads() {
        let mut sync = CityGenerator::new(small_config()).unwrap();
        sync.generate_everything().unwrap();

        let mut animated = CityGenerator::new(small_config()).unwrap();
        animated.begin(true).unwrap();
        let mut updates = 0;
        while animated.update().unwrap() {
            updates += 1;
        }
        assert!(updates > 5);
        for tier in RoadTier::ALL {
            assert_eq!(sync.roads(tier).roads(), animated.roads(tier).roads());
        }
    }

    #[test]
    fn stuck_stage_reports_stalled() {
        let mut config = small_config();
        config.max_stage_steps = 1;
        let mut city = CityGenerator::new(config).unwrap();
        city.begin(true).unwrap();

        let result = loop {
            match city.update() {
                Ok(true) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(GenerationError::Stalled { limit: 1, .. })));
        assert!(!city.is_running());
    }

    #[test]
    fn layout_applies_the_transform() {
        let mut city = CityGenerator::new(small_config()).unwrap();
        city.generate_everything().unwrap();
        let shift = DVec2::new(1000.0, 0.0);
        let layout = city.layout(|v| v + shift);
        for (moved, original) in layout.minor_roads.iter().zip(city.roads(RoadTier::Minor).roads()) {
            assert_eq!(moved[0], original[0] + shift);
        }
    }

    #[test]
    fn export_of_a_generated_city_succeeds() {
        let mut city = CityGenerator::new(small_config()).unwrap();
        city.generate_everything().unwrap();
        let inputs = city.model_inputs();
        assert_eq!(inputs.ground.len(), 4);
        assert_eq!(inputs.buildings.len(), city.building_models().len());

        let archive = ModelGenerator::new(inputs).export_blocking().unwrap();
        assert!(!archive.is_empty());
    }
}
