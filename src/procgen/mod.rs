//! Procedural generation systems.
//!
//! - Tensor fields steering the road network
//! - Streamline tracing for water and three road tiers
//! - Road graph and polygon extraction for parks and lots
//! - Pseudo-3D building projection

use bevy::prelude::*;

pub mod block_extractor;
pub mod buildings;
pub mod city;
pub mod geometry;
pub mod parcels;
pub mod parks;
pub mod river;
pub mod road_generator;
pub mod roads;
pub mod streamline;
pub mod tensor;

use crate::budget::FrameBudget;
use crate::error::GenerationError;
use crate::game_state::AppPhase;
use city::{CityConfig, CityGenerator};

/// Event to (re)start city generation from the current `CityConfig`.
#[derive(Event)]
pub struct GenerateCityEvent;

pub struct ProcgenPlugin;

impl Plugin for ProcgenPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CityConfig>()
            .add_event::<GenerateCityEvent>()
            .add_systems(Startup, trigger_initial_generation)
            .add_systems(
                Update,
                (
                    generate_city_on_event,
                    drive_generation.run_if(in_state(AppPhase::Generating)),
                )
                    .chain(),
            );
    }
}

fn trigger_initial_generation(mut events: EventWriter<GenerateCityEvent>) {
    events.send(GenerateCityEvent);
}

fn generate_city_on_event(
    mut commands: Commands,
    mut events: EventReader<GenerateCityEvent>,
    config: Res<CityConfig>,
    mut next_phase: ResMut<NextState<AppPhase>>,
    mut exit: EventWriter<AppExit>,
) {
    // Several requests in one frame start a single run
    if events.read().count() == 0 {
        return;
    }

    info!("Generating city (seed {})...", config.seed);
    let started = CityGenerator::new(config.clone())
        .map_err(GenerationError::from)
        .and_then(|mut city| city.begin(config.animate).map(|_| city));

    match started {
        Ok(city) => {
            commands.insert_resource(city);
            next_phase.set(AppPhase::Generating);
        }
        Err(e) => {
            error!("City generation could not start: {}", e);
            next_phase.set(AppPhase::Finished);
            exit.send(AppExit::error());
        }
    }
}

fn drive_generation(
    city: Option<ResMut<CityGenerator>>,
    mut next_phase: ResMut<NextState<AppPhase>>,
    mut exit: EventWriter<AppExit>,
) {
    let Some(mut city) = city else {
        return;
    };

    match FrameBudget::animation().try_run(|| city.update()) {
        Ok(true) => {}
        Ok(false) => {
            info!(
                "City generated: {} lots, {} buildings",
                city.lots().len(),
                city.building_models().len()
            );
            next_phase.set(AppPhase::Exporting);
        }
        Err(e) => {
            error!("City generation failed: {}", e);
            next_phase.set(AppPhase::Finished);
            exit.send(AppExit::error());
        }
    }
}
