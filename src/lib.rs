//! Citygen - tensor-field city layout generator
//!
//! Traces water, three tiers of roads, parks, building lots and pseudo-3D
//! buildings from a tensor field, then exports the result as zipped STL
//! meshes. Runs as a headless Bevy app.

use bevy::prelude::*;

pub mod budget;
pub mod error;
pub mod export;
pub mod game_state;
pub mod procgen;
pub mod world;

pub use procgen::city::{CityConfig, CityGenerator};
pub use procgen::GenerateCityEvent;

/// Everything the generator needs on top of Bevy's minimal plugins and states.
pub struct CityGenPlugin;

impl Plugin for CityGenPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(game_state::AppPhasePlugin)
            // Procedural generation
            .add_plugins(procgen::ProcgenPlugin)
            // Model export once generation finishes
            .add_plugins(export::ExportPlugin);
    }
}
