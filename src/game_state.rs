//! Top-level phase machine for the headless generator.
//!
//! Generation runs while in `Generating`, the model export while in
//! `Exporting`; the app exits once the archive is on disk.

use bevy::prelude::*;

pub struct AppPhasePlugin;

impl Plugin for AppPhasePlugin {
    fn build(&self, app: &mut App) {
        app.init_state::<AppPhase>();
    }
}

/// Which systems run this frame.
#[derive(States, Default, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum AppPhase {
    /// Waiting for a `GenerateCityEvent`.
    #[default]
    Idle,
    /// The city pipeline is advancing stage by stage.
    Generating,
    /// Meshes are being built and zipped.
    Exporting,
    Finished,
}
