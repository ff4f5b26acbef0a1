//! 3D model export: extrusion, binary STL and the zipped archive.

use std::path::PathBuf;

use bevy::prelude::*;

pub mod mesh;
pub mod model_generator;
pub mod stl;

use crate::budget::FrameBudget;
use crate::game_state::AppPhase;
use crate::procgen::city::{CityConfig, CityGenerator};
use model_generator::{ModelGenerator, PendingArchive};

/// Where the finished archive is written.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("city.zip"),
        }
    }
}

/// The export in flight.
#[derive(Resource)]
struct ExportSession {
    generator: ModelGenerator,
    pending: PendingArchive,
}

pub struct ExportPlugin;

impl Plugin for ExportPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(OnEnter(AppPhase::Exporting), start_export)
            .add_systems(Update, drive_export.run_if(in_state(AppPhase::Exporting)));
    }
}

fn start_export(
    mut commands: Commands,
    city: Res<CityGenerator>,
    mut next_phase: ResMut<NextState<AppPhase>>,
    mut exit: EventWriter<AppExit>,
) {
    let mut generator = ModelGenerator::new(city.model_inputs());
    match generator.get_stl() {
        Ok(pending) => {
            info!("Exporting model...");
            commands.insert_resource(ExportSession { generator, pending });
        }
        Err(e) => {
            error!("Could not start export: {}", e);
            next_phase.set(AppPhase::Finished);
            exit.send(AppExit::error());
        }
    }
}

fn drive_export(
    mut commands: Commands,
    session: Option<ResMut<ExportSession>>,
    config: Res<CityConfig>,
    mut next_phase: ResMut<NextState<AppPhase>>,
    mut exit: EventWriter<AppExit>,
) {
    let Some(mut session) = session else {
        return;
    };

    FrameBudget::export().run(|| session.generator.update());

    let Some(result) = session.pending.poll() else {
        return;
    };
    commands.remove_resource::<ExportSession>();
    next_phase.set(AppPhase::Finished);

    let path = &config.export.path;
    match result.and_then(|bytes| std::fs::write(path, &bytes).map(|_| bytes.len()).map_err(Into::into)) {
        Ok(len) => {
            info!("Wrote {} bytes to {}", len, path.display());
            exit.send(AppExit::Success);
        }
        Err(e) => {
            error!("Export failed: {}", e);
            exit.send(AppExit::error());
        }
    }
}
