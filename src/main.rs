//! Headless city generator: builds a city from the default configuration and
//! writes the model archive next to the working directory.

use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::state::app::StatesPlugin;

use citygen::CityGenPlugin;

fn main() -> AppExit {
    App::new()
        .add_plugins(MinimalPlugins)
        .add_plugins(LogPlugin::default())
        .add_plugins(StatesPlugin)
        .add_plugins(CityGenPlugin)
        .run()
}
