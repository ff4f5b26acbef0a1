//! Park selection from road-enclosed polygons.

use bevy::math::DVec2;
use rand::seq::SliceRandom;
use rand::Rng;

use super::block_extractor::{PolygonFinder, PolygonParams};
use super::roads::RoadGraph;
use super::tensor::TensorField;

#[derive(Clone, Debug, PartialEq)]
pub struct ParkConfig {
    pub num_big_parks: usize,
    pub num_small_parks: usize,
    /// Pick big parks as one run of neighbouring polygons instead of independently.
    pub cluster_big_parks: bool,
}

impl Default for ParkConfig {
    fn default() -> Self {
        Self {
            num_big_parks: 20,
            num_small_parks: 10,
            cluster_big_parks: false,
        }
    }
}

/// Candidate park polygons enclosed by `streamlines`, plus the graph's crossings.
pub fn park_candidates(
    streamlines: &[Vec<DVec2>],
    field: &TensorField,
    seed: u64,
) -> (Vec<Vec<DVec2>>, Vec<DVec2>) {
    let graph = RoadGraph::from_streamlines(streamlines, false);
    let mut finder = PolygonFinder::new(PolygonParams::parks(), seed);
    finder.find_polygons(&graph, field);
    (finder.polygons().to_vec(), graph.intersections)
}

pub fn select_big_parks(
    polygons: &[Vec<DVec2>],
    config: &ParkConfig,
    rng: &mut impl Rng,
) -> Vec<Vec<DVec2>> {
    let n = config.num_big_parks;
    if polygons.len() <= n {
        return polygons.to_vec();
    }

    if config.cluster_big_parks {
        let start = rng.gen_range(0..polygons.len() - n);
        polygons[start..start + n].to_vec()
    } else {
        polygons.choose_multiple(rng, n).cloned().collect()
    }
}

pub fn select_small_parks(
    polygons: &[Vec<DVec2>],
    config: &ParkConfig,
    rng: &mut impl Rng,
) -> Vec<Vec<DVec2>> {
    polygons
        .choose_multiple(rng, config.num_small_parks)
        .cloned()
        .collect()
}
