//! City block extraction from the road graph.
//!
//! Faces are found by walking the planar graph and always taking the rightmost
//! turn. Blocks are then shrunk away from the road centrelines and divided into
//! lots.

use std::collections::HashMap;

use bevy::log::{debug, warn};
use bevy::math::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::geometry::{area, average_point, offset_polygon, signed_area};
use super::parcels::subdivide_polygon;
use super::roads::RoadGraph;
use super::tensor::TensorField;

/// Configuration for block extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct PolygonParams {
    /// Longest face walk, in nodes.
    pub max_length: usize,
    pub min_area: f64,
    /// Inward offset from the road centreline.
    pub shrink_spacing: f64,
    /// Probability that a block is kept whole.
    pub chance_no_divide: f64,
}

/// Building lot defaults.
impl Default for PolygonParams {
    fn default() -> Self {
        Self {
            max_length: 20,
            min_area: 200.0,
            shrink_spacing: 4.0,
            chance_no_divide: 0.05,
        }
    }
}

impl PolygonParams {
    /// Parks are large and never subdivided.
    pub fn parks() -> Self {
        Self {
            max_length: 20,
            min_area: 80.0,
            shrink_spacing: 4.0,
            chance_no_divide: 1.0,
        }
    }
}

/// Finds, shrinks and divides the faces of a road graph.
pub struct PolygonFinder {
    pub params: PolygonParams,
    found: Vec<Vec<DVec2>>,
    shrunk: Vec<Vec<DVec2>>,
    divided: Vec<Vec<DVec2>>,
    to_shrink: Vec<Vec<DVec2>>,
    to_divide: Vec<Vec<DVec2>>,
    rng: StdRng,
}

impl PolygonFinder {
    pub fn new(params: PolygonParams, seed: u64) -> Self {
        Self {
            params,
            found: Vec::new(),
            shrunk: Vec::new(),
            divided: Vec::new(),
            to_shrink: Vec::new(),
            to_divide: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Divided lots if any, else shrunk blocks, else the raw faces.
    pub fn polygons(&self) -> &[Vec<DVec2>] {
        if !self.divided.is_empty() {
            &self.divided
        } else if !self.shrunk.is_empty() {
            &self.shrunk
        } else {
            &self.found
        }
    }

    pub fn found_polygons(&self) -> &[Vec<DVec2>] {
        &self.found
    }

    pub fn reset(&mut self) {
        self.found.clear();
        self.shrunk.clear();
        self.divided.clear();
        self.to_shrink.clear();
        self.to_divide.clear();
    }

    /// Whether queued shrink/divide work remains.
    pub fn is_busy(&self) -> bool {
        !self.to_shrink.is_empty() || !self.to_divide.is_empty()
    }

    /// Process one queued polygon. Returns whether anything changed.
    pub fn update(&mut self) -> bool {
        let mut change = false;
        if let Some(polygon) = self.to_shrink.pop() {
            change |= self.step_shrink(&polygon);
        }
        if let Some(polygon) = self.to_divide.pop() {
            change |= self.step_divide(&polygon);
        }
        change
    }

    pub fn shrink(&mut self, animate: bool) {
        self.shrunk.clear();
        let polygons = self.found.clone();
        if animate {
            self.to_shrink = polygons;
        } else {
            for polygon in &polygons {
                self.step_shrink(polygon);
            }
        }
    }

    fn step_shrink(&mut self, polygon: &[DVec2]) -> bool {
        match offset_polygon(polygon, -self.params.shrink_spacing) {
            Some(shrunk) => {
                self.shrunk.push(shrunk);
                true
            }
            None => false,
        }
    }

    /// Operates on the shrunk polygons when there are any.
    pub fn divide(&mut self, animate: bool) {
        self.divided.clear();
        let polygons = if self.shrunk.is_empty() {
            self.found.clone()
        } else {
            self.shrunk.clone()
        };
        if animate {
            self.to_divide = polygons;
        } else {
            for polygon in &polygons {
                self.step_divide(polygon);
            }
        }
    }

    fn step_divide(&mut self, polygon: &[DVec2]) -> bool {
        if self.params.chance_no_divide > 0.0 && self.rng.gen::<f64>() < self.params.chance_no_divide {
            self.divided.push(polygon.to_vec());
            return true;
        }

        let lots = subdivide_polygon(polygon, self.params.min_area, &mut self.rng);
        if lots.is_empty() {
            return false;
        }
        self.divided.extend(lots);
        true
    }

    /// Extract the interior faces of `graph` that lie on land outside parks.
    pub fn find_polygons(&mut self, graph: &RoadGraph, field: &TensorField) {
        self.reset();

        let indices: Vec<_> = graph.graph.node_indices().collect();
        let compact: HashMap<_, usize> = indices.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let positions: Vec<DVec2> = indices.iter().map(|&n| graph.graph[n].position).collect();
        let mut adjacency: Vec<Vec<usize>> = indices
            .iter()
            .map(|&n| graph.neighbors(n).filter_map(|m| compact.get(&m).copied()).collect())
            .collect();

        let mut faces = Vec::new();
        for node in 0..positions.len() {
            if adjacency[node].len() < 2 {
                continue;
            }
            for next in adjacency[node].clone() {
                // Half-edge already consumed by an earlier face
                if !adjacency[node].contains(&next) {
                    continue;
                }
                let Some(cycle) = self.walk(&positions, &adjacency, node, next) else {
                    continue;
                };
                if cycle.len() >= self.params.max_length {
                    continue;
                }
                for i in 0..cycle.len() {
                    let (current, following) = (cycle[i], cycle[(i + 1) % cycle.len()]);
                    match adjacency[current].iter().position(|&n| n == following) {
                        Some(index) => {
                            adjacency[current].remove(index);
                        }
                        None => warn!("Face walk used a missing half-edge"),
                    }
                }
                faces.push(cycle.iter().map(|&i| positions[i]).collect::<Vec<_>>());
            }
        }

        let min_area = 0.5 * self.params.min_area;
        self.found = faces
            .into_iter()
            .filter(|face| {
                if face.len() < 3 || signed_area(face) >= 0.0 || area(face) < min_area {
                    return false;
                }
                let centre = average_point(face);
                field.on_land(centre) && !field.in_parks(centre)
            })
            .collect();

        debug!("Found {} polygons", self.found.len());
    }

    /// Follow rightmost turns from the half-edge `start -> next` until a node repeats.
    fn walk(
        &self,
        positions: &[DVec2],
        adjacency: &[Vec<usize>],
        start: usize,
        next: usize,
    ) -> Option<Vec<usize>> {
        let mut visited = vec![start, next];
        for _ in 0..self.params.max_length {
            let from = visited[visited.len() - 2];
            let to = visited[visited.len() - 1];
            let following = rightmost_node(positions, adjacency, from, to)?;
            if let Some(index) = visited.iter().position(|&n| n == following) {
                return Some(visited.split_off(index));
            }
            visited.push(following);
        }
        None
    }
}

/// The neighbour of `to` reached by the smallest counter-clockwise angle from
/// the edge back to `from`.
fn rightmost_node(positions: &[DVec2], adjacency: &[Vec<usize>], from: usize, to: usize) -> Option<usize> {
    let back = positions[from] - positions[to];
    let transform = back.y.atan2(back.x);

    let mut rightmost = None;
    let mut smallest = std::f64::consts::TAU;
    for &candidate in &adjacency[to] {
        if candidate == from {
            continue;
        }
        let v = positions[candidate] - positions[to];
        let mut angle = v.y.atan2(v.x) - transform;
        if angle < 0.0 {
            angle += std::f64::consts::TAU;
        }
        if angle < smallest {
            smallest = angle;
            rightmost = Some(candidate);
        }
    }
    rightmost
}
