//! Road graph construction from streamlines.
//!
//! Uses petgraph for the underlying graph structure. The graph is built once
//! from a snapshot of simplified streamlines and never updated incrementally.

use std::collections::BTreeSet;

use bevy::log::{debug, warn};
use bevy::math::DVec2;
use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use smallvec::SmallVec;

use super::geometry::{polygon_bounds, segment_intersection};
use crate::world::grid::SpatialGrid;

/// Vertices closer than this are merged into one node.
pub const NODE_MERGE_RADIUS: f64 = 0.001;

/// Bucket size for the segment crossing search.
const CROSSING_CELL_SIZE: f64 = 20.0;

/// A node in the road network (intersection or polyline vertex).
#[derive(Clone, Debug)]
pub struct RoadNode {
    pub position: DVec2,
    /// Ids of the streamline segments passing through this node.
    pub segments: SmallVec<[usize; 4]>,
}

impl RoadNode {
    fn add_segment(&mut self, segment: usize) {
        if !self.segments.contains(&segment) {
            self.segments.push(segment);
        }
    }
}

/// The planar road network.
#[derive(Clone, Debug, Default)]
pub struct RoadGraph {
    pub graph: StableUnGraph<RoadNode, ()>,
    /// Crossing points between streamline segments, in discovery order.
    pub intersections: Vec<DVec2>,
}

struct Segment {
    start: DVec2,
    end: DVec2,
}

struct GraphBuilder {
    graph: StableUnGraph<RoadNode, ()>,
    lookup: SpatialGrid<NodeIndex>,
    segment_nodes: Vec<SmallVec<[NodeIndex; 4]>>,
}

impl GraphBuilder {
    /// Merge into an existing node within [`NODE_MERGE_RADIUS`] or create a new one.
    fn fuzzy_add(&mut self, position: DVec2, segments: &[usize]) -> NodeIndex {
        let index = match self.lookup.nearest(position, NODE_MERGE_RADIUS) {
            Some((_, existing)) => existing,
            None => {
                let index = self.graph.add_node(RoadNode {
                    position,
                    segments: SmallVec::new(),
                });
                self.lookup.insert(position, index);
                index
            }
        };

        for &segment in segments {
            self.graph[index].add_segment(segment);
            let nodes = &mut self.segment_nodes[segment];
            if !nodes.contains(&index) {
                nodes.push(index);
            }
        }
        index
    }
}

impl RoadGraph {
    /// Build a graph from polylines, optionally pruning dead ends.
    pub fn from_streamlines(streamlines: &[Vec<DVec2>], delete_dangling: bool) -> Self {
        let mut segments = Vec::new();
        let mut segment_ids = Vec::with_capacity(streamlines.len());
        for line in streamlines {
            let first = segments.len();
            for w in line.windows(2) {
                segments.push(Segment {
                    start: w[0],
                    end: w[1],
                });
            }
            segment_ids.push(first);
        }

        let mut builder = GraphBuilder {
            graph: StableUnGraph::default(),
            lookup: SpatialGrid::new(1.0),
            segment_nodes: vec![SmallVec::new(); segments.len()],
        };

        // Polyline vertices
        for (line, &first) in streamlines.iter().zip(&segment_ids) {
            let n = line.len();
            for (i, &point) in line.iter().enumerate() {
                let mut owned: SmallVec<[usize; 2]> = SmallVec::new();
                if i > 0 {
                    owned.push(first + i - 1);
                }
                if i + 1 < n {
                    owned.push(first + i);
                }
                builder.fuzzy_add(point, &owned);
            }
        }

        // Crossings
        let intersections = find_crossings(&segments);
        for &(point, a, b) in &intersections {
            builder.fuzzy_add(point, &[a, b]);
        }

        // Link nodes in order along every segment
        for (id, segment) in segments.iter().enumerate() {
            let direction = segment.end - segment.start;
            let mut nodes = builder.segment_nodes[id].clone();
            if nodes.len() < 2 {
                warn!("Segment {} has fewer than two nodes", id);
                continue;
            }
            nodes.sort_by(|&a, &b| {
                let pa = (builder.graph[a].position - segment.start).dot(direction);
                let pb = (builder.graph[b].position - segment.start).dot(direction);
                pa.total_cmp(&pb)
            });
            for pair in nodes.windows(2) {
                if pair[0] != pair[1] {
                    builder.graph.update_edge(pair[0], pair[1], ());
                }
            }
        }

        let mut road_graph = Self {
            graph: builder.graph,
            intersections: intersections.into_iter().map(|(p, _, _)| p).collect(),
        };

        if delete_dangling {
            road_graph.delete_dangling_nodes();
        }

        debug!(
            "Road graph: {} nodes, {} edges, {} intersections",
            road_graph.node_count(),
            road_graph.edge_count(),
            road_graph.intersections.len()
        );

        road_graph
    }

    /// Remove degree-1 nodes until none remain.
    pub fn delete_dangling_nodes(&mut self) {
        let mut stack: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| self.node_degree(n) == 1)
            .collect();

        while let Some(node) = stack.pop() {
            if !self.graph.contains_node(node) || self.node_degree(node) != 1 {
                continue;
            }
            let neighbours: Vec<NodeIndex> = self.graph.neighbors(node).collect();
            self.graph.remove_node(node);
            for neighbour in neighbours {
                if self.node_degree(neighbour) == 1 {
                    stack.push(neighbour);
                }
            }
        }
    }

    /// Get all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &RoadNode)> {
        self.graph.node_indices().map(|i| (i, &self.graph[i]))
    }

    pub fn position(&self, idx: NodeIndex) -> Option<DVec2> {
        self.graph.node_weight(idx).map(|n| n.position)
    }

    /// Get neighbor node indices for a given node.
    pub fn neighbors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors(idx)
    }

    /// Get the degree (number of connected edges) of a node.
    pub fn node_degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges(idx).count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Every crossing between two segments, except shared polyline vertices.
fn find_crossings(segments: &[Segment]) -> Vec<(DVec2, usize, usize)> {
    let mut buckets: SpatialGrid<usize> = SpatialGrid::new(CROSSING_CELL_SIZE);
    let mut cells: Vec<Vec<(i32, i32)>> = Vec::with_capacity(segments.len());

    for (id, segment) in segments.iter().enumerate() {
        let (min, max) = polygon_bounds(&[segment.start, segment.end]);
        let (min_cell, max_cell) = (buckets.to_cell(min), buckets.to_cell(max));
        let mut covered = Vec::new();
        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                covered.push((cx, cy));
                buckets.cells.entry((cx, cy)).or_default().push((segment.start, id));
            }
        }
        cells.push(covered);
    }

    let mut pairs = BTreeSet::new();
    for (id, covered) in cells.iter().enumerate() {
        for cell in covered {
            if let Some(entries) = buckets.cells.get(cell) {
                for &(_, other) in entries {
                    if other > id {
                        pairs.insert((id, other));
                    }
                }
            }
        }
    }

    let at_end = |t: f64| t < 1e-9 || t > 1.0 - 1e-9;
    pairs
        .into_iter()
        .filter_map(|(a, b)| {
            let (sa, sb) = (&segments[a], &segments[b]);
            let (point, t, u) = segment_intersection(sa.start, sa.end, sb.start, sb.end)?;
            if at_end(t) && at_end(u) {
                return None;
            }
            Some((point, a, b))
        })
        .collect()
}
