//! Spatial hash grid for nearest-sample queries.

use std::collections::HashMap;

use bevy::math::DVec2;

/// Spatial hash grid storing positions tagged with a payload.
#[derive(Clone, Debug)]
pub struct SpatialGrid<T> {
    pub cell_size: f64,
    pub cells: HashMap<(i32, i32), Vec<(DVec2, T)>>,
    len: usize,
}

impl<T: Copy> SpatialGrid<T> {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: cell_size.max(f64::EPSILON),
            cells: HashMap::new(),
            len: 0,
        }
    }

    /// Convert world position to cell coordinates.
    pub fn to_cell(&self, pos: DVec2) -> (i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    /// Insert an item at a position.
    pub fn insert(&mut self, pos: DVec2, item: T) {
        let cell = self.to_cell(pos);
        self.cells.entry(cell).or_default().push((pos, item));
        self.len += 1;
    }

    /// Copy every entry of another grid into this one.
    pub fn extend_from(&mut self, other: &SpatialGrid<T>) {
        let mut keys: Vec<&(i32, i32)> = other.cells.keys().collect();
        keys.sort();
        for entries in keys.into_iter().filter_map(|k| other.cells.get(k)) {
            for &(pos, item) in entries {
                self.insert(pos, item);
            }
        }
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Query entries within `radius` of `center` (inclusive).
    pub fn query_radius(&self, center: DVec2, radius: f64) -> Vec<(DVec2, T)> {
        let min_cell = self.to_cell(center - DVec2::splat(radius));
        let max_cell = self.to_cell(center + DVec2::splat(radius));
        let radius_sq = radius * radius;

        let mut result = Vec::new();

        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                if let Some(entries) = self.cells.get(&(cx, cy)) {
                    result.extend(
                        entries
                            .iter()
                            .filter(|(pos, _)| pos.distance_squared(center) <= radius_sq),
                    );
                }
            }
        }

        result
    }

    /// Closest entry within `radius`, if any.
    pub fn nearest(&self, center: DVec2, radius: f64) -> Option<(DVec2, T)> {
        self.query_radius(center, radius)
            .into_iter()
            .min_by(|a, b| {
                a.0.distance_squared(center)
                    .total_cmp(&b.0.distance_squared(center))
            })
    }

    /// True when no entry lies strictly closer than `sqrt(distance_sq)`.
    pub fn is_clear(&self, center: DVec2, distance_sq: f64) -> bool {
        let radius = distance_sq.sqrt();
        !self
            .query_radius(center, radius)
            .iter()
            .any(|(pos, _)| pos.distance_squared(center) < distance_sq)
    }
}

impl SpatialGrid<()> {
    /// Add every vertex of a polyline as a sample.
    pub fn add_polyline(&mut self, points: &[DVec2]) {
        for &p in points {
            self.insert(p, ());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_radius_crosses_cells() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(DVec2::new(9.0, 9.0), 1usize);
        grid.insert(DVec2::new(11.0, 11.0), 2usize);
        grid.insert(DVec2::new(50.0, 50.0), 3usize);

        let mut found: Vec<usize> = grid
            .query_radius(DVec2::new(10.0, 10.0), 2.0)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        found.sort();
        assert_eq!(found, vec![1, 2]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn nearest_picks_closest_entry() {
        let mut grid = SpatialGrid::new(5.0);
        grid.insert(DVec2::new(0.0, 0.0), 'a');
        grid.insert(DVec2::new(3.0, 0.0), 'b');

        let (_, item) = grid.nearest(DVec2::new(2.5, 0.0), 5.0).unwrap();
        assert_eq!(item, 'b');
        assert!(grid.nearest(DVec2::new(100.0, 0.0), 5.0).is_none());
    }

    #[test]
    fn clear_check_uses_strict_distance() {
        let mut grid = SpatialGrid::new(4.0);
        grid.add_polyline(&[DVec2::new(0.0, 0.0), DVec2::new(0.0, 4.0)]);

        assert!(!grid.is_clear(DVec2::new(1.0, 0.0), 4.0));
        assert!(grid.is_clear(DVec2::new(2.0, 0.0), 4.0));
        assert!(grid.is_clear(DVec2::new(10.0, 10.0), 4.0));
    }
}
