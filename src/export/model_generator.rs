//! Incremental 3D model export.
//!
//! The generator is a small state machine. Each call to
//! [`ModelGenerator::update`] does one unit of work (one STL file or one
//! polygon merged into a mesh) so the host loop can spread an export across
//! frames. The finished zip archive is delivered once through a
//! [`PendingArchive`].

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use bevy::log::{info, warn};
use bevy::math::DVec2;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::mesh::{extrude_polygon, TriangleMesh};
use super::stl::to_binary_stl;
use crate::error::ExportError;
use crate::procgen::buildings::BuildingModel;

/// Height of block slabs above the roads.
const BLOCK_HEIGHT: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    Waiting,
    SubtractOcean,
    AddCoastline,
    SubtractRiver,
    AddRoads,
    AddBlocks,
    AddBuildings,
    CreateZip,
}

/// Everything exported, in screen space.
#[derive(Clone, Debug, Default)]
pub struct ModelInputs {
    pub ground: Vec<DVec2>,
    pub sea: Vec<DVec2>,
    pub coastline: Vec<DVec2>,
    pub river: Vec<DVec2>,
    pub main_roads: Vec<Vec<DVec2>>,
    pub major_roads: Vec<Vec<DVec2>>,
    pub minor_roads: Vec<Vec<DVec2>>,
    pub buildings: Vec<BuildingModel>,
    pub blocks: Vec<Vec<DVec2>>,
}

type ArchiveSlot = Arc<Mutex<Option<Result<Vec<u8>, ExportError>>>>;

/// Handle to an archive that is still being built. Resolves exactly once.
pub struct PendingArchive {
    slot: ArchiveSlot,
    taken: bool,
}

impl PendingArchive {
    /// The archive once it is ready. Returns `Some` a single time; an export
    /// that was dropped before finishing resolves to [`ExportError::Abandoned`].
    pub fn poll(&mut self) -> Option<Result<Vec<u8>, ExportError>> {
        if self.taken {
            return None;
        }
        let result = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let result = match result {
            Some(result) => Some(result),
            // The generator side is gone without resolving
            None if Arc::strong_count(&self.slot) == 1 => Some(Err(ExportError::Abandoned)),
            None => None,
        };
        self.taken = result.is_some();
        result
    }
}

pub struct ModelGenerator {
    inputs: ModelInputs,
    state: ModelState,
    entries: Vec<(String, Vec<u8>)>,
    polygons_to_process: Vec<Vec<DVec2>>,
    buildings_to_process: Vec<BuildingModel>,
    roads: TriangleMesh,
    blocks: TriangleMesh,
    buildings: TriangleMesh,
    slot: Option<ArchiveSlot>,
}

impl ModelGenerator {
    pub fn new(inputs: ModelInputs) -> Self {
        Self {
            inputs,
            state: ModelState::Waiting,
            entries: Vec::new(),
            polygons_to_process: Vec::new(),
            buildings_to_process: Vec::new(),
            roads: TriangleMesh::default(),
            blocks: TriangleMesh::default(),
            buildings: TriangleMesh::default(),
            slot: None,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != ModelState::Waiting
    }

    /// Start an export session.
    pub fn get_stl(&mut self) -> Result<PendingArchive, ExportError> {
        if self.is_busy() {
            return Err(ExportError::Busy);
        }

        self.entries.clear();
        self.roads = TriangleMesh::default();
        self.blocks = TriangleMesh::default();
        self.buildings = TriangleMesh::default();
        self.entries.push(("model/stl_binary.md".to_string(), Vec::new()));

        let slot: ArchiveSlot = Arc::new(Mutex::new(None));
        self.slot = Some(slot.clone());
        self.set_state(ModelState::SubtractOcean);
        Ok(PendingArchive { slot, taken: false })
    }

    /// Run a whole session to completion.
    pub fn export_blocking(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut pending = self.get_stl()?;
        while self.update() {}
        pending.poll().unwrap_or(Err(ExportError::Abandoned))
    }

    fn set_state(&mut self, state: ModelState) {
        self.state = state;
        info!("Model export: {:?}", state);
    }

    /// Do one unit of work. Returns false when idle.
    pub fn update(&mut self) -> bool {
        match self.state {
            ModelState::Waiting => return false,
            ModelState::SubtractOcean => {
                self.entries.push(polygon_file("model/domain.stl", &self.inputs.ground));
                self.entries.push(polygon_file("model/sea.stl", &self.inputs.sea));
                self.set_state(ModelState::AddCoastline);
            }
            ModelState::AddCoastline => {
                self.entries.push(polygon_file("model/coastline.stl", &self.inputs.coastline));
                self.set_state(ModelState::SubtractRiver);
            }
            ModelState::SubtractRiver => {
                self.entries.push(polygon_file("model/river.stl", &self.inputs.river));

                self.polygons_to_process = self
                    .inputs
                    .minor_roads
                    .iter()
                    .chain(&self.inputs.major_roads)
                    .chain(&self.inputs.main_roads)
                    .cloned()
                    .collect();
                self.set_state(ModelState::AddRoads);
            }
            ModelState::AddRoads => match self.polygons_to_process.pop() {
                Some(road) => {
                    if let Some(mesh) = extrude_polygon(&road, 0.0) {
                        self.roads.merge(mesh);
                    }
                }
                None => {
                    let roads = std::mem::take(&mut self.roads);
                    self.entries.push(("model/roads.stl".to_string(), to_binary_stl(&roads)));
                    self.polygons_to_process = self.inputs.blocks.clone();
                    self.set_state(ModelState::AddBlocks);
                }
            },
            ModelState::AddBlocks => match self.polygons_to_process.pop() {
                Some(block) => {
                    if let Some(mesh) = extrude_polygon(&block, BLOCK_HEIGHT) {
                        self.blocks.merge(mesh);
                    }
                }
                None => {
                    let blocks = std::mem::take(&mut self.blocks);
                    self.entries.push(("model/blocks.stl".to_string(), to_binary_stl(&blocks)));
                    self.buildings_to_process = self.inputs.buildings.clone();
                    self.set_state(ModelState::AddBuildings);
                }
            },
            ModelState::AddBuildings => match self.buildings_to_process.pop() {
                Some(building) => {
                    if let Some(mesh) = extrude_polygon(&building.lot_screen, building.height) {
                        self.buildings.merge(mesh);
                    }
                }
                None => {
                    let buildings = std::mem::take(&mut self.buildings);
                    self.entries
                        .push(("model/buildings.stl".to_string(), to_binary_stl(&buildings)));
                    self.set_state(ModelState::CreateZip);
                }
            },
            ModelState::CreateZip => {
                let result = write_zip(&self.entries);
                match self.slot.take() {
                    Some(slot) if Arc::strong_count(&slot) > 1 => match slot.lock() {
                        Ok(mut guard) => *guard = Some(result),
                        Err(poisoned) => *poisoned.into_inner() = Some(result),
                    },
                    _ => warn!("Export finished but nobody is waiting for the archive"),
                }
                self.entries.clear();
                self.set_state(ModelState::Waiting);
            }
        }
        true
    }
}

/// A flat polygon as an STL entry; empty when the polygon is degenerate.
fn polygon_file(name: &str, polygon: &[DVec2]) -> (String, Vec<u8>) {
    let mesh = extrude_polygon(polygon, 0.0).unwrap_or_default();
    (name.to_string(), to_binary_stl(&mesh))
}

fn write_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(data)?;
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    fn square(offset: f64, size: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(offset, offset),
            DVec2::new(offset + size, offset),
            DVec2::new(offset + size, offset + size),
            DVec2::new(offset, offset + size),
        ]
    }

    fn inputs() -> ModelInputs {
        ModelInputs {
            ground: square(0.0, 100.0),
            sea: square(0.0, 20.0),
            coastline: square(20.0, 5.0),
            river: Vec::new(),
            main_roads: vec![square(30.0, 4.0)],
            major_roads: vec![square(40.0, 3.0)],
            minor_roads: vec![square(50.0, 2.0), square(55.0, 2.0)],
            buildings: vec![BuildingModel {
                height: 25.0,
                lot_world: square(60.0, 10.0),
                lot_screen: square(60.0, 10.0),
                roof: Vec::new(),
                sides: Vec::new(),
                side_shades: Vec::new(),
            }],
            blocks: vec![square(60.0, 12.0)],
        }
    }

    #[test]
    fn archive_has_every_member() {
        let mut generator = ModelGenerator::new(inputs());
        let bytes = generator.export_blocking().unwrap();

        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "model/blocks.stl",
                "model/buildings.stl",
                "model/coastline.stl",
                "model/domain.stl",
                "model/river.stl",
                "model/roads.stl",
                "model/sea.stl",
                "model/stl_binary.md",
            ]
        );
    }

    #[test]
    fn one_unit_of_work_per_update() {
        let mut generator = ModelGenerator::new(inputs());
        assert!(!generator.update());

        let mut pending = generator.get_stl().unwrap();
        assert_eq!(generator.state(), ModelState::SubtractOcean);
        assert!(matches!(generator.get_stl(), Err(ExportError::Busy)));

        let mut calls = 0;
        while generator.update() {
            calls += 1;
            if generator.is_busy() {
                assert!(pending.poll().is_none());
            }
        }
        // 3 water files, 4 roads + 1, 1 block + 1, 1 building + 1, zip
        assert_eq!(calls, 3 + 5 + 2 + 2 + 1);
        assert_eq!(generator.state(), ModelState::Waiting);

        let archive = pending.poll().unwrap().unwrap();
        assert!(!archive.is_empty());
        assert!(pending.poll().is_none());
    }

    #[test]
    fn degenerate_river_gives_an_empty_mesh() {
        let mut generator = ModelGenerator::new(inputs());
        let bytes = generator.export_blocking().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let river = archive.by_name("model/river.stl").unwrap();
        assert_eq!(river.size(), 84);
    }

    #[test]
    fn dropped_generator_abandons_the_archive() {
        let mut generator = ModelGenerator::new(inputs());
        let mut pending = generator.get_stl().unwrap();
        generator.update();
        drop(generator);
        assert!(matches!(pending.poll(), Some(Err(ExportError::Abandoned))));
    }

    fn entry_names(generator: &ModelGenerator) -> Vec<&str> {
        generator.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn first_update_writes_ground_and_sea() {
        let mut generator = ModelGenerator::new(ModelInputs {
            ground: square(0.0, 10.0),
            sea: square(2.0, 2.0),
            ..Default::default()
        });
        let _pending = generator.get_stl().unwrap();
        assert!(generator.update());

        assert_eq!(generator.state(), ModelState::AddCoastline);
        assert_eq!(
            entry_names(&generator),
            vec!["model/stl_binary.md", "model/domain.stl", "model/sea.stl"]
        );
        let (_, sea) = &generator.entries[2];
        assert_eq!(sea.len(), 84 + 2 * 50);
    }

    #[test]
    fn states_run_in_order_once_each() {
        let mut generator = ModelGenerator::new(inputs());
        let mut visited = vec![generator.state()];
        let _pending = generator.get_stl().unwrap();
        visited.push(generator.state());
        while generator.update() {
            let state = generator.state();
            if visited.last() != Some(&state) {
                visited.push(state);
            }
        }

        assert_eq!(
            visited,
            vec![
                ModelState::Waiting,
                ModelState::SubtractOcean,
                ModelState::AddCoastline,
                ModelState::SubtractRiver,
                ModelState::AddRoads,
                ModelState::AddBlocks,
                ModelState::AddBuildings,
                ModelState::CreateZip,
                ModelState::Waiting,
            ]
        );
    }

    #[test]
    fn degenerate_road_is_skipped() {
        let mut with_bad_road = inputs();
        with_bad_road
            .minor_roads
            .push(vec![DVec2::new(1.0, 1.0), DVec2::new(5.0, 1.0)]);
        let mut generator = ModelGenerator::new(with_bad_road);
        let bytes = generator.export_blocking().unwrap();
        assert_eq!(generator.state(), ModelState::Waiting);

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let roads = archive.by_name("model/roads.stl").unwrap();
        // Four square roads of two triangles each
        assert_eq!(roads.size(), 84 + 8 * 50);
    }

    #[test]
    fn generator_can_export_again() {
        let mut generator = ModelGenerator::new(inputs());
        let first = generator.export_blocking().unwrap();
        let second = generator.export_blocking().unwrap();
        assert_eq!(first.len(), second.len());
    }
}
