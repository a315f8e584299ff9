use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::base::{read_builtin_layer, write_builtin_layer, BaseLayerError};
use crate::codec::{read_tile_data, write_tile_data, CodecError, DecodeSummary};
use crate::entity::{load_entities, save_entities, EntityError, EntityKinds, EntityLoadSummary, EntityStore};
use crate::equipment::{read_equipment, write_equipment, EquipmentError, EquipmentSummary};
use crate::grid::{Grid, GridError};
use crate::registry::{ContentRegistry, Layer};
use crate::tables::{build_save_table, resolve_load_table, IdentityTable, TableError};
use crate::unloaded::{ReloadSummary, StoreError, UnloadedState, UnloadedStore};
use crate::world_file::{read_world_file, write_world_file, SectionTag, WorldFile, WorldFileError};

#[derive(Debug, Error)]
pub enum WorldSaveError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Equipment(#[from] EquipmentError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error("failed to serialize unloaded state: {0}")]
    UnloadedState(#[source] serde_json::Error),
    #[error(transparent)]
    File(#[from] WorldFileError),
}

#[derive(Debug, Error)]
pub enum WorldLoadError {
    #[error(transparent)]
    File(#[from] WorldFileError),
    #[error(transparent)]
    BaseLayer(#[from] BaseLayerError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Equipment(#[from] EquipmentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error("unloaded state section is not valid: {0}")]
    UnloadedState(#[source] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub unresolved_tiles: usize,
    pub unresolved_walls: usize,
    pub grid: DecodeSummary,
    pub equipment: Option<EquipmentSummary>,
    pub unloaded: ReloadSummary,
    pub entities: EntityLoadSummary,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved_tiles == 0
            && self.unresolved_walls == 0
            && self.entities.unloaded == 0
            && self.entities.errors.is_empty()
    }
}

#[derive(Debug)]
pub struct World {
    pub grid: Grid,
    pub unloaded: UnloadedStore,
    pub entities: EntityStore,
}

impl World {
    pub fn new(width: u16, height: u16) -> Result<Self, GridError> {
        Ok(Self {
            grid: Grid::new(width, height)?,
            unloaded: UnloadedStore::default(),
            entities: EntityStore::default(),
        })
    }

    pub fn reset(&mut self) {
        for cell in self.grid.cells_mut() {
            *cell = Default::default();
        }
        self.unloaded.clear();
        self.entities.clear();
    }

    pub fn disable_content(
        &mut self,
        registry: &dyn ContentRegistry,
        layer: Layer,
        kinds: &HashSet<u16>,
    ) -> Result<usize, StoreError> {
        self.unloaded
            .disable_content(&mut self.grid, registry, layer, kinds)
    }

    pub fn save(&self, registry: &dyn ContentRegistry) -> Result<WorldFile, WorldSaveError> {
        let mut file = WorldFile::new(self.grid.width(), self.grid.height());
        file.insert(
            SectionTag::BuiltinLayer,
            write_builtin_layer(&self.grid, registry),
        );

        let encoded = write_tile_data(&self.grid, registry)?;
        if !encoded.usage.is_empty() {
            let table = build_save_table(&encoded.usage, registry)?;
            file.insert(SectionTag::IdentityTable, table.encode()?);
            file.insert(SectionTag::GridBlob, encoded.bytes);
        }
        if let Some(equipment) = write_equipment(&self.grid, registry)? {
            file.insert(SectionTag::Equipment, equipment);
        }
        file.insert(SectionTag::Entities, save_entities(&self.entities)?);
        let state = serde_json::to_vec(&self.unloaded.save_state())
            .map_err(WorldSaveError::UnloadedState)?;
        file.insert(SectionTag::UnloadedState, state);

        info!(
            width = self.grid.width(),
            height = self.grid.height(),
            entities = self.entities.len(),
            unloaded_tiles = self.unloaded.live_count(Layer::Tile),
            unloaded_walls = self.unloaded.live_count(Layer::Wall),
            "world_saved"
        );
        Ok(file)
    }

    pub fn load(
        file: &WorldFile,
        registry: &dyn ContentRegistry,
        kinds: &EntityKinds,
    ) -> Result<(Self, LoadReport), WorldLoadError> {
        let builtin = file
            .section(SectionTag::BuiltinLayer)
            .unwrap_or_default();
        let mut world = Self {
            grid: read_builtin_layer(builtin, file.width, file.height)?,
            unloaded: UnloadedStore::default(),
            entities: EntityStore::default(),
        };
        let mut report = LoadReport::default();

        if let (Some(table), Some(blob)) = (
            file.section(SectionTag::IdentityTable),
            file.section(SectionTag::GridBlob),
        ) {
            let table = IdentityTable::decode(table)?;
            let resolved = resolve_load_table(Some(&table), registry)?;
            report.unresolved_tiles = resolved.unresolved_count(Layer::Tile);
            report.unresolved_walls = resolved.unresolved_count(Layer::Wall);
            report.grid = read_tile_data(blob, &resolved, &mut world.grid, &mut world.unloaded)?;
        }

        if let Some(equipment) = file.section(SectionTag::Equipment) {
            report.equipment = Some(read_equipment(equipment, &mut world.grid, registry)?);
        }

        let state = match file.section(SectionTag::UnloadedState) {
            Some(bytes) => serde_json::from_slice::<UnloadedState>(bytes)
                .map_err(WorldLoadError::UnloadedState)?,
            None => UnloadedState::default(),
        };
        report.unloaded = world
            .unloaded
            .reload(&state, &mut world.grid, registry)?;

        if let Some(entities) = file.section(SectionTag::Entities) {
            report.entities = load_entities(entities, &world.grid, kinds, &mut world.entities)?;
        }

        info!(
            width = file.width,
            height = file.height,
            unresolved_tiles = report.unresolved_tiles,
            unresolved_walls = report.unresolved_walls,
            restored = report.unloaded.restored.restored_count(),
            promoted = report.unloaded.promoted,
            entities = world.entities.len(),
            entity_errors = report.entities.errors.len(),
            "world_loaded"
        );
        Ok((world, report))
    }

    pub fn save_to_path(
        &self,
        path: &Path,
        registry: &dyn ContentRegistry,
    ) -> Result<(), WorldSaveError> {
        let file = self.save(registry)?;
        write_world_file(path, &file)?;
        Ok(())
    }

    pub fn load_from_path(
        path: &Path,
        registry: &dyn ContentRegistry,
        kinds: &EntityKinds,
    ) -> Result<(Self, LoadReport), WorldLoadError> {
        let file = read_world_file(path)?;
        Self::load(&file, registry, kinds)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::entity::EntityBody;
    use crate::grid::{Cell, GridPos, TileCell, WallCell};
    use crate::identity::{ContentKey, IdentityRecord};
    use crate::registry::{ContentTable, EquipCategory};

    const FIXTURE: u16 = 6;

    fn full_registry() -> ContentTable {
        let mut table = ContentTable::new(10, 10).expect("table");
        table
            .register_tile(ContentKey::new("ExampleMod", "Block"), false)
            .expect("block");
        table
            .register_tile(ContentKey::new("ExampleMod", "Trophy"), true)
            .expect("trophy");
        table
            .register_wall(ContentKey::new("ExampleMod", "Brick"))
            .expect("brick");
        table.set_builtin_equip_slots(EquipCategory::Head, 2);
        table
            .register_equip_slot(EquipCategory::Head, ContentKey::new("ExampleMod", "Helmet"))
            .expect("helmet");
        table.mark_display_fixture(FIXTURE);
        table
    }

    fn bare_registry() -> ContentTable {
        let mut table = ContentTable::new(10, 10).expect("table");
        table.mark_display_fixture(FIXTURE);
        table
    }

    fn sample_world(registry: &ContentTable) -> World {
        let block = registry.find(Layer::Tile, "ExampleMod", "Block").expect("block");
        let trophy = registry.find(Layer::Tile, "ExampleMod", "Trophy").expect("trophy");
        let brick = registry.find(Layer::Wall, "ExampleMod", "Brick").expect("brick");

        let mut world = World::new(6, 5).expect("world");
        let grid = &mut world.grid;
        for y in 0..5 {
            grid.set(
                GridPos::new(0, y),
                Cell {
                    tile: Some(TileCell::unframed(1)),
                    wall: Some(WallCell { kind: brick, color: 3 }),
                },
            );
        }
        grid.set(GridPos::new(1, 0), Cell { tile: Some(TileCell::unframed(block)), wall: None });
        let mut trophy_cell = TileCell::framed(trophy, 54, 18);
        trophy_cell.color = 12;
        grid.set(GridPos::new(2, 2), Cell { tile: Some(trophy_cell), wall: Some(WallCell::new(4)) });
        grid.set(GridPos::new(3, 0), Cell { tile: Some(TileCell::framed(FIXTURE, 200, 0)), wall: None });
        grid.set(GridPos::new(4, 0), Cell { tile: Some(TileCell::framed(FIXTURE, 18, 0)), wall: None });
        world.entities.insert(
            ContentKey::new("ExampleMod", "Sign"),
            GridPos::new(1, 0),
            EntityBody::Unloaded { payload: b"hello".to_vec() },
        );
        world
    }

    #[test]
    fn same_content_roundtrips_exactly() {
        let registry = full_registry();
        let world = sample_world(&registry);
        let file = world.save(&registry).expect("save");
        let (loaded, report) = World::load(&file, &registry, &EntityKinds::new()).expect("load");
        assert_eq!(loaded.grid, world.grid);
        assert_eq!(report.unresolved_tiles + report.unresolved_walls, 0);
        assert_eq!(report.equipment.map(|e| e.applied), Some(1));
        assert_eq!(loaded.unloaded, UnloadedStore::default());
        assert_eq!(
            loaded.entities.at(GridPos::new(1, 0)).map(|e| e.payload()),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn missing_content_is_preserved_and_restored_later() {
        let full = full_registry();
        let world = sample_world(&full);
        let saved = world.save(&full).expect("save");

        let bare = bare_registry();
        let (degraded, report) = World::load(&saved, &bare, &EntityKinds::new()).expect("bare load");
        assert_eq!((report.unresolved_tiles, report.unresolved_walls), (2, 1));
        assert_eq!(report.unloaded.promoted, 2 + 5);
        assert_eq!(degraded.unloaded.live_count(Layer::Tile), 2);
        assert_eq!(degraded.unloaded.live_count(Layer::Wall), 1);
        assert_eq!(
            degraded.unloaded.infos(Layer::Tile)[1],
            Some(IdentityRecord::framed(ContentKey::new("ExampleMod", "Trophy"), 54, 18))
        );
        let fixture = degraded.grid.get(GridPos::new(3, 0)).and_then(|c| c.tile);
        assert_eq!(fixture.map(|t| t.frame_x), Some(0));

        let resaved = degraded.save(&bare).expect("resave");
        let (restored, report) = World::load(&resaved, &full, &EntityKinds::new()).expect("full load");
        assert_eq!(report.unloaded.restored.restored_count(), 2 + 5);
        assert_eq!(restored.unloaded.live_count(Layer::Tile), 0);
        assert_eq!(restored.unloaded.live_count(Layer::Wall), 0);
        let original = world.grid.get(GridPos::new(2, 2)).copied();
        assert_eq!(restored.grid.get(GridPos::new(2, 2)).copied(), original);
        assert_eq!(
            restored.grid.get(GridPos::new(0, 4)).copied(),
            world.grid.get(GridPos::new(0, 4)).copied()
        );
    }

    #[test]
    fn repeated_unresolved_loads_keep_slots_stable() {
        let full = full_registry();
        let saved = sample_world(&full).save(&full).expect("save");
        let bare = bare_registry();

        let (first, _) = World::load(&saved, &bare, &EntityKinds::new()).expect("first");
        let (second, _) = World::load(&saved, &bare, &EntityKinds::new()).expect("second");
        assert_eq!(first.unloaded, second.unloaded);
        assert_eq!(first.grid, second.grid);

        let resaved = first.save(&bare).expect("resave");
        let (third, _) = World::load(&resaved, &bare, &EntityKinds::new()).expect("third");
        assert_eq!(third.unloaded.infos(Layer::Tile), first.unloaded.infos(Layer::Tile));
        assert_eq!(third.grid, first.grid);
    }

    #[test]
    fn builtin_only_world_has_no_mod_sections() {
        let registry = bare_registry();
        let world = World::new(3, 3).expect("world");
        let file = world.save(&registry).expect("save");
        assert_eq!(file.section(SectionTag::IdentityTable), None);
        assert_eq!(file.section(SectionTag::GridBlob), None);
        assert_eq!(file.section(SectionTag::Equipment), None);

        let (_, report) = World::load(&file, &registry, &EntityKinds::new()).expect("load");
        assert!(report.is_clean());
    }

    #[test]
    fn reset_drops_grid_store_and_entities() {
        let full = full_registry();
        let saved = sample_world(&full).save(&full).expect("save");
        let bare = bare_registry();
        let (mut world, report) =
            World::load(&saved, &bare, &EntityKinds::new()).expect("bare load");
        assert!(!report.is_clean());
        assert_eq!(world.unloaded.live_count(Layer::Tile), 2);

        world.reset();
        assert_eq!(world.unloaded, UnloadedStore::default());
        assert!(world.grid.cells().iter().all(|cell| *cell == Cell::default()));
        assert!(world.entities.is_empty());

        let slot = world
            .unloaded
            .record_unresolved(
                Layer::Tile,
                IdentityRecord::new(ContentKey::new("GoneMod", "Block")),
            )
            .expect("slot");
        assert_eq!(slot.index(), 0);
    }

    #[test]
    fn disabled_content_survives_a_save_cycle() {
        let registry = full_registry();
        let mut world = sample_world(&registry);
        let block = registry.find(Layer::Tile, "ExampleMod", "Block").expect("block");
        let converted = world
            .disable_content(&registry, Layer::Tile, &HashSet::from([block]))
            .expect("disable");
        assert_eq!(converted, 1);

        let file = world.save(&registry).expect("save");
        let (loaded, report) = World::load(&file, &registry, &EntityKinds::new()).expect("load");
        assert_eq!(report.unloaded.restored.tile_cells, 1);
        assert_eq!(
            loaded.grid.get(GridPos::new(1, 0)).and_then(|c| c.tile),
            Some(TileCell::unframed(block))
        );
    }

    #[test]
    fn files_roundtrip_through_disk() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("world.twsv");
        let registry = full_registry();
        let world = sample_world(&registry);
        world.save_to_path(&path, &registry).expect("save");
        let (loaded, _) = World::load_from_path(&path, &registry, &EntityKinds::new()).expect("load");
        assert_eq!(loaded.grid, world.grid);
    }
}
