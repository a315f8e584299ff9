use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::{Grid, GridPos, TileCell};
use crate::identity::ContentKey;
use crate::registry::{ContentRegistry, EquipCategory};
use crate::wire::{ByteReader, ByteWriter, WireError};

const SLOT_STRIDE: i16 = 100;
const ROW_HEIGHT: i16 = 18;
const PART_WIDTH: i16 = 18;
const VARIANT_WIDTH: i16 = 36;
const END_OF_RECORDS: i32 = -1;

#[derive(Debug, Error)]
pub enum EquipmentError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("{category:?} slot {slot} is worn by a fixture but not registered")]
    UnregisteredSlot { category: EquipCategory, slot: u16 },
    #[error("{category:?} slot list has {count} entries, more than fit in a u16 count")]
    TooManySlots { category: EquipCategory, count: usize },
    #[error("equipment record has invalid category {category}")]
    InvalidCategory { category: u8 },
    #[error("equipment record references {category:?} slot {slot} missing from the slot table")]
    UnknownSavedSlot { category: EquipCategory, slot: u16 },
    #[error("{category:?} slot {slot} cannot be stored in a fixture frame")]
    SlotOutOfRange { category: EquipCategory, slot: u16 },
}

/// Frame X is `slot * 100 + base`; `frame_y / 18` selects the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureSlot {
    pub category: EquipCategory,
    pub slot: u16,
    pub base: i16,
}

pub fn fixture_slot(registry: &dyn ContentRegistry, tile: &TileCell) -> Option<FixtureSlot> {
    if !registry.is_display_fixture(tile.kind) || tile.frame_x < 0 || tile.frame_y < 0 {
        return None;
    }
    let category = EquipCategory::from_index((tile.frame_y / ROW_HEIGHT) as usize)?;
    Some(FixtureSlot {
        category,
        slot: (tile.frame_x / SLOT_STRIDE) as u16,
        base: tile.frame_x % SLOT_STRIDE,
    })
}

pub fn has_mod_slot(registry: &dyn ContentRegistry, category: EquipCategory, slot: u16) -> bool {
    slot != 0 && slot >= registry.builtin_equip_slots(category)
}

fn mod_fixture(registry: &dyn ContentRegistry, tile: &TileCell) -> Option<FixtureSlot> {
    fixture_slot(registry, tile).filter(|fixture| has_mod_slot(registry, fixture.category, fixture.slot))
}

pub fn builtin_frame_x(registry: &dyn ContentRegistry, tile: &TileCell) -> i16 {
    match mod_fixture(registry, tile) {
        Some(fixture) => fixture.base,
        None => tile.frame_x,
    }
}

pub fn write_equipment(
    grid: &Grid,
    registry: &dyn ContentRegistry,
) -> Result<Option<Vec<u8>>, EquipmentError> {
    let mut used: [BTreeSet<u16>; 3] = Default::default();
    let mut records = Vec::new();
    for (index, cell) in grid.cells().iter().enumerate() {
        let Some(fixture) = cell.tile.as_ref().and_then(|tile| mod_fixture(registry, tile)) else {
            continue;
        };
        used[fixture.category.index()].insert(fixture.slot);
        if fixture.base % VARIANT_WIDTH == 0 {
            records.push((grid.pos_of(index), fixture));
        }
    }
    if used.iter().all(BTreeSet::is_empty) {
        return Ok(None);
    }

    let mut writer = ByteWriter::new("equipment");
    for category in EquipCategory::ALL {
        let slots = &used[category.index()];
        let count = u16::try_from(slots.len()).map_err(|_| EquipmentError::TooManySlots {
            category,
            count: slots.len(),
        })?;
        writer.put_u16(count);
        for &slot in slots {
            let key = registry
                .equip_slot(category, slot)
                .ok_or(EquipmentError::UnregisteredSlot { category, slot })?;
            writer.put_u16(slot);
            writer.put_str(&key.origin)?;
            writer.put_str(&key.name)?;
        }
    }
    for (pos, fixture) in &records {
        writer.put_i32(pos.x as i32);
        writer.put_i32(pos.y as i32);
        writer.put_u8(fixture.category.index() as u8);
        writer.put_u16(fixture.slot);
    }
    writer.put_i32(END_OF_RECORDS);

    debug!(fixtures = records.len(), bytes = writer.len(), "equipment_encoded");
    Ok(Some(writer.into_bytes()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EquipmentSummary {
    pub applied: usize,
    pub skipped: usize,
    pub missing_slots: usize,
}

pub fn read_equipment(
    bytes: &[u8],
    grid: &mut Grid,
    registry: &dyn ContentRegistry,
) -> Result<EquipmentSummary, EquipmentError> {
    let mut reader = ByteReader::new("equipment", bytes);
    let mut summary = EquipmentSummary::default();
    let mut remap: [HashMap<u16, u16>; 3] = Default::default();
    for category in EquipCategory::ALL {
        let count = reader.read_u16()?;
        for _ in 0..count {
            let saved = reader.read_u16()?;
            let key = ContentKey::new(reader.read_string()?, reader.read_string()?);
            let current = match registry.find_equip_slot(category, &key.origin, &key.name) {
                Some(slot) => slot,
                None => {
                    warn!(?category, slot = saved, item = %key, "equipment_slot_unresolved");
                    summary.missing_slots += 1;
                    0
                }
            };
            remap[category.index()].insert(saved, current);
        }
    }

    loop {
        let x = reader.read_i32()?;
        if x == END_OF_RECORDS {
            break;
        }
        let y = reader.read_i32()?;
        let raw_category = reader.read_u8()?;
        let saved = reader.read_u16()?;
        let category = EquipCategory::from_index(raw_category as usize)
            .ok_or(EquipmentError::InvalidCategory {
                category: raw_category,
            })?;
        let slot = *remap[category.index()]
            .get(&saved)
            .ok_or(EquipmentError::UnknownSavedSlot {
                category,
                slot: saved,
            })?;

        let (Ok(x), Ok(y)) = (i16::try_from(x), i16::try_from(y)) else {
            summary.skipped += 1;
            continue;
        };
        let left = GridPos::new(x, y);
        if !fixture_geometry_matches(grid, registry, left, category) {
            debug!(x, y, ?category, "equipment_fixture_changed_skipped");
            summary.skipped += 1;
            continue;
        }
        let offset = SLOT_STRIDE
            .checked_mul(slot as i16)
            .filter(|_| slot <= i16::MAX as u16)
            .ok_or(EquipmentError::SlotOutOfRange { category, slot })?;
        if let Some(tile) = grid.get_mut(left).and_then(|cell| cell.tile.as_mut()) {
            tile.frame_x = tile
                .frame_x
                .checked_add(offset)
                .ok_or(EquipmentError::SlotOutOfRange { category, slot })?;
            summary.applied += 1;
        }
    }
    reader.expect_end()?;

    debug!(
        applied = summary.applied,
        skipped = summary.skipped,
        missing_slots = summary.missing_slots,
        "equipment_decoded"
    );
    Ok(summary)
}

fn fixture_geometry_matches(
    grid: &Grid,
    registry: &dyn ContentRegistry,
    left: GridPos,
    category: EquipCategory,
) -> bool {
    let Some(right_x) = left.x.checked_add(1) else {
        return false;
    };
    let tile_at = |pos| grid.get(pos).and_then(|cell| cell.tile);
    let (Some(left_tile), Some(right_tile)) = (tile_at(left), tile_at(GridPos::new(right_x, left.y))) else {
        return false;
    };
    registry.is_display_fixture(left_tile.kind)
        && left_tile.kind == right_tile.kind
        && (left_tile.frame_x == 0 || left_tile.frame_x == VARIANT_WIDTH)
        && right_tile.frame_x == left_tile.frame_x + PART_WIDTH
        && left_tile.frame_y >= 0
        && (left_tile.frame_y / ROW_HEIGHT) as usize == category.index()
        && left_tile.frame_y == right_tile.frame_y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use crate::registry::ContentTable;

    const FIXTURE: u16 = 5;

    fn registry() -> (ContentTable, u16) {
        let mut table = ContentTable::new(10, 10).expect("table");
        table.set_builtin_equip_slots(EquipCategory::Body, 3);
        table
            .register_equip_slot(EquipCategory::Body, ContentKey::new("ExampleMod", "Filler"))
            .expect("filler");
        let plate = table
            .register_equip_slot(EquipCategory::Body, ContentKey::new("ExampleMod", "Breastplate"))
            .expect("plate");
        table.mark_display_fixture(FIXTURE);
        (table, plate)
    }

    fn fixture(frame_x: i16, frame_y: i16) -> Cell {
        Cell {
            tile: Some(TileCell::framed(FIXTURE, frame_x, frame_y)),
            wall: None,
        }
    }

    fn body_fixture(slot: u16) -> Grid {
        let mut grid = Grid::new(3, 2).expect("grid");
        let slot = slot as i16 * 100;
        grid.set(GridPos::new(1, 1), fixture(slot + 36, 18));
        grid.set(GridPos::new(2, 1), fixture(54, 18));
        grid
    }

    #[test]
    fn fixture_frames_decode_slot_and_category() {
        let (registry, plate) = registry();
        let tile = TileCell::framed(FIXTURE, plate as i16 * 100 + 36, 18);
        assert_eq!(
            fixture_slot(&registry, &tile),
            Some(FixtureSlot {
                category: EquipCategory::Body,
                slot: plate,
                base: 36
            })
        );
        assert_eq!(builtin_frame_x(&registry, &tile), 36);
        let vanilla = TileCell::framed(FIXTURE, 236, 18);
        assert_eq!(builtin_frame_x(&registry, &vanilla), 236);
        assert!(!has_mod_slot(&registry, EquipCategory::Head, 0));
    }

    #[test]
    fn section_is_omitted_without_mod_slots() {
        let (registry, _) = registry();
        let grid = body_fixture(2);
        assert_eq!(write_equipment(&grid, &registry).expect("write"), None);
    }

    #[test]
    fn slots_are_remapped_through_the_registry() {
        let (saving, plate) = registry();
        let grid = body_fixture(plate);
        let bytes = write_equipment(&grid, &saving)
            .expect("write")
            .expect("section");

        let mut loading = ContentTable::new(10, 10).expect("table");
        loading.set_builtin_equip_slots(EquipCategory::Body, 3);
        let moved = loading
            .register_equip_slot(EquipCategory::Body, ContentKey::new("ExampleMod", "Breastplate"))
            .expect("plate");
        loading.mark_display_fixture(FIXTURE);
        assert_ne!(moved, plate);

        let mut stripped = body_fixture(0);
        let summary = read_equipment(&bytes, &mut stripped, &loading).expect("read");
        assert_eq!(summary.applied, 1);
        assert_eq!(stripped, body_fixture(moved));
    }

    #[test]
    fn missing_items_fall_back_to_empty_slot() {
        let (saving, plate) = registry();
        let bytes = write_equipment(&body_fixture(plate), &saving)
            .expect("write")
            .expect("section");
        let mut loading = ContentTable::new(10, 10).expect("table");
        loading.mark_display_fixture(FIXTURE);
        let mut stripped = body_fixture(0);
        let summary = read_equipment(&bytes, &mut stripped, &loading).expect("read");
        assert_eq!(summary.missing_slots, 1);
        assert_eq!(stripped, body_fixture(0));
    }

    #[test]
    fn changed_geometry_is_skipped() {
        let (saving, plate) = registry();
        let bytes = write_equipment(&body_fixture(plate), &saving)
            .expect("write")
            .expect("section");
        let mut grid = body_fixture(0);
        grid.set(GridPos::new(2, 1), Cell::default());
        let summary = read_equipment(&bytes, &mut grid, &saving).expect("read");
        assert_eq!((summary.applied, summary.skipped), (0, 1));
    }
}
