use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grid::{Grid, GridPos, FRAME_UNSET};
use crate::identity::{ContentKey, FramePair, IdentityRecord};
use crate::registry::{placeholders, ContentRegistry, Layer, RegistryError};
use crate::slot::{PackedSlot, SlotOverflow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    SlotOverflow(#[from] SlotOverflow),
    #[error("unloaded {layer} entry {index} is malformed: {reason}")]
    MalformedEntry {
        layer: Layer,
        index: usize,
        reason: &'static str,
    },
}

/// Restored slots are nulled, never removed, so packed slots stay valid.
/// Walls have no frames and are found through `wall_coords`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnloadedStore {
    tiles: Vec<Option<IdentityRecord>>,
    walls: Vec<Option<IdentityRecord>>,
    wall_coords: BTreeMap<GridPos, usize>,
    pending_tiles: Vec<IdentityRecord>,
    pending_walls: Vec<IdentityRecord>,
    pending_wall_coords: BTreeMap<GridPos, usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreTargets {
    pub tiles: Vec<Option<u16>>,
    pub walls: Vec<Option<u16>>,
}

impl RestoreTargets {
    pub fn is_empty(&self) -> bool {
        self.tiles.iter().chain(&self.walls).all(Option::is_none)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub slots: usize,
    pub tile_cells: usize,
    pub wall_cells: usize,
}

impl RestoreSummary {
    pub fn restored_count(&self) -> usize {
        self.tile_cells + self.wall_cells
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    pub restored: RestoreSummary,
    pub promoted: usize,
}

impl UnloadedStore {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn infos(&self, layer: Layer) -> &[Option<IdentityRecord>] {
        match layer {
            Layer::Tile => &self.tiles,
            Layer::Wall => &self.walls,
        }
    }

    pub fn live_count(&self, layer: Layer) -> usize {
        self.infos(layer).iter().filter(|info| info.is_some()).count()
    }

    pub fn wall_slot_at(&self, pos: GridPos) -> Option<usize> {
        self.wall_coords.get(&pos).copied()
    }

    pub fn wall_coords(&self) -> impl Iterator<Item = (GridPos, usize)> + '_ {
        self.wall_coords.iter().map(|(pos, slot)| (*pos, *slot))
    }

    pub fn pending_len(&self, layer: Layer) -> usize {
        match layer {
            Layer::Tile => self.pending_tiles.len(),
            Layer::Wall => self.pending_walls.len(),
        }
    }

    pub fn record_unresolved(
        &mut self,
        layer: Layer,
        identity: IdentityRecord,
    ) -> Result<PackedSlot, StoreError> {
        let infos = match layer {
            Layer::Tile => &mut self.tiles,
            Layer::Wall => &mut self.walls,
        };
        if let Some(index) = infos
            .iter()
            .position(|info| info.as_ref() == Some(&identity))
        {
            return Ok(PackedSlot::new(index)?);
        }
        let index = infos
            .iter()
            .position(Option::is_none)
            .unwrap_or(infos.len());
        let slot = PackedSlot::new(index)?;
        if index == infos.len() {
            infos.push(Some(identity));
        } else {
            infos[index] = Some(identity);
        }
        Ok(slot)
    }

    pub(crate) fn queue_pending_tile(
        &mut self,
        identity: IdentityRecord,
    ) -> Result<PackedSlot, StoreError> {
        let index = match self.pending_tiles.iter().position(|info| *info == identity) {
            Some(index) => index,
            None => {
                self.pending_tiles.push(identity);
                self.pending_tiles.len() - 1
            }
        };
        Ok(PackedSlot::new(index)?)
    }

    pub(crate) fn queue_pending_wall(&mut self, pos: GridPos, identity: IdentityRecord) {
        let index = match self.pending_walls.iter().position(|info| *info == identity) {
            Some(index) => index,
            None => {
                self.pending_walls.push(identity);
                self.pending_walls.len() - 1
            }
        };
        self.pending_wall_coords.insert(pos, index);
    }

    pub fn restore_targets(&self, registry: &dyn ContentRegistry) -> RestoreTargets {
        let lookup = |layer: Layer, infos: &[Option<IdentityRecord>]| {
            infos
                .iter()
                .map(|info| {
                    info.as_ref()
                        .and_then(|info| registry.find(layer, &info.key.origin, &info.key.name))
                })
                .collect::<Vec<_>>()
        };
        RestoreTargets {
            tiles: lookup(Layer::Tile, &self.tiles),
            walls: lookup(Layer::Wall, &self.walls),
        }
    }

    pub fn try_restore(
        &mut self,
        grid: &mut Grid,
        registry: &dyn ContentRegistry,
    ) -> Result<RestoreSummary, StoreError> {
        let targets = self.restore_targets(registry);
        if targets.is_empty() {
            return Ok(RestoreSummary::default());
        }
        self.restore(grid, registry, &targets)
    }

    pub fn restore(
        &mut self,
        grid: &mut Grid,
        registry: &dyn ContentRegistry,
        targets: &RestoreTargets,
    ) -> Result<RestoreSummary, StoreError> {
        let mut summary = RestoreSummary::default();

        if targets.tiles.iter().any(Option::is_some) {
            let unloaded_tile = placeholders(registry, Layer::Tile)?.unloaded;
            for (index, cell) in grid.cells_mut().iter_mut().enumerate() {
                let Some(tile) = cell.tile.as_mut() else {
                    continue;
                };
                if tile.kind != unloaded_tile {
                    continue;
                }
                let Some(slot) = PackedSlot::from_frames(tile.frame_x, tile.frame_y) else {
                    warn!(index, "unloaded_tile_without_slot");
                    continue;
                };
                let Some(Some(kind)) = targets.tiles.get(slot.index()) else {
                    continue;
                };
                let Some(Some(info)) = self.tiles.get(slot.index()) else {
                    warn!(index, slot = slot.index(), "unloaded_tile_slot_empty");
                    continue;
                };
                tile.kind = *kind;
                (tile.frame_x, tile.frame_y) = match info.frame {
                    Some(frame) => (frame.x, frame.y),
                    None => (FRAME_UNSET, FRAME_UNSET),
                };
                summary.tile_cells += 1;
            }
        }

        if targets.walls.iter().any(Option::is_some) {
            let unloaded_wall = placeholders(registry, Layer::Wall)?.unloaded;
            let mut restored_positions = Vec::new();
            for (pos, slot) in &self.wall_coords {
                let Some(Some(kind)) = targets.walls.get(*slot) else {
                    continue;
                };
                restored_positions.push(*pos);
                let Some(wall) = grid.get_mut(*pos).and_then(|cell| cell.wall.as_mut()) else {
                    continue;
                };
                if wall.kind == unloaded_wall {
                    wall.kind = *kind;
                    summary.wall_cells += 1;
                }
            }
            for pos in restored_positions {
                self.wall_coords.remove(&pos);
            }
        }

        for (infos, layer_targets) in [
            (&mut self.tiles, &targets.tiles),
            (&mut self.walls, &targets.walls),
        ] {
            for (info, target) in infos.iter_mut().zip(layer_targets) {
                if target.is_some() && info.is_some() {
                    *info = None;
                    summary.slots += 1;
                }
            }
        }

        if summary.slots > 0 {
            info!(
                slots = summary.slots,
                tile_cells = summary.tile_cells,
                wall_cells = summary.wall_cells,
                "unloaded_content_restored"
            );
        }
        Ok(summary)
    }

    pub fn promote_pending(
        &mut self,
        grid: &mut Grid,
        registry: &dyn ContentRegistry,
    ) -> Result<usize, StoreError> {
        if self.pending_tiles.is_empty() && self.pending_walls.is_empty() {
            return Ok(0);
        }
        let mut promoted = 0usize;

        if !self.pending_tiles.is_empty() {
            let tile = placeholders(registry, Layer::Tile)?;
            let pending = std::mem::take(&mut self.pending_tiles);
            let mut stable = Vec::with_capacity(pending.len());
            for identity in pending {
                stable.push(self.record_unresolved(Layer::Tile, identity)?);
            }
            for (index, cell) in grid.cells_mut().iter_mut().enumerate() {
                let Some(cell_tile) = cell.tile.as_mut() else {
                    continue;
                };
                if cell_tile.kind != tile.pending {
                    continue;
                }
                let target = PackedSlot::from_frames(cell_tile.frame_x, cell_tile.frame_y)
                    .and_then(|slot| stable.get(slot.index()).copied());
                let Some(slot) = target else {
                    warn!(index, "pending_tile_without_queued_identity");
                    continue;
                };
                cell_tile.kind = tile.unloaded;
                (cell_tile.frame_x, cell_tile.frame_y) = slot.to_frames();
                promoted += 1;
            }
        }

        if !self.pending_walls.is_empty() {
            let wall = placeholders(registry, Layer::Wall)?;
            let pending = std::mem::take(&mut self.pending_walls);
            let mut stable = Vec::with_capacity(pending.len());
            for identity in pending {
                stable.push(self.record_unresolved(Layer::Wall, identity)?);
            }
            let coords = std::mem::take(&mut self.pending_wall_coords);
            for (pos, pending_index) in coords {
                let Some(slot) = stable.get(pending_index) else {
                    continue;
                };
                let Some(cell_wall) = grid.get_mut(pos).and_then(|cell| cell.wall.as_mut()) else {
                    continue;
                };
                if cell_wall.kind != wall.pending {
                    continue;
                }
                cell_wall.kind = wall.unloaded;
                self.wall_coords.insert(pos, slot.index());
                promoted += 1;
            }
        }
        self.pending_wall_coords.clear();

        info!(
            promoted,
            tile_slots = self.tiles.len(),
            wall_slots = self.walls.len(),
            "pending_content_promoted"
        );
        Ok(promoted)
    }

    pub fn disable_content(
        &mut self,
        grid: &mut Grid,
        registry: &dyn ContentRegistry,
        layer: Layer,
        kinds: &HashSet<u16>,
    ) -> Result<usize, StoreError> {
        let own = placeholders(registry, layer)?;
        let mut identities = HashMap::<u16, (ContentKey, bool)>::new();
        for kind in kinds {
            if *kind == own.pending || *kind == own.unloaded {
                continue;
            }
            if let Some(descriptor) = registry.descriptor(layer, *kind) {
                identities.insert(
                    *kind,
                    (descriptor.key.clone(), descriptor.frame_important),
                );
            }
        }
        if identities.is_empty() {
            return Ok(0);
        }

        let mut converted = 0usize;
        for index in 0..grid.len() {
            let pos = grid.pos_of(index);
            let cell = &mut grid.cells_mut()[index];
            match layer {
                Layer::Tile => {
                    let Some(tile) = cell.tile.as_mut() else {
                        continue;
                    };
                    let Some((key, frame_important)) = identities.get(&tile.kind) else {
                        continue;
                    };
                    let identity = if *frame_important {
                        IdentityRecord::framed(key.clone(), tile.frame_x, tile.frame_y)
                    } else {
                        IdentityRecord::new(key.clone())
                    };
                    let pending_slot = self.queue_pending_tile(identity)?;
                    tile.kind = own.pending;
                    (tile.frame_x, tile.frame_y) = pending_slot.to_frames();
                }
                Layer::Wall => {
                    let Some(wall) = cell.wall.as_mut() else {
                        continue;
                    };
                    let Some((key, _)) = identities.get(&wall.kind) else {
                        continue;
                    };
                    wall.kind = own.pending;
                    self.queue_pending_wall(pos, IdentityRecord::new(key.clone()));
                }
            }
            converted += 1;
        }
        debug!(layer = %layer, converted, "content_disabled");
        self.promote_pending(grid, registry)?;
        Ok(converted)
    }

    pub fn save_state(&self) -> UnloadedState {
        UnloadedState {
            tiles: self.tiles.iter().map(InfoTag::from_info).collect(),
            walls: self.walls.iter().map(InfoTag::from_info).collect(),
            wall_coords: self
                .wall_coords
                .iter()
                .map(|(pos, slot)| WallCoordTag {
                    x: pos.x,
                    y: pos.y,
                    slot: *slot as u32,
                })
                .collect(),
        }
    }

    // Pending entries queued by the grid decoder are kept.
    pub fn load_state(&mut self, state: &UnloadedState) -> Result<(), StoreError> {
        let tiles = infos_from_tags(Layer::Tile, &state.tiles)?;
        let walls = infos_from_tags(Layer::Wall, &state.walls)?;
        let mut wall_coords = BTreeMap::new();
        for coord in &state.wall_coords {
            let slot = coord.slot as usize;
            if !matches!(walls.get(slot), Some(Some(_))) {
                warn!(x = coord.x, y = coord.y, slot, "unloaded_wall_coord_dropped");
                continue;
            }
            wall_coords.insert(GridPos::new(coord.x, coord.y), slot);
        }
        self.tiles = tiles;
        self.walls = walls;
        self.wall_coords = wall_coords;
        Ok(())
    }

    pub fn reload(
        &mut self,
        state: &UnloadedState,
        grid: &mut Grid,
        registry: &dyn ContentRegistry,
    ) -> Result<ReloadSummary, StoreError> {
        self.load_state(state)?;
        let restored = self.try_restore(grid, registry)?;
        let promoted = self.promote_pending(grid, registry)?;
        Ok(ReloadSummary { restored, promoted })
    }
}

fn infos_from_tags(
    layer: Layer,
    tags: &[InfoTag],
) -> Result<Vec<Option<IdentityRecord>>, StoreError> {
    tags.iter()
        .enumerate()
        .map(|(index, tag)| tag.to_info(layer, index))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloadedState {
    #[serde(default)]
    pub tiles: Vec<InfoTag>,
    #[serde(default)]
    pub walls: Vec<InfoTag>,
    #[serde(default, rename = "wallCoords")]
    pub wall_coords: Vec<WallCoordTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoTag {
    #[serde(rename = "mod", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "frameX", default, skip_serializing_if = "Option::is_none")]
    pub frame_x: Option<i16>,
    #[serde(rename = "frameY", default, skip_serializing_if = "Option::is_none")]
    pub frame_y: Option<i16>,
}

impl InfoTag {
    fn from_info(info: &Option<IdentityRecord>) -> Self {
        let Some(info) = info else {
            return Self::default();
        };
        Self {
            origin: Some(info.key.origin.clone()),
            name: Some(info.key.name.clone()),
            frame_x: info.frame.map(|frame| frame.x),
            frame_y: info.frame.map(|frame| frame.y),
        }
    }

    fn to_info(&self, layer: Layer, index: usize) -> Result<Option<IdentityRecord>, StoreError> {
        let Some(origin) = &self.origin else {
            return Ok(None);
        };
        let name = self.name.clone().ok_or(StoreError::MalformedEntry {
            layer,
            index,
            reason: "record has a mod but no name",
        })?;
        let frame = match (self.frame_x, self.frame_y) {
            (None, None) => None,
            (Some(x), Some(y)) => Some(FramePair { x, y }),
            (x, y) => {
                warn!(layer = %layer, index, "unloaded_info_partial_frame_defaulted");
                Some(FramePair {
                    x: x.unwrap_or(0),
                    y: y.unwrap_or(0),
                })
            }
        };
        Ok(Some(IdentityRecord {
            key: ContentKey::new(origin, name),
            frame,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallCoordTag {
    pub x: i16,
    pub y: i16,
    pub slot: u32,
}
