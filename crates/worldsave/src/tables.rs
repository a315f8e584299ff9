use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::Grid;
use crate::identity::ContentKey;
use crate::registry::{is_mod_kind, placeholders, ContentRegistry, Layer, RegistryError};
use crate::wire::{ByteReader, ByteWriter, WireError};

const ATTR_FRAME_IMPORTANT: u8 = 1 << 0;
const KNOWN_ATTRS: u8 = ATTR_FRAME_IMPORTANT;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("{layer} kind {kind} occurs in the grid but is not registered")]
    UnregisteredKind { layer: Layer, kind: u16 },
    #[error("{layer} table lists {count} entries, more than fit in a u16 count")]
    TooManyEntries { layer: Layer, count: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Default, Clone)]
pub struct UsageFlags {
    tiles: Vec<u16>,
    walls: Vec<u16>,
    seen_tiles: HashSet<u16>,
    seen_walls: HashSet<u16>,
}

impl UsageFlags {
    pub fn note(&mut self, layer: Layer, kind: u16) {
        let (order, seen) = match layer {
            Layer::Tile => (&mut self.tiles, &mut self.seen_tiles),
            Layer::Wall => (&mut self.walls, &mut self.seen_walls),
        };
        if seen.insert(kind) {
            order.push(kind);
        }
    }

    pub fn kinds(&self, layer: Layer) -> &[u16] {
        match layer {
            Layer::Tile => &self.tiles,
            Layer::Wall => &self.walls,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.walls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub save_id: u16,
    pub key: ContentKey,
    pub frame_important: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentityTable {
    pub tiles: Vec<TableEntry>,
    pub walls: Vec<TableEntry>,
}

impl IdentityTable {
    pub fn scan(grid: &Grid, registry: &dyn ContentRegistry) -> Result<Self, TableError> {
        let mut usage = UsageFlags::default();
        for cell in grid.cells() {
            if let Some(tile) = cell.tile {
                if is_mod_kind(registry, Layer::Tile, tile.kind) {
                    usage.note(Layer::Tile, tile.kind);
                }
            }
            if let Some(wall) = cell.wall {
                if is_mod_kind(registry, Layer::Wall, wall.kind) {
                    usage.note(Layer::Wall, wall.kind);
                }
            }
        }
        build_save_table(&usage, registry)
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.walls.is_empty()
    }

    pub fn entries(&self, layer: Layer) -> &[TableEntry] {
        match layer {
            Layer::Tile => &self.tiles,
            Layer::Wall => &self.walls,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = ByteWriter::new("identity table");
        for layer in [Layer::Tile, Layer::Wall] {
            let entries = self.entries(layer);
            let count = u16::try_from(entries.len()).map_err(|_| TableError::TooManyEntries {
                layer,
                count: entries.len(),
            })?;
            writer.put_u16(count);
            for entry in entries {
                writer.put_i16(entry.save_id as i16);
                writer.put_str(&entry.key.origin)?;
                writer.put_str(&entry.key.name)?;
                let mut attrs = 0u8;
                if entry.frame_important {
                    attrs |= ATTR_FRAME_IMPORTANT;
                }
                writer.put_u8(attrs);
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TableError> {
        let mut reader = ByteReader::new("identity table", bytes);
        let mut table = Self::default();
        for layer in [Layer::Tile, Layer::Wall] {
            let count = reader.read_u16()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let save_id = reader.read_i16()? as u16;
                let origin = reader.read_string()?;
                let name = reader.read_string()?;
                let attrs = reader.read_u8()?;
                if attrs & !KNOWN_ATTRS != 0 {
                    warn!(
                        layer = %layer,
                        save_id,
                        attrs,
                        "identity_table_unknown_attributes_ignored"
                    );
                }
                entries.push(TableEntry {
                    save_id,
                    key: ContentKey { origin, name },
                    frame_important: layer == Layer::Tile && attrs & ATTR_FRAME_IMPORTANT != 0,
                });
            }
            match layer {
                Layer::Tile => table.tiles = entries,
                Layer::Wall => table.walls = entries,
            }
        }
        reader.expect_end()?;
        Ok(table)
    }
}

pub fn build_save_table(
    usage: &UsageFlags,
    registry: &dyn ContentRegistry,
) -> Result<IdentityTable, TableError> {
    let mut table = IdentityTable::default();
    for layer in [Layer::Tile, Layer::Wall] {
        let mut entries = Vec::with_capacity(usage.kinds(layer).len());
        for &kind in usage.kinds(layer) {
            let descriptor = registry
                .descriptor(layer, kind)
                .ok_or(TableError::UnregisteredKind { layer, kind })?;
            entries.push(TableEntry {
                save_id: kind,
                key: descriptor.key.clone(),
                frame_important: layer == Layer::Tile && descriptor.frame_important,
            });
        }
        match layer {
            Layer::Tile => table.tiles = entries,
            Layer::Wall => table.walls = entries,
        }
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKind {
    pub kind: u16,
    pub frame_important: bool,
    /// Set when `kind` is the pending placeholder.
    pub unresolved: Option<ContentKey>,
}

#[derive(Debug, Default, Clone)]
pub struct ResolvedTables {
    tiles: HashMap<u16, ResolvedKind>,
    walls: HashMap<u16, ResolvedKind>,
}

impl ResolvedTables {
    pub fn get(&self, layer: Layer, save_id: u16) -> Option<&ResolvedKind> {
        match layer {
            Layer::Tile => self.tiles.get(&save_id),
            Layer::Wall => self.walls.get(&save_id),
        }
    }

    pub fn unresolved_count(&self, layer: Layer) -> usize {
        let map = match layer {
            Layer::Tile => &self.tiles,
            Layer::Wall => &self.walls,
        };
        map.values().filter(|kind| kind.unresolved.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.walls.is_empty()
    }
}

pub fn resolve_load_table(
    table: Option<&IdentityTable>,
    registry: &dyn ContentRegistry,
) -> Result<ResolvedTables, TableError> {
    let mut resolved = ResolvedTables::default();
    let Some(table) = table else {
        return Ok(resolved);
    };

    for layer in [Layer::Tile, Layer::Wall] {
        let mut pending = None;
        let map = match layer {
            Layer::Tile => &mut resolved.tiles,
            Layer::Wall => &mut resolved.walls,
        };
        for entry in table.entries(layer) {
            let found = registry.find(layer, &entry.key.origin, &entry.key.name);
            let value = match found {
                Some(kind) => ResolvedKind {
                    kind,
                    frame_important: entry.frame_important,
                    unresolved: None,
                },
                None => {
                    let pending_kind = match pending {
                        Some(kind) => kind,
                        None => {
                            let kind = placeholders(registry, layer)?.pending;
                            pending = Some(kind);
                            kind
                        }
                    };
                    warn!(
                        layer = %layer,
                        save_id = entry.save_id,
                        content = %entry.key,
                        "content_unresolved_using_placeholder"
                    );
                    ResolvedKind {
                        kind: pending_kind,
                        frame_important: entry.frame_important,
                        unresolved: Some(entry.key.clone()),
                    }
                }
            };
            map.insert(entry.save_id, value);
        }
    }

    debug!(
        tiles = resolved.tiles.len(),
        walls = resolved.walls.len(),
        unresolved_tiles = resolved.unresolved_count(Layer::Tile),
        unresolved_walls = resolved.unresolved_count(Layer::Wall),
        "identity_table_resolved"
    );
    Ok(resolved)
}
