use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ContentKey;

pub const LOADER_ORIGIN: &str = "ModLoader";
pub const UNLOADED_TILE: &str = "UnloadedTile";
pub const PENDING_TILE: &str = "PendingUnloadedTile";
pub const UNLOADED_WALL: &str = "UnloadedWall";
pub const PENDING_WALL: &str = "PendingUnloadedWall";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Tile,
    Wall,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tile => f.write_str("tile"),
            Self::Wall => f.write_str("wall"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipCategory {
    Head,
    Body,
    Legs,
}

impl EquipCategory {
    pub const ALL: [EquipCategory; 3] = [Self::Head, Self::Body, Self::Legs];

    pub fn index(self) -> usize {
        match self {
            Self::Head => 0,
            Self::Body => 1,
            Self::Legs => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub key: ContentKey,
    pub frame_important: bool,
}

/// Kinds below `builtin_count` belong to the host game and are never remapped.
pub trait ContentRegistry {
    fn builtin_count(&self, layer: Layer) -> u16;

    fn descriptor(&self, layer: Layer, kind: u16) -> Option<&ContentDescriptor>;

    fn find(&self, layer: Layer, origin: &str, name: &str) -> Option<u16>;

    fn builtin_equip_slots(&self, _category: EquipCategory) -> u16 {
        u16::MAX
    }

    fn equip_slot(&self, _category: EquipCategory, _slot: u16) -> Option<&ContentKey> {
        None
    }

    fn find_equip_slot(&self, _category: EquipCategory, _origin: &str, _name: &str) -> Option<u16> {
        None
    }

    fn is_display_fixture(&self, _kind: u16) -> bool {
        false
    }
}

pub(crate) fn is_mod_kind(registry: &dyn ContentRegistry, layer: Layer, kind: u16) -> bool {
    kind >= registry.builtin_count(layer)
}

pub(crate) fn is_frame_important(registry: &dyn ContentRegistry, kind: u16) -> bool {
    registry
        .descriptor(Layer::Tile, kind)
        .is_some_and(|descriptor| descriptor.frame_important)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholders {
    pub unloaded: u16,
    pub pending: u16,
}

pub fn placeholders(
    registry: &dyn ContentRegistry,
    layer: Layer,
) -> Result<Placeholders, RegistryError> {
    let (unloaded_name, pending_name) = match layer {
        Layer::Tile => (UNLOADED_TILE, PENDING_TILE),
        Layer::Wall => (UNLOADED_WALL, PENDING_WALL),
    };
    let lookup = |name: &'static str| {
        registry
            .find(layer, LOADER_ORIGIN, name)
            .ok_or(RegistryError::MissingPlaceholder { layer, name })
    };
    Ok(Placeholders {
        unloaded: lookup(unloaded_name)?,
        pending: lookup(pending_name)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry has no {layer} placeholder named {}/{name}", LOADER_ORIGIN)]
    MissingPlaceholder { layer: Layer, name: &'static str },
    #[error("{layer} content {key} is registered twice")]
    Duplicate { layer: Layer, key: ContentKey },
    #[error("equipment slot {key} is registered twice in {category:?}")]
    DuplicateEquipSlot {
        category: EquipCategory,
        key: ContentKey,
    },
    #[error("numeric id space for {what} is exhausted")]
    IdSpaceExhausted { what: String },
    #[error("equipment category {category:?} is listed twice in the manifest")]
    DuplicateEquipCategory { category: EquipCategory },
}

#[derive(Debug, Default, Clone)]
struct LayerTable {
    builtin: u16,
    defs: Vec<ContentDescriptor>,
    ids_by_key: HashMap<ContentKey, u16>,
}

impl LayerTable {
    fn new(builtin: u16) -> Self {
        Self {
            builtin,
            ..Self::default()
        }
    }

    fn register(
        &mut self,
        layer: Layer,
        key: ContentKey,
        frame_important: bool,
    ) -> Result<u16, RegistryError> {
        if self.ids_by_key.contains_key(&key) {
            return Err(RegistryError::Duplicate { layer, key });
        }
        let id = u16::try_from(self.builtin as usize + self.defs.len())
            .ok()
            .filter(|id| *id < u16::MAX)
            .ok_or_else(|| RegistryError::IdSpaceExhausted {
                what: format!("{layer} kinds"),
            })?;
        self.ids_by_key.insert(key.clone(), id);
        self.defs.push(ContentDescriptor {
            key,
            frame_important,
        });
        Ok(id)
    }

    fn descriptor(&self, kind: u16) -> Option<&ContentDescriptor> {
        kind.checked_sub(self.builtin)
            .and_then(|offset| self.defs.get(offset as usize))
    }
}

#[derive(Debug, Default, Clone)]
struct EquipTable {
    builtin: u16,
    slots: Vec<ContentKey>,
    ids_by_key: HashMap<ContentKey, u16>,
}

#[derive(Debug, Clone)]
pub struct ContentTable {
    tiles: LayerTable,
    walls: LayerTable,
    equip: [EquipTable; 3],
    display_fixtures: HashSet<u16>,
}

impl ContentTable {
    pub fn new(builtin_tiles: u16, builtin_walls: u16) -> Result<Self, RegistryError> {
        let mut table = Self {
            tiles: LayerTable::new(builtin_tiles),
            walls: LayerTable::new(builtin_walls),
            equip: std::array::from_fn(|_| EquipTable {
                builtin: 1,
                ..EquipTable::default()
            }),
            display_fixtures: HashSet::new(),
        };
        for name in [UNLOADED_TILE, PENDING_TILE] {
            table.register_tile(ContentKey::new(LOADER_ORIGIN, name), true)?;
        }
        for name in [UNLOADED_WALL, PENDING_WALL] {
            table.register_wall(ContentKey::new(LOADER_ORIGIN, name))?;
        }
        Ok(table)
    }

    pub fn from_manifest(manifest: &ContentManifest) -> Result<Self, RegistryError> {
        let mut table = Self::new(manifest.builtin_tiles, manifest.builtin_walls)?;
        for tile in &manifest.tiles {
            table.register_tile(
                ContentKey::new(&tile.origin, &tile.name),
                tile.frame_important,
            )?;
        }
        for wall in &manifest.walls {
            table.register_wall(ContentKey::new(&wall.origin, &wall.name))?;
        }
        let mut seen = HashSet::new();
        for equip in &manifest.equipment {
            if !seen.insert(equip.category) {
                return Err(RegistryError::DuplicateEquipCategory {
                    category: equip.category,
                });
            }
            table.set_builtin_equip_slots(equip.category, equip.builtin_slots);
            for slot in &equip.slots {
                table.register_equip_slot(equip.category, ContentKey::new(&slot.origin, &slot.name))?;
            }
        }
        for kind in &manifest.display_fixtures {
            table.mark_display_fixture(*kind);
        }
        Ok(table)
    }

    pub fn register_tile(
        &mut self,
        key: ContentKey,
        frame_important: bool,
    ) -> Result<u16, RegistryError> {
        self.tiles.register(Layer::Tile, key, frame_important)
    }

    pub fn register_wall(&mut self, key: ContentKey) -> Result<u16, RegistryError> {
        self.walls.register(Layer::Wall, key, false)
    }

    pub fn set_builtin_equip_slots(&mut self, category: EquipCategory, count: u16) {
        self.equip[category.index()].builtin = count;
    }

    pub fn register_equip_slot(
        &mut self,
        category: EquipCategory,
        key: ContentKey,
    ) -> Result<u16, RegistryError> {
        let table = &mut self.equip[category.index()];
        if table.ids_by_key.contains_key(&key) {
            return Err(RegistryError::DuplicateEquipSlot { category, key });
        }
        let slot = u16::try_from(table.builtin as usize + table.slots.len()).map_err(|_| {
            RegistryError::IdSpaceExhausted {
                what: format!("{category:?} equipment slots"),
            }
        })?;
        table.ids_by_key.insert(key.clone(), slot);
        table.slots.push(key);
        Ok(slot)
    }

    pub fn mark_display_fixture(&mut self, kind: u16) {
        self.display_fixtures.insert(kind);
    }

    fn layer(&self, layer: Layer) -> &LayerTable {
        match layer {
            Layer::Tile => &self.tiles,
            Layer::Wall => &self.walls,
        }
    }
}

impl ContentRegistry for ContentTable {
    fn builtin_count(&self, layer: Layer) -> u16 {
        self.layer(layer).builtin
    }

    fn descriptor(&self, layer: Layer, kind: u16) -> Option<&ContentDescriptor> {
        self.layer(layer).descriptor(kind)
    }

    fn find(&self, layer: Layer, origin: &str, name: &str) -> Option<u16> {
        self.layer(layer)
            .ids_by_key
            .get(&ContentKey::new(origin, name))
            .copied()
    }

    fn builtin_equip_slots(&self, category: EquipCategory) -> u16 {
        self.equip[category.index()].builtin
    }

    fn equip_slot(&self, category: EquipCategory, slot: u16) -> Option<&ContentKey> {
        let table = &self.equip[category.index()];
        slot.checked_sub(table.builtin)
            .and_then(|offset| table.slots.get(offset as usize))
    }

    fn find_equip_slot(&self, category: EquipCategory, origin: &str, name: &str) -> Option<u16> {
        self.equip[category.index()]
            .ids_by_key
            .get(&ContentKey::new(origin, name))
            .copied()
    }

    fn is_display_fixture(&self, kind: u16) -> bool {
        self.display_fixtures.contains(&kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContentManifest {
    pub builtin_tiles: u16,
    pub builtin_walls: u16,
    #[serde(default)]
    pub tiles: Vec<ManifestTile>,
    #[serde(default)]
    pub walls: Vec<ManifestEntry>,
    #[serde(default)]
    pub equipment: Vec<ManifestEquipment>,
    #[serde(default)]
    pub display_fixtures: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestTile {
    pub origin: String,
    pub name: String,
    #[serde(default)]
    pub frame_important: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    pub origin: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEquipment {
    pub category: EquipCategory,
    pub builtin_slots: u16,
    #[serde(default)]
    pub slots: Vec<ManifestEntry>,
}
