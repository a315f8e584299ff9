mod atomic_io;
mod base;
mod codec;
mod entity;
mod equipment;
mod grid;
mod identity;
mod registry;
mod slot;
mod tables;
mod unloaded;
mod wire;
mod world;
mod world_file;

pub use base::{read_builtin_layer, write_builtin_layer, BaseLayerError};
pub use codec::{read_tile_data, write_tile_data, CodecError, DecodeSummary, EncodedGrid};
pub use entity::{
    load_entities, save_entities, EntityBody, EntityData, EntityError, EntityId, EntityKind,
    EntityKinds, EntityLoadError, EntityLoadSummary, EntityPayloadError, EntityStore, TileEntity,
};
pub use equipment::{
    builtin_frame_x, fixture_slot, has_mod_slot, read_equipment, write_equipment,
    EquipmentError, EquipmentSummary, FixtureSlot,
};
pub use grid::{Cell, Grid, GridError, GridPos, TileCell, WallCell, FRAME_UNSET};
pub use identity::{ContentKey, FramePair, IdentityRecord};
pub use registry::{
    placeholders, ContentDescriptor, ContentManifest, ContentRegistry, ContentTable,
    EquipCategory, Layer, ManifestEntry, ManifestEquipment, ManifestTile, Placeholders,
    RegistryError, LOADER_ORIGIN, PENDING_TILE, PENDING_WALL, UNLOADED_TILE, UNLOADED_WALL,
};
pub use slot::{PackedSlot, SlotOverflow};
pub use tables::{
    build_save_table, resolve_load_table, IdentityTable, ResolvedKind, ResolvedTables,
    TableEntry, TableError, UsageFlags,
};
pub use unloaded::{
    InfoTag, ReloadSummary, RestoreSummary, RestoreTargets, StoreError, UnloadedState,
    UnloadedStore, WallCoordTag,
};
pub use wire::WireError;
pub use world::{LoadReport, World, WorldLoadError, WorldSaveError};
pub use world_file::{
    read_world_file, sha256_hex, write_world_file, SectionTag, WorldFile, WorldFileError,
    WORLD_FORMAT_VERSION,
};
