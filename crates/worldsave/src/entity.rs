use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::{Grid, GridPos};
use crate::identity::ContentKey;
use crate::wire::{ByteReader, ByteWriter, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

pub trait EntityData: fmt::Debug {
    fn save(&self) -> Vec<u8>;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EntityPayloadError {
    message: String,
}

impl EntityPayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait EntityKind {
    fn key(&self) -> &ContentKey;

    fn load(&self, payload: &[u8]) -> Result<Box<dyn EntityData>, EntityPayloadError>;

    fn valid_at(&self, _grid: &Grid, _pos: GridPos) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("entity kind {key} is registered twice")]
    DuplicateKind { key: ContentKey },
    #[error("{count} entities do not fit in a u32 count")]
    TooMany { count: usize },
}

#[derive(Debug, Error)]
pub enum EntityLoadError {
    #[error("entity {key} at ({}, {}) has corrupt data", .position.x, .position.y)]
    CorruptData {
        key: ContentKey,
        position: GridPos,
        #[source]
        source: EntityPayloadError,
    },
}

#[derive(Default)]
pub struct EntityKinds {
    kinds: Vec<Box<dyn EntityKind>>,
    by_key: HashMap<ContentKey, usize>,
}

impl EntityKinds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: Box<dyn EntityKind>) -> Result<(), EntityError> {
        let key = kind.key().clone();
        if self.by_key.contains_key(&key) {
            return Err(EntityError::DuplicateKind { key });
        }
        self.by_key.insert(key, self.kinds.len());
        self.kinds.push(kind);
        Ok(())
    }

    pub fn get(&self, key: &ContentKey) -> Option<&dyn EntityKind> {
        self.by_key
            .get(key)
            .and_then(|index| self.kinds.get(*index))
            .map(|kind| kind.as_ref())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[derive(Debug)]
pub enum EntityBody {
    Loaded(Box<dyn EntityData>),
    Unloaded { payload: Vec<u8> },
}

#[derive(Debug)]
pub struct TileEntity {
    pub id: EntityId,
    pub key: ContentKey,
    pub position: GridPos,
    pub body: EntityBody,
}

impl TileEntity {
    pub fn is_unloaded(&self) -> bool {
        matches!(self.body, EntityBody::Unloaded { .. })
    }

    pub fn payload(&self) -> Vec<u8> {
        match &self.body {
            EntityBody::Loaded(data) => data.save(),
            EntityBody::Unloaded { payload } => payload.clone(),
        }
    }

    pub fn data<T: 'static>(&self) -> Option<&T> {
        match &self.body {
            EntityBody::Loaded(data) => data.as_any().downcast_ref::<T>(),
            EntityBody::Unloaded { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct EntityStore {
    allocator: EntityIdAllocator,
    by_id: BTreeMap<EntityId, TileEntity>,
    by_position: HashMap<GridPos, EntityId>,
}

impl EntityStore {
    pub fn insert(
        &mut self,
        key: ContentKey,
        position: GridPos,
        body: EntityBody,
    ) -> (EntityId, Option<TileEntity>) {
        let previous = self.by_position.get(&position).copied();
        let replaced = previous.and_then(|previous| self.remove(previous));
        let id = self.allocator.allocate();
        self.by_id.insert(
            id,
            TileEntity {
                id,
                key,
                position,
                body,
            },
        );
        self.by_position.insert(position, id);
        (id, replaced)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<TileEntity> {
        let entity = self.by_id.remove(&id)?;
        if self.by_position.get(&entity.position) == Some(&id) {
            self.by_position.remove(&entity.position);
        }
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&TileEntity> {
        self.by_id.get(&id)
    }

    pub fn at(&self, position: GridPos) -> Option<&TileEntity> {
        self.by_position
            .get(&position)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileEntity> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_position.clear();
    }
}

pub fn save_entities(store: &EntityStore) -> Result<Vec<u8>, EntityError> {
    let count = u32::try_from(store.len()).map_err(|_| EntityError::TooMany {
        count: store.len(),
    })?;
    let mut writer = ByteWriter::new("entities");
    writer.put_u32(count);
    for entity in store.iter() {
        writer.put_str(&entity.key.origin)?;
        writer.put_str(&entity.key.name)?;
        writer.put_i16(entity.position.x);
        writer.put_i16(entity.position.y);
        writer.put_blob(&entity.payload())?;
    }
    Ok(writer.into_bytes())
}

#[derive(Debug, Default)]
pub struct EntityLoadSummary {
    pub loaded: usize,
    pub unloaded: usize,
    pub dropped: usize,
    pub errors: Vec<EntityLoadError>,
}

pub fn load_entities(
    bytes: &[u8],
    grid: &Grid,
    kinds: &EntityKinds,
    store: &mut EntityStore,
) -> Result<EntityLoadSummary, EntityError> {
    let mut reader = ByteReader::new("entities", bytes);
    let mut summary = EntityLoadSummary::default();
    let count = reader.read_u32()?;
    for _ in 0..count {
        let key = ContentKey::new(reader.read_string()?, reader.read_string()?);
        let position = GridPos::new(reader.read_i16()?, reader.read_i16()?);
        let payload = reader.read_blob()?;

        if !grid.contains(position) {
            warn!(entity = %key, x = position.x, y = position.y, "entity_outside_grid_dropped");
            summary.dropped += 1;
            continue;
        }

        let body = match kinds.get(&key) {
            None => {
                summary.unloaded += 1;
                EntityBody::Unloaded {
                    payload: payload.to_vec(),
                }
            }
            Some(kind) if !kind.valid_at(grid, position) => {
                debug!(entity = %key, x = position.x, y = position.y, "entity_invalid_position_dropped");
                summary.dropped += 1;
                continue;
            }
            Some(kind) => match kind.load(payload) {
                Ok(data) => {
                    summary.loaded += 1;
                    EntityBody::Loaded(data)
                }
                Err(source) => {
                    let error = EntityLoadError::CorruptData {
                        key: key.clone(),
                        position,
                        source,
                    };
                    warn!(error = %error, "entity_payload_corrupt");
                    summary.errors.push(error);
                    summary.unloaded += 1;
                    EntityBody::Unloaded {
                        payload: payload.to_vec(),
                    }
                }
            },
        };
        store.insert(key, position, body);
    }
    reader.expect_end()?;

    debug!(
        loaded = summary.loaded,
        unloaded = summary.unloaded,
        dropped = summary.dropped,
        "entities_decoded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    impl EntityData for Counter {
        fn save(&self) -> Vec<u8> {
            self.0.to_le_bytes().to_vec()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CounterKind {
        key: ContentKey,
    }

    impl EntityKind for CounterKind {
        fn key(&self) -> &ContentKey {
            &self.key
        }

        fn load(&self, payload: &[u8]) -> Result<Box<dyn EntityData>, EntityPayloadError> {
            let bytes: [u8; 4] = payload
                .try_into()
                .map_err(|_| EntityPayloadError::new("counter payload must be 4 bytes"))?;
            Ok(Box::new(Counter(u32::from_le_bytes(bytes))))
        }

        fn valid_at(&self, _grid: &Grid, pos: GridPos) -> bool {
            pos.y != 3
        }
    }

    fn counter_key() -> ContentKey {
        ContentKey::new("ExampleMod", "Counter")
    }

    fn kinds() -> EntityKinds {
        let mut kinds = EntityKinds::new();
        kinds
            .register(Box::new(CounterKind { key: counter_key() }))
            .expect("register");
        kinds
    }

    fn record(writer: &mut ByteWriter, key: &ContentKey, x: i16, y: i16, payload: &[u8]) {
        writer.put_str(&key.origin).expect("origin");
        writer.put_str(&key.name).expect("name");
        writer.put_i16(x);
        writer.put_i16(y);
        writer.put_blob(payload).expect("payload");
    }

    #[test]
    fn corrupt_payload_does_not_affect_siblings() {
        let key = counter_key();
        let mut writer = ByteWriter::new("test");
        writer.put_u32(3);
        record(&mut writer, &key, 0, 0, &7u32.to_le_bytes());
        record(&mut writer, &key, 1, 0, &[1, 2, 3]);
        record(&mut writer, &key, 2, 0, &9u32.to_le_bytes());
        let bytes = writer.into_bytes();

        let grid = Grid::new(4, 4).expect("grid");
        let mut store = EntityStore::default();
        let summary = load_entities(&bytes, &grid, &kinds(), &mut store).expect("load");

        assert_eq!((summary.loaded, summary.unloaded), (2, 1));
        assert!(matches!(
            summary.errors.as_slice(),
            [EntityLoadError::CorruptData { position, .. }] if *position == GridPos::new(1, 0)
        ));
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.at(GridPos::new(2, 0)).and_then(|e| e.data::<Counter>()),
            Some(&Counter(9))
        );
        let broken = store.at(GridPos::new(1, 0)).expect("placeholder");
        assert!(broken.is_unloaded());
        assert_eq!(broken.payload(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_kinds_keep_identity_and_payload() {
        let gone = ContentKey::new("GoneMod", "Chest");
        let mut store = EntityStore::default();
        store.insert(
            gone.clone(),
            GridPos::new(1, 1),
            EntityBody::Unloaded {
                payload: vec![5, 6],
            },
        );
        store.insert(counter_key(), GridPos::new(0, 1), EntityBody::Loaded(Box::new(Counter(3))));
        let bytes = save_entities(&store).expect("save");

        let grid = Grid::new(2, 2).expect("grid");
        let mut reloaded = EntityStore::default();
        let summary = load_entities(&bytes, &grid, &EntityKinds::new(), &mut reloaded).expect("load");
        assert_eq!(summary.unloaded, 2);
        assert_eq!(save_entities(&reloaded).expect("resave"), bytes);
        assert_eq!(reloaded.at(GridPos::new(1, 1)).map(|e| &e.key), Some(&gone));
    }

    #[test]
    fn invalid_positions_are_dropped() {
        let key = counter_key();
        let mut writer = ByteWriter::new("test");
        writer.put_u32(2);
        record(&mut writer, &key, 9, 0, &1u32.to_le_bytes());
        record(&mut writer, &key, 0, 3, &1u32.to_le_bytes());
        let grid = Grid::new(4, 4).expect("grid");
        let mut store = EntityStore::default();
        let summary = load_entities(&writer.into_bytes(), &grid, &kinds(), &mut store).expect("load");
        assert_eq!(summary.dropped, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn insert_replaces_occupant_and_assigns_fresh_ids() {
        let mut store = EntityStore::default();
        let pos = GridPos::new(2, 2);
        let (first, none) = store.insert(counter_key(), pos, EntityBody::Loaded(Box::new(Counter(1))));
        assert!(none.is_none());
        let (second, replaced) =
            store.insert(counter_key(), pos, EntityBody::Loaded(Box::new(Counter(2))));
        assert_ne!(first, second);
        assert_eq!(replaced.map(|e| e.id), Some(first));
        assert_eq!(store.len(), 1);
        assert_eq!(store.at(pos).map(|e| e.id), Some(second));
        assert!(store.get(first).is_none());
    }

    #[test]
    fn duplicate_kinds_are_rejected() {
        let mut kinds = kinds();
        let error = kinds
            .register(Box::new(CounterKind { key: counter_key() }))
            .expect_err("duplicate");
        assert!(matches!(error, EntityError::DuplicateKind { .. }));
    }
}
