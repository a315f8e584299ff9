use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::atomic_io::write_bytes_atomic;
use crate::wire::{ByteReader, ByteWriter, WireError};

const MAGIC: &[u8; 4] = b"TWSV";
pub const WORLD_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionTag {
    BuiltinLayer = 1,
    IdentityTable = 2,
    GridBlob = 3,
    Equipment = 4,
    Entities = 5,
    UnloadedState = 6,
}

impl SectionTag {
    pub const ALL: [SectionTag; 6] = [
        Self::BuiltinLayer,
        Self::IdentityTable,
        Self::GridBlob,
        Self::Equipment,
        Self::Entities,
        Self::UnloadedState,
    ];

    fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u8 == value)
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BuiltinLayer => "builtin_layer",
            Self::IdentityTable => "identity_table",
            Self::GridBlob => "grid_blob",
            Self::Equipment => "equipment",
            Self::Entities => "entities",
            Self::UnloadedState => "unloaded_state",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WorldFileError {
    #[error("failed to read/write world file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("world file has invalid format: {message}")]
    InvalidFormat { message: String },
    #[error(transparent)]
    Wire(#[from] WireError),
}

fn invalid_format(message: impl Into<String>) -> WorldFileError {
    WorldFileError::InvalidFormat {
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldFile {
    pub width: u16,
    pub height: u16,
    sections: BTreeMap<SectionTag, Vec<u8>>,
}

impl WorldFile {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            sections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, tag: SectionTag, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.sections.insert(tag, bytes)
    }

    pub fn section(&self, tag: SectionTag) -> Option<&[u8]> {
        self.sections.get(&tag).map(Vec::as_slice)
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionTag, &[u8])> {
        self.sections.iter().map(|(tag, bytes)| (*tag, bytes.as_slice()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, WorldFileError> {
        self.check_sections()?;
        let mut payload = ByteWriter::new("world payload");
        for (tag, bytes) in &self.sections {
            payload.put_u8(*tag as u8);
            payload.put_blob(bytes)?;
        }
        let payload = payload.into_bytes();
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| invalid_format("payload does not fit in a u32 length"))?;

        let mut writer = ByteWriter::new("world file");
        writer.put_raw(MAGIC);
        writer.put_u16(WORLD_FORMAT_VERSION);
        writer.put_u16(self.width);
        writer.put_u16(self.height);
        writer.put_u32(payload_len);
        writer.put_raw(&sha256_bytes(&payload));
        writer.put_raw(&payload);
        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WorldFileError> {
        let mut reader = ByteReader::new("world file", bytes);
        if reader.read_exact(MAGIC.len())? != MAGIC {
            return Err(invalid_format("invalid magic"));
        }
        let version = reader.read_u16()?;
        if version != WORLD_FORMAT_VERSION {
            return Err(invalid_format(format!(
                "unsupported format version {version} (expected {WORLD_FORMAT_VERSION})"
            )));
        }
        let width = reader.read_u16()?;
        let height = reader.read_u16()?;
        let payload_len = reader.read_u32()? as usize;
        let expected_hash = reader.read_exact(32)?;
        let payload = reader.read_exact(payload_len)?;
        reader.expect_end()?;
        if expected_hash != sha256_bytes(payload) {
            return Err(invalid_format("payload hash mismatch"));
        }

        let mut file = Self::new(width, height);
        let mut sections = ByteReader::new("world payload", payload);
        while !sections.is_empty() {
            let raw_tag = sections.read_u8()?;
            let tag = SectionTag::from_u8(raw_tag)
                .ok_or_else(|| invalid_format(format!("unknown section tag {raw_tag}")))?;
            let body = sections.read_blob()?;
            if file.insert(tag, body.to_vec()).is_some() {
                return Err(invalid_format(format!("duplicate section {tag}")));
            }
        }
        file.check_sections()?;
        Ok(file)
    }

    fn check_sections(&self) -> Result<(), WorldFileError> {
        if !self.sections.contains_key(&SectionTag::BuiltinLayer) {
            return Err(invalid_format("missing builtin_layer section"));
        }
        let has_table = self.sections.contains_key(&SectionTag::IdentityTable);
        let has_grid = self.sections.contains_key(&SectionTag::GridBlob);
        if has_table != has_grid {
            return Err(invalid_format(
                "identity_table and grid_blob sections must appear together",
            ));
        }
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    sha256_bytes(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn sha256_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn write_world_file(path: &Path, file: &WorldFile) -> Result<(), WorldFileError> {
    let bytes = file.encode()?;
    write_bytes_atomic(path, &bytes).map_err(|source| WorldFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_world_file(path: &Path) -> Result<WorldFile, WorldFileError> {
    let bytes = fs::read(path).map_err(|source| WorldFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    WorldFile::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample() -> WorldFile {
        let mut file = WorldFile::new(8, 4);
        file.insert(SectionTag::BuiltinLayer, vec![16, 31, 0]);
        file.insert(SectionTag::IdentityTable, vec![0, 0, 0, 0]);
        file.insert(SectionTag::GridBlob, vec![32]);
        file.insert(SectionTag::UnloadedState, b"{}".to_vec());
        file
    }

    #[test]
    fn file_roundtrip_preserves_sections() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("world.twsv");
        write_world_file(&path, &sample()).expect("write");
        let loaded = read_world_file(&path).expect("read");
        assert_eq!(loaded, sample());
        assert_eq!(loaded.section(SectionTag::GridBlob), Some(&[32u8][..]));
        assert_eq!(loaded.section(SectionTag::Equipment), None);
    }

    #[test]
    fn corrupted_payload_fails_hash_check() {
        let mut bytes = sample().encode().expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let error = WorldFile::decode(&bytes).expect_err("hash mismatch");
        assert!(error.to_string().contains("payload hash mismatch"));
    }

    #[test]
    fn header_problems_are_format_errors() {
        let bytes = sample().encode().expect("encode");

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(matches!(
            WorldFile::decode(&wrong_magic),
            Err(WorldFileError::InvalidFormat { .. })
        ));

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(matches!(
            WorldFile::decode(&wrong_version),
            Err(WorldFileError::InvalidFormat { .. })
        ));

        let mut trailing = bytes;
        trailing.push(0);
        assert!(matches!(
            WorldFile::decode(&trailing),
            Err(WorldFileError::Wire(WireError::TrailingBytes { .. }))
        ));
    }

    #[test]
    fn table_and_grid_sections_travel_together() {
        let mut file = WorldFile::new(1, 1);
        file.insert(SectionTag::BuiltinLayer, vec![0]);
        file.insert(SectionTag::GridBlob, vec![1]);
        assert!(file.encode().is_err());
    }
}
