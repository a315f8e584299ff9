use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey {
    pub origin: String,
    pub name: String,
}

impl ContentKey {
    pub fn new(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramePair {
    pub x: i16,
    pub y: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityRecord {
    pub key: ContentKey,
    pub frame: Option<FramePair>,
}

impl IdentityRecord {
    pub fn new(key: ContentKey) -> Self {
        Self { key, frame: None }
    }

    pub fn framed(key: ContentKey, x: i16, y: i16) -> Self {
        Self {
            key,
            frame: Some(FramePair { x, y }),
        }
    }
}

impl fmt::Display for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            Some(frame) => write!(f, "{} @({}, {})", self.key, frame.x, frame.y),
            None => write!(f, "{}", self.key),
        }
    }
}
