//! Store keys.
//!
//! A key is an immutable byte string whose first byte is a kind tag. The tag
//! decides how the home node is computed (see [`super::partitioner`]):
//!
//! ```text
//! User    [0x00][name..]
//! Pinned  [0x01][id_len u8][node id..][name..]
//! Array   [0x02][name..]                    value is a list of child keys
//! Column  [0x03][group u64 BE][name..]
//! Chunk   [0x04][chunk idx u32 BE][group u64 BE][name..]
//! ```

use crate::membership::cloud::Cloud;
use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

const TAG_USER: u8 = 0x00;
const TAG_PINNED: u8 = 0x01;
const TAG_ARRAY: u8 = 0x02;
const TAG_COLUMN: u8 = 0x03;
const TAG_CHUNK: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    User,
    Pinned,
    Array,
    Column,
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    pub fn make(name: &str) -> Self {
        Self::tagged(TAG_USER, name.as_bytes())
    }

    /// A key whose home is always `node` while it is a cluster member.
    pub fn pinned(name: &str, node: &NodeId) -> Self {
        let id = node.0.as_bytes();
        let id_len = id.len().min(u8::MAX as usize);
        let mut bytes = Vec::with_capacity(2 + id_len + name.len());
        bytes.push(TAG_PINNED);
        bytes.push(id_len as u8);
        bytes.extend_from_slice(&id[..id_len]);
        bytes.extend_from_slice(name.as_bytes());
        Self { bytes }
    }

    /// A key whose value lists child keys; tasks invoked on it run over the children.
    pub fn array(name: &str) -> Self {
        Self::tagged(TAG_ARRAY, name.as_bytes())
    }

    /// Column header key. Columns sharing a `group` co-locate their chunks.
    pub fn column(group: u64, name: &str) -> Self {
        let mut bytes = Vec::with_capacity(9 + name.len());
        bytes.push(TAG_COLUMN);
        bytes.extend_from_slice(&group.to_be_bytes());
        bytes.extend_from_slice(name.as_bytes());
        Self { bytes }
    }

    /// Key of chunk `cidx` of the column `column`.
    pub fn chunk(column: &Key, cidx: u32) -> Self {
        let tail = match column.kind() {
            KeyKind::Column => &column.bytes[1..],
            _ => &column.bytes[..],
        };
        let mut bytes = Vec::with_capacity(5 + tail.len());
        bytes.push(TAG_CHUNK);
        bytes.extend_from_slice(&cidx.to_be_bytes());
        bytes.extend_from_slice(tail);
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    fn tagged(tag: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(tag);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> KeyKind {
        match self.bytes.first() {
            Some(&TAG_PINNED) if self.bytes.len() >= 2 => KeyKind::Pinned,
            Some(&TAG_ARRAY) => KeyKind::Array,
            Some(&TAG_COLUMN) if self.bytes.len() >= 9 => KeyKind::Column,
            Some(&TAG_CHUNK) if self.bytes.len() >= 13 => KeyKind::Chunk,
            _ => KeyKind::User,
        }
    }

    pub fn is_array(&self) -> bool {
        self.kind() == KeyKind::Array
    }

    /// Node id embedded in a pinned key.
    pub fn pinned_node(&self) -> Option<NodeId> {
        if self.kind() != KeyKind::Pinned {
            return None;
        }
        let id_len = self.bytes[1] as usize;
        let id = self.bytes.get(2..2 + id_len)?;
        Some(NodeId(String::from_utf8_lossy(id).into_owned()))
    }

    /// Placement group of a column or chunk key.
    pub fn group(&self) -> Option<u64> {
        let start = match self.kind() {
            KeyKind::Column => 1,
            KeyKind::Chunk => 5,
            _ => return None,
        };
        let raw: [u8; 8] = self.bytes.get(start..start + 8)?.try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }

    pub fn chunk_index(&self) -> Option<u32> {
        if self.kind() != KeyKind::Chunk {
            return None;
        }
        let raw: [u8; 4] = self.bytes.get(1..5)?.try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// Column key a chunk key belongs to.
    pub fn column_of(&self) -> Option<Key> {
        if self.kind() != KeyKind::Chunk {
            return None;
        }
        Some(Self::tagged(TAG_COLUMN, &self.bytes[5..]))
    }

    /// Index of this key's home in `cloud`.
    pub fn home(&self, cloud: &Cloud) -> usize {
        super::partitioner::home_index(self, cloud)
    }

    /// Human-readable name portion.
    pub fn name(&self) -> String {
        let start = match self.kind() {
            KeyKind::User | KeyKind::Array => 1,
            KeyKind::Pinned => 2 + self.bytes[1] as usize,
            KeyKind::Column => 9,
            KeyKind::Chunk => 13,
        };
        let payload = self.bytes.get(start..).unwrap_or_default();
        String::from_utf8_lossy(payload).into_owned()
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            KeyKind::Chunk => write!(
                f,
                "{}#{}",
                self.name(),
                self.chunk_index().unwrap_or_default()
            ),
            KeyKind::Pinned => write!(
                f,
                "{}@{}",
                self.name(),
                self.pinned_node().map(|n| n.0).unwrap_or_default()
            ),
            _ => f.write_str(&self.name()),
        }
    }
}
