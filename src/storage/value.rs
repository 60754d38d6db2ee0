use crate::error::FabricResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A versioned blob stored under a key.
///
/// Versions start at 1 on first write and grow by one on every committed
/// mutation at the home node; caches keep the version they fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    bytes: Arc<Vec<u8>>,
    version: u64,
}

impl Value {
    pub fn new(bytes: Vec<u8>, version: u64) -> Self {
        Self {
            bytes: Arc::new(bytes),
            version,
        }
    }

    /// Encodes `obj` as the backing bytes of a fresh value.
    pub fn encode<T: Serialize>(obj: &T) -> FabricResult<Vec<u8>> {
        Ok(bincode::serialize(obj)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Rehydrates the in-memory representation from the backing bytes.
    pub fn inflate<T: DeserializeOwned>(&self) -> FabricResult<T> {
        Ok(bincode::deserialize(&self.bytes)?)
    }
}
