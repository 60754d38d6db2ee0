//! Storage Network Protocol
//!
//! Endpoints and DTOs for store traffic between nodes. Every request is
//! addressed to the key's home node except invalidations, which the home node
//! sends to nodes holding cached copies. Bodies are bincode-encoded.

use super::key::Key;
use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Read of the authoritative copy; registers the requester as a cache holder.
pub const ENDPOINT_DKV_GET: &str = "/internal/dkv/get";
/// Unconditional write at the home node.
pub const ENDPOINT_DKV_PUT: &str = "/internal/dkv/put";
/// Versioned compare-and-set at the home node.
pub const ENDPOINT_DKV_CAS: &str = "/internal/dkv/cas";
/// Deletion at the home node.
pub const ENDPOINT_DKV_REMOVE: &str = "/internal/dkv/remove";
/// Drops a cached copy on a non-home node.
pub const ENDPOINT_DKV_INVALIDATE: &str = "/internal/dkv/invalidate";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireValue {
    pub bytes: Vec<u8>,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: Key,
    pub requester: NodeId,
    /// Whether the requester keeps a cached copy and must be invalidated.
    pub cache: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` indicates the key does not exist.
    pub value: Option<WireValue>,
}

/// Write forwarded by a node that is not the key's home.
///
/// `op_id` lets the home node drop duplicates caused by client retries.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub op_id: String,
    pub key: Key,
    pub bytes: Vec<u8>,
    pub origin: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub version: u64,
}

/// Commits `bytes` only if the home copy is still at `expected_version`
/// (0 meaning "absent").
#[derive(Debug, Serialize, Deserialize)]
pub struct CasRequest {
    pub op_id: String,
    pub key: Key,
    pub expected_version: u64,
    pub bytes: Vec<u8>,
    pub origin: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CasResponse {
    pub committed: bool,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub op_id: String,
    pub key: Key,
    pub origin: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub key: Key,
    /// Version that made the cached copy stale; 0 for a removal.
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}
