//! Network Protocol Definitions
//!
//! Envelopes for shipping a sub-range of a distributed task to a peer.
//! The request carries the cloned task's fields and its key subset; the
//! response carries the folded task or the fault that ended it, never both.
//! Keys are not sent back.

use super::types::DException;
use crate::storage::key::Key;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_DTASK: &str = "/internal/dtask";

#[derive(Debug, Serialize, Deserialize)]
pub struct DTaskRequest {
    /// Registered task type, see `TaskEngine::register`.
    pub task_name: String,
    /// bincode-encoded task fields.
    pub task: Vec<u8>,
    pub keys: Vec<Key>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DTaskResponse {
    pub task: Option<Vec<u8>>,
    pub exception: Option<DException>,
}

impl DTaskResponse {
    pub fn done(task: Vec<u8>) -> Self {
        Self {
            task: Some(task),
            exception: None,
        }
    }

    pub fn failed(exception: DException) -> Self {
        Self {
            task: None,
            exception: Some(exception),
        }
    }
}
