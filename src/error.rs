use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fault kinds a distributed task can end with.
///
/// These cross node boundaries inside task responses, so every variant carries
/// a plain message instead of the source error value. Callers of
/// [`crate::executor::engine::TaskEngine::invoke`] receive the fault raised by
/// the originating local work unchanged and may branch on the variant.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskFault {
    /// Ordinary error returned from local work.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The task was handed arguments it cannot work with.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Local work panicked (failed assertion, index out of bounds, ...).
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Local work panicked while allocating.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A sub-range could not be shipped to, or answered by, a peer.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// The receiving node has no handler registered for the task type.
    #[error("unknown task type: {0}")]
    UnknownTask(String),
}

impl TaskFault {
    /// Keeps a `TaskFault` that was wrapped into an `anyhow::Error`, otherwise
    /// flattens the error chain into a `Runtime` fault.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<TaskFault>() {
            Ok(fault) => fault,
            Err(other) => TaskFault::Runtime(format!("{:#}", other)),
        }
    }

    /// Classifies a panic payload.
    pub fn from_panic(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("capacity overflow") || lower.contains("memory allocation") {
            TaskFault::OutOfMemory(message)
        } else {
            TaskFault::Assertion(message)
        }
    }
}

/// Errors raised by the store, the chunk codecs and configuration parsing.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("atomic update on {key} gave up after {attempts} attempts")]
    Contention { key: String, attempts: usize },

    #[error("node not found: {0}")]
    NoSuchNode(String),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type FabricResult<T> = std::result::Result<T, FabricError>;
