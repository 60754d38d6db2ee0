use crate::error::TaskFault;
use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

/// Where a recorded fault was raised. Diagnostic only: it is printed with the
/// fault and never changes how a fault is folded or reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FaultOrigin {
    /// Inside `local_compute`, a completion hook or a registered future.
    LocalWork,
    /// While splitting, shipping or decoding a sub-range.
    Distribution,
}

/// Cluster-portable fault carrier.
///
/// Travels inside task responses. Only `fault` reaches the caller of
/// `invoke`; the origin and node stay internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DException {
    pub fault: TaskFault,
    pub origin: FaultOrigin,
    pub node: NodeId,
}

impl DException {
    pub fn local(fault: TaskFault, node: NodeId) -> Self {
        Self {
            fault,
            origin: FaultOrigin::LocalWork,
            node,
        }
    }

    pub fn distribution(fault: TaskFault, node: NodeId) -> Self {
        Self {
            fault,
            origin: FaultOrigin::Distribution,
            node,
        }
    }
}

impl std::fmt::Display for DException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (on {}, {:?})", self.fault, self.node, self.origin)
    }
}

/// Position of a task instance relative to its parent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Branch {
    Root,
    Low,
    High,
    Local,
}

/// Lifecycle of one task instance in the fork-join tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    /// Keys and parameters attached, not yet scheduled.
    Created,
    /// Keys being partitioned into local/low/high.
    Splitting,
    /// Remote sub-calls in flight and/or the local clone running.
    AwaitingChildren,
    /// Children folded, or a fault captured.
    Completed,
    /// Merged into the parent's accumulator.
    Reduced,
    Failed,
}
