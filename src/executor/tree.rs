//! Per-node arena of task instances.
//!
//! One tree is built per distribution step on a node: a root for the
//! instance that received the keys plus one child per dispatched branch.
//! Remote branches continue in the receiving node's own tree.

use super::types::{Branch, TaskState};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub parent: Option<usize>,
    pub branch: Branch,
    pub state: TaskState,
    pub keys: usize,
}

#[derive(Debug, Default)]
pub struct TaskTree {
    nodes: Mutex<Vec<TaskNode>>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskNode>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, parent: Option<usize>, branch: Branch, keys: usize) -> usize {
        let mut nodes = self.lock();
        nodes.push(TaskNode {
            parent,
            branch,
            state: TaskState::Created,
            keys,
        });
        nodes.len() - 1
    }

    pub fn transition(&self, idx: usize, state: TaskState) {
        let mut nodes = self.lock();
        if let Some(node) = nodes.get_mut(idx) {
            tracing::trace!("task[{}] {:?}: {:?} -> {:?}", idx, node.branch, node.state, state);
            node.state = state;
        }
    }

    pub fn state(&self, idx: usize) -> Option<TaskState> {
        self.lock().get(idx).map(|node| node.state)
    }

    pub fn node(&self, idx: usize) -> Option<TaskNode> {
        self.lock().get(idx).cloned()
    }

    pub fn children(&self, idx: usize) -> Vec<usize> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent == Some(idx))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
