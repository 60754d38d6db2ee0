//! Ordered cluster snapshot.
//!
//! A `Cloud` is an immutable list of live members sorted by [`NodeId`]. Every
//! node that observes the same member set computes the same order, which is
//! what makes home-node hashing and bisection splitting coordination free.

use super::types::{Node, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cloud {
    members: Vec<Node>,
}

impl Cloud {
    pub fn new(mut members: Vec<Node>) -> Self {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members.dedup_by(|a, b| a.id == b.id);
        Self { members }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Index of `id` in cloud order.
    pub fn nidx(&self, id: &NodeId) -> Option<usize> {
        self.members.binary_search_by(|n| n.id.cmp(id)).ok()
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.members.get(idx)
    }

    pub fn members(&self) -> &[Node] {
        &self.members
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter().map(|n| &n.id)
    }
}
