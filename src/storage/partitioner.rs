//! Home-node mapping.
//!
//! Maps every key to exactly one member of a [`Cloud`] without coordination:
//! the mapping is a pure function of the key bytes and the cloud order.

use super::key::{Key, KeyKind};
use crate::membership::cloud::Cloud;
use crate::membership::{service::MembershipService, types::Node};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Index of the home node of `key` in `cloud`. Returns 0 for an empty cloud.
pub fn home_index(key: &Key, cloud: &Cloud) -> usize {
    let n = cloud.size();
    if n == 0 {
        return 0;
    }
    match key.kind() {
        KeyKind::Pinned => match key.pinned_node().and_then(|id| cloud.nidx(&id)) {
            Some(idx) => idx,
            None => (hash_bytes(key.bytes()) % n as u64) as usize,
        },
        // Chunks of one group walk round-robin over the cloud from the group's start.
        KeyKind::Chunk => {
            let group = key.group().unwrap_or_default();
            let cidx = key.chunk_index().unwrap_or_default() as u64;
            (group.wrapping_add(cidx) % n as u64) as usize
        }
        KeyKind::Column => (key.group().unwrap_or_default() % n as u64) as usize,
        KeyKind::User | KeyKind::Array => (hash_bytes(key.bytes()) % n as u64) as usize,
    }
}

/// Resolves homes against the live membership view.
pub struct PartitionManager {
    membership: Arc<MembershipService>,
}

impl PartitionManager {
    pub fn new(membership: Arc<MembershipService>) -> Arc<Self> {
        Arc::new(Self { membership })
    }

    pub fn cloud(&self) -> Cloud {
        self.membership.cloud()
    }

    pub fn home_node(&self, key: &Key) -> Option<Node> {
        let cloud = self.cloud();
        cloud.node(home_index(key, &cloud)).cloned()
    }

    pub fn is_home(&self, key: &Key) -> bool {
        match self.home_node(key) {
            Some(node) => node.id == self.membership.local_node.id,
            // No view of the cluster: this node is all there is.
            None => true,
        }
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }
}
