use super::key::Key;
use super::partitioner::PartitionManager;
use super::protocol::*;
use super::value::Value;
use crate::error::FabricError;
use crate::membership::{service::MembershipService, types::NodeId};
use crate::rpc::RpcClient;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on compare-and-set rounds before an atomic update gives up.
pub const MAX_ATOMIC_ATTEMPTS: usize = 10_000;

/// Bound on remembered op ids and stale floors; the oldest half is evicted
/// once it is reached.
pub const MAX_TRACKED_OPS: usize = 10_000;

/// The cluster key-value store.
///
/// Every key has one home node (see [`PartitionManager`]) holding the
/// authoritative copy. Other nodes cache what they read; the home node
/// remembers the readers and invalidates them before acknowledging a mutation.
pub struct DistributedStore {
    local_data: DashMap<Key, Value>,
    /// Home-side record of nodes holding a cached copy, with the version each
    /// was served.
    cached_at: DashMap<Key, HashMap<NodeId, u64>>,
    /// Cache-side floor: copies older than this version were invalidated.
    /// Values are `(floor, seq)`.
    stale_below: DashMap<Key, (u64, u64)>,
    /// `op_id -> (committed version, seq)`, for dropping retried writes.
    processed_ops: DashMap<String, (u64, u64)>,
    /// Insertion counter for the bounded tables above.
    seq: AtomicU64,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    rpc: RpcClient,
}

impl DistributedStore {
    pub fn new(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        rpc: RpcClient,
    ) -> Self {
        Self {
            local_data: DashMap::new(),
            cached_at: DashMap::new(),
            stale_below: DashMap::new(),
            processed_ops: DashMap::new(),
            seq: AtomicU64::new(0),
            membership,
            partitioner,
            rpc,
        }
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    pub fn partitioner(&self) -> &Arc<PartitionManager> {
        &self.partitioner
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_data.len()
    }

    fn is_local(&self, id: &NodeId) -> bool {
        id == &self.membership.local_node.id
    }

    fn seen_op(&self, op_id: &str) -> Option<u64> {
        self.processed_ops.get(op_id).map(|entry| entry.value().0)
    }

    fn record_op(&self, op_id: &str, version: u64) {
        let seq = self.next_seq();
        if self.processed_ops.len() >= MAX_TRACKED_OPS {
            self.processed_ops.retain(|_, (_, at)| recent(*at, seq));
        }
        self.processed_ops.insert(op_id.to_string(), (version, seq));
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Value held on this node, authoritative or cached. Never goes remote.
    pub fn get_local(&self, key: &Key) -> Option<Value> {
        self.local_data.get(key).map(|entry| entry.value().clone())
    }

    /// Current value of `key`, fetching it from the home node if needed.
    pub async fn get(&self, key: &Key) -> Result<Option<Value>> {
        if let Some(value) = self.get_local(key) {
            return Ok(Some(value));
        }
        let Some(home) = self.partitioner.home_node(key) else {
            return Ok(None);
        };
        if self.is_local(&home.id) {
            return Ok(None);
        }

        let value = self.fetch_remote(&home.id, key, true).await?;
        if let Some(value) = &value {
            self.cache_copy(key, value);
        }
        Ok(value)
    }

    fn cache_copy(&self, key: &Key, value: &Value) {
        let floor = self.stale_below.get(key).map(|entry| entry.value().0).unwrap_or(0);
        if value.version() < floor {
            tracing::trace!("GET {}: dropping stale copy v{} (floor v{})", key, value.version(), floor);
            return;
        }
        tracing::debug!("GET {}: cached copy v{}", key, value.version());
        self.local_data.insert(key.clone(), value.clone());
    }

    async fn fetch_remote(&self, owner: &NodeId, key: &Key, cache: bool) -> Result<Option<Value>> {
        let node = self
            .membership
            .get_member(owner)
            .ok_or_else(|| FabricError::NoSuchNode(owner.0.clone()))?;

        let resp: GetResponse = self
            .rpc
            .call(
                node.http_addr,
                ENDPOINT_DKV_GET,
                &GetRequest {
                    key: key.clone(),
                    requester: self.local_node_id(),
                    cache,
                },
            )
            .await?;

        Ok(resp.value.map(|v| Value::new(v.bytes, v.version)))
    }

    /// Home-side read on behalf of `requester`.
    ///
    /// The read and the holder registration happen under the key's holder
    /// lock, so a commit either sees the requester with the version it was
    /// served or commits before the read.
    pub fn serve_get(&self, key: &Key, requester: &NodeId, cache: bool) -> Option<Value> {
        if !cache || self.is_local(requester) {
            return self.get_local(key);
        }
        let value = {
            let mut holders = self.cached_at.entry(key.clone()).or_default();
            let value = self.get_local(key);
            match &value {
                Some(v) => holders.insert(requester.clone(), v.version()),
                None => holders.remove(requester),
            };
            value
        };
        self.cached_at.remove_if(key, |_, holders| holders.is_empty());
        value
    }

    /// Stores `bytes` under `key`; returns the committed version.
    pub async fn put(&self, key: Key, bytes: Vec<u8>) -> Result<u64> {
        let op_id = Uuid::new_v4().to_string();
        let origin = self.local_node_id();

        match self.partitioner.home_node(&key) {
            Some(home) if home.id != origin => {
                let resp: PutResponse = self
                    .rpc
                    .call(
                        home.http_addr,
                        ENDPOINT_DKV_PUT,
                        &PutRequest {
                            op_id,
                            key: key.clone(),
                            bytes,
                            origin,
                        },
                    )
                    .await?;
                tracing::debug!("PUT {}: forwarded to {} (v{})", key, home.id, resp.version);
                self.drop_copy(&key, resp.version);
                Ok(resp.version)
            }
            _ => Ok(self.store_as_home(&op_id, key, bytes, &origin).await),
        }
    }

    /// Unconditional write at the home node.
    pub async fn store_as_home(&self, op_id: &str, key: Key, bytes: Vec<u8>, origin: &NodeId) -> u64 {
        if let Some(version) = self.seen_op(op_id) {
            return version;
        }
        let version = match self.local_data.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let version = entry.get().version() + 1;
                entry.insert(Value::new(bytes, version));
                version
            }
            Entry::Vacant(entry) => {
                entry.insert(Value::new(bytes, 1));
                1
            }
        };
        self.record_op(op_id, version);
        tracing::trace!("PUT {}: v{} committed for {}", key, version, origin);
        self.invalidate_holders(&key, version).await;
        version
    }

    /// Applies `f` to the current bytes of `key` and commits the result.
    ///
    /// `f` sees `None` when the key is absent and may return `None` to leave the
    /// value untouched. It can run several times under contention, so it must be
    /// a pure function of its input. Returns the value left in place.
    pub async fn atomic_update<F>(&self, key: &Key, f: F) -> Result<Option<Value>>
    where
        F: Fn(Option<&[u8]>) -> Option<Vec<u8>>,
    {
        let origin = self.local_node_id();

        for attempt in 0..MAX_ATOMIC_ATTEMPTS {
            let remote_home = self
                .partitioner
                .home_node(key)
                .filter(|node| node.id != origin);

            let current = match &remote_home {
                Some(node) => self.fetch_remote(&node.id, key, false).await?,
                None => self.get_local(key),
            };
            let expected = current.as_ref().map(Value::version).unwrap_or(0);
            let Some(bytes) = f(current.as_ref().map(Value::bytes)) else {
                return Ok(current);
            };

            let op_id = Uuid::new_v4().to_string();
            let committed = match &remote_home {
                Some(node) => {
                    let resp: CasResponse = self
                        .rpc
                        .call(
                            node.http_addr,
                            ENDPOINT_DKV_CAS,
                            &CasRequest {
                                op_id,
                                key: key.clone(),
                                expected_version: expected,
                                bytes: bytes.clone(),
                                origin: origin.clone(),
                            },
                        )
                        .await?;
                    resp.committed.then_some(resp.version)
                }
                None => {
                    self.compare_and_set(&op_id, key, expected, bytes.clone(), &origin)
                        .await
                }
            };

            if let Some(version) = committed {
                if remote_home.is_some() {
                    self.drop_copy(key, version);
                }
                return Ok(Some(Value::new(bytes, version)));
            }

            tracing::trace!("Atomic update on {} lost race (attempt {})", key, attempt + 1);
            if remote_home.is_some() {
                let jitter = rand::random::<u64>() % 5;
                tokio::time::sleep(Duration::from_millis(1 + jitter)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        Err(FabricError::Contention {
            key: key.to_string(),
            attempts: MAX_ATOMIC_ATTEMPTS,
        }
        .into())
    }

    /// Home-side compare-and-set. Returns the new version when committed.
    pub async fn compare_and_set(
        &self,
        op_id: &str,
        key: &Key,
        expected: u64,
        bytes: Vec<u8>,
        origin: &NodeId,
    ) -> Option<u64> {
        if let Some(version) = self.seen_op(op_id) {
            return Some(version);
        }
        let committed = match self.local_data.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().version() == expected => {
                let version = expected + 1;
                entry.insert(Value::new(bytes, version));
                Some(version)
            }
            Entry::Vacant(entry) if expected == 0 => {
                entry.insert(Value::new(bytes, 1));
                Some(1)
            }
            _ => None,
        };
        if let Some(version) = committed {
            self.record_op(op_id, version);
            tracing::trace!("CAS {}: v{} committed for {}", key, version, origin);
            self.invalidate_holders(key, version).await;
        }
        committed
    }

    /// Deletes `key` locally and at its home node.
    pub async fn remove(&self, key: &Key) -> Result<()> {
        self.local_data.remove(key);
        let origin = self.local_node_id();

        match self.partitioner.home_node(key) {
            Some(home) if home.id != origin => {
                let _: Ack = self
                    .rpc
                    .call(
                        home.http_addr,
                        ENDPOINT_DKV_REMOVE,
                        &RemoveRequest {
                            op_id: Uuid::new_v4().to_string(),
                            key: key.clone(),
                            origin,
                        },
                    )
                    .await?;
            }
            _ => self.remove_as_home(key).await,
        }
        Ok(())
    }

    pub async fn remove_as_home(&self, key: &Key) {
        self.local_data.remove(key);
        self.invalidate_holders(key, 0).await;
    }

    /// Drops a cached copy made stale by `version` (0 for a removal).
    /// Called by the home node.
    pub fn invalidate(&self, key: &Key, version: u64) {
        if self.partitioner.is_home(key) {
            return;
        }
        self.drop_copy(key, version);
    }

    fn drop_copy(&self, key: &Key, version: u64) {
        if version > 0 {
            let seq = self.next_seq();
            if self.stale_below.len() >= MAX_TRACKED_OPS {
                self.stale_below.retain(|_, (_, at)| recent(*at, seq));
            }
            let mut floor = self.stale_below.entry(key.clone()).or_insert((0, seq));
            *floor = (floor.0.max(version), seq);
        }
        self.local_data
            .remove_if(key, |_, cached| version == 0 || cached.version() < version);
    }

    /// Invalidates every holder served a version older than `version` (all of
    /// them for a removal). Holders already served `version` stay registered.
    async fn invalidate_holders(&self, key: &Key, version: u64) {
        let mut stale = Vec::new();
        if let Some(mut holders) = self.cached_at.get_mut(key) {
            holders.retain(|holder, served| {
                let current = version > 0 && *served >= version;
                if !current {
                    stale.push(holder.clone());
                }
                current
            });
        }
        self.cached_at.remove_if(key, |_, holders| holders.is_empty());

        for holder in stale.iter() {
            let Some(node) = self.membership.get_member(holder) else {
                continue;
            };
            let result: Result<Ack> = self
                .rpc
                .call(
                    node.http_addr,
                    ENDPOINT_DKV_INVALIDATE,
                    &InvalidateRequest {
                        key: key.clone(),
                        version,
                    },
                )
                .await;
            if let Err(e) = result {
                tracing::warn!("Failed to invalidate {} on {}: {}", key, holder, e);
            }
        }
    }

    /// Stores a list of child keys under an array key.
    pub async fn put_array(&self, key: Key, children: &[Key]) -> Result<u64> {
        self.put(key, Value::encode(&children.to_vec())?).await
    }

    pub async fn get_array(&self, key: &Key) -> Result<Option<Vec<Key>>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(value.inflate()?)),
            None => Ok(None),
        }
    }
}

/// Entries stamped within the newest half of the tracking window.
fn recent(at: u64, now: u64) -> bool {
    now.saturating_sub(at) < (MAX_TRACKED_OPS / 2) as u64
}
