use super::pool::WorkerPool;
use crate::membership::cloud::Cloud;
use crate::membership::types::NodeId;
use crate::storage::key::Key;
use crate::storage::memory::DistributedStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// A unit of work run over a set of keys on every node that homes some of them.
///
/// The task value is the descriptor: configuration plus a result region.
/// Each branch of the fork-join tree works on its own copy (by `Clone` locally,
/// by serde across nodes). Results travel back as the task value and are
/// combined with [`DistributedTask::reduce`], which must be associative.
#[async_trait]
pub trait DistributedTask: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name the task is registered under on every node.
    const NAME: &'static str;

    /// Called once on each local copy before `local_compute`.
    fn init(&mut self) {}

    /// Real work over `ctx.keys()`, all homed on this node.
    async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()>;

    /// Runs on the local copy after `local_compute` succeeded.
    fn local_on_completion(&mut self, _ctx: &TaskContext) {}

    /// Folds a sibling's result into `self`.
    fn reduce(&mut self, other: Self);
}

/// What local work can see of its node.
pub struct TaskContext {
    keys: Vec<Key>,
    store: Arc<DistributedStore>,
    pool: WorkerPool,
    cloud: Cloud,
    node: NodeId,
    pending: Mutex<Vec<JoinHandle<anyhow::Result<()>>>>,
}

impl TaskContext {
    pub fn new(
        keys: Vec<Key>,
        store: Arc<DistributedStore>,
        pool: WorkerPool,
        cloud: Cloud,
        node: NodeId,
    ) -> Self {
        Self {
            keys,
            store,
            pool,
            cloud,
            node,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn store(&self) -> &Arc<DistributedStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// Registers extra work the task is not done without. The distributing
    /// instance awaits it after folding; an error fails the task.
    pub fn also_block_for(&self, work: JoinHandle<anyhow::Result<()>>) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(work);
    }

    pub(crate) fn take_pending(&self) -> Vec<JoinHandle<anyhow::Result<()>>> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}
