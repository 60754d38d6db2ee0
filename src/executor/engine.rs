//! Fork-join task engine.
//!
//! `distribute` is one step of the cluster-wide divide and conquer: split the
//! keys by home index, ship the low and high buckets to peers (each repeats
//! the step on arrival), run the local bucket in-process, then fold
//! low -> high -> local. The first fault found while folding wins and the
//! remaining results are dropped.

use super::pool::{fault_from_join, WorkerPool};
use super::protocol::{DTaskRequest, DTaskResponse, ENDPOINT_DTASK};
use super::registry::TaskRegistry;
use super::split::split;
use super::task::{DistributedTask, TaskContext};
use super::tree::TaskTree;
use super::types::{Branch, DException, TaskState};
use crate::error::TaskFault;
use crate::membership::cloud::Cloud;
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::rpc::RpcClient;
use crate::storage::key::Key;
use crate::storage::memory::DistributedStore;

use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

type LocalOutcome<T> = Result<(T, Vec<JoinHandle<anyhow::Result<()>>>), DException>;

pub struct TaskEngine {
    membership: Arc<MembershipService>,
    store: Arc<DistributedStore>,
    pool: WorkerPool,
    registry: TaskRegistry,
    rpc: RpcClient,
}

/// Result of [`TaskEngine::dfork`].
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T, TaskFault>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until every node's contribution is folded in.
    pub async fn get(self) -> Result<T, TaskFault> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(fault_from_join(e)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl TaskEngine {
    pub fn new(
        membership: Arc<MembershipService>,
        store: Arc<DistributedStore>,
        pool: WorkerPool,
        rpc: RpcClient,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            store,
            pool,
            registry: TaskRegistry::new(),
            rpc,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    pub fn store(&self) -> &Arc<DistributedStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Makes this node able to serve sub-ranges of `T`.
    pub fn register<T: DistributedTask>(&self) {
        self.registry.register::<T>();
    }

    /// Runs `task` over `keys` across the cluster and returns the folded result
    /// or the fault raised by the originating local work.
    ///
    /// A single array key is replaced by the child keys it stores.
    pub async fn invoke<T: DistributedTask>(self: &Arc<Self>, task: T, keys: &[Key]) -> Result<T, TaskFault> {
        let keys = self.flatten(keys).await?;
        let tree = TaskTree::new();
        let result = self.distribute(task, keys, &tree).await;
        tracing::debug!("{} finished ({} task instances on this node)", T::NAME, tree.len());
        result.map_err(|exception| {
            tracing::warn!("{} failed: {}", T::NAME, exception);
            exception.fault
        })
    }

    /// Starts `invoke` in the background.
    pub fn dfork<T: DistributedTask>(self: &Arc<Self>, task: T, keys: Vec<Key>) -> TaskHandle<T> {
        let engine = self.clone();
        TaskHandle {
            inner: tokio::spawn(async move { engine.invoke(task, &keys).await }),
        }
    }

    /// Runs `task` with one synthetic key pinned to each member, so every node
    /// does local work exactly once. The keys are never stored.
    pub async fn invoke_on_all_nodes<T: DistributedTask>(self: &Arc<Self>, task: T) -> Result<T, TaskFault> {
        let name = format!("RunOnAll__{}", Uuid::new_v4());
        let keys: Vec<Key> = self
            .membership
            .cloud()
            .ids()
            .map(|id| Key::pinned(&name, id))
            .collect();
        self.invoke(task, &keys).await
    }

    async fn flatten(&self, keys: &[Key]) -> Result<Vec<Key>, TaskFault> {
        let arrays = keys.iter().filter(|k| k.is_array()).count();
        if arrays == 0 {
            return Ok(keys.to_vec());
        }
        if keys.len() > 1 {
            return Err(TaskFault::IllegalArgument(
                "an array key cannot be mixed with other keys".to_string(),
            ));
        }
        match self.store.get_array(&keys[0]).await {
            Ok(Some(children)) => Ok(children),
            Ok(None) => Err(TaskFault::IllegalArgument(format!(
                "array key {} has no value",
                keys[0]
            ))),
            Err(e) => Err(TaskFault::from_anyhow(e)),
        }
    }

    /// One distribution step on this node. `tree` records every instance this
    /// step creates.
    pub async fn distribute<T: DistributedTask>(
        self: &Arc<Self>,
        task: T,
        keys: Vec<Key>,
        tree: &TaskTree,
    ) -> Result<T, DException> {
        let root = tree.add(None, Branch::Root, keys.len());
        tree.transition(root, TaskState::Splitting);

        let cloud = self.membership.cloud();
        let self_idx = cloud.nidx(&self.membership.local_node.id);
        let buckets = split(&keys, &cloud, self_idx);
        tracing::debug!(
            "{} over {} keys: local={} low={} high={}",
            T::NAME,
            keys.len(),
            buckets.local.len(),
            buckets.low.len(),
            buckets.high.len()
        );
        drop(keys);

        tree.transition(root, TaskState::AwaitingChildren);
        let low = self.spawn_remote(tree, root, Branch::Low, &task, buckets.low, &cloud);
        let high = self.spawn_remote(tree, root, Branch::High, &task, buckets.high, &cloud);
        let local = self.spawn_local(tree, root, &task, buckets.local, cloud);

        // Every branch is awaited before folding so the tree always drains.
        let low = match low {
            Some((idx, handle)) => Some((idx, self.join_branch(handle).await)),
            None => None,
        };
        let high = match high {
            Some((idx, handle)) => Some((idx, self.join_branch(handle).await)),
            None => None,
        };
        let local = match local {
            Some((idx, handle)) => Some((idx, self.join_branch(handle).await)),
            None => None,
        };

        let mut acc: Option<T> = None;
        let mut fault: Option<DException> = None;
        let mut pending = Vec::new();

        let remote_results = [low, high]
            .into_iter()
            .flatten()
            .map(|(idx, result)| (idx, result.map(|task| (task, Vec::new()))));
        for (idx, result) in remote_results.chain(local) {
            match result {
                Err(exception) => {
                    tree.transition(idx, TaskState::Failed);
                    if fault.is_none() {
                        fault = Some(exception);
                    }
                }
                Ok((_, _)) if fault.is_some() => tree.transition(idx, TaskState::Completed),
                Ok((value, futures)) => {
                    pending.extend(futures);
                    match acc.as_mut() {
                        Some(folded) => folded.reduce(value),
                        None => acc = Some(value),
                    }
                    tree.transition(idx, TaskState::Reduced);
                }
            }
        }

        if fault.is_none() {
            fault = self.drain(pending).await;
        } else if !pending.is_empty() {
            tracing::debug!("Leaving {} registered futures undrained after a fault", pending.len());
        }

        match fault {
            Some(exception) => {
                tree.transition(root, TaskState::Failed);
                Err(exception)
            }
            None => {
                tree.transition(root, TaskState::Completed);
                Ok(acc.unwrap_or(task))
            }
        }
    }

    async fn join_branch<R>(&self, handle: JoinHandle<Result<R, DException>>) -> Result<R, DException> {
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(DException::distribution(fault_from_join(e), self.local_id())),
        }
    }

    fn spawn_remote<T: DistributedTask>(
        self: &Arc<Self>,
        tree: &TaskTree,
        parent: usize,
        branch: Branch,
        task: &T,
        keys: Vec<Key>,
        cloud: &Cloud,
    ) -> Option<(usize, JoinHandle<Result<T, DException>>)> {
        if keys.is_empty() {
            return None;
        }
        let idx = tree.add(Some(parent), branch, keys.len());
        tree.transition(idx, TaskState::AwaitingChildren);

        let engine = self.clone();
        let task = task.clone();
        let target = cloud.node(keys[0].home(cloud)).map(|node| node.http_addr);
        Some((
            idx,
            tokio::spawn(async move { engine.remote_compute(task, keys, target).await }),
        ))
    }

    async fn remote_compute<T: DistributedTask>(
        &self,
        task: T,
        keys: Vec<Key>,
        target: Option<std::net::SocketAddr>,
    ) -> Result<T, DException> {
        let node = self.local_id();
        let rpc_fault = |msg: String| DException::distribution(TaskFault::Rpc(msg), node.clone());

        let addr = target.ok_or_else(|| rpc_fault(format!("no home node for {}", keys[0])))?;
        let request = DTaskRequest {
            task_name: T::NAME.to_string(),
            task: bincode::serialize(&task).map_err(|e| rpc_fault(e.to_string()))?,
            keys,
        };
        tracing::debug!("Shipping {} keys of {} to {}", request.keys.len(), T::NAME, addr);

        let response: DTaskResponse = self
            .rpc
            .call_unbounded(addr, ENDPOINT_DTASK, &request)
            .await
            .map_err(|e| rpc_fault(format!("{:#}", e)))?;

        if let Some(exception) = response.exception {
            return Err(exception);
        }
        let bytes = response
            .task
            .ok_or_else(|| rpc_fault(format!("{} answered with neither result nor fault", addr)))?;
        bincode::deserialize(&bytes).map_err(|e| rpc_fault(e.to_string()))
    }

    fn spawn_local<T: DistributedTask>(
        self: &Arc<Self>,
        tree: &TaskTree,
        parent: usize,
        task: &T,
        keys: Vec<Key>,
        cloud: Cloud,
    ) -> Option<(usize, JoinHandle<LocalOutcome<T>>)> {
        if keys.is_empty() {
            return None;
        }
        let idx = tree.add(Some(parent), Branch::Local, keys.len());
        tree.transition(idx, TaskState::AwaitingChildren);

        let node = self.local_id();
        let ctx = TaskContext::new(keys, self.store.clone(), self.pool.clone(), cloud, node.clone());
        let mut task = task.clone();

        Some((
            idx,
            tokio::spawn(async move {
                // Panics surface as a JoinError of the inner task.
                let work = tokio::spawn(async move {
                    task.init();
                    let result = task.local_compute(&ctx).await;
                    if result.is_ok() {
                        task.local_on_completion(&ctx);
                    }
                    (task, ctx, result)
                });
                match work.await {
                    Ok((task, ctx, Ok(()))) => Ok((task, ctx.take_pending())),
                    Ok((_, _, Err(e))) => Err(DException::local(TaskFault::from_anyhow(e), node)),
                    Err(e) => Err(DException::local(fault_from_join(e), node)),
                }
            }),
        ))
    }

    async fn drain(&self, pending: Vec<JoinHandle<anyhow::Result<()>>>) -> Option<DException> {
        let mut fault = None;
        for handle in pending {
            let outcome = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => TaskFault::from_anyhow(e),
                Err(e) => fault_from_join(e),
            };
            if fault.is_none() {
                fault = Some(DException::local(outcome, self.local_id()));
            }
        }
        fault
    }

    /// Serves a sub-range shipped by a peer.
    pub async fn serve_remote(self: &Arc<Self>, request: DTaskRequest) -> DTaskResponse {
        match self.registry.get(&request.task_name) {
            Some(entry) => entry(self.clone(), request.task, request.keys).await,
            None => {
                tracing::error!("No task registered as {}", request.task_name);
                DTaskResponse::failed(DException::distribution(
                    TaskFault::UnknownTask(request.task_name),
                    self.local_id(),
                ))
            }
        }
    }
}
