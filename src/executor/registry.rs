//! Task Registry
//!
//! Maps task names to the code that rebuilds and runs a shipped task. A node
//! can only serve sub-ranges of task types registered on it.

use super::engine::TaskEngine;
use super::protocol::DTaskResponse;
use super::task::DistributedTask;
use super::tree::TaskTree;
use super::types::DException;
use crate::error::TaskFault;
use crate::storage::key::Key;

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased entry point: decode the task, distribute it over the keys,
/// encode whatever comes out.
pub type TaskEntryFn = Arc<
    dyn Fn(Arc<TaskEngine>, Vec<u8>, Vec<Key>) -> Pin<Box<dyn Future<Output = DTaskResponse> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct TaskRegistry {
    entries: DashMap<String, TaskEntryFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: DistributedTask>(&self) {
        let entry: TaskEntryFn = Arc::new(|engine: Arc<TaskEngine>, bytes: Vec<u8>, keys: Vec<Key>| {
            Box::pin(async move {
                let node = engine.local_id();
                let task: T = match bincode::deserialize(&bytes) {
                    Ok(task) => task,
                    Err(e) => {
                        let fault = TaskFault::Rpc(format!("cannot decode {}: {}", T::NAME, e));
                        return DTaskResponse::failed(DException::distribution(fault, node));
                    }
                };

                let tree = TaskTree::new();
                match engine.distribute(task, keys, &tree).await {
                    Ok(task) => match bincode::serialize(&task) {
                        Ok(bytes) => DTaskResponse::done(bytes),
                        Err(e) => {
                            let fault = TaskFault::Rpc(format!("cannot encode {}: {}", T::NAME, e));
                            DTaskResponse::failed(DException::distribution(fault, node))
                        }
                    },
                    Err(exception) => DTaskResponse::failed(exception),
                }
            }) as Pin<Box<dyn Future<Output = DTaskResponse> + Send>>
        });

        self.entries.insert(T::NAME.to_string(), entry);
        tracing::info!("Registered distributed task: {}", T::NAME);
    }

    pub fn get(&self, name: &str) -> Option<TaskEntryFn> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}
