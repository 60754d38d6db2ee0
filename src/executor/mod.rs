//! Distributed Fork-Join Task Engine
//!
//! Turns one logical operation over a set of keys into a tree of remote and
//! local task instances.
//!
//! ## Architecture Overview
//! 1. **Splitting**: `split` buckets the keys into local / low / high by
//!    home-node index, bisecting at the midpoint of the index range.
//! 2. **Dispatch**: low and high buckets are shipped to the home of their first
//!    key, where the same step repeats until every key is local somewhere.
//! 3. **Local work**: the local bucket runs `DistributedTask::local_compute`
//!    on a copy of the task; CPU-bound pieces go through the `WorkerPool`.
//! 4. **Folding**: results fold low -> high -> local with
//!    `DistributedTask::reduce`. A captured fault beats any result.
//!
//! ## Submodules
//! - **`engine`**: `TaskEngine` (invoke, dfork, invoke_on_all_nodes).
//! - **`split`**: the pure bucketing function.
//! - **`tree`**: per-node arena recording instance states.
//! - **`task`**: the `DistributedTask` trait and `TaskContext`.
//! - **`pool`**: bounded blocking workers.
//! - **`registry`**: task names to entry points for shipped sub-ranges.
//! - **`protocol`** / **`handlers`**: the task envelope and its endpoint.

pub mod engine;
pub mod handlers;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod split;
pub mod task;
pub mod tree;
pub mod types;

#[cfg(test)]
mod tests;
