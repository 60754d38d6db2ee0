//! Distributed Key-Value Store
//!
//! A flat key space spread over the cloud.
//!
//! ## Core Concepts
//! - **Keys**: byte strings with a kind tag. Column and chunk keys carry a
//!   group id so that the chunks of one column spread evenly over the nodes.
//! - **Homing**: `partitioner::home_index` maps every key to one node of the
//!   current `Cloud`; that node owns the authoritative copy.
//! - **Caching**: other nodes keep copies of what they touched. The home node
//!   tracks them and invalidates them before a mutation is acknowledged.
//! - **Atomics**: `DistributedStore::atomic_update` is a versioned
//!   compare-and-set loop against the home copy.

pub mod handlers;
pub mod key;
pub mod memory;
pub mod partitioner;
pub mod protocol;
pub mod value;
