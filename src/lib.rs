//! Cluster Fabric Library
//!
//! Core of a distributed in-memory compute node. The binary (`main.rs`) only
//! parses configuration and starts a [`node::ClusterNode`].
//!
//! ## Architecture Modules
//! - **`membership`**: UDP gossip (SWIM-like) and the ordered member list
//!   (`Cloud`) every placement decision is made against.
//! - **`storage`**: typed keys, deterministic home-node placement and the
//!   home-authoritative key-value store with versioned caches.
//! - **`columnar`**: compressed numeric chunks, columns and frames.
//! - **`executor`**: the cluster fork-join task engine.
//! - **`mapreduce`**: per-chunk map and three-level reduce over frames.
//! - **`rpc`**, **`config`**, **`error`**, **`node`**: plumbing shared by the above.

pub mod columnar;
pub mod config;
pub mod error;
pub mod executor;
pub mod mapreduce;
pub mod membership;
pub mod node;
pub mod rpc;
pub mod storage;

#[cfg(test)]
pub mod test_support;
