//! Membership & Discovery Module
//!
//! Gossip-based membership (inspired by SWIM) that maintains the cluster view.
//! The fork-join engine and the store never look at raw membership directly:
//! they work against a [`cloud::Cloud`] snapshot: every member not declared
//! dead, sorted by id.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: nodes periodically exchange status updates over UDP.
//! - **Failure Detection**: "Suspect" -> "Dead" transitions driven by timeouts.
//! - **Incarnation Numbers**: resolve disputed Alive/Suspect claims.

pub mod cloud;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
