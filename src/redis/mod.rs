//! Redis node access.
//!
//! - [`client`] - async client for topology queries (read-only)
//! - [`cluster_info`] - `CLUSTER INFO` parsing and the Fresh fingerprint
//! - [`cluster_nodes`] - `CLUSTER NODES` parsing and primary selection
//! - [`cli`] - `redis-cli` subprocess adapter for the shaping verbs

pub mod cli;
pub mod client;
pub mod cluster_info;
pub mod cluster_nodes;
