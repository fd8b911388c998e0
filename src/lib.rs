//! Tether - self-assembling Redis Cluster sidecar.
//!
//! Tether runs next to every Redis node of a cluster and grows the
//! cluster to its desired primary/replica shape without human
//! intervention. A node comes up fresh, tether discovers peers
//! through Consul's service catalog, serialises cluster-shaping
//! operations behind a session-backed KV lock, and drives the cluster
//! toward the operator-declared shape one node at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Control Loop                             │
//! │        observe → decide → lock → re-observe → execute           │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                   │                        │
//! ┌──────────────┐   ┌───────────────┐    ┌───────────────────────┐
//! │ Shape Policy │   │  Leader Lock  │    │   Shaping Executor    │
//! │    (pure)    │   │ (KV + session)│    │ (redis-cli subprocess)│
//! └──────────────┘   └───────────────┘    └───────────────────────┘
//!        │                   │                        │
//! ┌─────────────────────────────────┐    ┌───────────────────────┐
//! │          Consul client          │    │     Redis client      │
//! │  catalog │ KV │ sessions │ mTLS │    │ CLUSTER INFO / NODES  │
//! └─────────────────────────────────┘    └───────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - connection options and validation
//! - [`core::error`] - error taxonomy and retry classification
//! - [`core::node`] - the `<host>:<port>` address type
//!
//! ## Coordination
//! - [`consul::catalog`] - health-filtered service group membership
//! - [`consul::kv`] - KV reads, acquire, and the scaling document
//! - [`consul::session`] - session lifecycle and periodic renewal
//! - [`consul::lock`] - the session-backed leader lock
//!
//! ## Local node
//! - [`redis::client`] - topology queries over the node connection
//! - [`redis::cluster_info`] - classification of the local node
//! - [`redis::cluster_nodes`] - peer partitioning and selection
//! - [`redis::cli`] - the three cluster-shaping verbs
//!
//! ## Control
//! - [`control::policy`] - pure decision table
//! - [`control::driver`] - the periodic control loop
//!
//! ## Operations
//! - [`ops::health`] - the `/clusterinfo/state/ok` endpoint
//!
//! # Key Invariants
//!
//! - At most one sidecar holds the leader lock per KV path; shaping
//!   verbs run only under the lock.
//! - Policy decisions made before acquisition are advisory; the
//!   binding decision is re-made under the lock.
//! - Lock cleanup is best-effort everywhere: the session TTL releases
//!   the lock even when the holder dies without cleaning up.

// Core infrastructure
pub mod core;

// Networking support
pub mod net;

// Consul coordination client
pub mod consul;

// Local Redis node access
pub mod redis;

// Cluster-formation control
pub mod control;

// Operational surfaces
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, node};
pub use consul::{catalog, kv, lock, session};
pub use control::{driver, executor, policy};
pub use ops::health;
