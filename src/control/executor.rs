//! The shaping executor seam.
//!
//! The executor is the only component permitted to mutate cluster
//! topology, and it is only ever invoked while the leader lock is
//! held. Production uses the `redis-cli` subprocess adapter in
//! [`crate::redis::cli`]; tests substitute an in-memory fake.

use crate::core::error::TetherResult;
use crate::core::node::NodeAddress;
use async_trait::async_trait;

/// The three cluster-shaping verbs.
#[async_trait]
pub trait ShapeExecutor: Send + Sync {
    /// Form a new cluster from `members`, assigning
    /// `replicas_per_primary` replicas to each primary.
    async fn create_cluster(
        &self,
        members: &[NodeAddress],
        replicas_per_primary: u32,
    ) -> TetherResult<()>;

    /// Introduce the local node to the cluster containing `existing`
    /// as a new primary, then rebalance slots onto it.
    async fn add_primary(&self, existing: &NodeAddress) -> TetherResult<()>;

    /// Attach the local node as a replica of the primary with the
    /// fewest replicas in the cluster containing `existing`.
    async fn add_replica(&self, existing: &NodeAddress) -> TetherResult<()>;
}
