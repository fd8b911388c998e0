//! Shape policy: what should this node do next?
//!
//! A pure function from one observation of the world to one action.
//! The control loop applies it twice per mutating tick: once as an
//! advisory check before touching the lock, and once more under the
//! lock, where the re-made decision is the binding one.
//!
//! The table, evaluated top-down, first match wins:
//!
//! | local | dest | await | extra | action |
//! |-------|------|-------|-------|--------|
//! | InCluster | - | - | - | Done |
//! | Unknown | - | - | - | Wait |
//! | Fresh | empty | < total | - | Wait |
//! | Fresh | empty | >= total | replicas_per_primary == 0 | CreateCluster(await[..N], 0) |
//! | Fresh | empty | >= total | - | CreateCluster(await, rpp) |
//! | Fresh | non-empty | - | primaries < N | AddPrimary(dest[0]) |
//! | Fresh | non-empty | - | replicas < R | AddReplica(dest[0]) |
//! | Fresh | non-empty | - | - | Done |

use crate::consul::kv::ScalingOpts;
use crate::core::node::NodeAddress;
use crate::redis::cluster_info::LocalNodeState;

/// Primary/replica counts of an existing cluster, taken from any live
/// member's `CLUSTER NODES` view (connected rows only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterCensus {
    pub primaries: usize,
    pub replicas: usize,
}

/// One tick's view of the world.
#[derive(Debug, Clone)]
pub struct Observation {
    /// What the local node reports about itself.
    pub local_state: LocalNodeState,
    /// Healthy members of the destination group.
    pub nodes_in_dest: Vec<NodeAddress>,
    /// Healthy members of the await group.
    pub nodes_in_await: Vec<NodeAddress>,
    /// Census of the existing cluster; populated whenever
    /// `nodes_in_dest` is non-empty and a member answered.
    pub census: Option<ClusterCensus>,
}

/// The next step for this sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do yet; re-observe on the next tick.
    Wait(String),
    /// Form a brand-new cluster from the given members.
    CreateCluster {
        members: Vec<NodeAddress>,
        replicas_per_primary: u32,
    },
    /// Join the cluster containing `existing` as a new primary.
    AddPrimary { existing: NodeAddress },
    /// Join the cluster containing `existing` as a new replica.
    AddReplica { existing: NodeAddress },
    /// The desired shape is reached (or this node already belongs to
    /// a cluster); terminate successfully.
    Done,
}

impl Action {
    /// Whether executing this action mutates cluster topology and so
    /// requires the leader lock.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::CreateCluster { .. } | Action::AddPrimary { .. } | Action::AddReplica { .. }
        )
    }
}

/// Decide the next action from an observation and the desired shape.
pub fn decide(observation: &Observation, shape: &ScalingOpts) -> Action {
    match observation.local_state {
        LocalNodeState::InCluster => return Action::Done,
        LocalNodeState::Unknown => return Action::Wait("local state unknown".to_string()),
        LocalNodeState::Fresh => {}
    }

    if observation.nodes_in_dest.is_empty() {
        let missing = shape.nodes_missing(observation.nodes_in_await.len());
        if missing > 0 {
            return Action::Wait(format!("need {missing} more nodes in await"));
        }

        let replicas_per_primary = shape.replicas_per_primary();
        let members = if replicas_per_primary == 0 {
            // Too few replicas to hand one to every primary: create a
            // primary-only cluster from the first N awaiting nodes.
            // Leftover nodes re-enter the loop and attach themselves
            // as replicas once the cluster exists.
            observation.nodes_in_await[..shape.primary_count as usize].to_vec()
        } else {
            observation.nodes_in_await.clone()
        };
        return Action::CreateCluster {
            members,
            replicas_per_primary,
        };
    }

    // An existing cluster: grow it toward the desired shape.
    let existing = observation.nodes_in_dest[0].clone();
    let Some(census) = observation.census else {
        return Action::Wait("cluster topology unavailable".to_string());
    };
    if census.primaries < shape.primary_count as usize {
        Action::AddPrimary { existing }
    } else if census.replicas < shape.replica_count as usize {
        Action::AddReplica { existing }
    } else {
        Action::Done
    }
}
