//! The cluster-formation control loop.
//!
//! Each tick: observe → decide → acquire the lock → re-observe →
//! execute → release. Decisions made before the lock is held are
//! advisory; the binding decision is re-made under the lock, against
//! topology that can no longer change underneath us. The lock is
//! released on every exit path of a tick.
//!
//! Budget accounting: a tick consumes one unit of the attempt budget
//! when progress was *blocked* — the policy said wait, or another
//! sidecar held the lock. Transient failures (Consul unreachable, the
//! local node not answering, a shaping verb exiting non-zero) do not
//! consume budget; they are logged and retried, because the registry
//! settling or a half-applied mutation completing will usually clear
//! them by the next tick.

use crate::consul::catalog::CatalogClient;
use crate::consul::kv::ScalingOpts;
use crate::consul::lock::Lock;
use crate::consul::ConsulClient;
use crate::control::executor::ShapeExecutor;
use crate::control::policy::{decide, Action, ClusterCensus, Observation};
use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use crate::redis::client::NodeClient;
use crate::redis::cluster_info::LocalNodeState;
use crate::redis::cluster_nodes;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Lock TTL: strictly greater than one renewal period (renewal runs
/// at TTL/2), comfortably longer than a tick.
pub const LOCK_TTL: Duration = Duration::from_secs(10);

/// Topology observation seam, so that loop tests can substitute
/// canned cluster views.
#[async_trait]
pub trait Observe: Send + Sync {
    /// Classify the local node from its own cluster-info report.
    async fn local_state(&self) -> LocalNodeState;

    /// Count connected primaries and replicas as seen by `member`.
    async fn census(&self, member: &NodeAddress) -> TetherResult<ClusterCensus>;
}

#[async_trait]
impl Observe for NodeClient {
    async fn local_state(&self) -> LocalNodeState {
        NodeClient::local_state(self).await
    }

    async fn census(&self, member: &NodeAddress) -> TetherResult<ClusterCensus> {
        let peer = self.for_peer(member.clone())?;
        let nodes = peer.cluster_nodes().await?;
        Ok(ClusterCensus {
            primaries: cluster_nodes::primaries(&nodes).len(),
            replicas: cluster_nodes::replicas(&nodes).len(),
        })
    }
}

/// Loop parameters, straight from the flags.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Service group of healthy cluster members.
    pub dest_service: String,
    /// Service group of started-but-unclustered nodes.
    pub await_service: String,
    /// KV path of the leader lock.
    pub lock_path: String,
    /// Tick period.
    pub attempt_interval: Duration,
    /// Blocked ticks tolerated before giving up.
    pub attempt_limit: u32,
}

/// How a control loop run ended (all of these exit 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The node already belonged to a cluster when observed.
    AlreadyMember,
    /// This sidecar executed a shaping verb successfully.
    Joined,
    /// The desired shape was reached without this node mutating
    /// anything.
    ShapeReached,
    /// An interrupt asked the loop to stop.
    Interrupted,
}

/// What one tick concluded.
enum Tick {
    /// Run is over.
    Terminal(Outcome),
    /// Transient trouble; retry without consuming budget.
    Progressing,
    /// Progress blocked waiting on peers (a policy `Wait`); consumes
    /// one budget unit. Lock contention surfaces as
    /// [`TetherError::LeaseContended`] instead.
    Blocked(String),
}

/// Periodic driver tying observation, policy, lock, and executor
/// together.
pub struct ControlLoop {
    config: LoopConfig,
    consul: ConsulClient,
    dest_catalog: CatalogClient,
    await_catalog: CatalogClient,
    observer: Arc<dyn Observe>,
    executor: Arc<dyn ShapeExecutor>,
    shutdown: watch::Receiver<bool>,
}

impl ControlLoop {
    pub fn new(
        config: LoopConfig,
        consul: ConsulClient,
        observer: Arc<dyn Observe>,
        executor: Arc<dyn ShapeExecutor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let dest_catalog = consul.catalog(&config.dest_service);
        let await_catalog = consul.catalog(&config.await_service);
        Self {
            config,
            consul,
            dest_catalog,
            await_catalog,
            observer,
            executor,
            shutdown,
        }
    }

    /// Tick until the node joins, forms, or gives up.
    pub async fn run(&mut self) -> TetherResult<Outcome> {
        let mut ticker = tokio::time::interval(self.config.attempt_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    tracing::info!("interrupted, exiting");
                    return Ok(Outcome::Interrupted);
                }
                _ = ticker.tick() => {}
            }

            let blocked = match self.tick().await {
                Ok(Tick::Terminal(outcome)) => return Ok(outcome),
                Ok(Tick::Progressing) => continue,
                Ok(Tick::Blocked(reason)) => reason,
                Err(err @ TetherError::LeaseContended) => err.to_string(),
                Err(err) => return Err(err),
            };
            attempts += 1;
            if attempts >= self.config.attempt_limit {
                return Err(TetherError::BudgetExhausted { attempts });
            }
            tracing::info!(
                reason = %blocked,
                attempts_remaining = self.config.attempt_limit - attempts,
                "continuing to wait"
            );
        }
    }

    /// One pass of observe → decide → (lock → re-decide → execute).
    ///
    /// `Err` for fatal conditions and for [`TetherError::LeaseContended`]
    /// (which the caller books against the attempt budget); transient
    /// trouble folds into `Tick::Progressing`.
    async fn tick(&mut self) -> TetherResult<Tick> {
        let local_state = self.observer.local_state().await;
        match local_state {
            LocalNodeState::InCluster => {
                tracing::info!("this node is already part of an existing cluster");
                return Ok(Tick::Terminal(Outcome::AlreadyMember));
            }
            LocalNodeState::Unknown => {
                // The local node not answering is transient, not a
                // reason to spend budget.
                return Ok(Tick::Progressing);
            }
            LocalNodeState::Fresh => {}
        }

        let (observation, shape) = match self.observe_with(local_state).await {
            Ok(pair) => pair,
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "observation failed, retrying next tick");
                return Ok(Tick::Progressing);
            }
            Err(err) => return Err(err),
        };

        let advisory = decide(&observation, &shape);
        tracing::debug!(action = ?advisory, "advisory decision");
        match advisory {
            Action::Wait(reason) => {
                tracing::info!(reason = %reason, "waiting");
                return Ok(Tick::Blocked(reason));
            }
            Action::Done => return Ok(Tick::Terminal(Outcome::ShapeReached)),
            _ => {}
        }

        let mut lock = match Lock::new(&self.consul, self.config.lock_path.clone(), LOCK_TTL).await {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!(error = %err, "cannot create lock session, retrying next tick");
                return Ok(Tick::Progressing);
            }
        };

        let acquired = match lock.try_acquire().await {
            Ok(acquired) => acquired,
            Err(err) => {
                lock.cleanup().await;
                tracing::warn!(error = %err, "lock acquire failed, retrying next tick");
                return Ok(Tick::Progressing);
            }
        };
        if !acquired {
            lock.cleanup().await;
            return Err(TetherError::LeaseContended);
        }
        tracing::info!(session_id = %lock.session_id(), "acquired the lock");

        let result = self.execute_under_lock().await;
        lock.cleanup().await;
        result
    }

    /// Re-observe and execute while the lock is held. The decision
    /// made here is the binding one; the pre-lock decision only told
    /// us that locking was worth the trouble.
    async fn execute_under_lock(&self) -> TetherResult<Tick> {
        let (observation, shape) = match self.observe().await {
            Ok(pair) => pair,
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "observation failed under lock, releasing");
                return Ok(Tick::Progressing);
            }
            Err(err) => return Err(err),
        };

        let action = decide(&observation, &shape);
        match action {
            Action::Wait(reason) => {
                tracing::info!(reason = %reason, "world changed under lock, releasing");
                Ok(Tick::Blocked(reason))
            }
            Action::Done => Ok(Tick::Terminal(Outcome::ShapeReached)),
            Action::CreateCluster {
                members,
                replicas_per_primary,
            } => {
                tracing::info!(
                    members = %join(&members),
                    replicas_per_primary,
                    "attempting to create a new cluster"
                );
                match self
                    .executor
                    .create_cluster(&members, replicas_per_primary)
                    .await
                {
                    Ok(()) => {
                        tracing::info!("new cluster created successfully");
                        Ok(Tick::Terminal(Outcome::Joined))
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cluster create failed");
                        Ok(Tick::Progressing)
                    }
                }
            }
            Action::AddPrimary { existing } => {
                tracing::info!(existing = %existing, "attempting to join as a shard primary");
                match self.executor.add_primary(&existing).await {
                    Ok(()) => {
                        tracing::info!("joined as a shard primary");
                        Ok(Tick::Terminal(Outcome::Joined))
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "add primary failed");
                        Ok(Tick::Progressing)
                    }
                }
            }
            Action::AddReplica { existing } => {
                tracing::info!(existing = %existing, "attempting to join as a shard replica");
                match self.executor.add_replica(&existing).await {
                    Ok(()) => {
                        tracing::info!("joined as a shard replica");
                        Ok(Tick::Terminal(Outcome::Joined))
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "add replica failed");
                        Ok(Tick::Progressing)
                    }
                }
            }
        }
    }

    /// Re-observe everything, local state included. Used under the
    /// lock, where the world may have changed since the advisory
    /// decision.
    async fn observe(&self) -> TetherResult<(Observation, ScalingOpts)> {
        let local_state = self.observer.local_state().await;
        self.observe_with(local_state).await
    }

    /// Gather peer lists, the desired shape, and (when a cluster
    /// exists) its census.
    async fn observe_with(
        &self,
        local_state: LocalNodeState,
    ) -> TetherResult<(Observation, ScalingOpts)> {
        let nodes_in_dest = self.dest_catalog.node_addresses(true).await?;
        let nodes_in_await = self.await_catalog.node_addresses(true).await?;
        let shape = self
            .consul
            .kv()
            .scaling_opts(self.dest_catalog.service_name())
            .await?;
        tracing::debug!(
            dest_service = self.dest_catalog.service_name(),
            dest = nodes_in_dest.len(),
            await_service = self.await_catalog.service_name(),
            awaiting = nodes_in_await.len(),
            "observed service groups"
        );

        let census = match nodes_in_dest.first() {
            Some(member) => Some(self.observer.census(member).await?),
            None => None,
        };

        Ok((
            Observation {
                local_state,
                nodes_in_dest,
                nodes_in_await,
                census,
            },
            shape,
        ))
    }
}

fn join(members: &[NodeAddress]) -> String {
    members
        .iter()
        .map(NodeAddress::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve when the shutdown flag flips true. Never resolves if the
/// sender disappears without signalling.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
