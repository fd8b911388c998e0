//! Control loop scenarios: cold start, partial start, growth,
//! contention, and budget accounting.
//!
//! Sidecars run as real `ControlLoop`s against the fake Consul from
//! `common`, with a simulated cluster standing in for the Redis
//! topology and the shaping executor. The executor records overlap so
//! the suite can assert that no two sidecars ever mutate topology at
//! the same time.

mod common;

use async_trait::async_trait;
use common::FakeConsul;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether::control::driver::{ControlLoop, LoopConfig, Observe, Outcome};
use tether::control::executor::ShapeExecutor;
use tether::control::policy::ClusterCensus;
use tether::core::node::NodeAddress;
use tether::error::{TetherError, TetherResult};
use tether::redis::cluster_info::LocalNodeState;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DEST: &str = "redis-cluster";
const AWAIT: &str = "redis-await";
const TICK: Duration = Duration::from_millis(25);

/// The simulated cluster every sidecar observes and mutates.
#[derive(Debug, Default)]
struct SimCluster {
    members: BTreeSet<NodeAddress>,
    primaries: usize,
    replicas: usize,
    /// Set while a shaping verb is in flight.
    executing: bool,
    /// Flipped if a second verb ever starts while one is in flight.
    overlap: bool,
    create_calls: Vec<(Vec<NodeAddress>, u32)>,
    add_replica_calls: usize,
}

struct SimWorld {
    consul: FakeConsul,
    cluster: Arc<Mutex<SimCluster>>,
}

impl SimWorld {
    async fn new(primary_count: u32, replica_count: u32) -> Self {
        let consul = FakeConsul::start().await;
        consul.set_scaling(DEST, primary_count, replica_count);
        consul.set_service(DEST, &[]);
        Self {
            consul,
            cluster: Arc::default(),
        }
    }

    /// Put fresh nodes into the await group.
    fn seed_await(&self, addrs: &[NodeAddress]) {
        let members: Vec<(&str, u16, bool)> = addrs
            .iter()
            .map(|addr| (addr.host.as_str(), addr.port, true))
            .collect();
        self.consul.set_service(AWAIT, &members);
    }

    /// Seed an existing cluster: members in the destination group and
    /// matching census counts.
    fn seed_cluster(&self, primaries: &[NodeAddress], replicas: &[NodeAddress]) {
        let members: Vec<(&str, u16, bool)> = primaries
            .iter()
            .chain(replicas)
            .map(|addr| (addr.host.as_str(), addr.port, true))
            .collect();
        self.consul.set_service(DEST, &members);

        let mut cluster = self.cluster.lock().unwrap();
        cluster.members.extend(primaries.iter().cloned());
        cluster.members.extend(replicas.iter().cloned());
        cluster.primaries = primaries.len();
        cluster.replicas = replicas.len();
    }

    fn spawn_sidecar(
        &self,
        addr: &NodeAddress,
        attempt_limit: u32,
    ) -> (JoinHandle<TetherResult<Outcome>>, watch::Sender<bool>) {
        let executor = Arc::new(SimExecutor {
            addr: addr.clone(),
            cluster: self.cluster.clone(),
            consul: self.consul.state.clone(),
            fail_remaining: AtomicU32::new(0),
        });
        self.spawn_sidecar_with(addr, attempt_limit, executor)
    }

    fn spawn_sidecar_with(
        &self,
        addr: &NodeAddress,
        attempt_limit: u32,
        executor: Arc<SimExecutor>,
    ) -> (JoinHandle<TetherResult<Outcome>>, watch::Sender<bool>) {
        let config = LoopConfig {
            dest_service: DEST.to_string(),
            await_service: AWAIT.to_string(),
            lock_path: "service/tether/leader".to_string(),
            attempt_interval: TICK,
            attempt_limit,
        };
        let observer = Arc::new(SimObserver {
            addr: addr.clone(),
            cluster: self.cluster.clone(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut control_loop = ControlLoop::new(
            config,
            self.consul.client(),
            observer,
            executor,
            shutdown_rx,
        );
        (
            tokio::spawn(async move { control_loop.run().await }),
            shutdown_tx,
        )
    }

    fn counts(&self) -> (usize, usize) {
        let cluster = self.cluster.lock().unwrap();
        (cluster.primaries, cluster.replicas)
    }

    fn assert_no_overlap(&self) {
        assert!(
            !self.cluster.lock().unwrap().overlap,
            "two sidecars ran shaping verbs concurrently"
        );
    }
}

struct SimObserver {
    addr: NodeAddress,
    cluster: Arc<Mutex<SimCluster>>,
}

#[async_trait]
impl Observe for SimObserver {
    async fn local_state(&self) -> LocalNodeState {
        let cluster = self.cluster.lock().unwrap();
        if cluster.members.contains(&self.addr) {
            LocalNodeState::InCluster
        } else {
            LocalNodeState::Fresh
        }
    }

    async fn census(&self, _member: &NodeAddress) -> TetherResult<ClusterCensus> {
        let cluster = self.cluster.lock().unwrap();
        Ok(ClusterCensus {
            primaries: cluster.primaries,
            replicas: cluster.replicas,
        })
    }
}

struct SimExecutor {
    addr: NodeAddress,
    cluster: Arc<Mutex<SimCluster>>,
    consul: Arc<Mutex<common::ConsulState>>,
    /// Number of upcoming verb invocations that should fail.
    fail_remaining: AtomicU32,
}

impl SimExecutor {
    fn enter(&self) {
        let mut cluster = self.cluster.lock().unwrap();
        if cluster.executing {
            cluster.overlap = true;
        }
        cluster.executing = true;
    }

    fn exit(&self) {
        self.cluster.lock().unwrap().executing = false;
    }

    fn check_injected_failure(&self) -> TetherResult<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TetherError::ShapingFailed("injected failure".to_string()));
        }
        Ok(())
    }

    /// Health promotion: the node leaves await and appears in dest.
    fn promote(&self, addrs: &[NodeAddress]) {
        let mut consul = self.consul.lock().unwrap();
        if let Some(awaiting) = consul.services.get_mut(AWAIT) {
            awaiting.retain(|member| {
                !addrs
                    .iter()
                    .any(|addr| addr.host == member.address && addr.port == member.port)
            });
        }
        let dest = consul.services.entry(DEST.to_string()).or_default();
        for addr in addrs {
            dest.push(common::ServiceMember {
                address: addr.host.clone(),
                port: addr.port,
                healthy: true,
            });
        }
    }
}

#[async_trait]
impl ShapeExecutor for SimExecutor {
    async fn create_cluster(
        &self,
        members: &[NodeAddress],
        replicas_per_primary: u32,
    ) -> TetherResult<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let result = self.check_injected_failure();
        if result.is_ok() {
            let primary_count = if replicas_per_primary == 0 {
                members.len()
            } else {
                members.len() / (1 + replicas_per_primary as usize)
            };
            let mut cluster = self.cluster.lock().unwrap();
            cluster.members.extend(members.iter().cloned());
            cluster.primaries = primary_count;
            cluster.replicas = members.len() - primary_count;
            cluster
                .create_calls
                .push((members.to_vec(), replicas_per_primary));
            drop(cluster);
            self.promote(members);
        }
        self.exit();
        result
    }

    async fn add_primary(&self, _existing: &NodeAddress) -> TetherResult<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let result = self.check_injected_failure();
        if result.is_ok() {
            let mut cluster = self.cluster.lock().unwrap();
            cluster.members.insert(self.addr.clone());
            cluster.primaries += 1;
            drop(cluster);
            self.promote(std::slice::from_ref(&self.addr));
        }
        self.exit();
        result
    }

    async fn add_replica(&self, _existing: &NodeAddress) -> TetherResult<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let result = self.check_injected_failure();
        if result.is_ok() {
            let mut cluster = self.cluster.lock().unwrap();
            cluster.members.insert(self.addr.clone());
            cluster.replicas += 1;
            cluster.add_replica_calls += 1;
            drop(cluster);
            self.promote(std::slice::from_ref(&self.addr));
        }
        self.exit();
        result
    }
}

fn node_addrs(count: usize) -> Vec<NodeAddress> {
    (0..count)
        .map(|i| NodeAddress::new(format!("10.0.0.{}", i + 1), 6379))
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn s1_cold_start_one_creator_everyone_converges() {
    let world = SimWorld::new(3, 3).await;
    let addrs = node_addrs(6);
    world.seed_await(&addrs);

    let handles: Vec<_> = addrs
        .iter()
        .map(|addr| world.spawn_sidecar(addr, 50).0)
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let joined = outcomes
        .iter()
        .filter(|outcome| **outcome == Outcome::Joined)
        .count();
    assert_eq!(joined, 1, "exactly one sidecar wins the lock and creates");
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, Outcome::Joined | Outcome::AlreadyMember | Outcome::ShapeReached)));

    assert_eq!(world.counts(), (3, 3));
    let cluster = world.cluster.lock().unwrap();
    assert_eq!(cluster.create_calls.len(), 1);
    assert_eq!(cluster.create_calls[0].0.len(), 6);
    assert_eq!(cluster.create_calls[0].1, 1);
    drop(cluster);
    world.assert_no_overlap();
}

#[tokio::test]
async fn s2_partial_start_exhausts_the_budget() {
    let world = SimWorld::new(3, 3).await;
    let addrs = node_addrs(4); // two short of total=6
    world.seed_await(&addrs);

    let handles: Vec<_> = addrs
        .iter()
        .map(|addr| world.spawn_sidecar(addr, 4).0)
        .collect();
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TetherError::BudgetExhausted { attempts: 4 }));
    }

    assert_eq!(world.counts(), (0, 0));
}

#[tokio::test]
async fn s3_grow_primary() {
    let world = SimWorld::new(3, 3).await;
    let seeded = node_addrs(2);
    world.seed_cluster(&seeded, &[]);

    let newcomer = NodeAddress::new("10.0.0.7", 6379);
    world.seed_await(std::slice::from_ref(&newcomer));

    let (handle, _shutdown) = world.spawn_sidecar(&newcomer, 20);
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Joined);
    assert_eq!(world.counts(), (3, 0));
}

#[tokio::test]
async fn s4_grow_replica() {
    let world = SimWorld::new(3, 3).await;
    let seeded = node_addrs(3);
    world.seed_cluster(&seeded, &[]);

    let newcomer = NodeAddress::new("10.0.0.8", 6379);
    world.seed_await(std::slice::from_ref(&newcomer));

    let (handle, _shutdown) = world.spawn_sidecar(&newcomer, 20);
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Joined);
    assert_eq!(world.counts(), (3, 1));
    assert_eq!(world.cluster.lock().unwrap().add_replica_calls, 1);
}

#[tokio::test]
async fn s5_contention_one_primary_one_replica() {
    let world = SimWorld::new(3, 3).await;
    let seeded = node_addrs(2);
    world.seed_cluster(&seeded, &[]);

    let node_a = NodeAddress::new("10.0.0.7", 6379);
    let node_b = NodeAddress::new("10.0.0.8", 6379);
    world.seed_await(&[node_a.clone(), node_b.clone()]);

    let (handle_a, _shutdown_a) = world.spawn_sidecar(&node_a, 50);
    let (handle_b, _shutdown_b) = world.spawn_sidecar(&node_b, 50);

    assert_eq!(handle_a.await.unwrap().unwrap(), Outcome::Joined);
    assert_eq!(handle_b.await.unwrap().unwrap(), Outcome::Joined);

    // Whoever won the lock first became the third primary; the
    // re-observed decision sent the other one in as a replica.
    assert_eq!(world.counts(), (3, 1));
    assert_eq!(world.cluster.lock().unwrap().add_replica_calls, 1);
    world.assert_no_overlap();
}

#[tokio::test]
async fn s6_replica_less_bootstrap_passes_zero_replicas() {
    let world = SimWorld::new(3, 0).await;
    let addrs = node_addrs(3);
    world.seed_await(&addrs);

    let handles: Vec<_> = addrs
        .iter()
        .map(|addr| world.spawn_sidecar(addr, 50).0)
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(world.counts(), (3, 0));
    let cluster = world.cluster.lock().unwrap();
    assert_eq!(cluster.create_calls.len(), 1);
    let (members, replicas_per_primary) = &cluster.create_calls[0];
    assert_eq!(members.len(), 3);
    assert_eq!(*replicas_per_primary, 0);
}

// ============================================================================
// Budget and failure semantics
// ============================================================================

#[tokio::test]
async fn shaping_failures_do_not_consume_the_budget() {
    let world = SimWorld::new(1, 0).await;
    let addr = NodeAddress::new("10.0.0.1", 6379);
    world.seed_await(std::slice::from_ref(&addr));

    // More injected failures than the attempt limit: the loop still
    // converges, because failed executions are retried without
    // spending budget.
    let executor = Arc::new(SimExecutor {
        addr: addr.clone(),
        cluster: world.cluster.clone(),
        consul: world.consul.state.clone(),
        fail_remaining: AtomicU32::new(5),
    });
    let (handle, _shutdown) = world.spawn_sidecar_with(&addr, 3, executor);

    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Joined);
    assert_eq!(world.counts(), (1, 0));
}

#[tokio::test]
async fn coordination_outage_does_not_consume_budget_and_interrupt_exits_cleanly() {
    // A Consul that immediately disappears: every observation fails.
    let gone = FakeConsul::start().await;
    let client = gone.client();
    drop(gone);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cluster: Arc<Mutex<SimCluster>> = Arc::default();
    let addr = NodeAddress::new("10.0.0.1", 6379);
    let config = LoopConfig {
        dest_service: DEST.to_string(),
        await_service: AWAIT.to_string(),
        lock_path: "service/tether/leader".to_string(),
        attempt_interval: Duration::from_millis(20),
        attempt_limit: 2,
    };
    let observer = Arc::new(SimObserver {
        addr: addr.clone(),
        cluster: cluster.clone(),
    });
    let executor = Arc::new(SimExecutor {
        addr,
        cluster,
        consul: Arc::default(),
        fail_remaining: AtomicU32::new(0),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut control_loop = ControlLoop::new(config, client, observer, executor, shutdown_rx);
    let handle = tokio::spawn(async move { control_loop.run().await });

    // Far more ticks than the budget allows; the loop must still be
    // running because outages are transient, not blocked progress.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!handle.is_finished(), "outage ticks must not spend budget");

    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Interrupted);
}

#[tokio::test]
async fn missing_scaling_document_is_fatal() {
    let consul = FakeConsul::start().await;
    let addr = NodeAddress::new("10.0.0.1", 6379);
    consul.set_service(AWAIT, &[(&addr.host, addr.port, true)]);
    consul.set_service(DEST, &[]);

    let cluster: Arc<Mutex<SimCluster>> = Arc::default();
    let config = LoopConfig {
        dest_service: DEST.to_string(),
        await_service: AWAIT.to_string(),
        lock_path: "service/tether/leader".to_string(),
        attempt_interval: Duration::from_millis(20),
        attempt_limit: 20,
    };
    let observer = Arc::new(SimObserver {
        addr: addr.clone(),
        cluster: cluster.clone(),
    });
    let executor = Arc::new(SimExecutor {
        addr,
        cluster,
        consul: consul.state.clone(),
        fail_remaining: AtomicU32::new(0),
    });
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut control_loop =
        ControlLoop::new(config, consul.client(), observer, executor, shutdown_rx);

    let err = control_loop.run().await.unwrap_err();
    assert!(matches!(err, TetherError::ShapeMissing { .. }));
}

#[tokio::test]
async fn already_clustered_node_terminates_immediately() {
    let world = SimWorld::new(3, 3).await;
    let seeded = node_addrs(3);
    world.seed_cluster(&seeded, &[]);

    let (handle, _shutdown) = world.spawn_sidecar(&seeded[0], 20);
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::AlreadyMember);
}
