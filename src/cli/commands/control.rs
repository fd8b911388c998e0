//! `tether control` - the cluster-formation control loop.

use crate::cli::{ConsulFlags, RedisFlags};
use crate::consul::ConsulClient;
use crate::control::driver::{ControlLoop, LoopConfig, Outcome};
use crate::redis::cli::RedisCli;
use crate::redis::client::NodeClient;
use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the control loop.
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Consul service for existing Redis Cluster nodes.
    #[arg(long = "dest-service-name")]
    pub dest_service_name: String,

    /// Consul service that newly started nodes idle in.
    #[arg(long = "await-service-name")]
    pub await_service_name: String,

    /// Consul KV path used as a distributed lock for cluster
    /// operations.
    #[arg(long = "lock-kv-path", default_value = "service/tether/leader")]
    pub lock_kv_path: String,

    /// Duration to wait between attempts to join or create a cluster.
    #[arg(long = "attempt-interval", default_value = "3s", value_parser = humantime::parse_duration)]
    pub attempt_interval: Duration,

    /// Number of attempts to join or create a cluster before exiting.
    #[arg(long = "attempt-limit", default_value_t = 20)]
    pub attempt_limit: u32,

    #[command(flatten)]
    pub redis: RedisFlags,

    #[command(flatten)]
    pub consul: ConsulFlags,
}

/// Run the control loop until the node is clustered or the budget
/// runs out.
pub async fn run_control(args: ControlArgs, log_level: &str) -> Result<()> {
    crate::cli::init_tracing(log_level);
    tracing::info!("starting tether control");

    let redis_opts = args.redis.into_opts()?;
    let consul_opts = args.consul.into_opts()?;

    tracing::info!(node = %redis_opts.node_addr, "initializing redis client");
    let local_node = NodeClient::new(redis_opts.clone())?;
    let executor = RedisCli::new(redis_opts)?;

    tracing::info!(addr = %consul_opts.address, "initializing consul client");
    let consul = ConsulClient::new(&consul_opts)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let config = LoopConfig {
        dest_service: args.dest_service_name,
        await_service: args.await_service_name,
        lock_path: args.lock_kv_path,
        attempt_interval: args.attempt_interval,
        attempt_limit: args.attempt_limit,
    };
    let mut control_loop = ControlLoop::new(
        config,
        consul,
        Arc::new(local_node),
        Arc::new(executor),
        shutdown_rx,
    );

    let outcome = control_loop.run().await?;
    match outcome {
        Outcome::AlreadyMember => tracing::info!("node already belongs to a cluster"),
        Outcome::Joined => tracing::info!("node joined the cluster"),
        Outcome::ShapeReached => tracing::info!("desired cluster shape reached"),
        Outcome::Interrupted => tracing::info!("exiting on interrupt"),
    }
    Ok(())
}
