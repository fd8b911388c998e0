//! `tether check` - the cluster-state health endpoint.

use crate::cli::RedisFlags;
use crate::ops::health;
use crate::redis::client::NodeClient;
use anyhow::Result;
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Arguments for the health endpoint.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Address this endpoint should listen on (example:
    /// '127.0.0.1:8080').
    #[arg(long = "check-serv-addr")]
    pub check_serv_addr: SocketAddr,

    /// Duration to wait for in-flight connections before shutting
    /// down.
    #[arg(long = "shutdown-grace", default_value = "5s", value_parser = humantime::parse_duration)]
    pub shutdown_grace: Duration,

    #[command(flatten)]
    pub redis: RedisFlags,
}

/// Serve the health endpoint until interrupted.
pub async fn run_check(args: CheckArgs, log_level: &str) -> Result<()> {
    crate::cli::init_tracing(log_level);
    tracing::info!("starting tether check");

    let redis_opts = args.redis.into_opts()?;
    let client = NodeClient::new(redis_opts)?;

    health::serve(args.check_serv_addr, Arc::new(client), args.shutdown_grace).await
}
