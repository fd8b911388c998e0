//! Tether - unified CLI entrypoint.
//!
//! Usage:
//!   tether control --redis-node-addr 127.0.0.1:6379 \
//!       --dest-service-name redis-cluster --await-service-name redis-await
//!   tether check --check-serv-addr 127.0.0.1:8080 \
//!       --redis-node-addr 127.0.0.1:6379

use anyhow::Result;
use clap::Parser;
use tether::cli::commands::{run_check, run_control};
use tether::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Control(args) => run_control(args, &cli.log_level).await,
        Commands::Check(args) => run_check(args, &cli.log_level).await,
    }
}
