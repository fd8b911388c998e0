//! `redis-cli` subprocess adapter for the shaping verbs.
//!
//! Cluster mutations go through the stock `redis-cli --cluster`
//! tooling rather than raw commands: it already knows how to assign
//! slot ranges at creation, meet new nodes, and move slots during a
//! rebalance. Auth and TLS flags mirror whatever the in-process
//! client was configured with.

use crate::control::executor::ShapeExecutor;
use crate::core::config::RedisOpts;
use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use crate::redis::client::NodeClient;
use async_trait::async_trait;
use std::time::Duration;

/// A fresh cluster is sometimes not ready to rebalance immediately
/// after meeting a new primary: gossip about the new master has to
/// propagate first. Retry for a full minute before giving up.
const REBALANCE_ATTEMPT_LIMIT: u32 = 10;
const REBALANCE_INTERVAL: Duration = Duration::from_secs(6);

/// Shaping executor backed by the `redis-cli` binary on `$PATH`.
pub struct RedisCli {
    opts: RedisOpts,
}

impl RedisCli {
    pub fn new(opts: RedisOpts) -> TetherResult<Self> {
        opts.validate()?;
        Ok(Self { opts })
    }

    fn tls_args(&self) -> Vec<String> {
        match &self.opts.tls {
            Some(material) => vec![
                "--tls".to_string(),
                "--cert".to_string(),
                material.cert_path.display().to_string(),
                "--key".to_string(),
                material.key_path.display().to_string(),
                "--cacert".to_string(),
                material.ca_cert_path.display().to_string(),
            ],
            None => Vec::new(),
        }
    }

    fn auth_args(&self) -> TetherResult<Vec<String>> {
        match &self.opts.auth {
            Some(auth) => Ok(vec![
                "--user".to_string(),
                auth.username.clone(),
                "--pass".to_string(),
                auth.load_password()?,
            ]),
            None => Ok(Vec::new()),
        }
    }

    /// Run one `redis-cli` invocation, streaming its output to ours.
    async fn execute(&self, verb_args: Vec<String>) -> TetherResult<()> {
        let mut args = verb_args.clone();
        args.extend(self.tls_args());
        args.extend(self.auth_args()?);

        let status = tokio::process::Command::new("redis-cli")
            .args(&args)
            .status()
            .await
            .map_err(|err| TetherError::ShapingFailed(format!("cannot run redis-cli: {err}")))?;

        if !status.success() {
            return Err(TetherError::ShapingFailed(format!(
                "redis-cli {} exited with {status}",
                verb_args.join(" ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShapeExecutor for RedisCli {
    async fn create_cluster(
        &self,
        members: &[NodeAddress],
        replicas_per_primary: u32,
    ) -> TetherResult<()> {
        let mut args = vec!["--cluster".to_string(), "create".to_string()];
        args.extend(members.iter().map(|member| member.to_string()));
        args.extend([
            "--cluster-yes".to_string(),
            "--cluster-replicas".to_string(),
            replicas_per_primary.to_string(),
        ]);
        self.execute(args).await
    }

    async fn add_primary(&self, existing: &NodeAddress) -> TetherResult<()> {
        self.execute(vec![
            "--cluster".to_string(),
            "add-node".to_string(),
            self.opts.node_addr.to_string(),
            existing.to_string(),
        ])
        .await?;
        tracing::info!(node = %self.opts.node_addr, "cluster meet succeeded");

        tracing::info!("attempting cluster shard slot rebalance");
        let mut attempts = 0;
        loop {
            tokio::time::sleep(REBALANCE_INTERVAL).await;
            attempts += 1;
            match self
                .execute(vec![
                    "--cluster".to_string(),
                    "rebalance".to_string(),
                    self.opts.node_addr.to_string(),
                    "--cluster-use-empty-masters".to_string(),
                ])
                .await
            {
                Ok(()) => {
                    tracing::info!("cluster shard slot rebalance succeeded");
                    return Ok(());
                }
                Err(err) if attempts >= REBALANCE_ATTEMPT_LIMIT => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        attempts,
                        error = %err,
                        "rebalance not ready yet, retrying"
                    );
                }
            }
        }
    }

    async fn add_replica(&self, existing: &NodeAddress) -> TetherResult<()> {
        let cluster_client = NodeClient::new(self.opts.for_peer(existing.clone()))
            .map_err(|err| TetherError::ShapingFailed(err.to_string()))?;
        let (primary_addr, primary_id) = cluster_client
            .primary_with_fewest_replicas()
            .await
            .map_err(|err| TetherError::ShapingFailed(err.to_string()))?;
        tracing::info!(
            primary = %primary_addr,
            primary_id = %primary_id,
            "attaching as replica of the least-replicated primary"
        );

        self.execute(vec![
            "--cluster".to_string(),
            "add-node".to_string(),
            self.opts.node_addr.to_string(),
            primary_addr.to_string(),
            "--cluster-slave".to_string(),
            "--cluster-master-id".to_string(),
            primary_id,
        ])
        .await
    }
}
