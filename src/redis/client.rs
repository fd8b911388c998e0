//! Async client for one Redis node.
//!
//! Wraps a `redis::Client` configured with the sidecar's auth and
//! mTLS material. Tether only ever issues the two read-only topology
//! queries; everything that mutates the cluster goes through
//! `redis-cli` (see [`crate::redis::cli`]).

use crate::core::config::RedisOpts;
use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use crate::redis::cluster_info::{parse_cluster_info, ClusterInfo, LocalNodeState};
use crate::redis::cluster_nodes::{self, parse_cluster_nodes, ClusterNode};
use redis::{
    aio::MultiplexedConnection, Client, ClientTlsConfig, ConnectionAddr, ConnectionInfo,
    RedisConnectionInfo, TlsCertificates,
};

/// Client bound to a single node address.
pub struct NodeClient {
    opts: RedisOpts,
    client: Client,
}

impl NodeClient {
    /// Build a client from validated options.
    pub fn new(opts: RedisOpts) -> TetherResult<Self> {
        opts.validate()?;

        let (username, password) = match &opts.auth {
            Some(auth) => (Some(auth.username.clone()), Some(auth.load_password()?)),
            None => (None, None),
        };
        let redis_info = RedisConnectionInfo {
            db: 0,
            username,
            password,
            ..Default::default()
        };

        let client = match &opts.tls {
            Some(material) => {
                let identity = material.load()?;
                let info = ConnectionInfo {
                    addr: ConnectionAddr::TcpTls {
                        host: opts.node_addr.host.clone(),
                        port: opts.node_addr.port,
                        insecure: false,
                        tls_params: None,
                    },
                    redis: redis_info,
                };
                Client::build_with_tls(
                    info,
                    TlsCertificates {
                        client_tls: Some(ClientTlsConfig {
                            client_cert: identity.cert_pem.clone(),
                            client_key: identity.key_pem.clone(),
                        }),
                        root_cert: Some(identity.ca_cert_pem.clone()),
                    },
                )
            }
            None => Client::open(ConnectionInfo {
                addr: ConnectionAddr::Tcp(opts.node_addr.host.clone(), opts.node_addr.port),
                redis: redis_info,
            }),
        }
        .map_err(|err| TetherError::ConfigInvalid(format!("cannot build redis client: {err}")))?;

        Ok(Self { opts, client })
    }

    /// The address this client talks to.
    pub fn node_addr(&self) -> &NodeAddress {
        &self.opts.node_addr
    }

    /// The same credentials pointed at another member of the cluster.
    pub fn for_peer(&self, peer: NodeAddress) -> TetherResult<Self> {
        Self::new(self.opts.for_peer(peer))
    }

    async fn connection(&self) -> TetherResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(TetherError::local_node)
    }

    /// Issue `CLUSTER INFO` and parse it.
    pub async fn cluster_info(&self) -> TetherResult<ClusterInfo> {
        let mut connection = self.connection().await?;
        let raw: String = redis::cmd("CLUSTER")
            .arg("INFO")
            .query_async(&mut connection)
            .await
            .map_err(TetherError::local_node)?;
        parse_cluster_info(&raw)
    }

    /// Issue `CLUSTER NODES` and parse every row.
    pub async fn cluster_nodes(&self) -> TetherResult<Vec<ClusterNode>> {
        let mut connection = self.connection().await?;
        let raw: String = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async(&mut connection)
            .await
            .map_err(TetherError::local_node)?;
        parse_cluster_nodes(&raw)
    }

    /// Classify the node from its own cluster-info report.
    ///
    /// `Unknown` on any connection or parse failure; the control loop
    /// re-observes on its next tick.
    pub async fn local_state(&self) -> LocalNodeState {
        match self.cluster_info().await {
            Ok(info) if info.is_fresh() => LocalNodeState::Fresh,
            Ok(_) => LocalNodeState::InCluster,
            Err(err) => {
                tracing::warn!(
                    node = %self.opts.node_addr,
                    error = %err,
                    "cannot determine local node state"
                );
                LocalNodeState::Unknown
            }
        }
    }

    /// The connected primary with the fewest replicas, picked
    /// deterministically (count, then lexicographic id).
    pub async fn primary_with_fewest_replicas(&self) -> TetherResult<(NodeAddress, String)> {
        let nodes = self.cluster_nodes().await?;
        cluster_nodes::primary_with_fewest_replicas(&nodes).ok_or_else(|| {
            TetherError::local_node(format!(
                "no connected primary in 'cluster nodes' output of {}",
                self.opts.node_addr
            ))
        })
    }
}
