//! Cluster-state health endpoint.
//!
//! One read-only route, `GET /clusterinfo/state/ok`:
//!
//! - `200` with body `ok` when the local node reports cluster state
//!   `ok`
//! - `503` with the reported state otherwise
//! - `500` with the error when the local node cannot be reached
//!
//! Consul's health probe consumes this endpoint to promote a node
//! from the await group into the destination group, which is what
//! makes the probe's target worth running as its own process: it must
//! keep answering after the control loop has exited.

use crate::core::error::TetherResult;
use crate::redis::client::NodeClient;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;

/// Conservative per-request ceiling; topology queries answer in
/// milliseconds or not at all.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the handler reads cluster state from.
#[async_trait]
pub trait ClusterStateSource: Send + Sync {
    /// The `cluster_state` value of the local node's cluster-info
    /// report.
    async fn cluster_state(&self) -> TetherResult<String>;
}

#[async_trait]
impl ClusterStateSource for NodeClient {
    async fn cluster_state(&self) -> TetherResult<String> {
        Ok(self.cluster_info().await?.state)
    }
}

/// Build the health router.
pub fn router(source: Arc<dyn ClusterStateSource>) -> Router {
    Router::new()
        .route("/clusterinfo/state/ok", get(state_ok))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(source)
}

async fn state_ok(State(source): State<Arc<dyn ClusterStateSource>>) -> Response {
    match source.cluster_state().await {
        Ok(state) if state == "ok" => (StatusCode::OK, state).into_response(),
        Ok(state) => (StatusCode::SERVICE_UNAVAILABLE, state).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Serve the endpoint until interrupted, then drain in-flight
/// connections for up to `shutdown_grace`.
pub async fn serve(
    addr: SocketAddr,
    source: Arc<dyn ClusterStateSource>,
    shutdown_grace: Duration,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "health endpoint listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, router(source))
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        return;
                    }
                }
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(shutdown_grace, server).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("shutdown grace period expired with connections in flight"),
    }
    tracing::info!("shutting down");
    Ok(())
}
