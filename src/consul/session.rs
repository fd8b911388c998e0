//! Session lifecycle: create, renew, destroy.
//!
//! Sessions back the leader lock. A session carries a TTL and the
//! `delete` behaviour, so every KV entry acquired under it disappears
//! when the session expires or is destroyed; that TTL fallback is what
//! makes best-effort cleanup safe.

use crate::consul::http::Transport;
use crate::core::error::{TetherError, TetherResult};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Serialize)]
struct CreateRequest {
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Behavior")]
    behavior: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Session endpoint client.
#[derive(Debug, Clone)]
pub struct SessionClient {
    transport: Transport,
}

impl SessionClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Create an ephemeral session with `behaviour=delete`.
    pub async fn create(&self, ttl: Duration) -> TetherResult<String> {
        let body = CreateRequest {
            ttl: format_ttl(ttl),
            behavior: "delete",
        };
        let request = self
            .transport
            .request(Method::PUT, "/v1/session/create")
            .json(&body);
        let response = match self.transport.send_expect_ok(request).await {
            Ok(response) => response,
            Err(TetherError::CoordinationUnavailable(message)) => {
                return Err(TetherError::SessionCreateFailed(message))
            }
            Err(other) => return Err(other),
        };
        let created: CreateResponse = response
            .json()
            .await
            .map_err(|err| TetherError::SessionCreateFailed(err.to_string()))?;
        Ok(created.id)
    }

    /// Renew a session. `Ok(false)` means Consul no longer knows the
    /// session, so further renewals are pointless.
    pub async fn renew(&self, session_id: &str) -> TetherResult<bool> {
        let request = self
            .transport
            .request(Method::PUT, &format!("/v1/session/renew/{session_id}"));
        let response = self.transport.send(request).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TetherError::coordination(format!(
                "session renew returned {status}"
            ))),
        }
    }

    /// Destroy a session, triggering its `delete` behaviour.
    pub async fn destroy(&self, session_id: &str) -> TetherResult<()> {
        let request = self
            .transport
            .request(Method::PUT, &format!("/v1/session/destroy/{session_id}"));
        self.transport.send_expect_ok(request).await?;
        Ok(())
    }

    /// Renew `session_id` at half its TTL until `stop` flips true or
    /// the session can no longer be renewed.
    ///
    /// Renewal failures are logged, never surfaced: if the session
    /// truly died, the TTL releases the lock on its own.
    pub async fn renew_periodic(
        &self,
        ttl: Duration,
        session_id: String,
        mut stop: watch::Receiver<bool>,
    ) {
        let interval = ttl / 2;
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    // A dropped sender means the lock holder is gone;
                    // either way, stop renewing.
                    if changed.is_err() || *stop.borrow() {
                        tracing::debug!(session_id = %session_id, "stopping session renewal");
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    match self.renew(&session_id).await {
                        Ok(true) => {
                            tracing::debug!(session_id = %session_id, "renewed session");
                        }
                        Ok(false) => {
                            tracing::warn!(
                                session_id = %session_id,
                                "session expired, stopping renewal"
                            );
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %err,
                                "session renewal failed, retrying"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Consul expects Go-style duration strings; tether TTLs are whole
/// seconds.
fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}
