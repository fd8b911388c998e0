//! KV reads, lock acquisition, and the scaling document.
//!
//! Two kinds of keys matter: the operator-written scaling document at
//! `service/<dest>/scaling`, and the leader-lock key whose value is
//! the holder's session id. The KV `acquire` primitive is the single
//! point of serialisation between sidecars.

use crate::consul::http::{expect_status, Transport};
use crate::core::error::{TetherError, TetherResult};
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

/// One entry of a `/v1/kv/<key>` read.
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// KV endpoint client.
#[derive(Debug, Clone)]
pub struct KvClient {
    transport: Transport,
}

impl KvClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Read a key. `None` when the key does not exist.
    pub async fn get(&self, key: &str) -> TetherResult<Option<Vec<u8>>> {
        let request = self.transport.request(Method::GET, &format!("/v1/kv/{key}"));
        let response = self.transport.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_status(response, StatusCode::OK).await?;
        let mut entries: Vec<KvEntry> = response
            .json()
            .await
            .map_err(|err| TetherError::coordination(format!("cannot decode kv entry: {err}")))?;

        match entries.pop().and_then(|entry| entry.value) {
            Some(encoded) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|err| {
                        TetherError::coordination(format!("kv value for {key:?} not base64: {err}"))
                    })?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    /// Attempt to acquire the key under a session. `false` means some
    /// other session holds it.
    pub async fn acquire(&self, key: &str, value: &str, session_id: &str) -> TetherResult<bool> {
        let request = self
            .transport
            .request(Method::PUT, &format!("/v1/kv/{key}"))
            .query(&[("acquire", session_id)])
            .body(value.to_string());
        let response = self.transport.send_expect_ok(request).await;
        let response = match response {
            Ok(response) => response,
            Err(TetherError::CoordinationUnavailable(message)) => {
                return Err(TetherError::AcquireFailed(message))
            }
            Err(other) => return Err(other),
        };
        let body = response
            .text()
            .await
            .map_err(|err| TetherError::AcquireFailed(err.to_string()))?;
        Ok(body.trim() == "true")
    }

    /// Delete a key. Best-effort callers ignore the result.
    pub async fn delete(&self, key: &str) -> TetherResult<()> {
        let request = self
            .transport
            .request(Method::DELETE, &format!("/v1/kv/{key}"));
        self.transport.send_expect_ok(request).await?;
        Ok(())
    }
}

/// The desired cluster shape, written out-of-band by operators at
/// `service/<dest>/scaling`. Tether never writes this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingOpts {
    /// Count of primary nodes expected in the final cluster.
    #[serde(rename = "primary-count")]
    pub primary_count: u32,

    /// Count of replica nodes expected in the final cluster.
    #[serde(rename = "replica-count")]
    pub replica_count: u32,
}

impl ScalingOpts {
    /// Total count of expected nodes.
    pub fn total(&self) -> u32 {
        self.primary_count + self.replica_count
    }

    /// Nodes still missing from the await group before a cluster can
    /// be created. Negative when more nodes than expected showed up.
    pub fn nodes_missing(&self, nodes_in_await: usize) -> i64 {
        i64::from(self.total()) - nodes_in_await as i64
    }

    /// Replicas assigned to each primary at creation time (integer
    /// division; 0 is a valid, special-cased shape).
    pub fn replicas_per_primary(&self) -> u32 {
        self.replica_count / self.primary_count
    }
}

/// KV path of the scaling document for a destination group.
pub fn scaling_key(dest_service: &str) -> String {
    format!("service/{dest_service}/scaling")
}

impl KvClient {
    /// Fetch and parse the scaling document for `dest_service`.
    ///
    /// A missing key or an unparseable document is fatal: an operator
    /// must fix the KV before any sidecar can proceed.
    pub async fn scaling_opts(&self, dest_service: &str) -> TetherResult<ScalingOpts> {
        let key = scaling_key(dest_service);
        let raw = self
            .get(&key)
            .await?
            .ok_or_else(|| TetherError::ShapeMissing { key: key.clone() })?;

        let opts: ScalingOpts =
            serde_yaml::from_slice(&raw).map_err(|err| TetherError::ShapeMalformed {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        if opts.primary_count == 0 {
            return Err(TetherError::ShapeMalformed {
                key,
                reason: "primary-count must be at least 1".into(),
            });
        }
        Ok(opts)
    }
}
