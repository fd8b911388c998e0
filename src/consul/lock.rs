//! Session-backed leader lock.
//!
//! At most one sidecar holds the lock for a given KV path at a time;
//! every cluster-shaping operation happens under it. The value stored
//! at the key is the holder's session id.
//!
//! Lifecycle: create session → try-acquire → (if acquired) background
//! renewal → cleanup. Cleanup is best-effort on every path: if the
//! delete or destroy calls fail — or the process dies without calling
//! them — the session TTL expires and Consul deletes the key itself.
//! Rust has no async destructors, so the control loop is responsible
//! for calling [`Lock::cleanup`] on all of its exit paths; the TTL is
//! the backstop for the paths nobody can reach.

use crate::consul::kv::KvClient;
use crate::consul::session::SessionClient;
use crate::consul::ConsulClient;
use crate::core::error::TetherResult;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A distributed mutex keyed on a Consul KV path.
pub struct Lock {
    sessions: SessionClient,
    kv: KvClient,
    key: String,
    ttl: Duration,
    session_id: String,
    acquired: bool,
    renew_stop: Option<watch::Sender<bool>>,
    renew_task: Option<JoinHandle<()>>,
}

impl Lock {
    /// Create the backing session. The returned lock is not yet held.
    pub async fn new(consul: &ConsulClient, key: impl Into<String>, ttl: Duration) -> TetherResult<Self> {
        let sessions = consul.sessions();
        let session_id = sessions.create(ttl).await?;
        Ok(Self {
            sessions,
            kv: consul.kv(),
            key: key.into(),
            ttl,
            session_id,
            acquired: false,
            renew_stop: None,
            renew_task: None,
        })
    }

    /// Whether this lock is currently held.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// The backing session id (the value stored at the lock key).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Attempt to acquire the lock. Returns `false` when another
    /// sidecar's session holds the key.
    ///
    /// On success a background task starts renewing the session at
    /// intervals strictly shorter than its TTL, and keeps doing so
    /// until [`Lock::cleanup`].
    pub async fn try_acquire(&mut self) -> TetherResult<bool> {
        let acquired = self
            .kv
            .acquire(&self.key, &self.session_id, &self.session_id)
            .await?;
        if acquired {
            self.acquired = true;
            self.spawn_renewer();
        }
        Ok(acquired)
    }

    fn spawn_renewer(&mut self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sessions = self.sessions.clone();
        let session_id = self.session_id.clone();
        let ttl = self.ttl;
        self.renew_task = Some(tokio::spawn(async move {
            sessions.renew_periodic(ttl, session_id, stop_rx).await;
        }));
        self.renew_stop = Some(stop_tx);
    }

    /// Stop renewal, release the key, and destroy the session.
    ///
    /// Idempotent and infallible: failures are logged and otherwise
    /// ignored, because the session TTL releases the lock within `ttl`
    /// regardless.
    pub async fn cleanup(&mut self) {
        if self.acquired {
            if let Some(stop) = self.renew_stop.take() {
                let _ = stop.send(true);
            }
            if let Some(task) = self.renew_task.take() {
                let _ = task.await;
            }
            if let Err(err) = self.kv.delete(&self.key).await {
                tracing::warn!(key = %self.key, error = %err, "cannot delete lock key");
            }
            self.acquired = false;
        }
        if !self.session_id.is_empty() {
            if let Err(err) = self.sessions.destroy(&self.session_id).await {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "cannot destroy session"
                );
            }
            self.session_id.clear();
        }
    }
}
