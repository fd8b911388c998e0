//! Error types and retry classification.
//!
//! Tether distinguishes transient conditions, which the control loop
//! absorbs by waiting for the next tick, from fatal conditions that
//! require an operator (bad flags, a missing or unparseable scaling
//! document, an exhausted attempt budget).

use thiserror::Error;

/// Error conditions surfaced by tether components.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Startup configuration is unusable.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The Consul HTTP API could not be reached or returned an
    /// unexpected response.
    #[error("consul unavailable: {0}")]
    CoordinationUnavailable(String),

    /// The local Redis node could not be reached or returned an
    /// unparseable response.
    #[error("local redis node unreachable: {0}")]
    LocalNodeUnreachable(String),

    /// The scaling document is absent from the KV store.
    #[error("scaling opts key {key:?} is not defined")]
    ShapeMissing { key: String },

    /// The scaling document exists but cannot be parsed.
    #[error("scaling opts key {key:?} is malformed: {reason}")]
    ShapeMalformed { key: String, reason: String },

    /// Another sidecar currently holds the leader lock.
    #[error("another sidecar currently holds the lock")]
    LeaseContended,

    /// A Consul session could not be created.
    #[error("cannot create consul session: {0}")]
    SessionCreateFailed(String),

    /// The KV acquire call itself failed (distinct from a clean
    /// "somebody else holds it" refusal).
    #[error("cannot acquire lock: {0}")]
    AcquireFailed(String),

    /// A cluster shaping verb returned non-zero.
    #[error("cluster shaping failed: {0}")]
    ShapingFailed(String),

    /// The attempt budget ran out before the node joined a cluster.
    #[error("gave up after {attempts} attempts without joining a cluster")]
    BudgetExhausted { attempts: u32 },
}

impl TetherError {
    /// Transient errors are logged and retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CoordinationUnavailable(_)
                | Self::LocalNodeUnreachable(_)
                | Self::LeaseContended
                | Self::SessionCreateFailed(_)
                | Self::AcquireFailed(_)
                | Self::ShapingFailed(_)
        )
    }

    /// Fatal errors terminate the sidecar with a non-zero exit.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Create a CoordinationUnavailable error.
    pub fn coordination(message: impl std::fmt::Display) -> Self {
        Self::CoordinationUnavailable(message.to_string())
    }

    /// Create a LocalNodeUnreachable error.
    pub fn local_node(message: impl std::fmt::Display) -> Self {
        Self::LocalNodeUnreachable(message.to_string())
    }
}

/// Result type using TetherError.
pub type TetherResult<T> = Result<T, TetherError>;
