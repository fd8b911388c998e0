//! Node address type shared across components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `<host>:<port>` pair identifying one cluster member.
///
/// Immutable for a node's lifetime and compared by equality of both
/// fields. Consul reports host and port separately; Redis reports the
/// joined form (sometimes with a `@cport` suffix, which callers strip
/// before parsing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last colon so IPv6-ish hosts survive.
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected '<host>:<port>', got {s:?}"))?;
        if host.is_empty() {
            return Err(format!("empty host in address {s:?}"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in address {s:?}"))?;
        Ok(Self::new(host, port))
    }
}
