//! Connection configuration for the two services tether talks to.
//!
//! Tether is flag-driven; the clap surface lives in [`crate::cli`] and
//! converts into these validated structs. `RedisOpts` covers the local
//! node (and, with a swapped address, any peer in the same cluster);
//! `ConsulOpts` covers the coordination service.

use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use crate::net::tls::TlsMaterial;
use std::path::PathBuf;

/// Options for connecting to Redis nodes, shared by the in-process
/// client and the `redis-cli` subprocess.
#[derive(Debug, Clone)]
pub struct RedisOpts {
    /// Address of the node this sidecar manages.
    pub node_addr: NodeAddress,

    /// ACL credentials, when the cluster requires auth.
    pub auth: Option<RedisAuth>,

    /// mTLS material, when the cluster requires TLS.
    pub tls: Option<TlsMaterial>,
}

impl RedisOpts {
    /// Validate referenced files and required fields.
    pub fn validate(&self) -> TetherResult<()> {
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }
        if let Some(tls) = &self.tls {
            tls.validate("redis")?;
        }
        Ok(())
    }

    /// The same options pointed at a different node of the cluster.
    pub fn for_peer(&self, peer: NodeAddress) -> Self {
        Self {
            node_addr: peer,
            auth: self.auth.clone(),
            tls: self.tls.clone(),
        }
    }
}

/// Username plus a password file path.
///
/// The password lives in a file so that process listings and flags
/// never carry the secret; trailing newlines are stripped on load.
#[derive(Debug, Clone)]
pub struct RedisAuth {
    pub username: String,
    pub password_file: PathBuf,
}

impl RedisAuth {
    fn validate(&self) -> TetherResult<()> {
        if self.username.is_empty() {
            return Err(TetherError::ConfigInvalid(
                "missing required opt: 'redis-auth-username'".into(),
            ));
        }
        if !self.password_file.exists() {
            return Err(TetherError::ConfigInvalid(format!(
                "redis password file does not exist: {}",
                self.password_file.display()
            )));
        }
        Ok(())
    }

    /// Read the password from the configured file.
    pub fn load_password(&self) -> TetherResult<String> {
        let contents = std::fs::read_to_string(&self.password_file).map_err(|err| {
            TetherError::ConfigInvalid(format!(
                "cannot load password from {}: {err}",
                self.password_file.display()
            ))
        })?;
        Ok(contents.trim_end_matches('\n').to_string())
    }
}

/// Options for connecting to the Consul HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulOpts {
    /// Client address without scheme, e.g. `127.0.0.1:8500`.
    pub address: String,

    /// Datacenter to scope queries to.
    pub datacenter: Option<String>,

    /// ACL token sent with every request.
    pub acl_token: Option<String>,

    /// mTLS material; presence switches the scheme to https.
    pub tls: Option<TlsMaterial>,
}

impl ConsulOpts {
    /// Validate referenced files and required fields.
    pub fn validate(&self) -> TetherResult<()> {
        if self.address.is_empty() {
            return Err(TetherError::ConfigInvalid(
                "missing required opt: 'consul-addr'".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            tls.validate("consul")?;
        }
        Ok(())
    }

    /// Base URL for the HTTP API.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}", self.address)
    }
}
