//! Consul coordination client.
//!
//! Everything tether needs from Consul behind one typed surface:
//!
//! - [`catalog`] - service group membership, health-filtered
//! - [`kv`] - KV reads, the acquire primitive, the scaling document
//! - [`session`] - session create/renew/destroy
//! - [`lock`] - the session-backed leader lock built on the above
//!
//! All endpoint clients share one [`http::Transport`], which carries
//! the base URL, ACL token, datacenter, and mTLS identity.

pub mod catalog;
pub mod http;
pub mod kv;
pub mod lock;
pub mod session;

use crate::core::config::ConsulOpts;
use crate::core::error::TetherResult;

/// Entry point handing out endpoint clients over a shared transport.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    transport: http::Transport,
}

impl ConsulClient {
    /// Build a client from validated options.
    pub fn new(opts: &ConsulOpts) -> TetherResult<Self> {
        Ok(Self {
            transport: http::Transport::new(opts)?,
        })
    }

    /// Catalog client scoped to one service group.
    pub fn catalog(&self, service_name: &str) -> catalog::CatalogClient {
        catalog::CatalogClient::new(self.transport.clone(), service_name)
    }

    /// KV client.
    pub fn kv(&self) -> kv::KvClient {
        kv::KvClient::new(self.transport.clone())
    }

    /// Session client.
    pub fn sessions(&self) -> session::SessionClient {
        session::SessionClient::new(self.transport.clone())
    }
}
