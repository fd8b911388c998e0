//! Service catalog queries.
//!
//! Tether watches two named service groups: the *await* group, where
//! freshly started nodes idle until they join a cluster, and the
//! *destination* group, where Consul's health gate places nodes whose
//! health endpoint reports cluster state `ok`. Membership queries run
//! against the health API so that the `passing` filter applies.

use crate::consul::http::Transport;
use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use reqwest::Method;
use serde::Deserialize;

/// One entry of a `/v1/health/service/<name>` response; only the
/// fields tether reads.
#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: ServiceBlock,
}

#[derive(Debug, Deserialize)]
struct ServiceBlock {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// Client scoped to one named service group.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    transport: Transport,
    service_name: String,
}

impl CatalogClient {
    pub fn new(transport: Transport, service_name: impl Into<String>) -> Self {
        Self {
            transport,
            service_name: service_name.into(),
        }
    }

    /// The group this client queries.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Addresses of the group's members. With `only_healthy`, Consul
    /// filters to nodes passing all health checks. Consul returns
    /// entries in a stable order for a given catalog state, so
    /// `result[0]` is a deterministic pick across observers.
    pub async fn node_addresses(&self, only_healthy: bool) -> TetherResult<Vec<NodeAddress>> {
        let mut request = self.transport.request(
            Method::GET,
            &format!("/v1/health/service/{}", self.service_name),
        );
        if only_healthy {
            request = request.query(&[("passing", "true")]);
        }
        let response = self.transport.send_expect_ok(request).await?;
        let entries: Vec<HealthEntry> = response.json().await.map_err(|err| {
            TetherError::coordination(format!(
                "cannot decode health entries for service {:?}: {err}",
                self.service_name
            ))
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| NodeAddress::new(entry.service.address, entry.service.port))
            .collect())
    }
}
