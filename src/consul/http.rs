//! HTTP transport for the Consul API.
//!
//! A thin wrapper over a shared `reqwest::Client` that stamps every
//! request with the ACL token header and the datacenter query
//! parameter. Transport-level failures and unexpected statuses map to
//! [`TetherError::CoordinationUnavailable`]; callers that can give a
//! sharper meaning to a status (404 on a KV read, say) inspect the
//! response themselves.

use crate::core::config::ConsulOpts;
use crate::core::error::{TetherError, TetherResult};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Consul requests are short; anything slower than this is treated as
/// an unavailable coordination service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared transport for all Consul endpoint clients.
#[derive(Debug, Clone)]
pub struct Transport {
    base_url: String,
    datacenter: Option<String>,
    acl_token: Option<String>,
    http: reqwest::Client,
}

impl Transport {
    /// Build a transport from validated options. TLS material, when
    /// present, switches the scheme to https and presents the client
    /// identity to Consul.
    pub fn new(opts: &ConsulOpts) -> TetherResult<Self> {
        opts.validate()?;

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(material) = &opts.tls {
            let identity = material.load()?;
            let ca = reqwest::Certificate::from_pem(&identity.ca_cert_pem).map_err(|err| {
                TetherError::ConfigInvalid(format!("cannot parse consul CA cert: {err}"))
            })?;
            let id = reqwest::Identity::from_pem(&identity.identity_pem()).map_err(|err| {
                TetherError::ConfigInvalid(format!("cannot parse consul client identity: {err}"))
            })?;
            builder = builder.use_rustls_tls().add_root_certificate(ca).identity(id);
        }
        let http = builder
            .build()
            .map_err(|err| TetherError::ConfigInvalid(format!("cannot build http client: {err}")))?;

        Ok(Self {
            base_url: opts.base_url(),
            datacenter: opts.datacenter.clone(),
            acl_token: opts.acl_token.clone(),
            http,
        })
    }

    /// Start a request against an API path (e.g. `/v1/kv/foo`).
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.acl_token {
            builder = builder.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.datacenter {
            builder = builder.query(&[("dc", dc.as_str())]);
        }
        builder
    }

    /// Send a request, mapping transport errors to
    /// `CoordinationUnavailable`.
    pub async fn send(&self, builder: RequestBuilder) -> TetherResult<Response> {
        builder.send().await.map_err(TetherError::coordination)
    }

    /// Send a request and require a 200, returning the response for
    /// body extraction.
    pub async fn send_expect_ok(&self, builder: RequestBuilder) -> TetherResult<Response> {
        let response = self.send(builder).await?;
        expect_status(response, StatusCode::OK).await
    }
}

/// Require an exact status, folding anything else into
/// `CoordinationUnavailable` with the response body as context.
pub async fn expect_status(response: Response, expected: StatusCode) -> TetherResult<Response> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(TetherError::coordination(format!(
        "{url} returned {status}: {}",
        body.trim()
    )))
}
