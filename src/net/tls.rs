//! Client-side mTLS material.
//!
//! Both outbound connections — the Consul HTTP API and the local Redis
//! node — authenticate with the same kind of material: a CA bundle to
//! verify the server plus a client certificate and key presented to
//! it. `TlsMaterial` holds the file paths; `load()` reads them into a
//! `TlsIdentity` that the consul and redis clients turn into their
//! library-specific configs.

use crate::core::error::{TetherError, TetherResult};
use std::path::{Path, PathBuf};

/// File paths for one mTLS client identity.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    /// PEM CA certificate used to verify the server.
    pub ca_cert_path: PathBuf,
    /// PEM client certificate.
    pub cert_path: PathBuf,
    /// PEM client private key.
    pub key_path: PathBuf,
}

impl TlsMaterial {
    /// Create material from the three file paths.
    pub fn new(
        ca_cert_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_cert_path: ca_cert_path.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Validate that all three files exist.
    pub fn validate(&self, context: &str) -> TetherResult<()> {
        for (label, path) in [
            ("ca cert", &self.ca_cert_path),
            ("cert", &self.cert_path),
            ("key", &self.key_path),
        ] {
            if !path.exists() {
                return Err(TetherError::ConfigInvalid(format!(
                    "{context} {label} does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Read all three PEM files.
    pub fn load(&self) -> TetherResult<TlsIdentity> {
        Ok(TlsIdentity {
            ca_cert_pem: read_pem(&self.ca_cert_path)?,
            cert_pem: read_pem(&self.cert_path)?,
            key_pem: read_pem(&self.key_path)?,
        })
    }
}

fn read_pem(path: &Path) -> TetherResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| {
        TetherError::ConfigInvalid(format!("cannot read {}: {err}", path.display()))
    })
}

/// Loaded mTLS client identity (PEM bytes).
#[derive(Clone)]
pub struct TlsIdentity {
    /// CA bundle in PEM format.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate in PEM format.
    pub cert_pem: Vec<u8>,
    /// Client private key in PEM format.
    pub key_pem: Vec<u8>,
}

impl TlsIdentity {
    /// Certificate and key concatenated, as reqwest's PEM identity
    /// loader expects.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.cert_pem.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key_pem);
        pem
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs.
        f.debug_struct("TlsIdentity")
            .field("ca_cert_pem_len", &self.ca_cert_pem.len())
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}
