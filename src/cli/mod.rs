//! Command-line interface.
//!
//! Flag groups shared by both subcommands (`control` and `check`)
//! live here; the per-command argument structs and runners live in
//! [`commands`].

pub mod commands;

use crate::core::config::{ConsulOpts, RedisAuth, RedisOpts};
use crate::core::error::{TetherError, TetherResult};
use crate::net::tls::TlsMaterial;
use clap::{Args, Parser, Subcommand};

/// Tether - self-assembling Redis Cluster sidecar.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cluster-formation control loop for the local node.
    Control(commands::ControlArgs),
    /// Serve the cluster-state health endpoint for the local node.
    Check(commands::CheckArgs),
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the flag.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Flags describing the local Redis node and its credentials.
#[derive(Args, Debug, Clone)]
pub struct RedisFlags {
    /// redis-server listening address (example: '127.0.0.1:6379').
    #[arg(long = "redis-node-addr")]
    pub redis_node_addr: String,

    /// Enable auth for the Redis client and redis-cli.
    #[arg(long = "redis-auth-enable", default_value_t = false)]
    pub redis_auth_enable: bool,

    /// Redis username.
    #[arg(long = "redis-auth-username", default_value = "")]
    pub redis_auth_username: String,

    /// Redis password file path.
    #[arg(long = "redis-auth-password-file", default_value = "")]
    pub redis_auth_password_file: String,

    /// Enable mTLS for the Redis client and redis-cli.
    #[arg(long = "redis-tls-enable", default_value_t = false)]
    pub redis_tls_enable: bool,

    /// Redis CA certificate file.
    #[arg(long = "redis-tls-ca-cert", default_value = "")]
    pub redis_tls_ca_cert: String,

    /// Redis client certificate file.
    #[arg(long = "redis-tls-cert-file", default_value = "")]
    pub redis_tls_cert_file: String,

    /// Redis client key file.
    #[arg(long = "redis-tls-key-file", default_value = "")]
    pub redis_tls_key_file: String,
}

impl RedisFlags {
    /// Convert into validated options.
    pub fn into_opts(self) -> TetherResult<RedisOpts> {
        let node_addr = self.redis_node_addr.parse().map_err(|err| {
            TetherError::ConfigInvalid(format!("bad 'redis-node-addr': {err}"))
        })?;

        let auth = if self.redis_auth_enable {
            require(&self.redis_auth_username, "redis-auth-username")?;
            require(&self.redis_auth_password_file, "redis-auth-password-file")?;
            Some(RedisAuth {
                username: self.redis_auth_username,
                password_file: self.redis_auth_password_file.into(),
            })
        } else {
            None
        };

        let tls = if self.redis_tls_enable {
            require(&self.redis_tls_ca_cert, "redis-tls-ca-cert")?;
            require(&self.redis_tls_cert_file, "redis-tls-cert-file")?;
            require(&self.redis_tls_key_file, "redis-tls-key-file")?;
            Some(TlsMaterial::new(
                self.redis_tls_ca_cert,
                self.redis_tls_cert_file,
                self.redis_tls_key_file,
            ))
        } else {
            None
        };

        let opts = RedisOpts {
            node_addr,
            auth,
            tls,
        };
        opts.validate()?;
        Ok(opts)
    }
}

/// Flags describing the Consul client connection.
#[derive(Args, Debug, Clone)]
pub struct ConsulFlags {
    /// Consul client address (example: '127.0.0.1:8500').
    #[arg(long = "consul-addr", default_value = "127.0.0.1:8500")]
    pub consul_addr: String,

    /// Consul client datacenter.
    #[arg(long = "consul-dc", default_value = "dev-general")]
    pub consul_dc: String,

    /// Consul client ACL token.
    #[arg(long = "consul-acl-token", default_value = "")]
    pub consul_acl_token: String,

    /// Enable mTLS for the Consul client.
    #[arg(long = "consul-tls-enable", default_value_t = false)]
    pub consul_tls_enable: bool,

    /// Consul CA certificate file.
    #[arg(long = "consul-tls-ca-cert", default_value = "")]
    pub consul_tls_ca_cert: String,

    /// Consul client certificate file.
    #[arg(long = "consul-tls-cert", default_value = "")]
    pub consul_tls_cert: String,

    /// Consul client key file.
    #[arg(long = "consul-tls-key", default_value = "")]
    pub consul_tls_key: String,
}

impl ConsulFlags {
    /// Convert into validated options.
    pub fn into_opts(self) -> TetherResult<ConsulOpts> {
        let tls = if self.consul_tls_enable {
            require(&self.consul_tls_ca_cert, "consul-tls-ca-cert")?;
            require(&self.consul_tls_cert, "consul-tls-cert")?;
            require(&self.consul_tls_key, "consul-tls-key")?;
            Some(TlsMaterial::new(
                self.consul_tls_ca_cert,
                self.consul_tls_cert,
                self.consul_tls_key,
            ))
        } else {
            None
        };

        let opts = ConsulOpts {
            address: self.consul_addr,
            datacenter: non_empty(self.consul_dc),
            acl_token: non_empty(self.consul_acl_token),
            tls,
        };
        opts.validate()?;
        Ok(opts)
    }
}

fn require(value: &str, flag: &str) -> TetherResult<()> {
    if value.is_empty() {
        return Err(TetherError::ConfigInvalid(format!(
            "missing required opt: '{flag}'"
        )));
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
