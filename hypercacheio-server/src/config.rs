//! CLI/environment configuration. Every flag has a matching environment
//! variable fallback.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use hypercacheio_common::HypercacheError;

#[derive(Parser, Debug, Clone)]
#[command(name = "hypercacheio-server", about = "Replicated cache server")]
pub struct Config {
    /// Host to listen on for the HTTP API.
    #[arg(long, env = "HYPERCACHEIO_HOST", default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port to listen on for the HTTP API.
    #[arg(long, env = "HYPERCACHEIO_PORT", default_value_t = 8080)]
    pub listen_port: u16,

    /// Bearer token clients must send in `X-Hypercacheio-Token`. Required.
    #[arg(long, env = "HYPERCACHEIO_TOKEN")]
    pub token: Option<String>,

    /// TLS certificate path. Requires `tls_key` to also be set.
    #[arg(long, env = "HYPERCACHEIO_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key path. Requires `tls_cert` to also be set.
    #[arg(long, env = "HYPERCACHEIO_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Path to the SQLite persistence file.
    #[arg(long, env = "HYPERCACHEIO_PERSISTENCE_PATH", default_value = "hypercacheio.sqlite3")]
    pub persistence_path: PathBuf,

    /// Prefix prepended to every key before it reaches the engine, so
    /// multiple logical caches can share one replication mesh.
    #[arg(long, env = "HYPERCACHEIO_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Comma-separated list of peer addresses (host:port) to dial.
    #[arg(long, env = "HYPERCACHEIO_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Port the replication listener accepts peer connections on.
    #[arg(long, env = "HYPERCACHEIO_REPLICATION_PORT", default_value_t = 7400)]
    pub replication_port: u16,
}

impl Config {
    /// Fatal configuration checks that must pass before the process binds
    /// any socket: a missing token, or a half-configured TLS pair.
    pub fn validate(&self) -> Result<(), HypercacheError> {
        if self.token.as_deref().unwrap_or("").is_empty() {
            return Err(HypercacheError::Config("API token is required (--token / HYPERCACHEIO_TOKEN)".into()));
        }
        let tls_requested = self.tls_cert.is_some() || self.tls_key.is_some();
        if tls_requested && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(HypercacheError::Config("TLS requires both --tls-cert and --tls-key".into()));
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn token(&self) -> &str {
        self.token.as_deref().unwrap_or("")
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, HypercacheError> {
        format!("{}:{}", self.listen_host, self.listen_port)
            .parse()
            .map_err(|e| HypercacheError::Config(format!("invalid listen address: {e}")))
    }

    pub fn replication_addr(&self) -> Result<SocketAddr, HypercacheError> {
        format!("{}:{}", self.listen_host, self.replication_port)
            .parse()
            .map_err(|e| HypercacheError::Config(format!("invalid replication address: {e}")))
    }
}
