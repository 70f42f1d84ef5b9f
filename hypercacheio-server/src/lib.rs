//! The HTTP API surface, configuration, and process lifecycle around a
//! [`hypercacheio_core::Engine`].
//!
//! Startup order: load persistence into the engine, start the
//! replication listener, dial configured peers, then start serving the
//! API. Shutdown is driven by `main` observing `ctrl_c` and letting the
//! serve future drop.

pub mod api;
pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use hypercacheio_common::{HypercacheError, ValueCodec, MAX_VALUE_SIZE};
use hypercacheio_core::{Clock, Engine, SystemClock};
use tokio::net::TcpListener;
use tracing::info;

pub use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub clock: Arc<dyn Clock>,
    pub codec: Arc<dyn ValueCodec>,
    pub token: String,
    pub key_prefix: String,
}

/// Builds the router with the token-auth middleware and body-size layer
/// applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/cache/:key", get(api::handle_cache_get).post(api::handle_cache_post).delete(api::handle_cache_delete))
        .route("/cache/", post(api::handle_cache_post_root).delete(api::handle_cache_delete_root))
        .route("/add/:key", post(api::handle_add))
        .route("/lock/:name", post(api::handle_lock_acquire).delete(api::handle_lock_release))
        .route("/ping", get(api::handle_ping))
        // Allow a little headroom over MAX_VALUE_SIZE so oversize bodies reach the
        // handler and get a proper 413 with a message, rather than axum's bare default.
        .layer(DefaultBodyLimit::max(MAX_VALUE_SIZE + 1024))
        .layer(axum::middleware::from_fn_with_state(state.clone(), api::auth_middleware))
        .with_state(state)
}

/// Owns the booted engine and runs the full node lifecycle: replication
/// listener, outbound peer dials, and the HTTP API.
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
}

impl Server {
    pub async fn boot(config: Config) -> Result<Self, HypercacheError> {
        config.validate()?;
        let persistence = Arc::new(hypercacheio_core::SqlitePersistence::open(&config.persistence_path)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = Engine::boot(clock, persistence).await;
        Ok(Self { config, engine })
    }

    /// Runs the node until `ctrl_c` fires. `ready_tx` is signalled with the
    /// bound HTTP address once the API is accepting connections — tests
    /// that bind an ephemeral port await this to learn the real address
    /// before issuing requests.
    pub async fn run(self, ready_tx: tokio::sync::oneshot::Sender<SocketAddr>) -> Result<(), HypercacheError> {
        let replication_listener = TcpListener::bind(self.config.replication_addr()?)
            .await
            .map_err(HypercacheError::Bind)?;
        info!(addr = %replication_listener.local_addr().unwrap(), "replication listener bound");
        self.engine.peers().spawn_inbound(replication_listener);

        for peer in &self.config.peers {
            info!(peer = %peer, "dialing configured peer");
            self.engine.peers().spawn_outbound(peer.clone());
        }

        let state = AppState {
            engine: Arc::clone(&self.engine),
            clock: Arc::new(SystemClock),
            codec: Arc::new(hypercacheio_common::JsonValueCodec),
            token: self.config.token().to_string(),
            key_prefix: self.config.key_prefix.clone(),
        };
        let app = build_router(state);

        let listener = TcpListener::bind(self.config.listen_addr()?).await.map_err(HypercacheError::Bind)?;
        let local_addr = listener.local_addr().map_err(HypercacheError::Bind)?;
        info!(addr = %local_addr, "HTTP API listening");
        ready_tx.send(local_addr).ok();

        axum::serve(listener, app).await.map_err(HypercacheError::Bind)?;
        Ok(())
    }
}
