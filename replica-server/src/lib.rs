//! Replica Server - rewriting proxy gateway.
//!
//! Relays traffic to a source origin, rewriting HTML on the fly so the site
//! works from the mirror's address, and exposes the capture endpoints used to
//! produce a static copy.
//!
//! ## Endpoints
//!
//! - `GET /html-json/*` - Stream a capture document for one path or a batch
//! - `GET /rewrite-page/*` - Same as `/html-json/*`
//! - `GET /reset-proxy-capture` - Clear the tracked resource set
//! - `GET /proxy-capture` - Snapshot of the tracked resource set
//! - `ANY /*` - Relay to the source origin
//!
//! ## Example
//!
//! ```no_run
//! use replica_core::MirrorConfig;
//! use replica_scanner::Origin;
//! use replica_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let origin = Origin::parse("http://localhost:3001").unwrap();
//!     let config = ServerConfig::new(MirrorConfig::new(Some(origin)));
//!     Server::new(config).unwrap().run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod state;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use replica_core::MirrorConfig;
use replica_scanner::ScanError;

pub use error::{ApiError, Result};
pub use handlers::MirrorParams;
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 3000).
    pub port: u16,
    /// Origins and default capture paths.
    pub mirror: MirrorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(MirrorConfig::default())
    }
}

impl ServerConfig {
    pub fn new(mirror: MirrorConfig) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            mirror,
        }
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// HTTP client setup failed.
    #[error("client error: {0}")]
    Client(#[from] ScanError),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the router around existing state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/html-json/", get(handlers::capture))
        .route("/html-json/{*path}", get(handlers::capture))
        .route("/rewrite-page/", get(handlers::capture))
        .route("/rewrite-page/{*path}", get(handlers::capture))
        .route("/reset-proxy-capture", get(handlers::reset_proxy_capture))
        .route("/proxy-capture", get(handlers::proxy_capture))
        .fallback(handlers::proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The gateway server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a new server with the given configuration.
    pub fn new(config: ServerConfig) -> std::result::Result<Self, ServerError> {
        let state = AppState::new(config.mirror.clone())?;
        Self::with_state(config, state)
    }

    /// Creates a server with custom application state.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until Ctrl-C.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        info!("Starting Replica gateway on http://{}", self.addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
