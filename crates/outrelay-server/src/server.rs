//! `RelayServer`: Axum HTTP server in front of the connection manager.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers::{self, LineHandler};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Where line, close, and keepalive requests go.
    pub handler: Arc<dyn LineHandler>,
    /// When the server started.
    pub start_time: Instant,
}

/// The relay's inbound HTTP server.
pub struct RelayServer {
    config: ServerConfig,
    handler: Arc<dyn LineHandler>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server dispatching to `handler`.
    pub fn new(config: ServerConfig, handler: Arc<dyn LineHandler>) -> Self {
        Self {
            config,
            handler,
            shutdown: Arc::new(ShutdownCoordinator::default()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            handler: Arc::clone(&self.handler),
            start_time: self.start_time,
        };

        Router::new()
            .route("/line/{id}", get(handlers::line))
            .route("/close/{id}", get(handlers::close))
            .route("/keepalive/{id}", get(handlers::keepalive))
            .route("/health", get(handlers::health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown starts.
    ///
    /// Port 0 binds a free port; the handle reports the actual address.
    pub async fn listen(&self) -> Result<ServerHandle, std::io::Error> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let service = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(%addr, "relay server listening");
        let task = tokio::spawn(async move {
            let stopped = axum::serve(listener, service)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = stopped {
                warn!(error = %err, "relay server stopped with error");
            }
        });

        Ok(ServerHandle { addr, task })
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// A running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port actually bound.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The serving task, for [`ShutdownCoordinator::drain`].
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}
