//! Relay server implementation.
//!
//! Serves the relay stream and the health probes over a single axum router:
//!
//! - `GET /`: WebSocket upgrade to the relay stream; plain `ok` otherwise
//! - `GET /health`: plain `ok` (for load balancers)
//! - `GET /api/v1/health`: JSON status including the online identity count

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::connection::{handle_socket, ConnectionConfig};
use crate::registry::ConnectionRegistry;
use crate::{ConnectionId, RelayError};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to bind (default: 0.0.0.0:8765)
    pub addr: SocketAddr,
    /// Largest accepted WebSocket message in bytes
    pub max_frame_bytes: usize,
    /// Outbound queue depth per connection
    pub outbound_queue: usize,
    /// How long a forced close may spend flushing the final error frame
    pub close_grace: Duration,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            max_frame_bytes: 1024 * 1024,
            outbound_queue: 64,
            close_grace: Duration::from_secs(2),
        }
    }
}

impl RelayServerConfig {
    /// Reject limits that would make the relay unusable.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_frame_bytes == 0 {
            return Err(RelayError::config("max_frame_bytes must be at least 1"));
        }
        if self.outbound_queue == 0 {
            return Err(RelayError::config("outbound_queue must be at least 1"));
        }
        Ok(())
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_queue: self.outbound_queue,
            close_grace: self.close_grace,
        }
    }
}

#[derive(Clone)]
struct RelayState {
    config: Arc<RelayServerConfig>,
    connection_registry: Arc<ConnectionRegistry>,
}

/// Relay server instance.
pub struct RelayServer {
    config: RelayServerConfig,
    connection_registry: Arc<ConnectionRegistry>,
}

impl RelayServer {
    /// Create a new relay server instance.
    pub fn new(config: RelayServerConfig) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            config,
            connection_registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RelayServerConfig {
        &self.config
    }

    /// Get the connection registry.
    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.connection_registry
    }

    /// Build the axum router (shared between startup and tests).
    pub fn router(&self) -> Router {
        create_router(RelayState {
            config: Arc::new(self.config.clone()),
            connection_registry: Arc::clone(&self.connection_registry),
        })
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Relay server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Relay server stopped");
        Ok(())
    }
}

fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(detailed_health_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// GET /
///
/// Upgrades to the relay stream when the request is a WebSocket handshake,
/// otherwise acts as a liveness probe.
async fn root_handler(ws: Option<WebSocketUpgrade>, State(state): State<RelayState>) -> Response {
    let Some(ws) = ws else {
        return "ok".into_response();
    };

    let conn_id = ConnectionId::new();
    let registry = Arc::clone(&state.connection_registry);
    let connection_config = state.config.connection_config();
    info!(conn_id = %conn_id, "Relay WebSocket connection request");

    ws.max_message_size(state.config.max_frame_bytes)
        .max_frame_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, conn_id, registry, connection_config))
}

/// Simple health check endpoint (for load balancers)
async fn health_handler() -> &'static str {
    "ok"
}

/// Response for detailed health check
#[derive(Debug, Serialize)]
struct DetailedHealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    online: usize,
}

/// Detailed health check endpoint (for monitoring)
async fn detailed_health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(DetailedHealthResponse {
        status: "healthy",
        service: "keyrelay",
        version: env!("CARGO_PKG_VERSION"),
        online: state.connection_registry.connection_count(),
    })
}
