//! Relay server core: shared state, HTTP routes, and the per-connection
//! lifecycle.
//!
//! Each upgraded WebSocket is registered in the [`ConnectionRegistry`] and
//! driven by its own [`Reader`] on the task axum spawns for the upgrade. A
//! single [`Dispatcher`] task fans every received message out to all
//! registered connections.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use termotalks_proto::message::MAX_FRAME_SIZE;

use crate::dispatcher::{DispatchHandle, DispatchSettings, Dispatcher};
use crate::error::ServerError;
use crate::handshake::{self, OriginPolicy};
use crate::reader::Reader;
use crate::registry::ConnectionRegistry;

/// Runtime settings for a relay instance.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Route that accepts WebSocket upgrades.
    pub route: String,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Which browser origins may connect.
    pub origins: OriginPolicy,
    /// Dispatch queue and fan-out tunables.
    pub dispatch: DispatchSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            route: "/ws".to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            origins: OriginPolicy::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

/// Shared relay state: the registry and the producer side of the dispatch
/// queue.
pub struct RelayState {
    registry: Arc<ConnectionRegistry>,
    dispatch: DispatchHandle,
    settings: RelaySettings,
}

impl RelayState {
    /// Creates the relay state and starts its fan-out loop.
    ///
    /// Must be called from within a Tokio runtime. The loop stops once the
    /// state (and every reader holding a dispatch handle) is dropped.
    #[must_use]
    pub fn new(settings: RelaySettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (dispatcher, dispatch) = Dispatcher::new(Arc::clone(&registry), settings.dispatch);
        // Detached: the loop ends on its own when the queue closes.
        drop(dispatcher.spawn());
        Self {
            registry,
            dispatch,
            settings,
        }
    }

    /// The connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The settings this relay runs with.
    #[must_use]
    pub const fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Number of currently registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

/// Builds the HTTP router: the upgrade route and `/health`.
pub fn router(state: Arc<RelayState>) -> Router {
    let route = state.settings.route.clone();
    Router::new()
        .route(&route, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Starts the relay server with default settings on the given address and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_state(addr, Arc::new(RelayState::new(RelaySettings::default()))).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`crate::config::RelayConfig::settings`] to build the state from the
/// resolved configuration.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that negotiates and upgrades a WebSocket connection.
async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match handshake::negotiate(&state.settings.origins, &headers, upgrade) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            tracing::warn!(error = %e, "handshake rejected");
            return e.into_response();
        }
    };

    let limit = transport_limit(state.settings.max_frame_size);
    upgrade
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Hard cap applied by the WebSocket layer.
///
/// Kept above the codec limit so that a moderately oversized frame reaches the
/// codec and is answered with a 1009 close. Frames beyond this cap are dropped
/// by the transport without a close frame.
const fn transport_limit(max_frame_size: usize) -> usize {
    max_frame_size.saturating_mul(2)
}

/// Drives one upgraded connection from registration to teardown.
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (conn, inbound) = handshake::accept(socket, &state.registry);
    tracing::info!(
        conn_id = %conn.id(),
        connections = state.registry.len(),
        "connection registered"
    );

    let reader = Reader::new(
        conn,
        Arc::clone(&state.registry),
        state.dispatch.clone(),
        state.settings.max_frame_size,
    );
    reader.run(inbound).await;
}

/// Body of the `/health` response.
#[derive(Debug, serde::Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connections: state.connection_count(),
    })
}
