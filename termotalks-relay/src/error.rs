//! Error types for the relay core.
//!
//! Every error here is scoped to a single request or connection. None of them
//! stop the server; only startup failures in `main` are fatal.

use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// The upgrade handshake failed; no connection was created.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The request's `Origin` header is not on the allow-list.
    #[error("origin {origin:?} is not allowed")]
    OriginRejected {
        /// The rejected origin as sent by the client.
        origin: String,
    },

    /// The request is not a valid WebSocket upgrade.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[from] WebSocketUpgradeRejection),
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        match self {
            Self::OriginRejected { .. } => {
                (StatusCode::FORBIDDEN, self.to_string()).into_response()
            }
            Self::Upgrade(rejection) => rejection.into_response(),
        }
    }
}

/// A read or write on a connection's transport failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was already closed.
    #[error("connection closed")]
    Closed,

    /// A write did not complete within the configured bound.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying WebSocket reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// The server could not be started.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound listener could not report its address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}
