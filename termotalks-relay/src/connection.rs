//! A single client connection: identity, lifecycle state, and outbound half.
//!
//! The inbound half of the transport is not stored here. It is owned by the
//! connection's reader task, while the registry and the fan-out loop share the
//! [`Connection`] through `Arc` clones and only ever write to it.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::error::TransportError;

/// The outbound half of a connection's transport.
pub type OutboundSink = Pin<Box<dyn Sink<WsMessage, Error = axum::Error> + Send>>;

/// Opaque, time-ordered identifier of a connection (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a connection.
///
/// Transitions only move forward: `Connecting -> Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake completed, not yet registered.
    Connecting,
    /// Registered and eligible for broadcasts.
    Active,
    /// Terminal. Removed from the registry.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Handle to one client's persistent transport.
pub struct Connection {
    id: ConnectionId,
    outbound: Mutex<OutboundSink>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Wraps the outbound half of a freshly upgraded transport.
    ///
    /// The connection starts in [`ConnectionState::Connecting`] and becomes
    /// active when it is registered.
    #[must_use]
    pub fn new(outbound: OutboundSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: ConnectionId::new(),
            outbound: Mutex::new(outbound),
            state,
        }
    }

    /// This connection's identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns `true` once the connection has reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// `Connecting -> Active`. Returns `false` if the connection was not
    /// connecting.
    pub(crate) fn activate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Moves to `Closed`. Returns `false` if it was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        })
    }

    /// Resolves once the connection is closed. Returns immediately if it
    /// already is.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only errors if it is dropped.
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// Writes one frame, failing if it does not complete within `timeout`.
    ///
    /// The timeout covers waiting for the outbound lock as well as the write.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the connection is closed,
    /// [`TransportError::Timeout`] if the write stalls, or
    /// [`TransportError::WebSocket`] if the transport rejects it.
    pub async fn send(&self, frame: WsMessage, timeout: Duration) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let write = async {
            let mut outbound = self.outbound.lock().await;
            outbound.send(frame).await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Sends an optional close frame and closes the outbound half.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the transport is already gone or the
    /// close does not finish within `timeout`.
    pub async fn close(
        &self,
        frame: Option<CloseFrame>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let shutdown = async {
            let mut outbound = self.outbound.lock().await;
            if let Some(frame) = frame {
                outbound.send(WsMessage::Close(Some(frame))).await?;
            }
            outbound.close().await
        };
        match tokio::time::timeout(timeout, shutdown).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
