//! Per-connection reader task.
//!
//! Owns the inbound half of one connection for its whole active lifetime:
//! decodes frames into messages and submits them to the dispatcher. On any
//! terminal condition it unregisters the connection, closes the transport,
//! and returns why it stopped.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, close_code};
use futures_util::{Stream, StreamExt};
use termotalks_proto::codec::{self, DecodeError};

use crate::connection::Connection;
use crate::dispatcher::DispatchHandle;
use crate::error::TransportError;
use crate::registry::ConnectionRegistry;

/// Upper bound on sending the close frame when a reader stops.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a reader task stopped.
#[derive(Debug, thiserror::Error)]
pub enum Termination {
    /// The client sent a close frame.
    #[error("client closed the connection")]
    ClientClosed,
    /// The inbound stream ended without a close frame.
    #[error("inbound stream ended")]
    EndOfStream,
    /// Reading from the transport failed.
    #[error("read failed: {0}")]
    Transport(#[from] TransportError),
    /// The client sent a frame that is not a valid message.
    #[error("invalid frame: {0}")]
    Decode(#[from] DecodeError),
    /// The connection was closed by the relay, e.g. after a failed write.
    #[error("connection closed by relay")]
    ClosedByRelay,
    /// The dispatcher stopped accepting messages.
    #[error("dispatcher unavailable")]
    DispatcherClosed,
}

impl Termination {
    /// Close frame to send to the client, if any.
    fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::ClientClosed | Self::EndOfStream | Self::Transport(_) => return None,
            Self::Decode(DecodeError::FrameTooLarge { .. }) => {
                (close_code::SIZE, "frame too large")
            }
            Self::Decode(_) => (close_code::INVALID, "invalid message frame"),
            Self::ClosedByRelay => (close_code::POLICY, "delivery failed"),
            Self::DispatcherClosed => (close_code::AWAY, "relay shutting down"),
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }

    /// Returns `true` for endings initiated by the client in the normal way.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::ClientClosed | Self::EndOfStream)
    }
}

/// The reader task for one registered connection.
pub struct Reader {
    conn: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    dispatch: DispatchHandle,
    max_frame_size: usize,
}

impl Reader {
    /// Creates a reader for a connection that has already been registered.
    #[must_use]
    pub const fn new(
        conn: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        dispatch: DispatchHandle,
        max_frame_size: usize,
    ) -> Self {
        Self {
            conn,
            registry,
            dispatch,
            max_frame_size,
        }
    }

    /// Reads until a terminal condition, then tears the connection down.
    ///
    /// The inbound half is dropped on return, releasing the transport once
    /// the outbound half is no longer referenced.
    pub async fn run<S>(self, mut inbound: S) -> Termination
    where
        S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    {
        let id = self.conn.id();
        let reason = self.read_loop(&mut inbound).await;

        self.registry.unregister(id);
        let closing = match reason.close_frame() {
            Some(frame) => Some(Some(frame)),
            // Closing the sink flushes the reply to the client's close frame.
            None if matches!(reason, Termination::ClientClosed) => Some(None),
            None => None,
        };
        if let Some(frame) = closing
            && let Err(e) = self.conn.close(frame, CLOSE_TIMEOUT).await
        {
            tracing::debug!(conn_id = %id, error = %e, "failed to close transport");
        }

        if reason.is_clean() {
            tracing::info!(conn_id = %id, reason = %reason, "connection closed");
        } else {
            tracing::warn!(conn_id = %id, reason = %reason, "connection terminated");
        }
        reason
    }

    async fn read_loop<S>(&self, inbound: &mut S) -> Termination
    where
        S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    {
        let id = self.conn.id();
        loop {
            let next = tokio::select! {
                () = self.conn.closed() => return Termination::ClosedByRelay,
                next = inbound.next() => next,
            };

            let decoded = match next {
                None => return Termination::EndOfStream,
                Some(Err(e)) => return Termination::Transport(e.into()),
                Some(Ok(WsMessage::Close(_))) => return Termination::ClientClosed,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Text(text))) => {
                    codec::decode(text.as_str(), self.max_frame_size)
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    codec::decode_bytes(&bytes, self.max_frame_size)
                }
            };
            let message = match decoded {
                Ok(message) => message,
                Err(e) => return Termination::Decode(e),
            };

            tracing::debug!(conn_id = %id, len = message.content().len(), "message received");

            tokio::select! {
                () = self.conn.closed() => return Termination::ClosedByRelay,
                submitted = self.dispatch.submit(id, message) => {
                    if submitted.is_err() {
                        return Termination::DispatcherClosed;
                    }
                }
            }
        }
    }
}
