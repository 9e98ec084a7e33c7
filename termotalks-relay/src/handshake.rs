//! Upgrade handshake: turns an HTTP request into a registered connection.
//!
//! Negotiation happens in two steps. [`negotiate`] runs before the upgrade
//! and may reject the request (origin policy, malformed upgrade headers);
//! nothing is created or registered in that case. [`accept`] runs on the
//! upgraded socket and performs exactly one registry insertion.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use futures_util::StreamExt;
use futures_util::stream::SplitStream;

use crate::connection::Connection;
use crate::error::HandshakeError;
use crate::registry::ConnectionRegistry;

/// Which request origins may open a connection.
///
/// Requests without an `Origin` header (terminal and native clients) are
/// always accepted; the policy only constrains browser-style requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Any origin is accepted.
    AllowAny,
    /// Only the listed origins are accepted (case-insensitive).
    AllowList(Vec<String>),
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::AllowList(Vec::new())
    }
}

impl OriginPolicy {
    /// Builds a policy from configured origins; `"*"` accepts everything.
    #[must_use]
    pub fn from_allowed(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == "*") {
            Self::AllowAny
        } else {
            Self::AllowList(origins.to_vec())
        }
    }

    /// Checks a request origin against the policy.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OriginRejected`] if the origin is present and
    /// not allowed.
    pub fn check(&self, origin: Option<&str>) -> Result<(), HandshakeError> {
        let Some(origin) = origin else {
            return Ok(());
        };
        let allowed = match self {
            Self::AllowAny => true,
            Self::AllowList(list) => {
                let origin = origin.trim_end_matches('/');
                list.iter()
                    .any(|a| a.trim_end_matches('/').eq_ignore_ascii_case(origin))
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(HandshakeError::OriginRejected {
                origin: origin.to_string(),
            })
        }
    }
}

/// Validates an inbound upgrade request before any connection exists.
///
/// # Errors
///
/// Returns [`HandshakeError`] if the origin is not allowed or the request is
/// not a valid WebSocket upgrade.
pub fn negotiate(
    policy: &OriginPolicy,
    headers: &HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<WebSocketUpgrade, HandshakeError> {
    let origin = headers
        .get(ORIGIN)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
    policy.check(origin.as_deref())?;
    Ok(upgrade?)
}

/// Wraps an upgraded socket in a [`Connection`] and registers it.
///
/// Returns the registered connection and the inbound half of the socket,
/// which belongs to the connection's reader task.
pub fn accept(
    socket: WebSocket,
    registry: &ConnectionRegistry,
) -> (Arc<Connection>, SplitStream<WebSocket>) {
    let (outbound, inbound) = socket.split();
    let conn = Arc::new(Connection::new(Box::pin(outbound)));
    let registered = registry.register(Arc::clone(&conn));
    debug_assert!(registered, "fresh connection must be connecting");
    (conn, inbound)
}
