//! `TermoTalks` relay server library.
//!
//! Exposes the relay for use in tests and embedding. The relay accepts
//! WebSocket connections, keeps them in a registry, and broadcasts every
//! message a client sends to all connected clients.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod reader;
pub mod registry;
pub mod relay;
