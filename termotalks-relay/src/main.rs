//! `TermoTalks` relay server: broadcasts chat messages between clients.
//!
//! An axum WebSocket server. Every JSON message a client sends is relayed
//! to all connected clients; nothing is stored.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080, route /ws
//! cargo run --bin termotalks-relay
//!
//! # Run on custom address, without echoing messages back to their sender
//! cargo run --bin termotalks-relay -- --bind 127.0.0.1:9000 --echo-to-sender false
//!
//! # Or via environment variable
//! TERMOTALKS_ADDR=127.0.0.1:9000 cargo run --bin termotalks-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use termotalks_relay::config::{RelayCliArgs, RelayConfig};
use termotalks_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        route = %config.route,
        echo_to_sender = config.echo_to_sender,
        "starting termotalks relay server"
    );

    let state = Arc::new(RelayState::new(config.settings()));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
