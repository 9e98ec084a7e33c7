//! Configuration system for the `TermoTalks` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/termotalks-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use termotalks_proto::message::MAX_FRAME_SIZE;

use crate::dispatcher::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT, DispatchSettings, EchoPolicy,
};
use crate::handshake::OriginPolicy;
use crate::relay::RelaySettings;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    route: Option<String>,
    queue_capacity: Option<usize>,
    write_timeout_ms: Option<u64>,
    max_frame_size: Option<usize>,
    echo_to_sender: Option<bool>,
    allowed_origins: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TermoTalks broadcast relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "TERMOTALKS_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/termotalks-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP route that accepts WebSocket upgrades.
    #[arg(long)]
    pub route: Option<String>,

    /// Number of messages the broadcast queue holds before readers wait.
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Upper bound in milliseconds on a single write to one client.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Whether a client receives its own messages (true/false).
    #[arg(long)]
    pub echo_to_sender: Option<bool>,

    /// Browser origin allowed to connect; repeatable, `*` allows any.
    #[arg(long = "allow-origin")]
    pub allowed_origins: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TERMOTALKS_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Route that accepts WebSocket upgrades.
    pub route: String,
    /// Bound of the broadcast queue.
    pub queue_capacity: usize,
    /// Upper bound on a single client write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Whether senders receive their own messages.
    pub echo_to_sender: bool,
    /// Allowed browser origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            route: "/ws".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout_ms: 5000,
            max_frame_size: MAX_FRAME_SIZE,
            echo_to_sender: true,
            allowed_origins: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or a resolved value is out of range.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        let allowed_origins = if cli.allowed_origins.is_empty() {
            file.server
                .allowed_origins
                .clone()
                .unwrap_or(defaults.allowed_origins)
        } else {
            cli.allowed_origins.clone()
        };

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            route: cli
                .route
                .clone()
                .or_else(|| file.server.route.clone())
                .unwrap_or(defaults.route),
            queue_capacity: cli
                .queue_capacity
                .or(file.server.queue_capacity)
                .unwrap_or(defaults.queue_capacity),
            write_timeout_ms: cli
                .write_timeout_ms
                .or(file.server.write_timeout_ms)
                .unwrap_or(defaults.write_timeout_ms),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            echo_to_sender: cli
                .echo_to_sender
                .or(file.server.echo_to_sender)
                .unwrap_or(defaults.echo_to_sender),
            allowed_origins,
            log_level: cli.log_level.clone(),
        }
    }

    /// Rejects values the relay cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be at least 1".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid("max_frame_size must be at least 1".into()));
        }
        if !self.route.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "route must start with '/': {}",
                self.route
            )));
        }
        Ok(())
    }

    /// Runtime settings derived from this configuration.
    #[must_use]
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            route: self.route.clone(),
            max_frame_size: self.max_frame_size,
            origins: OriginPolicy::from_allowed(&self.allowed_origins),
            dispatch: DispatchSettings {
                queue_capacity: self.queue_capacity,
                write_timeout: Duration::from_millis(self.write_timeout_ms),
                echo: EchoPolicy::from_flag(self.echo_to_sender),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("termotalks-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
