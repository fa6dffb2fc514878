//! Server configuration.
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. `PORT` (for hosting platforms that assign one)
//! 3. TOML file (`--config <path>`, or `keyrelay.toml` in the working directory)
//! 4. `KEYRELAY_*` environment variables, e.g. `KEYRELAY_OUTBOUND_QUEUE=128`
//! 5. Command-line flags (`--host`, `--port`)
//!
//! # Example
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 9000
//! max_frame_bytes = 65536
//! outbound_queue = 32
//! close_grace_ms = 500
//! log_format = "json"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use keyrelay::RelayServerConfig;
use serde::Deserialize;
use tracing::info;

/// Config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "keyrelay.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Largest accepted WebSocket message in bytes
    pub max_frame_bytes: usize,
    /// Outbound queue depth per connection
    pub outbound_queue: usize,
    /// Flush window for the final error frame on a forced close
    pub close_grace_ms: u64,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let relay = RelayServerConfig::default();
        Self {
            host: relay.addr.ip(),
            port: relay.addr.port(),
            max_frame_bytes: relay.max_frame_bytes,
            outbound_queue: relay.outbound_queue,
            close_grace_ms: u64::try_from(relay.close_grace.as_millis()).unwrap_or(u64::MAX),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let port = match &env {
            Some(vars) => vars.get("PORT").cloned(),
            None => std::env::var("PORT").ok(),
        };

        let mut builder = Config::builder();
        if let Some(port) = port {
            let port: u16 = port
                .parse()
                .map_err(|e| ConfigError::Message(format!("invalid PORT {port:?}: {e}")))?;
            builder = builder.set_default("port", i64::from(port))?;
        }

        builder = match path {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml)),
            None => builder.add_source(
                File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
            ),
        };

        let config: Self = builder
            .add_source(
                Environment::with_prefix("KEYRELAY")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, host: Option<IpAddr>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay_config()
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))
    }

    /// Socket address to listen on.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Convert to the relay library's configuration.
    pub fn relay_config(&self) -> RelayServerConfig {
        RelayServerConfig {
            addr: self.addr(),
            max_frame_bytes: self.max_frame_bytes,
            outbound_queue: self.outbound_queue,
            close_grace: Duration::from_millis(self.close_grace_ms),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!(
            addr = %self.addr(),
            max_frame_bytes = self.max_frame_bytes,
            outbound_queue = self.outbound_queue,
            close_grace_ms = self.close_grace_ms,
            log_format = %self.log_format,
            "Server configuration loaded"
        );
    }
}
