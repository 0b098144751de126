// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Session configuration.
//!
//! Configuration is read from a TOML file (by default
//! `$XDG_CONFIG_HOME/poslink/config.toml`). Every section and field is
//! optional and falls back to the defaults below:
//!
//! ```toml
//! [server]
//! url = "wss://rt.example.com/ws"   # scope id is appended per connection
//! connect_timeout_ms = 10000
//!
//! [auth]
//! timeout_ms = 10000
//!
//! [heartbeat]
//! interval_ms = 15000
//! pong_timeout_ms = 5000
//! max_missed_pongs = 3
//!
//! [backoff]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! jitter_factor = 0.3
//! max_attempts = 10
//!
//! [queue]
//! max_size = 100
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "poslink";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub heartbeat: HeartbeatConfig,
    pub backoff: BackoffConfig,
    pub queue: QueueConfig,
    pub client: ClientConfig,
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base WebSocket URL; the scope id is appended as the last path segment.
    pub url: String,
    /// Max time for the transport to open (milliseconds).
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: "ws://localhost:7890/ws".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Authentication handshake settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Max time to wait for `AUTHENTICATED` (milliseconds).
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig { timeout_ms: 10_000 }
    }
}

/// Liveness probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Ping interval (milliseconds).
    pub interval_ms: u64,
    /// Max time to wait for each pong (milliseconds).
    pub pong_timeout_ms: u64,
    /// Consecutive misses before the connection is declared dead.
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval_ms: 15_000,
            pong_timeout_ms: 5_000,
            max_missed_pongs: 3,
        }
    }
}

/// Reconnect schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound for any retry delay (milliseconds).
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay, in `[0, 1)`.
    pub jitter_factor: f64,
    /// Retries before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.3,
            max_attempts: 10,
        }
    }
}

/// Outbound buffering while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig { max_size: 100 }
    }
}

/// Metadata presented in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Builds the connection URL for a scope: `<url>/<scope-id>`.
    pub fn url_for(&self, scope_id: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), scope_id)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

impl SessionConfig {
    /// Creates a default config pointing at the given server URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        SessionConfig {
            server: ServerConfig {
                url: url.into(),
                ..ServerConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and the server URL.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = &self.server.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "server url '{}' must start with ws:// or wss://",
                url
            )));
        }
        if url_carries_token(url) {
            return Err(ConfigError::Invalid(
                "server url must not carry a token; credentials travel in the handshake"
                    .to_string(),
            ));
        }
        if self.queue.max_size == 0 {
            return Err(ConfigError::Invalid("queue.max_size must be at least 1".into()));
        }
        if self.heartbeat.max_missed_pongs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.max_missed_pongs must be at least 1".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.pong_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat interval and pong timeout must be positive".into(),
            ));
        }
        if self.heartbeat.pong_timeout_ms >= self.heartbeat.interval_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.pong_timeout_ms ({}) must be shorter than heartbeat.interval_ms ({})",
                self.heartbeat.pong_timeout_ms, self.heartbeat.interval_ms
            )));
        }
        let jitter = self.backoff.jitter_factor;
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter_factor {} must be in [0, 1)",
                jitter
            )));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff.base_delay_ms must not exceed backoff.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// True if the URL query string has a credential parameter.
fn url_carries_token(url: &str) -> bool {
    let Some((_, query)) = url.split_once('?') else {
        return false;
    };
    query.split('&').any(|pair| {
        let key = pair.split('=').next().unwrap_or_default();
        key.eq_ignore_ascii_case("token") || key.eq_ignore_ascii_case("access_token")
    })
}

/// Default location of the config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
