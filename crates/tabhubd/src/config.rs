//! Hub and daemon configuration.
//!
//! Every field has a default, so an empty (or missing) TOML file yields a
//! working configuration:
//!
//! ```toml
//! listen = "127.0.0.1:7878"
//!
//! [hub]
//! queue_capacity = 256
//! ping_interval_ms = 30000
//! heartbeat_timeout_ms = 120000
//! takeover = "evict_all"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tabhub_protocol::DEFAULT_MAX_FRAME_BYTES;

/// Environment variable overriding the listen address.
pub const LISTEN_ENV: &str = "TABHUB_LISTEN";

/// Default listen address for the daemon.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";

/// What happens to a user's existing sessions when a new one registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoverPolicy {
    /// Close every prior session of the user. One session per user.
    #[default]
    EvictAll,
    /// Close only the prior session of the same tab. Tabs coexist, and the
    /// single active tab is enforced by `user_active` reconciliation.
    SameTab,
}

/// Tuning knobs for the registry and the session pumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound queue size per session.
    pub queue_capacity: usize,
    /// How often the write pump pings an otherwise idle client.
    pub ping_interval_ms: u64,
    /// Deadline for writing one batch of frames.
    pub write_timeout_ms: u64,
    /// How often the heartbeat monitor sweeps the registry.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a session is evicted.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
    /// Capacity of the registry command channel.
    pub command_buffer: usize,
    /// Capacity of the registry event broadcast channel.
    pub event_buffer: usize,
    pub takeover: TakeoverPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_interval_ms: 30_000,
            write_timeout_ms: 10_000,
            heartbeat_interval_ms: 60_000,
            heartbeat_timeout_ms: 120_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            command_buffer: 100,
            event_buffer: 256,
            takeover: TakeoverPolicy::EvictAll,
        }
    }
}

/// Tickers reject a zero period, so intervals bottom out here.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms).max(MIN_INTERVAL)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms).max(MIN_INTERVAL)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms).max(MIN_INTERVAL)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Rejects values that would stall or spin the hub.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("queue_capacity", self.queue_capacity as u64),
            ("ping_interval_ms", self.ping_interval_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("max_frame_bytes", self.max_frame_bytes as u64),
            ("command_buffer", self.command_buffer as u64),
            ("event_buffer", self.event_buffer as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }
        Ok(())
    }
}

/// Daemon-level configuration: listener plus hub settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP address accepting client connections.
    pub listen: String,
    /// Time a new connection has to send its hello frame.
    pub handshake_timeout_ms: u64,
    /// Push `user_status_update` events to connected users on presence changes.
    pub status_fanout: bool,
    pub hub: HubConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            handshake_timeout_ms: 5_000,
            status_fanout: true,
            hub: HubConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads configuration from an optional file, then applies environment
    /// overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };

        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            if !listen.is_empty() {
                config.listen = listen;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".to_string()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.hub.validate()
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_frame_bytes, 512 * 1024);
        assert_eq!(config.takeover, TakeoverPolicy::EvictAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = DaemonConfig::from_toml(
            r#"
            listen = "0.0.0.0:9000"
            status_fanout = false

            [hub]
            queue_capacity = 8
            takeover = "same_tab"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert!(!config.status_fanout);
        assert_eq!(config.hub.queue_capacity, 8);
        assert_eq!(config.hub.takeover, TakeoverPolicy::SameTab);
        assert_eq!(config.hub.ping_interval_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = HubConfig {
            heartbeat_interval_ms: 0,
            ..HubConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_ms"));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = HubConfig {
            ping_interval_ms: 0,
            write_timeout_ms: 0,
            heartbeat_interval_ms: 0,
            ..HubConfig::default()
        };
        assert_eq!(config.ping_interval(), Duration::from_millis(1));
        assert_eq!(config.write_timeout(), Duration::from_millis(1));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_parse_error() {
        let err = DaemonConfig::from_toml("listen = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hub]\nheartbeat_timeout_ms = 5000").unwrap();

        let config = DaemonConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.hub.heartbeat_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DaemonConfig::load(Some(Path::new("/nonexistent/tabhub.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let rendered = DaemonConfig::default().to_toml().unwrap();
        assert!(rendered.contains("takeover = \"evict_all\""));
        assert_eq!(DaemonConfig::from_toml(&rendered).unwrap(), DaemonConfig::default());
    }
}
