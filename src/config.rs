//! # Configuration Management
//!
//! Centralized configuration for the game-server protocol core.
//!
//! This module provides structured configuration for the server, transport,
//! heartbeat supervision, and session lifecycle, including timeouts and
//! queue limits.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! ## Security Considerations
//! - The maximum frame size bounds per-frame allocation against corrupt or
//!   malicious peers
//! - The backpressure limit bounds per-connection outbound memory; a slow
//!   client fills its own queue and is disconnected

use crate::core::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Heartbeat supervision configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("GAMEWIRE_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(capacity) = std::env::var("GAMEWIRE_BACKPRESSURE_LIMIT") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.server.backpressure_limit = val;
            }
        }

        if let Ok(interval) = std::env::var("GAMEWIRE_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.heartbeat.interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("GAMEWIRE_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.heartbeat.timeout = Duration::from_millis(val);
            }
        }

        if let Ok(idle) = std::env::var("GAMEWIRE_SESSION_IDLE_TIMEOUT_MS") {
            if let Ok(val) = idle.parse::<u64>() {
                config.session.idle_timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.heartbeat.validate());
        errors.extend(self.session.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Maximum number of messages in a per-connection outbound queue
    pub backpressure_limit: usize,

    /// Inactivity timeout before the registry evicts a connection
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Interval of the registry's inactive-connection cleanup pass
    #[serde(with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            backpressure_limit: 64,
            connection_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 10_000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.cleanup_interval.as_millis() < 100 {
            errors.push("Cleanup interval too short (minimum: 100ms)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum allowed frame payload size in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_size
            ));
        }

        errors
    }
}

/// Heartbeat supervision configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between probe scans
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Silence duration after which a scan counts as a missed probe
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Missed probes before a connection is declared dead
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(30),
            max_missed: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Validate heartbeat configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.timeout < self.interval {
            errors.push("Heartbeat timeout must be at least the probe interval".to_string());
        }

        if self.max_missed == 0 {
            errors.push("Heartbeat max_missed must be greater than 0".to_string());
        }

        errors
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity duration before a session is marked Idle
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Interval of the background idle sweep
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Extra grace beyond the idle timeout before an idle session is evicted
    #[serde(with = "duration_serde")]
    pub disconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Session idle timeout too short (minimum: 100ms)".to_string());
        }

        if self.sweep_interval.as_millis() < 100 {
            errors.push("Session sweep interval too short (minimum: 100ms)".to_string());
        }

        if self.sweep_interval > self.idle_timeout {
            errors.push(
                "Sweep interval longer than idle timeout; idle sessions will linger".to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("gamewire"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn toml_roundtrip_with_overrides() {
        let toml = r#"
            [server]
            address = "0.0.0.0:7777"
            backpressure_limit = 16

            [heartbeat]
            interval = 5000
            timeout = 10000
            max_missed = 2

            [session]
            idle_timeout = 60000
        "#;

        let config = NetworkConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:7777");
        assert_eq!(config.server.backpressure_limit, 16);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat.max_missed, 2);
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
        // Unspecified sections fall back to defaults.
        assert_eq!(config.transport.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn bad_address_flagged() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.address = "not-an-address".into();
        });
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn heartbeat_timeout_must_cover_interval() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.heartbeat.interval = Duration::from_secs(30);
            c.heartbeat.timeout = Duration::from_secs(10);
        });
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn zero_max_missed_rejected() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.heartbeat.max_missed = 0;
        });
        assert!(config.validate_strict().is_err());
    }
}
