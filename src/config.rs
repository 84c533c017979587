//! # Configuration Management
//!
//! Centralized configuration for the game server and its clients.
//!
//! This module provides structured configuration for the reliable and
//! connectionless endpoints, admission-control thresholds, client timeouts and
//! logging output.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Admission Thresholds
//! All read averages are in bytes per accounting window. A session whose
//! average, or whose last closed window alone, is above
//! `max_session_read_average` is disconnected; the sum of all sessions above
//! `max_total_read_average` pauses new accepts; a session below
//! `min_session_read_average` for `idle_timeout` is pruned as stale.

use crate::core::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Fixed receive buffer of the connectionless endpoint
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Probes sent per reachability check
pub const PROBE_BURST: usize = 5;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Throughput thresholds
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
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
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `MMO_*` environment variables.
    ///
    /// Unparsable values are ignored and the current value kept.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MMO_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Ok(addr) = std::env::var("MMO_UDP_ADDRESS") {
            self.server.udp_address = addr;
        }

        if let Some(val) = env_u64("MMO_MAX_TOTAL_READ_AVERAGE") {
            self.admission.max_total_read_average = val;
        }

        if let Some(val) = env_u64("MMO_MAX_SESSION_READ_AVERAGE") {
            self.admission.max_session_read_average = val;
        }

        if let Some(val) = env_u64("MMO_MIN_SESSION_READ_AVERAGE") {
            self.admission.min_session_read_average = val;
        }

        if let Some(val) = env_u64("MMO_IDLE_TIMEOUT_MS") {
            self.admission.idle_timeout = Duration::from_millis(val);
        }
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

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.admission.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// [`NetworkConfig::validate`] folded into one `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        match self.validate().as_slice() {
            [] => Ok(()),
            errors => Err(ProtocolError::ConfigError(format!(
                "{} configuration problem(s): {}",
                errors.len(),
                errors.join("; ")
            ))),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn check_duration(errors: &mut Vec<String>, label: &str, value: Duration, min: Duration, max: Duration) {
    if value < min {
        errors.push(format!("{label} too short: {value:?} (minimum: {min:?})"));
    } else if value > max {
        errors.push(format!("{label} too long: {value:?} (maximum: {max:?})"));
    }
}

fn check_count(errors: &mut Vec<String>, label: &str, value: usize, max: usize) {
    if value == 0 {
        errors.push(format!("{label} must be greater than 0"));
    } else if value > max {
        errors.push(format!("{label} too large: {value} (maximum: {max})"));
    }
}

fn check_address(errors: &mut Vec<String>, label: &str, address: &str) {
    if address.is_empty() {
        errors.push(format!("{label} cannot be empty"));
    } else if address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {} format: '{address}' (expected format: '0.0.0.0:8080')",
            label.to_lowercase()
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Reliable endpoint listen address (e.g., "127.0.0.1:39390")
    pub address: String,

    /// Connectionless endpoint listen address
    pub udp_address: String,

    /// Maximum frames waiting in one session's outbound queue
    pub outbound_queue_limit: usize,

    /// Maximum number of concurrent sessions
    pub max_connections: usize,

    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,

    /// Malformed or truncated frames tolerated before a session is closed
    pub max_protocol_violations: u32,

    /// Frames with unknown opcodes tolerated before a session is closed
    pub max_unknown_opcodes: u32,

    /// Reject LOGIN commands whose identity is not sealed to the server key
    #[serde(default)]
    pub require_sealed_login: bool,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:39390"),
            udp_address: String::from("127.0.0.1:39391"),
            outbound_queue_limit: 256,
            max_connections: 1000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_protocol_violations: 3,
            max_unknown_opcodes: 16,
            require_sealed_login: false,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        check_address(&mut errors, "Server address", &self.address);
        check_address(&mut errors, "UDP address", &self.udp_address);

        check_count(&mut errors, "Outbound queue limit", self.outbound_queue_limit, 1_000_000);
        check_count(&mut errors, "Max connections", self.max_connections, 100_000);

        // a LOGIN with a sealed identity must fit
        if self.max_frame_size < 256 {
            errors.push(format!("Max frame size too small: {} (minimum: 256)", self.max_frame_size));
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!("Max frame size exceeds the length prefix: {}", self.max_frame_size));
        }

        check_duration(
            &mut errors,
            "Shutdown timeout",
            self.shutdown_timeout,
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        errors
    }
}

/// Throughput thresholds and accounting parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Upper bound on the sum of all sessions' averages
    pub max_total_read_average: u64,

    /// Per-session limit on the average, and on any single closed window
    pub max_session_read_average: u64,

    /// Per-session average below which the session counts as idle
    pub min_session_read_average: u64,

    /// Length of one accounting window
    #[serde(with = "duration_serde")]
    pub accounting_window: Duration,

    /// Number of closed windows the rolling average spans
    pub average_windows: usize,

    /// How long a session may stay under the minimum before it is pruned
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_total_read_average: 5_000_000,
            max_session_read_average: 60_000,
            min_session_read_average: 0,
            accounting_window: timeout::ACCOUNTING_WINDOW,
            average_windows: 4,
            idle_timeout: timeout::IDLE_TIMEOUT,
        }
    }
}

impl AdmissionConfig {
    /// Validate admission configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_session_read_average == 0 {
            errors.push("Max session read average must be greater than 0".to_string());
        }

        if self.max_total_read_average < self.max_session_read_average {
            errors.push(format!(
                "Max total read average ({}) is below max session read average ({})",
                self.max_total_read_average, self.max_session_read_average
            ));
        }

        if self.min_session_read_average >= self.max_session_read_average {
            errors.push(format!(
                "Min session read average ({}) must be below max session read average ({})",
                self.min_session_read_average, self.max_session_read_average
            ));
        }

        check_duration(
            &mut errors,
            "Accounting window",
            self.accounting_window,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        check_count(&mut errors, "Average windows", self.average_windows, 3600);

        if self.idle_timeout < self.accounting_window {
            errors.push("Idle timeout must be at least one accounting window".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Local connectionless port announced in LOGIN
    pub udp_port: u16,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for waiting for response messages
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:39390"),
            udp_port: 39392,
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        check_address(&mut errors, "Client address", &self.address);

        let floor = Duration::from_millis(100);
        check_duration(&mut errors, "Connection timeout", self.connection_timeout, floor, Duration::from_secs(300));
        check_duration(&mut errors, "Response timeout", self.response_timeout, floor, Duration::from_secs(3600));
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mmo-server"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.trim().is_empty() {
            errors.push("Application name cannot be empty".to_string());
        }

        match (self.log_to_file, self.log_file_path.as_deref()) {
            (true, None) => {
                errors.push("log_file_path must be specified when log_to_file is true".to_string())
            }
            (true, Some(path)) => {
                let dir = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty());
                if let Some(dir) = dir.filter(|d| !d.is_dir()) {
                    errors.push(format!("Log directory missing: {}", dir.display()));
                }
            }
            (false, _) if !self.log_to_console => {
                errors.push("At least one logging output (console or file) must be enabled".to_string())
            }
            _ => {}
        }
        errors
    }
}

/// Durations as whole milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
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

/// `tracing::Level` as a lowercase string
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Level>()
            .map_err(|_| serde::de::Error::custom(format!("unknown log level '{raw}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NetworkConfig::default().validate().is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NetworkConfig::from_toml(
            r#"
            [admission]
            max_total_read_average = 900
            max_session_read_average = 300
            min_session_read_average = 5
            accounting_window = 250
            average_windows = 2
            idle_timeout = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.admission.max_total_read_average, 900);
        assert_eq!(config.admission.accounting_window, Duration::from_millis(250));
        assert_eq!(config.server.address, ServerConfig::default().address);
    }

    #[test]
    fn test_example_round_trips() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.server.udp_address, ServerConfig::default().udp_address);
        assert_eq!(parsed.logging.log_level, Level::INFO);
    }

    #[test]
    fn test_threshold_ordering_checked() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.admission.min_session_read_average = 100;
            c.admission.max_session_read_average = 50;
        });
        let errors = config.admission.validate();
        assert!(errors.iter().any(|e| e.contains("Min session read average")));
    }
}
