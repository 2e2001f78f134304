//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MURMUR_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Message bus connection.
    #[serde(default)]
    pub bus: BusConfig,

    /// Presence store connection.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Graceful shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound WebSocket frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-session outbound queue depth, in messages. A session whose
    /// queue overflows is disconnected rather than waited on.
    #[serde(default = "default_session_send_buffer")]
    pub session_send_buffer: usize,
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus address as a redis URL; credentials go in the URL.
    #[serde(default = "default_bus_address")]
    pub address: String,

    /// Topic every envelope travels on.
    #[serde(default = "default_bus_topic")]
    pub topic: String,
}

/// Presence store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Store address as a redis URL; credentials go in the URL.
    #[serde(default = "default_presence_address")]
    pub address: String,

    /// Key namespace.
    #[serde(default = "default_presence_namespace")]
    pub namespace: String,

    /// Liveness lease TTL in seconds.
    #[serde(default = "default_presence_ttl")]
    pub ttl_secs: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Presence refresh interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Budget for draining sessions and background tasks, in milliseconds.
    #[serde(default = "default_shutdown_deadline")]
    pub deadline_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/api/chat".to_string()
}

fn default_max_message_size() -> usize {
    4096
}

fn default_session_send_buffer() -> usize {
    64
}

fn default_bus_address() -> String {
    std::env::var("MURMUR_BUS_ADDRESS").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

fn default_bus_topic() -> String {
    "chat:messages".to_string()
}

fn default_presence_address() -> String {
    std::env::var("MURMUR_PRESENCE_ADDRESS")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

fn default_presence_namespace() -> String {
    "chat".to_string()
}

fn default_presence_ttl() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    60_000
}

fn default_shutdown_deadline() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            bus: BusConfig::default(),
            presence: PresenceConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            shutdown: ShutdownConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            session_send_buffer: default_session_send_buffer(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: default_bus_address(),
            topic: default_bus_topic(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            address: default_presence_address(),
            namespace: default_presence_namespace(),
            ttl_secs: default_presence_ttl(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_shutdown_deadline(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "murmur.toml",
            "/etc/murmur/murmur.toml",
            "~/.config/murmur/murmur.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}

impl HeartbeatConfig {
    /// Refresh interval as a `Duration`.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ShutdownConfig {
    /// Drain budget as a `Duration`.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl PresenceConfig {
    /// Lease TTL as a `Duration`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.max_message_size, 4096);
        assert_eq!(config.bus.topic, "chat:messages");
        assert_eq!(config.presence.ttl_secs, 300);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(60));
        assert_eq!(config.shutdown.deadline(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 3001,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().port(), 3001);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [bus]
            topic = "canvas:events"

            [limits]
            max_message_size = 8192
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.bus.topic, "canvas:events");
        assert_eq!(config.limits.max_message_size, 8192);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.presence.namespace, "chat");
    }
}
