//! Configuration for the Test-Session Gateway
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Main configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session and connection limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Notification delivery configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Equipment status source configuration
    #[serde(default)]
    pub equipment: EquipmentConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Public hostname for generating stream URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_public_host() -> String {
    "localhost".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            host: default_host(),
            public_host: default_public_host(),
        }
    }
}

/// Token authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret key for signing connection tokens
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Token time-to-live in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: u64,
}

fn default_secret() -> String {
    // In production, this should be set via environment variable
    "your-secret-key-change-in-production".to_string()
}

fn default_token_ttl() -> u64 {
    900 // 15 minutes
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            token_ttl_seconds: default_token_ttl(),
        }
    }
}

/// Session and connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent clients per session
    #[serde(default = "default_max_clients")]
    pub max_clients_per_session: usize,

    /// Broadcast messages replayed to reconnecting clients
    #[serde(default = "default_buffer_size")]
    pub message_buffer_size: usize,

    /// Seconds between heartbeat pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds without a pong before a connection is force-closed
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds of session inactivity before a forced failure
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Seconds without data on the current test before a gap warning
    #[serde(default = "default_data_gap")]
    pub data_gap_secs: u64,

    /// Seconds between supervisor ticks
    #[serde(default = "default_supervisor_tick")]
    pub supervisor_tick_secs: u64,

    /// Warning alerts before a session is paused
    #[serde(default = "default_alert_pause_threshold")]
    pub alert_pause_threshold: u32,

    /// Seconds between equipment status polls
    #[serde(default = "default_equipment_poll")]
    pub equipment_poll_secs: u64,
}

fn default_max_clients() -> usize {
    5
}

fn default_buffer_size() -> usize {
    100
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_session_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_data_gap() -> u64 {
    30
}

fn default_supervisor_tick() -> u64 {
    5
}

fn default_alert_pause_threshold() -> u32 {
    3
}

fn default_equipment_poll() -> u64 {
    15
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients_per_session: default_max_clients(),
            message_buffer_size: default_buffer_size(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            session_timeout_secs: default_session_timeout(),
            data_gap_secs: default_data_gap(),
            supervisor_tick_secs: default_supervisor_tick(),
            alert_pause_threshold: default_alert_pause_threshold(),
            equipment_poll_secs: default_equipment_poll(),
        }
    }
}

impl LimitsConfig {
    /// Hub-facing view of these limits.
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            max_clients_per_session: self.max_clients_per_session,
            message_buffer_size: self.message_buffer_size,
            heartbeat_interval: StdDuration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::seconds(self.heartbeat_timeout_secs as i64),
        }
    }

    /// Supervision-facing view of these limits.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            session_timeout: Duration::seconds(self.session_timeout_secs as i64),
            data_gap: Duration::seconds(self.data_gap_secs as i64),
            supervisor_tick: StdDuration::from_secs(self.supervisor_tick_secs),
            alert_pause_threshold: self.alert_pause_threshold,
            equipment_poll: StdDuration::from_secs(self.equipment_poll_secs),
        }
    }
}

/// Resolved limits used by the connection hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub max_clients_per_session: usize,
    pub message_buffer_size: usize,
    pub heartbeat_interval: StdDuration,
    pub heartbeat_timeout: Duration,
}

/// Resolved limits used by session supervision.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub session_timeout: Duration,
    pub data_gap: Duration,
    pub supervisor_tick: StdDuration,
    pub alert_pause_threshold: u32,
    pub equipment_poll: StdDuration,
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook endpoint for notification delivery; log-only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of delivery retries
    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_webhook_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: default_webhook_timeout(),
            max_retries: default_webhook_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Equipment status source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Base URL of the equipment status service; a static healthy source
    /// is used when unset (dev/test)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            notifications: NotificationConfig::default(),
            equipment: EquipmentConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        // Server
        if let Ok(port) = std::env::var("TESTLANE_HTTP_PORT") {
            if let Ok(p) = port.parse() {
                config.server.http_port = p;
            }
        }
        if let Ok(host) = std::env::var("TESTLANE_HOST") {
            config.server.host = host;
        }
        if let Ok(host) = std::env::var("TESTLANE_PUBLIC_HOST") {
            config.server.public_host = host;
        }

        // Auth
        if let Ok(secret) = std::env::var("TESTLANE_JWT_SECRET") {
            config.auth.secret = secret;
        }
        if let Ok(ttl) = std::env::var("TESTLANE_JWT_TTL") {
            if let Ok(t) = ttl.parse() {
                config.auth.token_ttl_seconds = t;
            }
        }

        // Limits
        if let Ok(max) = std::env::var("TESTLANE_MAX_CLIENTS") {
            if let Ok(m) = max.parse() {
                config.limits.max_clients_per_session = m;
            }
        }
        if let Ok(timeout) = std::env::var("TESTLANE_SESSION_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                config.limits.session_timeout_secs = t;
            }
        }

        // Collaborators
        if let Ok(url) = std::env::var("TESTLANE_WEBHOOK_URL") {
            config.notifications.webhook_url = Some(url);
        }
        if let Ok(url) = std::env::var("TESTLANE_EQUIPMENT_URL") {
            config.equipment.base_url = Some(url);
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.limits.max_clients_per_session, 5);
        assert_eq!(config.limits.message_buffer_size, 100);
        assert_eq!(config.limits.session_timeout_secs, 1800);
        assert_eq!(config.auth.token_ttl_seconds, 900);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
[server]
http_port = 9090
public_host = "lanes.example.com"

[auth]
secret = "test-secret"
token_ttl_seconds = 600

[limits]
max_clients_per_session = 3
alert_pause_threshold = 5

[notifications]
webhook_url = "https://hooks.example.com/testlane"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.server.public_host, "lanes.example.com");
        assert_eq!(config.auth.secret, "test-secret");
        assert_eq!(config.limits.max_clients_per_session, 3);
        assert_eq!(config.limits.alert_pause_threshold, 5);
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/testlane")
        );
        // Unset fields keep their defaults
        assert_eq!(config.limits.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_settings_views() {
        let limits = LimitsConfig::default();
        let hub = limits.hub_settings();
        assert_eq!(hub.max_clients_per_session, 5);
        assert_eq!(hub.heartbeat_interval, StdDuration::from_secs(30));
        assert_eq!(hub.heartbeat_timeout, Duration::seconds(60));

        let monitor = limits.monitor_settings();
        assert_eq!(monitor.session_timeout, Duration::seconds(1800));
        assert_eq!(monitor.alert_pause_threshold, 3);
    }
}
