//! Server configuration.
//!
//! Configuration is layered from:
//! - a TOML file (`--config <path>`, or the first of the default locations)
//! - environment variables (`SWITCHBOARD__PORT`, `SWITCHBOARD__LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchboard_core::{HubConfig, InboundPolicy, SessionConfig};
use switchboard_protocol::WireFormat;
use switchboard_transport::{ConnectionConfig, FrameKind};

const CONFIG_PATHS: [&str; 3] = [
    "switchboard.toml",
    "/etc/switchboard/switchboard.toml",
    "~/.config/switchboard/switchboard.toml",
];

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

    /// Keepalive and write deadlines.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Hub behaviour.
    #[serde(default)]
    pub hub: HubSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Header carrying the authenticated user id, set by the gateway in
    /// front of the server.
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Encoding of envelopes pushed to clients.
    #[serde(default)]
    pub wire_format: WireFormat,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Largest frame accepted from a client, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Frames a session may have queued before it is evicted.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Client frames waiting to be relayed before readers are held back.
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive probe interval in milliseconds.
    #[serde(default = "default_ping_period")]
    pub ping_period_ms: u64,

    /// A session with no inbound traffic for this long is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Deadline for each write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Hub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSection {
    /// What to do with frames clients send.
    #[serde(default)]
    pub inbound_policy: InboundPolicy,
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_frame_size() -> usize {
    512
}

fn default_outbound_queue() -> usize {
    256
}

fn default_inbound_queue() -> usize {
    1024
}

fn default_ping_period() -> u64 {
    54_000 // 9/10 of the idle timeout
}

fn default_idle_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
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
            heartbeat: HeartbeatConfig::default(),
            hub: HubSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            user_header: default_user_header(),
            wire_format: WireFormat::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            outbound_queue: default_outbound_queue(),
            inbound_queue: default_inbound_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: default_ping_period(),
            idle_timeout_ms: default_idle_timeout(),
            write_timeout_ms: default_write_timeout(),
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
    /// Load configuration.
    ///
    /// `explicit` takes precedence over the default locations. Environment
    /// variables override whatever the file sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the environment cannot be parsed, or
    /// the result fails [`Config::validate`].
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_PATHS
                .iter()
                .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
                .find(|path| path.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("SWITCHBOARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session machinery cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_period_ms == 0 {
            bail!("heartbeat.ping_period_ms must be positive");
        }
        if self.heartbeat.ping_period_ms >= self.heartbeat.idle_timeout_ms {
            bail!(
                "heartbeat.ping_period_ms ({}) must be below heartbeat.idle_timeout_ms ({})",
                self.heartbeat.ping_period_ms,
                self.heartbeat.idle_timeout_ms
            );
        }
        if self.heartbeat.write_timeout_ms == 0 {
            bail!("heartbeat.write_timeout_ms must be positive");
        }
        if self.limits.outbound_queue == 0 {
            bail!("limits.outbound_queue must be positive");
        }
        if self.limits.inbound_queue == 0 {
            bail!("limits.inbound_queue must be positive");
        }
        if self.limits.max_frame_size == 0 {
            bail!("limits.max_frame_size must be positive");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Limits applied to each accepted connection.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_frame_size: self.limits.max_frame_size,
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
            idle_timeout: Duration::from_millis(self.heartbeat.idle_timeout_ms),
            frame_kind: if self.transport.wire_format.is_text() {
                FrameKind::Text
            } else {
                FrameKind::Binary
            },
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_capacity: self.limits.outbound_queue,
            ping_period: Duration::from_millis(self.heartbeat.ping_period_ms),
        }
    }

    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            inbound_policy: self.hub.inbound_policy,
            inbound_capacity: self.limits.inbound_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.transport.user_header, "x-user-id");
        assert_eq!(config.limits.max_frame_size, 512);
        assert_eq!(config.limits.outbound_queue, 256);
        assert_eq!(config.hub.inbound_policy, InboundPolicy::Discard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let broken = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(broken.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            wire_format = "msgpack"

            [limits]
            max_connections = 50000

            [hub]
            inbound_policy = "broadcast_others"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.outbound_queue, 256);
        assert_eq!(config.transport.wire_format, WireFormat::MessagePack);
        assert_eq!(config.hub.inbound_policy, InboundPolicy::BroadcastOthers);
        assert_eq!(config.connection_config().frame_kind, FrameKind::Binary);
    }

    #[test]
    fn test_ping_must_beat_idle_timeout() {
        let mut config = Config::default();
        config.heartbeat.ping_period_ms = config.heartbeat.idle_timeout_ms;
        assert!(config.validate().is_err());

        config.heartbeat.ping_period_ms = 1_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = Config::default();
        config.limits.outbound_queue = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.inbound_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_session_settings() {
        let config = Config::default();

        let connection = config.connection_config();
        assert_eq!(connection.idle_timeout, Duration::from_secs(60));
        assert_eq!(connection.write_timeout, Duration::from_secs(10));
        assert_eq!(connection.frame_kind, FrameKind::Text);

        let session = config.session_config();
        assert_eq!(session.ping_period, Duration::from_secs(54));
        assert_eq!(session.outbound_capacity, 256);

        let hub = config.hub_config();
        assert_eq!(hub.inbound_policy, InboundPolicy::Discard);
        assert_eq!(hub.inbound_capacity, 1024);
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let (_dir, path) = write_config("port = 9100\n[limits]\noutbound_queue = 32\n");
        std::env::set_var("SWITCHBOARD__LIMITS__MAX_FRAME_SIZE", "2048");

        let config = Config::load(Some(&path));
        std::env::remove_var("SWITCHBOARD__LIMITS__MAX_FRAME_SIZE");

        let config = config.unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.limits.outbound_queue, 32);
        assert_eq!(config.limits.max_frame_size, 2048);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        assert!(Config::load(Some(Path::new("/nonexistent/switchboard.toml"))).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_settings() {
        let (_dir, path) = write_config("[heartbeat]\nping_period_ms = 70000\n");
        assert!(Config::load(Some(&path)).is_err());
    }
}
