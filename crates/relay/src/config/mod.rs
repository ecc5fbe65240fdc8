//! Relay Configuration
//!
//! Settings are layered with figment: built-in defaults, then a TOML file,
//! then `RELAY_*` environment variables. The binary merges CLI flags on top
//! before extracting. The default `relay.toml` may be absent; a file named
//! explicitly must exist.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Environment variable prefix for overrides (`RELAY_PORT=9000`).
pub const ENV_PREFIX: &str = "RELAY_";

/// Config file read when none is given
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Routes served by the HTTP router that the WebSocket path may not shadow
const RESERVED_PATHS: &[&str] = &["/", "/health", "/connections"];

/// Shape of inbound and outbound frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Opaque text, relayed as `"<senderId>: <text>"`
    #[default]
    Text,
    /// JSON `{"clientId": ..., "message": ...}`, relayed as JSON
    Structured,
}

/// What to do with a structured frame that fails to parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log and keep reading
    #[default]
    Skip,
    /// End the connection
    Close,
}

/// What to do when a recipient's outbound queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the message for that recipient only
    #[default]
    Drop,
    /// Disconnect the slow consumer
    Disconnect,
}

/// Which identifier tags a structured-mode message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderTag {
    /// Keep the `clientId` the client put in the frame
    #[default]
    Client,
    /// Overwrite `clientId` with the server-assigned connection id
    Server,
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the WebSocket upgrade endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default)]
    pub mode: PayloadMode,

    #[serde(default)]
    pub malformed_policy: MalformedPolicy,

    /// Whether the sender receives its own messages
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,

    #[serde(default)]
    pub structured_sender: SenderTag,

    /// Maximum number of queued outbound messages per connection
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Close connections that send nothing for this long
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Allowed CORS origins. Empty means permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            mode: PayloadMode::default(),
            malformed_policy: MalformedPolicy::default(),
            echo_to_sender: true,
            structured_sender: SenderTag::default(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            idle_timeout_secs: None,
            cors_origins: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Build the layered figment: defaults, TOML file, environment.
    ///
    /// With `None` the default file is read if present. An explicit path is
    /// required to exist, and extraction fails otherwise.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = match path {
            Some(path) => Toml::file_exact(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };
        Figment::from(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract and validate a configuration from a figment
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.outbound_queue_capacity == 0 {
            return Err(RelayError::Config(
                "outbound_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        if RESERVED_PATHS.contains(&self.ws_path.as_str()) {
            return Err(RelayError::Config(format!(
                "ws_path collides with a built-in route: {}",
                self.ws_path
            )));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(RelayError::Config(
                "idle_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address: {}", e)))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_true() -> bool {
    true
}

fn default_outbound_queue_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.mode, PayloadMode::Text);
        assert_eq!(config.malformed_policy, MalformedPolicy::Skip);
        assert!(config.echo_to_sender);
        assert_eq!(config.structured_sender, SenderTag::Client);
        assert_eq!(config.outbound_queue_capacity, 64);
        assert!(config.idle_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = RelayConfig::load(None).expect("defaults should load");
            assert_eq!(config, RelayConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let result = RelayConfig::load(Some(Path::new("does-not-exist.toml")));
            assert!(matches!(result, Err(RelayError::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_default_file_is_read_when_present() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "port = 9300")?;
            let config = RelayConfig::load(None).expect("config should load");
            assert_eq!(config.port, 9300);
            Ok(())
        });
    }

    #[test]
    fn test_load_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relay.toml",
                r#"
port = 9100
mode = "structured"
malformed_policy = "close"
echo_to_sender = false
overflow_policy = "disconnect"
idle_timeout_secs = 30
cors_origins = ["http://localhost:4200"]
"#,
            )?;

            let config =
                RelayConfig::load(Some(Path::new("relay.toml"))).expect("config should load");
            assert_eq!(config.port, 9100);
            assert_eq!(config.mode, PayloadMode::Structured);
            assert_eq!(config.malformed_policy, MalformedPolicy::Close);
            assert!(!config.echo_to_sender);
            assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
            assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
            assert_eq!(config.cors_origins, vec!["http://localhost:4200".to_string()]);
            // untouched fields keep their defaults
            assert_eq!(config.ws_path, "/ws");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("relay.toml", "port = 9100\nmode = \"structured\"")?;
            jail.set_env("RELAY_PORT", 9200);
            jail.set_env("RELAY_STRUCTURED_SENDER", "server");

            let config =
                RelayConfig::load(Some(Path::new("relay.toml"))).expect("config should load");
            assert_eq!(config.port, 9200);
            assert_eq!(config.mode, PayloadMode::Structured);
            assert_eq!(config.structured_sender, SenderTag::Server);
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RelayConfig {
            outbound_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_ws_path() {
        let config = RelayConfig {
            ws_path: "ws".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_reserved_ws_path() {
        let config = RelayConfig {
            ws_path: "/health".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_bind_addr() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 8123,
            ..Default::default()
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8123");

        let bad = RelayConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(bad.bind_addr().is_err());
    }
}
