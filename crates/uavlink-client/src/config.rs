//! Client configuration.
//!
//! ```toml
//! url = "ws://127.0.0.1:4224/uav"
//! dialect = "telemetry"
//! bulk_definitions = true
//! request_timeout_ms = 2000
//!
//! [telemetry]
//! local_status = "GCSTelemetryStats"
//! remote_status = "FlightTelemetryStats"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uavlink_core::Dialect;

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the peer.
    pub url: String,
    pub dialect: Dialect,
    /// Expect the first frame after connecting to be an array of every definition.
    pub bulk_definitions: bool,
    /// Deadline used by waits that are not given one explicitly.
    pub request_timeout_ms: Option<u64>,
    /// Run the telemetry handshake; readiness then waits for it.
    pub telemetry: Option<TelemetryConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4224/".to_owned(),
            dialect: Dialect::PubSub,
            bulk_definitions: false,
            request_timeout_ms: Some(5_000),
            telemetry: None,
        }
    }
}

impl ClientConfig {
    /// Telemetry dialect with the handshake enabled.
    pub fn telemetry(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dialect: Dialect::Telemetry,
            telemetry: Some(TelemetryConfig::default()),
            ..Self::default()
        }
    }

    /// Pub/sub dialect without a handshake.
    pub fn pub_sub(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Names used by the telemetry handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Object this client publishes its link status on.
    pub local_status: String,
    /// Object the peer reports its link status on.
    pub remote_status: String,
    /// Field carrying the status value in both objects.
    pub status_field: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            local_status: "GCSTelemetryStats".to_owned(),
            remote_status: "FlightTelemetryStats".to_owned(),
            status_field: "Status".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = ClientConfig::from_toml_str(r#"url = "ws://drone:4224""#).unwrap();
        assert_eq!(config.url, "ws://drone:4224");
        assert_eq!(config.dialect, Dialect::PubSub);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(5)));
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn telemetry_section() {
        let config = ClientConfig::from_toml_str(
            r#"
            dialect = "telemetry"
            bulk_definitions = true

            [telemetry]
            remote_status = "LinkStats"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::Telemetry);
        assert!(config.bulk_definitions);
        let telemetry = config.telemetry.unwrap();
        assert_eq!(telemetry.remote_status, "LinkStats");
        assert_eq!(telemetry.local_status, "GCSTelemetryStats");
    }

    #[test]
    fn rejects_unknown_dialect() {
        assert!(matches!(
            ClientConfig::from_toml_str(r#"dialect = "mqtt""#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn constructors() {
        let config = ClientConfig::telemetry("ws://x");
        assert_eq!(config.dialect, Dialect::Telemetry);
        assert!(config.telemetry.is_some());
        assert_eq!(ClientConfig::pub_sub("ws://y").dialect, Dialect::PubSub);
    }
}
