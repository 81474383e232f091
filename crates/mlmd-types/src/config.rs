//! Charm configuration
//!
//! The only recognised option is `port`, the gRPC port exposed by the
//! metadata store server. It is validated once, when the configuration is
//! read, and carried around as a [`GrpcPort`] afterwards.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU16;
use thiserror::Error;

/// Default gRPC port when the option is not set.
pub const DEFAULT_GRPC_PORT: u16 = 8080;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid port {value:?}: {reason}")]
    InvalidPort { value: String, reason: String },

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// A validated, positive TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "u16")]
pub struct GrpcPort(NonZeroU16);

impl GrpcPort {
    pub fn new(port: u16) -> Result<Self, ConfigError> {
        NonZeroU16::new(port)
            .map(Self)
            .ok_or_else(|| ConfigError::InvalidPort {
                value: port.to_string(),
                reason: "port must be a positive integer".to_string(),
            })
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }

    fn from_integer(value: i64) -> Result<Self, ConfigError> {
        let port = u16::try_from(value).map_err(|_| ConfigError::InvalidPort {
            value: value.to_string(),
            reason: "port must be between 1 and 65535".to_string(),
        })?;
        Self::new(port)
    }
}

const DEFAULT_PORT: NonZeroU16 = match NonZeroU16::new(DEFAULT_GRPC_PORT) {
    Some(port) => port,
    None => panic!("default gRPC port must be non-zero"),
};

impl Default for GrpcPort {
    fn default() -> Self {
        Self(DEFAULT_PORT)
    }
}

impl From<GrpcPort> for u16 {
    fn from(port: GrpcPort) -> Self {
        port.get()
    }
}

impl std::fmt::Display for GrpcPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GrpcPort {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed.parse().map_err(|_| ConfigError::InvalidPort {
            value: s.to_string(),
            reason: "port must be an integer".to_string(),
        })?;
        Self::from_integer(value)
    }
}

impl TryFrom<serde_json::Value> for GrpcPort {
    type Error = ConfigError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match &value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::from_integer(i),
                None => Err(ConfigError::InvalidPort {
                    value: n.to_string(),
                    reason: "port must be an integer".to_string(),
                }),
            },
            serde_json::Value::String(s) => s.parse(),
            other => Err(ConfigError::InvalidPort {
                value: other.to_string(),
                reason: "port must be an integer".to_string(),
            }),
        }
    }
}

/// Charm configuration as read from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmConfig {
    #[serde(default)]
    pub port: GrpcPort,
}

impl CharmConfig {
    /// Parse the JSON object returned by the platform's config tool.
    ///
    /// Unknown options are ignored; a missing `port` falls back to the default.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let object = value
            .as_object()
            .ok_or_else(|| ConfigError::Malformed(format!("expected an object, got {}", value)))?;

        let port = match object.get("port") {
            None | Some(serde_json::Value::Null) => GrpcPort::default(),
            Some(raw) => GrpcPort::try_from(raw.clone())?,
        };

        Ok(Self { port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_port() {
        assert_eq!(GrpcPort::default().get(), 8080);
        assert_eq!(CharmConfig::default().port.get(), DEFAULT_GRPC_PORT);
    }

    #[test]
    fn test_port_from_number_and_string() {
        assert_eq!(GrpcPort::try_from(json!(9090)).unwrap().get(), 9090);
        assert_eq!(GrpcPort::try_from(json!("9090")).unwrap().get(), 9090);
        assert_eq!(" 8081 ".parse::<GrpcPort>().unwrap().get(), 8081);
    }

    #[test]
    fn test_port_rejects_invalid_values() {
        assert!(GrpcPort::new(0).is_err());
        assert!(GrpcPort::try_from(json!(-1)).is_err());
        assert!(GrpcPort::try_from(json!(70000)).is_err());
        assert!(GrpcPort::try_from(json!(80.5)).is_err());
        assert!(GrpcPort::try_from(json!("grpc")).is_err());
        assert!(GrpcPort::try_from(json!(true)).is_err());
    }

    #[test]
    fn test_charm_config_from_json() {
        let config = CharmConfig::from_json(&json!({"port": 9090, "other": "x"})).unwrap();
        assert_eq!(config.port.get(), 9090);

        let config = CharmConfig::from_json(&json!({})).unwrap();
        assert_eq!(config.port.get(), 8080);

        let err = CharmConfig::from_json(&json!({"port": 0})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));

        assert!(matches!(
            CharmConfig::from_json(&json!([1, 2])),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_port_serde_round_trip_shape() {
        let config: CharmConfig = serde_json::from_value(json!({"port": "8082"})).unwrap();
        assert_eq!(serde_json::to_value(&config).unwrap(), json!({"port": 8082}));
    }
}
