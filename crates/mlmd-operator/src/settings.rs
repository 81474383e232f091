//! Runtime settings for the operator binary
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! file, then `MLMD_`-prefixed environment variables. Sections and keys are
//! separated by a double underscore so keys may contain single ones
//! (`MLMD_LOGGING__LEVEL=debug`, `MLMD_WORKLOAD__TIMEOUT_SECS=30`).

use mlmd_reconciler::ServiceSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main operator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorSettings {
    /// Workload container and server process
    #[serde(default)]
    pub workload: WorkloadSettings,

    /// Platform hook tools
    #[serde(default)]
    pub juju: JujuSettings,

    /// Kubernetes API access
    #[serde(default)]
    pub kubernetes: KubernetesSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Workload container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Container running the metadata store server
    pub container: String,

    /// Supervisor service name, also the layer label
    pub service: String,

    /// Pebble client binary in the charm container
    pub pebble: String,

    /// Directory holding one Pebble socket per workload container
    pub sockets: String,

    /// Mounted storage handed over to the server user
    pub storage: String,

    /// Identity the server runs as
    pub user: String,

    /// Server configuration file pushed for the SQLite backend
    pub config_file: String,

    /// SQLite database location
    pub sqlite_uri: String,

    /// Timeout for a single Pebble call in seconds
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            container: "mlmd-grpc-server".to_string(),
            service: "mlmd".to_string(),
            pebble: "/charm/bin/pebble".to_string(),
            sockets: "/charm/containers".to_string(),
            storage: "/data".to_string(),
            user: "_daemon_".to_string(),
            config_file: "/config/config.proto".to_string(),
            sqlite_uri: "file:/data/mlmd.db".to_string(),
            timeout_secs: default_command_timeout(),
        }
    }
}

impl WorkloadSettings {
    pub fn socket_path(&self) -> String {
        format!("{}/{}/pebble.socket", self.sockets.trim_end_matches('/'), self.container)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            service_name: self.service.clone(),
            user: self.user.clone(),
            config_file: self.config_file.clone(),
            sqlite_uri: self.sqlite_uri.clone(),
        }
    }
}

/// Hook tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JujuSettings {
    /// Timeout for a single hook tool call in seconds
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl Default for JujuSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout(),
        }
    }
}

impl JujuSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Kubernetes settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSettings {
    /// Field manager used for server-side apply
    #[serde(default = "default_field_manager")]
    pub manager: String,

    /// Namespace override; defaults to the model name
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            manager: default_field_manager(),
            namespace: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_command_timeout() -> u64 {
    60
}

fn default_field_manager() -> String {
    "mlmd-operator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl OperatorSettings {
    /// Load settings from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(
        path: Option<&str>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&OperatorSettings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(env);

        builder.build()?.try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("MLMD")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
