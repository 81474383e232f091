//! Process-supervision plan model
//!
//! A [`Layer`] is the desired configuration for one or more named services;
//! a [`Plan`] is what the workload's supervisor currently runs (all layers
//! combined). Both share the [`ServiceSpec`] shape so they can be compared
//! service by service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a layer's service definition combines with earlier layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    Merge,
    #[default]
    Replace,
}

/// Whether the supervisor starts the service on boot/replan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Enabled,
    #[default]
    Disabled,
}

/// One supervised service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "override", default)]
    pub override_: Override,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    /// Full command line, as a single string.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub startup: Startup,

    /// Identity the process runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Whether the running definition already matches this desired one.
    ///
    /// `override` only affects how layers combine and is not part of the
    /// resulting definition, so it is ignored here.
    pub fn matches(&self, running: &ServiceSpec) -> bool {
        self.command == running.command
            && self.startup == running.startup
            && self.user == running.user
            && self.summary == running.summary
            && self.environment == running.environment
    }
}

/// Which health endpoint a check contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Alive,
    Ready,
}

/// Open a TCP connection to `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpCheck {
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// One supervisor health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    #[serde(rename = "override", default)]
    pub override_: Override,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CheckLevel>,

    /// Duration string such as `5s`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub period: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpCheck>,
}

impl CheckSpec {
    /// TCP check on `port` at the given level.
    pub fn tcp(level: CheckLevel, port: u16, period: &str, timeout: &str) -> Self {
        Self {
            override_: Override::Replace,
            level: Some(level),
            period: period.to_string(),
            timeout: timeout.to_string(),
            tcp: Some(TcpCheck { port, host: None }),
        }
    }

    /// Same comparison rule as [`ServiceSpec::matches`].
    pub fn matches(&self, running: &CheckSpec) -> bool {
        self.level == running.level
            && self.period == running.period
            && self.timeout == running.timeout
            && self.tcp == running.tcp
    }
}

/// Desired configuration for a set of services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckSpec>,
}

impl Layer {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, service: ServiceSpec) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn with_check(mut self, name: impl Into<String>, check: CheckSpec) -> Self {
        self.checks.insert(name.into(), check);
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// The supervisor's currently effective plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckSpec>,
}

impl Plan {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    /// Names of the layer's services whose running definition is missing or
    /// differs from the desired one.
    pub fn diverging_services(&self, layer: &Layer) -> Vec<String> {
        layer
            .services
            .iter()
            .filter(|(name, desired)| match self.services.get(*name) {
                Some(running) => !desired.matches(running),
                None => true,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of the layer's checks that are missing or differ.
    pub fn diverging_checks(&self, layer: &Layer) -> Vec<String> {
        layer
            .checks
            .iter()
            .filter(|(name, desired)| match self.checks.get(*name) {
                Some(running) => !desired.matches(running),
                None => true,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Combine a layer into the plan the way the supervisor does.
    pub fn combine(&mut self, layer: &Layer) {
        for (name, service) in &layer.services {
            match (service.override_, self.services.get_mut(name)) {
                (Override::Merge, Some(existing)) => {
                    if !service.summary.is_empty() {
                        existing.summary = service.summary.clone();
                    }
                    if !service.command.is_empty() {
                        existing.command = service.command.clone();
                    }
                    existing.startup = service.startup;
                    if service.user.is_some() {
                        existing.user = service.user.clone();
                    }
                    existing
                        .environment
                        .extend(service.environment.clone());
                }
                _ => {
                    self.services.insert(name.clone(), service.clone());
                }
            }
        }

        for (name, check) in &layer.checks {
            match (check.override_, self.checks.get_mut(name)) {
                (Override::Merge, Some(existing)) => {
                    if check.level.is_some() {
                        existing.level = check.level;
                    }
                    if !check.period.is_empty() {
                        existing.period = check.period.clone();
                    }
                    if !check.timeout.is_empty() {
                        existing.timeout = check.timeout.clone();
                    }
                    if check.tcp.is_some() {
                        existing.tcp = check.tcp.clone();
                    }
                }
                _ => {
                    self.checks.insert(name.clone(), check.clone());
                }
            }
        }
    }
}

/// A file the workload needs in its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFile {
    pub path: String,
    pub content: String,
}

impl ContainerFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}
