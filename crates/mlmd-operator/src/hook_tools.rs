//! Juju hook tools
//!
//! Leadership, relation data, charm configuration and status all go through
//! the hook tools the platform puts on the charm's `PATH` for the duration
//! of a hook.

use crate::charm::{ConfigSource, StatusPublisher};
use crate::error::{OperatorError, OperatorResult};
use crate::process::CommandRunner;
use async_trait::async_trait;
use mlmd_reconciler::{LeadershipOracle, RelationChannel, RelationError};
use mlmd_types::{Databag, RelationId, Status, StatusKind};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Hook tool client for one unit.
#[derive(Debug, Clone)]
pub struct JujuHookTools {
    runner: CommandRunner,
    app_name: String,
    tools_dir: Option<PathBuf>,
    departing: Option<RelationId>,
}

impl JujuHookTools {
    pub fn new(runner: CommandRunner, app_name: impl Into<String>) -> Self {
        Self {
            runner,
            app_name: app_name.into(),
            tools_dir: None,
            departing: None,
        }
    }

    /// Resolve tools in this directory instead of `PATH`.
    pub fn with_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = Some(dir.into());
        self
    }

    /// Hide a relation that is being torn down in the current hook.
    pub fn with_departing(mut self, relation: Option<RelationId>) -> Self {
        self.departing = relation;
        self
    }

    fn program(&self, tool: &str) -> String {
        match &self.tools_dir {
            Some(dir) => dir.join(tool).to_string_lossy().into_owned(),
            None => tool.to_string(),
        }
    }

    async fn tool(&self, tool: &str, args: &[String]) -> Result<String, RelationError> {
        let output = self
            .runner
            .run(&self.program(tool), args, None)
            .await
            .map_err(|e| RelationError::Tool {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        if !output.success() {
            return Err(RelationError::Tool {
                tool: tool.to_string(),
                reason: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        Ok(output.stdout)
    }

    async fn tool_json<T: DeserializeOwned>(
        &self,
        tool: &str,
        args: &[String],
    ) -> Result<T, RelationError> {
        let stdout = self.tool(tool, args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| RelationError::Malformed(format!("{} output: {}", tool, e)))
    }

    /// `relation-get` for one member (unit or application) of a relation.
    async fn relation_get(
        &self,
        relation: &RelationId,
        member: &str,
        app: bool,
    ) -> Result<Databag, RelationError> {
        let mut args = vec!["-r".to_string(), relation.to_string()];
        if app {
            args.push("--app".to_string());
        }
        args.extend(["--format=json", "-", member].map(String::from));

        let value: serde_json::Value = self.tool_json("relation-get", &args).await?;
        databag_from_json(value)
    }
}

/// Flatten `relation-get` JSON into a databag; non-string values keep their
/// JSON text.
fn databag_from_json(value: serde_json::Value) -> Result<Databag, RelationError> {
    match value {
        serde_json::Value::Null => Ok(Databag::new()),
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        other => Err(RelationError::Malformed(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// `status-set` arguments. The platform has no `error` workload status, so
/// it is published as `blocked`.
fn status_args(status: &Status) -> Vec<String> {
    let kind = match status.kind {
        StatusKind::Error => StatusKind::Blocked,
        other => other,
    };
    vec![kind.as_str().to_string(), status.message.clone()]
}

#[async_trait]
impl LeadershipOracle for JujuHookTools {
    async fn is_leader(&self) -> bool {
        match self
            .tool_json::<bool>("is-leader", &["--format=json".to_string()])
            .await
        {
            Ok(leader) => leader,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot determine leadership, assuming non-leader");
                false
            }
        }
    }
}

#[async_trait]
impl RelationChannel for JujuHookTools {
    async fn relation_ids(&self, name: &str) -> Result<Vec<RelationId>, RelationError> {
        let raw: Vec<String> = self
            .tool_json("relation-ids", &[name.to_string(), "--format=json".to_string()])
            .await?;

        let mut ids = Vec::with_capacity(raw.len());
        for entry in raw {
            let id: RelationId = entry.parse().map_err(RelationError::Malformed)?;
            if self.departing.as_ref() != Some(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn receive(&self, relation: &RelationId) -> Result<Databag, RelationError> {
        let id = relation.to_string();
        let remote_app: Option<String> = self
            .tool_json("relation-list", &["-r", id.as_str(), "--app", "--format=json"].map(String::from))
            .await?;
        let units: Vec<String> = self
            .tool_json("relation-list", &["-r", id.as_str(), "--format=json"].map(String::from))
            .await?;

        let mut data = match remote_app.filter(|app| !app.is_empty()) {
            Some(app) => self.relation_get(relation, &app, true).await?,
            None => Databag::new(),
        };
        for unit in units {
            data.extend(self.relation_get(relation, &unit, false).await?);
        }
        Ok(data)
    }

    async fn published(&self, relation: &RelationId) -> Result<Databag, RelationError> {
        self.relation_get(relation, &self.app_name, true).await
    }

    async fn send(&self, relation: &RelationId, data: &Databag) -> Result<(), RelationError> {
        let mut args = vec!["-r".to_string(), relation.to_string(), "--app".to_string()];
        args.extend(data.iter().map(|(k, v)| format!("{}={}", k, v)));
        self.tool("relation-set", &args).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for JujuHookTools {
    async fn charm_config(&self) -> OperatorResult<serde_json::Value> {
        self.tool_json("config-get", &["--format=json".to_string()])
            .await
            .map_err(|e| OperatorError::HookTool {
                tool: "config-get".to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl StatusPublisher for JujuHookTools {
    async fn publish(&self, status: &Status) -> OperatorResult<()> {
        self.tool("status-set", &status_args(status))
            .await
            .map_err(|e| OperatorError::HookTool {
                tool: "status-set".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
