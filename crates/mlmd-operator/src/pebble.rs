//! Workload control through the Pebble CLI
//!
//! The charm container ships a `pebble` client and one socket per workload
//! container; every call selects the socket through `PEBBLE_SOCKET`.

use crate::process::{CommandError, CommandOutput, CommandRunner};
use crate::settings::WorkloadSettings;
use async_trait::async_trait;
use mlmd_reconciler::{ExecOutput, WorkloadControl, WorkloadError};
use mlmd_types::{Layer, Plan};
use std::io::Write;

/// Exit code the pull script uses for a missing file.
const MISSING_FILE_EXIT: i32 = 3;

/// [`WorkloadControl`] for one container, backed by the Pebble CLI.
#[derive(Debug, Clone)]
pub struct PebbleCli {
    runner: CommandRunner,
    binary: String,
    container: String,
}

impl PebbleCli {
    pub fn new(runner: CommandRunner, binary: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            container: container.into(),
        }
    }

    pub fn from_settings(settings: &WorkloadSettings) -> Self {
        let runner =
            CommandRunner::new(settings.timeout()).with_env("PEBBLE_SOCKET", settings.socket_path());
        Self::new(runner, &settings.pebble, &settings.container)
    }

    async fn pebble(&self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput, WorkloadError> {
        self.runner
            .run(&self.binary, args, stdin)
            .await
            .map_err(|e| match e {
                CommandError::Timeout { program, timeout } => WorkloadError::Timeout {
                    command: program,
                    timeout,
                },
                CommandError::Spawn { source, .. } | CommandError::Io { source, .. } => {
                    WorkloadError::Io(source)
                }
            })
    }

    /// Run a management command that must succeed.
    async fn checked(&self, args: &[String]) -> Result<String, WorkloadError> {
        let output = self.pebble(args, None).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let stderr = output.stderr.trim();
        if stderr.contains("cannot connect") || stderr.contains("connection refused") {
            return Err(WorkloadError::Unreachable(self.container.clone()));
        }
        Err(WorkloadError::Command {
            command: format!("pebble {}", args.first().map(String::as_str).unwrap_or_default()),
            reason: stderr.to_string(),
        })
    }

    fn exec_args(argv: &[String]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--".to_string()];
        args.extend(argv.iter().cloned());
        args
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Parse `pebble plan` output; an empty plan may print nothing.
fn parse_plan(output: &str) -> Result<Plan, WorkloadError> {
    if output.trim().is_empty() {
        return Ok(Plan::default());
    }
    serde_yaml::from_str(output).map_err(|e| WorkloadError::Malformed(format!("plan: {}", e)))
}

/// Whether `pebble services` lists the service as active.
fn service_is_active(output: &str, service: &str) -> bool {
    output.lines().skip(1).any(|line| {
        let mut columns = line.split_whitespace();
        columns.next() == Some(service) && columns.nth(1) == Some("active")
    })
}

#[async_trait]
impl WorkloadControl for PebbleCli {
    fn container(&self) -> &str {
        &self.container
    }

    async fn can_connect(&self) -> bool {
        match self.checked(&strings(&["services"])).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(container = %self.container, error = %e, "Pebble not reachable");
                false
            }
        }
    }

    async fn push(&self, path: &str, content: &str, make_dirs: bool) -> Result<(), WorkloadError> {
        let script = if make_dirs {
            r#"mkdir -p "$(dirname "$1")" && cat > "$1""#
        } else {
            r#"cat > "$1""#
        };
        let argv = strings(&["sh", "-c", script, "sh", path]);
        let output = self
            .pebble(&Self::exec_args(&argv), Some(content.as_bytes()))
            .await?;
        if !output.success() {
            return Err(WorkloadError::Command {
                command: format!("push {}", path),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn pull(&self, path: &str) -> Result<Option<String>, WorkloadError> {
        let script = format!(r#"test -e "$1" || exit {}; cat "$1""#, MISSING_FILE_EXIT);
        let argv = strings(&["sh", "-c", &script, "sh", path]);
        let output = self.pebble(&Self::exec_args(&argv), None).await?;
        match output.exit_code {
            0 => Ok(Some(output.stdout)),
            MISSING_FILE_EXIT => Ok(None),
            _ => Err(WorkloadError::Command {
                command: format!("pull {}", path),
                reason: output.stderr.trim().to_string(),
            }),
        }
    }

    async fn replace_layer(&self, label: &str, layer: &Layer) -> Result<(), WorkloadError> {
        let yaml = serde_yaml::to_string(layer)
            .map_err(|e| WorkloadError::Malformed(format!("layer: {}", e)))?;

        let mut file = tempfile::Builder::new()
            .prefix("pebble-layer-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(yaml.as_bytes())?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        self.checked(&strings(&["add", "--combine", label, &path]))
            .await?;
        tracing::debug!(label, "Added Pebble layer");
        Ok(())
    }

    async fn running_plan(&self) -> Result<Plan, WorkloadError> {
        let output = self.checked(&strings(&["plan"])).await?;
        parse_plan(&output)
    }

    async fn restart(&self, services: &[String]) -> Result<(), WorkloadError> {
        let mut args = vec!["restart".to_string()];
        args.extend(services.iter().cloned());
        self.checked(&args).await?;
        Ok(())
    }

    async fn is_running(&self, service: &str) -> Result<bool, WorkloadError> {
        let output = self.checked(&strings(&["services", service])).await?;
        Ok(service_is_active(&output, service))
    }

    async fn run_command(&self, argv: &[String]) -> Result<ExecOutput, WorkloadError> {
        let output = self.pebble(&Self::exec_args(argv), None).await?;
        Ok(ExecOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlmd_types::Startup;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// A `pebble` stand-in that runs `exec` locally and logs other calls.
    fn fake_pebble(dir: &tempfile::TempDir) -> PebbleCli {
        let path = dir.path().join("pebble");
        let log = dir.path().join("calls.log");
        let script = format!(
            r#"#!/bin/sh
echo "$*" >> {log}
case "$1" in
  exec) shift 2; exec "$@" ;;
  plan) printf 'services:\n    mlmd:\n        override: replace\n        command: bin/metadata_store_server\n        startup: enabled\n' ;;
  services) printf 'Service  Startup  Current  Since\nmlmd     enabled  active   today at 10:00 UTC\n' ;;
  add) cp "$4" {dir}/layer.yaml ;;
esac
"#,
            log = log.display(),
            dir = dir.path().display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        PebbleCli::new(
            CommandRunner::new(Duration::from_secs(5)),
            path.to_string_lossy(),
            "mlmd-grpc-server",
        )
    }

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan("").unwrap(), Plan::default());
        assert_eq!(parse_plan("{}\n").unwrap(), Plan::default());
        assert!(parse_plan("services: [").is_err());
    }

    #[test]
    fn test_service_is_active() {
        let output = "Service  Startup  Current   Since\nmlmd     enabled  inactive  -\nother    enabled  active    today\n";
        assert!(!service_is_active(output, "mlmd"));
        assert!(service_is_active(output, "other"));
        assert!(!service_is_active("Plan has no services.\n", "mlmd"));
    }

    #[tokio::test]
    async fn test_push_and_pull() {
        let dir = tempfile::tempdir().unwrap();
        let pebble = fake_pebble(&dir);
        let target = dir.path().join("config/config.proto");
        let target = target.to_string_lossy();

        assert_eq!(pebble.pull(&target).await.unwrap(), None);
        pebble.push(&target, "connection_config: {}", true).await.unwrap();
        assert_eq!(
            pebble.pull(&target).await.unwrap().as_deref(),
            Some("connection_config: {}")
        );
    }

    #[tokio::test]
    async fn test_plan_services_and_layers() {
        let dir = tempfile::tempdir().unwrap();
        let pebble = fake_pebble(&dir);

        assert!(pebble.can_connect().await);
        let plan = pebble.running_plan().await.unwrap();
        assert_eq!(plan.service("mlmd").unwrap().startup, Startup::Enabled);
        assert!(pebble.is_running("mlmd").await.unwrap());

        let layer = Layer::new("mlmd layer").with_service("mlmd", plan.services["mlmd"].clone());
        pebble.replace_layer("mlmd", &layer).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("layer.yaml")).unwrap();
        let parsed: Layer = serde_yaml::from_str(&written).unwrap();
        assert_eq!(parsed, layer);

        pebble.restart(&["mlmd".to_string()]).await.unwrap();
        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(calls.contains("add --combine mlmd"));
        assert!(calls.lines().any(|l| l == "restart mlmd"));
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let pebble = fake_pebble(&dir);

        let output = pebble
            .run_command(&strings(&["sh", "-c", "echo root:root; exit 4"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 4);
        assert_eq!(output.stdout.trim(), "root:root");
    }

    #[tokio::test]
    async fn test_unreachable_pebble() {
        let dir = tempfile::tempdir().unwrap();
        let pebble = PebbleCli::new(
            CommandRunner::new(Duration::from_secs(5)),
            dir.path().join("missing-pebble").to_string_lossy(),
            "mlmd-grpc-server",
        );
        assert!(!pebble.can_connect().await);
        assert!(matches!(pebble.running_plan().await, Err(WorkloadError::Io(_))));
    }
}
