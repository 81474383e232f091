//! Subprocess execution with timeouts and output capture

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Failure to run a command to completion.
///
/// A command that ran and exited non-zero is not an error here; callers
/// inspect [`CommandOutput::exit_code`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to talk to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands with a fixed timeout and extra environment.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` to completion, feeding `stdin` when given.
    ///
    /// The child is killed when the timeout expires.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(program, ?args, "Running command");
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let io_error = |source: std::io::Error| CommandError::Io {
            program: program.to_string(),
            source,
        };

        let finished = async {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input).await.map_err(io_error)?;
                pipe.shutdown().await.map_err(io_error)?;
            }
            child.wait_with_output().await.map_err(io_error)
        };

        let output = match timeout(self.timeout, finished).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(program, timeout = ?self.timeout, "Command timed out");
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
