//! Error types for the reconciler and its collaborators

use crate::component::ComponentHandle;
use mlmd_types::Status;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building the component graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcilerError {
    /// A component with this name is already registered
    #[error("Duplicate component name: {0}")]
    DuplicateName(String),

    /// Component names must not be empty
    #[error("Component name must not be empty")]
    EmptyName,

    /// The dependency handle does not refer to a registered component
    #[error("Component {component} depends on unknown component {handle}")]
    UnknownDependency {
        component: String,
        handle: ComponentHandle,
    },

    /// The dependency handle was issued by a different reconciler
    #[error("Component {component} depends on a component from another reconciler")]
    ForeignHandle { component: String },
}

/// Result type for graph construction
pub type Result<T> = std::result::Result<T, ReconcilerError>;

/// Failure reported by the orchestration API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status code, when the API answered at all
    pub code: Option<u16>,
    pub message: String,
    /// Whether retrying on a later pass can succeed without intervention
    pub recoverable: bool,
}

impl ApiError {
    /// Classify an API response by status code.
    ///
    /// Authorization and validation failures need a human: the charm has to
    /// be trusted or the manifest fixed.
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            recoverable: !matches!(code, 401 | 403 | 422),
        }
    }

    /// The API could not be reached.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            recoverable: true,
        }
    }
}

/// Failures talking to the workload container.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The supervisor in the container is not reachable
    #[error("Cannot connect to container {0}")]
    Unreachable(String),

    /// A supervisor command exited unsuccessfully
    #[error("Command {command} failed: {reason}")]
    Command { command: String, reason: String },

    /// A supervisor command did not finish in time
    #[error("Command {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The supervisor returned output we could not parse
    #[error("Malformed supervisor output: {0}")]
    Malformed(String),

    /// I/O error spawning or talking to the supervisor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reading or writing relation data.
#[derive(Debug, Error)]
pub enum RelationError {
    /// The platform tool failed
    #[error("Relation tool {tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    /// The platform returned data we could not parse
    #[error("Malformed relation data: {0}")]
    Malformed(String),

    /// I/O error spawning the platform tool
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a component's `execute`, carrying the status it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}")]
pub struct ComponentError {
    status: Status,
}

impl ComponentError {
    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            status: Status::waiting(message),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            status: Status::blocked(message),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn into_status(self) -> Status {
        self.status
    }
}

impl From<ApiError> for ComponentError {
    fn from(err: ApiError) -> Self {
        let message = format!("Kubernetes API error: {}", err);
        if err.recoverable {
            Self::waiting(message)
        } else {
            Self::blocked(message)
        }
    }
}

impl From<WorkloadError> for ComponentError {
    fn from(err: WorkloadError) -> Self {
        Self::waiting(err.to_string())
    }
}

impl From<RelationError> for ComponentError {
    fn from(err: RelationError) -> Self {
        Self::waiting(err.to_string())
    }
}
