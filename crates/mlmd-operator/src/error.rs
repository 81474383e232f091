//! Error types for the operator binary

use mlmd_reconciler::ReconcilerError;
use thiserror::Error;

/// Operator error type
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Runtime settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Unit identity is missing or malformed
    #[error("Identity error: {0}")]
    Identity(String),

    /// The dispatched hook could not be parsed
    #[error("Unknown hook event: {0}")]
    Event(String),

    /// The component graph could not be built
    #[error("Reconciler error: {0}")]
    Reconciler(#[from] ReconcilerError),

    /// Kubernetes client could not be created
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// A hook tool failed
    #[error("Hook tool {tool} failed: {reason}")]
    HookTool { tool: String, reason: String },
}

/// Result type for operator operations
pub type OperatorResult<T> = std::result::Result<T, OperatorError>;
