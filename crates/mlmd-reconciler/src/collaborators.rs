//! Collaborator interfaces
//!
//! Everything a component reads or writes outside the process goes through
//! one of these traits: the platform's leadership and relation data, the
//! orchestration API and the process supervisor inside the workload
//! container. Production implementations live in the operator binary;
//! in-memory ones in [`crate::mock`].

use crate::error::{ApiError, RelationError, WorkloadError};
use async_trait::async_trait;
use mlmd_types::{Databag, Layer, Plan, RelationId, Resource, ResourceSelector};

/// Whether this unit is the application leader.
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Desired-state access to the orchestration API.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Create or update the object so it carries at least the manifest.
    async fn apply(&self, resource: &Resource) -> Result<(), ApiError>;

    /// Observed manifests of every object matched by the selector.
    async fn list(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, ApiError>;
}

/// Result of a command run inside the workload container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Control surface of the process supervisor in the workload container.
#[async_trait]
pub trait WorkloadControl: Send + Sync {
    /// Name of the container this surface controls.
    fn container(&self) -> &str;

    /// Whether the supervisor answers at all.
    async fn can_connect(&self) -> bool;

    /// Write a file, creating parent directories when `make_dirs` is set.
    async fn push(&self, path: &str, content: &str, make_dirs: bool) -> Result<(), WorkloadError>;

    /// Read a file, `None` when it does not exist.
    async fn pull(&self, path: &str) -> Result<Option<String>, WorkloadError>;

    /// Add or replace the layer with this label and combine it into the plan.
    async fn replace_layer(&self, label: &str, layer: &Layer) -> Result<(), WorkloadError>;

    /// The currently effective plan.
    async fn running_plan(&self) -> Result<Plan, WorkloadError>;

    /// Restart (or start) the named services.
    async fn restart(&self, services: &[String]) -> Result<(), WorkloadError>;

    /// Whether the named service is currently running.
    async fn is_running(&self, service: &str) -> Result<bool, WorkloadError>;

    /// Run a command to completion inside the container.
    async fn run_command(&self, argv: &[String]) -> Result<ExecOutput, WorkloadError>;
}

/// Relation data exchange with related applications.
#[async_trait]
pub trait RelationChannel: Send + Sync {
    /// Established relations with this name.
    async fn relation_ids(&self, name: &str) -> Result<Vec<RelationId>, RelationError>;

    /// Data published by the remote side: application data overlaid with
    /// the data of the remote units.
    async fn receive(&self, relation: &RelationId) -> Result<Databag, RelationError>;

    /// Application data this side has published so far.
    async fn published(&self, relation: &RelationId) -> Result<Databag, RelationError>;

    /// Publish application data. Keys not in `data` are left untouched.
    async fn send(&self, relation: &RelationId, data: &Databag) -> Result<(), RelationError>;
}
