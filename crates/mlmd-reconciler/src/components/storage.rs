use crate::collaborators::WorkloadControl;
use crate::component::Component;
use crate::error::ComponentError;
use async_trait::async_trait;
use mlmd_types::Status;
use std::sync::Arc;

/// Hands the mounted storage over to the identity the server runs as.
///
/// The volume is mounted owned by root; the server runs unprivileged and
/// has to write its SQLite database there.
pub struct ChownMountedStorage {
    name: String,
    workload: Arc<dyn WorkloadControl>,
    storage_path: String,
    owner: String,
}

impl ChownMountedStorage {
    pub const NAME: &'static str = "chown-mounted-storage";

    pub fn new(
        workload: Arc<dyn WorkloadControl>,
        storage_path: impl Into<String>,
        user: &str,
    ) -> Self {
        Self {
            name: Self::NAME.to_string(),
            workload,
            storage_path: storage_path.into(),
            owner: format!("{}:{}", user, user),
        }
    }

    async fn ensure_connected(&self) -> Result<(), ComponentError> {
        if self.workload.can_connect().await {
            Ok(())
        } else {
            Err(ComponentError::waiting(format!(
                "Cannot connect to container {}, waiting for container to be ready",
                self.workload.container()
            )))
        }
    }

    /// `user:group` currently owning the storage path.
    async fn current_owner(&self) -> Result<String, ComponentError> {
        let argv = ["stat", "-c", "%U:%G", self.storage_path.as_str()].map(String::from);
        let output = self.workload.run_command(&argv).await?;
        if !output.success() {
            return Err(ComponentError::waiting(format!(
                "Cannot stat {}: {}",
                self.storage_path,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl Component for ChownMountedStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        if let Err(e) = self.ensure_connected().await {
            return e.into_status();
        }
        match self.current_owner().await {
            Ok(owner) if owner == self.owner => Status::active(),
            Ok(owner) => Status::waiting(format!(
                "{} is owned by {}, expected {}",
                self.storage_path, owner, self.owner
            )),
            Err(e) => e.into_status(),
        }
    }

    async fn execute(&self) -> Result<(), ComponentError> {
        self.ensure_connected().await?;
        if self.current_owner().await? == self.owner {
            return Ok(());
        }

        let argv = ["chown", self.owner.as_str(), self.storage_path.as_str()].map(String::from);
        let output = self.workload.run_command(&argv).await?;
        if !output.success() {
            return Err(ComponentError::waiting(format!(
                "Failed to change owner of {}: {}",
                self.storage_path,
                output.stderr.trim()
            )));
        }

        tracing::info!(path = %self.storage_path, owner = %self.owner, "Changed storage owner");
        Ok(())
    }
}
