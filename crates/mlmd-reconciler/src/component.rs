//! The component contract

use crate::error::ComponentError;
use async_trait::async_trait;
use mlmd_types::Status;
use uuid::Uuid;

/// One unit of desired state managed by the operator.
///
/// `execute` converges the owned state and must be idempotent: running it
/// again when nothing changed performs no writes. `status` reports whether
/// the state is in place, reading it fresh from the collaborators.
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique name, used to prefix the published status.
    fn name(&self) -> &str;

    /// Current status of the owned state.
    async fn status(&self) -> Status;

    /// Converge the owned state. Components that only observe keep the default.
    async fn execute(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Whether a non-Active status defers the whole pass instead of halting
    /// it. A deferred pass publishes Active with an empty message.
    fn defers_pass(&self) -> bool {
        false
    }
}

/// Opaque reference to a registered component.
///
/// Handles are only issued by [`Reconciler::add`](crate::Reconciler::add),
/// so a component can only depend on components registered before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    pub(crate) owner: Uuid,
    pub(crate) index: usize,
}

impl ComponentHandle {
    /// Position in registration order.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Display for ComponentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}
