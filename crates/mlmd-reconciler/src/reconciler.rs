//! The reconcile pass

use crate::component::{Component, ComponentHandle};
use crate::error::{ReconcilerError, Result};
use chrono::{DateTime, Utc};
use mlmd_types::Status;
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// A component together with the handles it depends on.
pub struct RegisteredComponent {
    handle: ComponentHandle,
    component: Arc<dyn Component>,
    dependencies: Vec<ComponentHandle>,
}

impl RegisteredComponent {
    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn dependencies(&self) -> &[ComponentHandle] {
        &self.dependencies
    }
}

impl std::fmt::Debug for RegisteredComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredComponent")
            .field("handle", &self.handle)
            .field("name", &self.name())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// What one component did during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStep {
    pub component: String,
    /// Whether `execute` completed without error.
    pub executed: bool,
    pub status: Status,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every component is Active.
    Completed,
    /// A component was not Active; later components were not evaluated.
    Halted { component: String, status: Status },
    /// A gate asked for the pass to be skipped.
    Deferred { component: String, status: Status },
}

/// Record of one reconcile pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<ComponentStep>,
    pub outcome: PassOutcome,
}

impl ReconcileReport {
    /// The unit status this pass resolves to.
    ///
    /// The first non-Active component in dependency order, prefixed with its
    /// name; Active when the pass completed or was deferred.
    pub fn aggregate(&self) -> Status {
        match &self.outcome {
            PassOutcome::Deferred { .. } => Status::active(),
            _ => {
                let prefixed: Vec<Status> = self
                    .steps
                    .iter()
                    .map(|step| step.status.prefixed(&step.component))
                    .collect();
                Status::aggregate(&prefixed)
            }
        }
    }

    /// Names of the components whose `execute` ran successfully.
    pub fn executed(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|s| s.executed)
            .map(|s| s.component.as_str())
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == PassOutcome::Completed
    }
}

/// Ordered set of components and the pass that drives them.
#[derive(Debug)]
pub struct Reconciler {
    id: Uuid,
    components: Vec<RegisteredComponent>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            components: Vec::new(),
        }
    }

    /// Register a component after the ones it depends on.
    ///
    /// Dependencies can only be handles returned by earlier calls on this
    /// reconciler, so registration order is always a valid evaluation order.
    pub fn add(
        &mut self,
        component: Arc<dyn Component>,
        depends_on: &[ComponentHandle],
    ) -> Result<ComponentHandle> {
        let name = component.name().to_string();
        if name.is_empty() {
            return Err(ReconcilerError::EmptyName);
        }
        if self.components.iter().any(|c| c.name() == name) {
            return Err(ReconcilerError::DuplicateName(name));
        }

        for dep in depends_on {
            if dep.owner != self.id {
                return Err(ReconcilerError::ForeignHandle { component: name });
            }
            if dep.index >= self.components.len() {
                return Err(ReconcilerError::UnknownDependency {
                    component: name,
                    handle: *dep,
                });
            }
        }

        let mut dependencies = depends_on.to_vec();
        dependencies.dedup();

        let handle = ComponentHandle {
            owner: self.id,
            index: self.components.len(),
        };
        tracing::debug!(component = %name, handle = %handle, deps = dependencies.len(), "Registered component");

        self.components.push(RegisteredComponent {
            handle,
            component,
            dependencies,
        });
        Ok(handle)
    }

    pub fn get(&self, handle: ComponentHandle) -> Option<&RegisteredComponent> {
        if handle.owner != self.id {
            return None;
        }
        self.components.get(handle.index)
    }

    /// Registered components in evaluation order.
    pub fn components(&self) -> &[RegisteredComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Run one pass over the components in registration order.
    ///
    /// Each component is executed and then asked for its status. The pass
    /// stops at the first component that is not Active, so no component is
    /// executed while one of its dependencies is not Active in this pass.
    pub async fn reconcile(&self) -> ReconcileReport {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", pass_id = %pass_id);
        self.run_pass(pass_id).instrument(span).await
    }

    async fn run_pass(&self, pass_id: Uuid) -> ReconcileReport {
        let started_at = Utc::now();
        let mut steps = Vec::with_capacity(self.components.len());
        let mut outcome = PassOutcome::Completed;

        for registered in &self.components {
            let name = registered.name().to_string();
            let component = &registered.component;

            // Every earlier component is Active at this point, dependencies included.
            let (executed, status) = match component.execute().await {
                Ok(()) => (true, component.status().await),
                Err(e) => {
                    tracing::warn!(component = %name, error = %e, "Component execute failed");
                    (false, e.into_status())
                }
            };

            tracing::debug!(component = %name, status = %status, executed, "Evaluated component");
            steps.push(ComponentStep {
                component: name.clone(),
                executed,
                status: status.clone(),
            });

            if !status.is_active() {
                outcome = if component.defers_pass() {
                    tracing::info!(component = %name, status = %status, "Pass deferred");
                    PassOutcome::Deferred {
                        component: name,
                        status,
                    }
                } else {
                    PassOutcome::Halted {
                        component: name,
                        status,
                    }
                };
                break;
            }
        }

        let report = ReconcileReport {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            steps,
            outcome,
        };

        tracing::info!(
            status = %report.aggregate(),
            evaluated = report.steps.len(),
            total = self.components.len(),
            "Reconcile pass finished"
        );
        report
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
