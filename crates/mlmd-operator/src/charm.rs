//! Charm assembly: which components run, in which order

use crate::error::{OperatorError, OperatorResult};
use crate::event::HookEvent;
use crate::settings::WorkloadSettings;
use async_trait::async_trait;
use mlmd_reconciler::{
    ChownMountedStorage, DatabaseRelation, GrpcRelationBroadcaster, GrpcServiceTemplate,
    KubernetesResources, LeadershipGate, LeadershipOracle, MlmdService, PassOutcome, Reconciler,
    ReconcilerError, RelationChannel, RenderContext, ResourceApi, WorkloadControl,
};
use mlmd_types::{CharmConfig, GrpcServiceInfo, Status};
use std::sync::Arc;
use tracing::Instrument;

/// Who this unit is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub app_name: String,
    pub unit_name: String,
    /// Namespace the model's objects live in
    pub namespace: String,
}

impl Identity {
    /// Derive the identity from a unit name (`mlmd/0`) and namespace.
    pub fn from_unit(unit_name: &str, namespace: &str) -> OperatorResult<Self> {
        let app_name = match unit_name.split_once('/') {
            Some((app, number)) if !app.is_empty() && number.parse::<u32>().is_ok() => app,
            _ => {
                return Err(OperatorError::Identity(format!(
                    "unit name {:?} is not of the form app/N",
                    unit_name
                )))
            }
        };
        if namespace.is_empty() {
            return Err(OperatorError::Identity("namespace is empty".to_string()));
        }

        Ok(Self {
            app_name: app_name.to_string(),
            unit_name: unit_name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// The outside world, as seen by the components.
#[derive(Clone)]
pub struct Collaborators {
    pub leadership: Arc<dyn LeadershipOracle>,
    pub resources: Arc<dyn ResourceApi>,
    pub workload: Arc<dyn WorkloadControl>,
    pub relations: Arc<dyn RelationChannel>,
}

/// Where the unit status goes.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, status: &Status) -> OperatorResult<()>;
}

/// Where the raw charm configuration comes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn charm_config(&self) -> OperatorResult<serde_json::Value>;
}

/// Register the operator's components in dependency order.
pub fn build_reconciler(
    identity: &Identity,
    settings: &WorkloadSettings,
    config: &CharmConfig,
    collaborators: &Collaborators,
) -> Result<Reconciler, ReconcilerError> {
    let mut reconciler = Reconciler::new();

    let leadership = reconciler.add(
        Arc::new(LeadershipGate::new(collaborators.leadership.clone())),
        &[],
    )?;

    let context = RenderContext {
        app_name: identity.app_name.clone(),
        namespace: identity.namespace.clone(),
        port: config.port,
    };
    let service = KubernetesResources::new("kubernetes:service", collaborators.resources.clone(), context)
        .with_template(GrpcServiceTemplate::default());
    reconciler.add(Arc::new(service), &[leadership])?;

    let grpc = GrpcRelationBroadcaster::new(
        collaborators.relations.clone(),
        GrpcServiceInfo::new(&identity.app_name, config.port),
    );
    reconciler.add(Arc::new(grpc), &[leadership])?;

    let database = Arc::new(DatabaseRelation::new(collaborators.relations.clone()));
    let mysql = reconciler.add(database.clone(), &[leadership])?;

    let storage = reconciler.add(
        Arc::new(ChownMountedStorage::new(
            collaborators.workload.clone(),
            &settings.storage,
            &settings.user,
        )),
        &[leadership],
    )?;

    let server = MlmdService::new(
        settings.service_settings(),
        config.port,
        collaborators.workload.clone(),
        database,
    );
    reconciler.add(Arc::new(server), &[leadership, mysql, storage])?;

    Ok(reconciler)
}

/// Handles one hook for one unit.
pub struct Charm {
    identity: Identity,
    settings: WorkloadSettings,
    collaborators: Collaborators,
    config: Arc<dyn ConfigSource>,
    publisher: Arc<dyn StatusPublisher>,
}

impl Charm {
    pub fn new(
        identity: Identity,
        settings: WorkloadSettings,
        collaborators: Collaborators,
        config: Arc<dyn ConfigSource>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            identity,
            settings,
            collaborators,
            config,
            publisher,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Run one reconcile pass for the event and publish the resulting status.
    ///
    /// Returns the published status, or `None` for events that do not
    /// reconcile.
    pub async fn handle(&self, event: &HookEvent) -> OperatorResult<Option<Status>> {
        if !event.triggers_reconcile() {
            tracing::info!(event = %event, "Event does not reconcile");
            return Ok(None);
        }

        let span = tracing::info_span!("hook", event = %event, unit = %self.identity.unit_name);
        self.reconcile().instrument(span).await.map(Some)
    }

    async fn reconcile(&self) -> OperatorResult<Status> {
        let raw = self.config.charm_config().await?;
        let config = match CharmConfig::from_json(&raw) {
            Ok(config) => config,
            Err(e) => {
                let status = if self.collaborators.leadership.is_leader().await {
                    tracing::warn!(error = %e, "Invalid charm configuration");
                    Status::blocked(format!("Invalid configuration: {}", e))
                } else {
                    // the leader reports bad configuration
                    tracing::info!(error = %e, "Not a leader, skipping reconcile");
                    Status::active()
                };
                self.publisher.publish(&status).await?;
                return Ok(status);
            }
        };

        let reconciler =
            build_reconciler(&self.identity, &self.settings, &config, &self.collaborators)?;
        let report = reconciler.reconcile().await;
        if let PassOutcome::Deferred { .. } = report.outcome {
            tracing::info!("Not a leader, skipping reconcile");
        }

        let status = report.aggregate();
        self.publisher.publish(&status).await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlmd_reconciler::mock::{MockLeadership, MockRelations, MockResourceApi, MockWorkload};
    use mlmd_types::{Databag, StatusKind};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Status>>,
    }

    #[async_trait]
    impl StatusPublisher for RecordingPublisher {
        async fn publish(&self, status: &Status) -> OperatorResult<()> {
            self.published.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    struct StaticConfig(serde_json::Value);

    #[async_trait]
    impl ConfigSource for StaticConfig {
        async fn charm_config(&self) -> OperatorResult<serde_json::Value> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        leadership: Arc<MockLeadership>,
        api: Arc<MockResourceApi>,
        workload: Arc<MockWorkload>,
        relations: Arc<MockRelations>,
        publisher: Arc<RecordingPublisher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                leadership: Arc::new(MockLeadership::new(true)),
                api: Arc::new(MockResourceApi::new()),
                workload: Arc::new(MockWorkload::new("mlmd-grpc-server")),
                relations: Arc::new(MockRelations::new()),
                publisher: Arc::new(RecordingPublisher::default()),
            }
        }

        fn collaborators(&self) -> Collaborators {
            Collaborators {
                leadership: self.leadership.clone(),
                resources: self.api.clone(),
                workload: self.workload.clone(),
                relations: self.relations.clone(),
            }
        }

        fn charm(&self, config: serde_json::Value) -> Charm {
            Charm::new(
                Identity::from_unit("mlmd/0", "kubeflow").unwrap(),
                WorkloadSettings::default(),
                self.collaborators(),
                Arc::new(StaticConfig(config)),
                self.publisher.clone(),
            )
        }

        fn published(&self) -> Vec<Status> {
            self.publisher.published.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_identity_from_unit() {
        let identity = Identity::from_unit("mlmd/3", "kubeflow").unwrap();
        assert_eq!(identity.app_name, "mlmd");
        assert!(Identity::from_unit("mlmd", "kubeflow").is_err());
        assert!(Identity::from_unit("/0", "kubeflow").is_err());
        assert!(Identity::from_unit("mlmd/x", "kubeflow").is_err());
        assert!(Identity::from_unit("mlmd/0", "").is_err());
    }

    #[test]
    fn test_component_order() {
        let fixture = Fixture::new();
        let identity = Identity::from_unit("mlmd/0", "kubeflow").unwrap();
        let reconciler = build_reconciler(
            &identity,
            &WorkloadSettings::default(),
            &CharmConfig::default(),
            &fixture.collaborators(),
        )
        .unwrap();

        let names: Vec<&str> = reconciler.components().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "leadership-gate",
                "kubernetes:service",
                "relation:grpc",
                "relation:mysql",
                "chown-mounted-storage",
                "mlmd-grpc-service",
            ]
        );

        let server = &reconciler.components()[5];
        let deps: Vec<usize> = server.dependencies().iter().map(|h| h.index()).collect();
        assert_eq!(deps, vec![0, 3, 4]);
    }

    #[tokio::test]
    async fn test_config_changed_converges() {
        let fixture = Fixture::new();
        let status = fixture
            .charm(json!({"port": 8080}))
            .handle(&HookEvent::ConfigChanged)
            .await
            .unwrap();

        assert_eq!(status, Some(Status::active()));
        assert_eq!(fixture.published(), vec![Status::active()]);
        assert!(fixture
            .workload
            .plan()
            .service("mlmd")
            .unwrap()
            .command
            .contains("--grpc_port=8080"));
    }

    #[tokio::test]
    async fn test_invalid_port_blocks_without_writes() {
        let fixture = Fixture::new();
        let status = fixture
            .charm(json!({"port": -5}))
            .handle(&HookEvent::ConfigChanged)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.kind, StatusKind::Blocked);
        assert!(status.message.starts_with("Invalid configuration:"));
        assert!(fixture.api.applied().is_empty());
        assert!(fixture.workload.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_port_on_non_leader_publishes_active() {
        let fixture = Fixture::new();
        fixture.leadership.set_leader(false);

        let status = fixture
            .charm(json!({"port": 0}))
            .handle(&HookEvent::ConfigChanged)
            .await
            .unwrap();
        assert_eq!(status, Some(Status::active()));
        assert_eq!(fixture.published(), vec![Status::active()]);
        assert!(fixture.workload.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_leader_publishes_active() {
        let fixture = Fixture::new();
        fixture.leadership.set_leader(false);

        let status = fixture
            .charm(json!({}))
            .handle(&HookEvent::UpdateStatus)
            .await
            .unwrap();
        assert_eq!(status, Some(Status::active()));
        assert!(fixture.api.applied().is_empty());
    }

    #[tokio::test]
    async fn test_stop_does_not_reconcile() {
        let fixture = Fixture::new();
        let status = fixture.charm(json!({})).handle(&HookEvent::Stop).await.unwrap();
        assert_eq!(status, None);
        assert!(fixture.published().is_empty());
    }

    #[tokio::test]
    async fn test_grpc_relation_receives_endpoint() {
        let fixture = Fixture::new();
        let id = fixture.relations.add_relation(
            "grpc",
            Databag::from([("_supported_versions".to_string(), r#"["v1"]"#.to_string())]),
        );

        fixture
            .charm(json!({"port": "9090"}))
            .handle(&"grpc-relation-changed".parse().unwrap())
            .await
            .unwrap();

        let data: serde_json::Value =
            serde_json::from_str(&fixture.relations.published_data(&id)["data"]).unwrap();
        assert_eq!(data, json!({"name": "mlmd", "port": "9090"}));
    }
}
