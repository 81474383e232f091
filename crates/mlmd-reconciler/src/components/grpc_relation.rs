use crate::collaborators::RelationChannel;
use crate::component::Component;
use crate::error::ComponentError;
use async_trait::async_trait;
use mlmd_types::{negotiate, Databag, GrpcServiceInfo, Negotiation, RelationId, Status, GRPC_SCHEMA_VERSION};
use std::sync::Arc;

/// Advertises the gRPC endpoint on every `grpc` relation.
///
/// Our supported versions are always published. The endpoint itself is only
/// published once the remote side lists a version we speak.
pub struct GrpcRelationBroadcaster {
    name: String,
    relation_name: String,
    relations: Arc<dyn RelationChannel>,
    info: GrpcServiceInfo,
}

impl GrpcRelationBroadcaster {
    pub const RELATION_NAME: &'static str = "grpc";

    pub fn new(relations: Arc<dyn RelationChannel>, info: GrpcServiceInfo) -> Self {
        Self {
            name: format!("relation:{}", Self::RELATION_NAME),
            relation_name: Self::RELATION_NAME.to_string(),
            relations,
            info,
        }
    }

    fn desired(&self, negotiation: &Negotiation) -> Databag {
        match negotiation {
            Negotiation::Compatible => self.info.to_databag(),
            Negotiation::Pending | Negotiation::Incompatible { .. } => {
                GrpcServiceInfo::versions_databag()
            }
        }
    }

    async fn relation_status(&self, id: &RelationId) -> Result<Status, ComponentError> {
        let remote = self.relations.receive(id).await?;
        let status = match negotiate(&remote) {
            Negotiation::Compatible => {
                let published = self.relations.published(id).await?;
                if is_published(&published, &self.info.to_databag()) {
                    Status::active()
                } else {
                    Status::waiting(format!("Waiting to publish data on {}", id))
                }
            }
            Negotiation::Pending => {
                Status::waiting(format!("Waiting for {} to publish supported versions", id))
            }
            Negotiation::Incompatible { remote } => Status::blocked(format!(
                "No compatible schema version on {}: remote supports {:?}, this charm supports {}",
                id, remote, GRPC_SCHEMA_VERSION
            )),
        };
        Ok(status)
    }
}

fn is_published(current: &Databag, desired: &Databag) -> bool {
    desired.iter().all(|(k, v)| current.get(k) == Some(v))
}

#[async_trait]
impl Component for GrpcRelationBroadcaster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        let ids = match self.relations.relation_ids(&self.relation_name).await {
            Ok(ids) => ids,
            Err(e) => return ComponentError::from(e).into_status(),
        };

        let mut statuses = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.relation_status(id).await {
                Ok(status) => statuses.push(status),
                Err(e) => statuses.push(e.into_status()),
            }
        }
        Status::most_severe(&statuses)
            .cloned()
            .unwrap_or_else(Status::active)
    }

    async fn execute(&self) -> Result<(), ComponentError> {
        for id in self.relations.relation_ids(&self.relation_name).await? {
            let remote = self.relations.receive(&id).await?;
            let desired = self.desired(&negotiate(&remote));
            let published = self.relations.published(&id).await?;
            if is_published(&published, &desired) {
                continue;
            }

            tracing::info!(relation = %id, keys = desired.len(), "Publishing gRPC relation data");
            self.relations.send(&id, &desired).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRelations;
    use mlmd_types::{GrpcPort, StatusKind, DATA_KEY, SUPPORTED_VERSIONS_KEY};

    fn versions(raw: &str) -> Databag {
        Databag::from([(SUPPORTED_VERSIONS_KEY.to_string(), raw.to_string())])
    }

    fn broadcaster(relations: Arc<MockRelations>, port: u16) -> GrpcRelationBroadcaster {
        GrpcRelationBroadcaster::new(
            relations,
            GrpcServiceInfo::new("mlmd", GrpcPort::new(port).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_no_relations_is_active() {
        let component = broadcaster(Arc::new(MockRelations::new()), 8080);
        component.execute().await.unwrap();
        assert!(component.status().await.is_active());
    }

    #[tokio::test]
    async fn test_publishes_after_negotiation() {
        let relations = Arc::new(MockRelations::new());
        let id = relations.add_relation("grpc", Databag::new());
        let component = broadcaster(relations.clone(), 8080);

        component.execute().await.unwrap();
        assert_eq!(relations.published_data(&id), GrpcServiceInfo::versions_databag());
        assert_eq!(component.status().await.kind, StatusKind::Waiting);

        relations.set_remote(&id, versions(r#"["v1"]"#));
        component.execute().await.unwrap();
        assert!(component.status().await.is_active());
        let data: serde_json::Value =
            serde_json::from_str(&relations.published_data(&id)[DATA_KEY]).unwrap();
        assert_eq!(data, serde_json::json!({"name": "mlmd", "port": "8080"}));

        let sends = relations.sends().len();
        component.execute().await.unwrap();
        assert_eq!(relations.sends().len(), sends);
    }

    #[tokio::test]
    async fn test_port_change_republishes() {
        let relations = Arc::new(MockRelations::new());
        let id = relations.add_relation("grpc", versions(r#"["v1"]"#));
        broadcaster(relations.clone(), 8080).execute().await.unwrap();

        let changed = broadcaster(relations.clone(), 9090);
        assert_eq!(changed.status().await.kind, StatusKind::Waiting);
        changed.execute().await.unwrap();
        assert!(changed.status().await.is_active());
        assert!(relations.published_data(&id)[DATA_KEY].contains("9090"));
    }

    #[tokio::test]
    async fn test_incompatible_remote_blocks() {
        let relations = Arc::new(MockRelations::new());
        relations.add_relation("grpc", versions(r#"["v1"]"#));
        relations.add_relation("grpc", versions(r#"["v2"]"#));
        let component = broadcaster(relations, 8080);

        component.execute().await.unwrap();
        let status = component.status().await;
        assert_eq!(status.kind, StatusKind::Blocked);
        assert!(status.message.contains("grpc:"));
    }
}
