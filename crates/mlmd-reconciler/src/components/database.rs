use crate::collaborators::RelationChannel;
use crate::component::Component;
use crate::error::ComponentError;
use async_trait::async_trait;
use mlmd_types::{DatabaseBackend, MysqlConnection, Status};
use std::sync::Arc;

/// Reads the optional `mysql` relation and resolves the database backend.
///
/// No relation means the embedded SQLite database; one relation with
/// complete connection data means MySQL; more than one cannot be served.
pub struct DatabaseRelation {
    name: String,
    relation_name: String,
    relations: Arc<dyn RelationChannel>,
}

impl DatabaseRelation {
    pub const RELATION_NAME: &'static str = "mysql";

    pub fn new(relations: Arc<dyn RelationChannel>) -> Self {
        Self::with_relation_name(relations, Self::RELATION_NAME)
    }

    pub fn with_relation_name(relations: Arc<dyn RelationChannel>, relation_name: &str) -> Self {
        Self {
            name: format!("relation:{}", relation_name),
            relation_name: relation_name.to_string(),
            relations,
        }
    }

    /// Backend the server should use, read fresh from the relation.
    pub async fn backend(&self) -> Result<DatabaseBackend, ComponentError> {
        let ids = self.relations.relation_ids(&self.relation_name).await?;
        match ids.as_slice() {
            [] => Ok(DatabaseBackend::Sqlite),
            [id] => {
                let data = self.relations.receive(id).await?;
                MysqlConnection::from_databag(&data)
                    .map(DatabaseBackend::Mysql)
                    .map_err(|missing| {
                        tracing::debug!(relation = %id, ?missing, "Incomplete relation data");
                        ComponentError::waiting(format!(
                            "Waiting for {} relation data",
                            self.relation_name
                        ))
                    })
            }
            _ => Err(ComponentError::blocked(format!(
                "Too many {} relations",
                self.relation_name
            ))),
        }
    }
}

#[async_trait]
impl Component for DatabaseRelation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        match self.backend().await {
            Ok(_) => Status::active(),
            Err(e) => e.into_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRelations;
    use mlmd_types::Databag;

    fn mysql_data() -> Databag {
        [
            ("database", "mlmd"),
            ("host", "10.1.2.3"),
            ("port", "3306"),
            ("user", "mlmd"),
            ("password", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn test_no_relation_is_sqlite() {
        let component = DatabaseRelation::new(Arc::new(MockRelations::new()));
        assert_eq!(component.backend().await.unwrap(), DatabaseBackend::Sqlite);
        assert!(component.status().await.is_active());
        assert_eq!(component.name(), "relation:mysql");
    }

    #[tokio::test]
    async fn test_single_relation() {
        let relations = Arc::new(MockRelations::new());
        let id = relations.add_relation("mysql", Databag::new());
        let component = DatabaseRelation::new(relations.clone());

        assert_eq!(
            component.status().await,
            Status::waiting("Waiting for mysql relation data")
        );

        relations.set_remote(&id, mysql_data());
        match component.backend().await.unwrap() {
            DatabaseBackend::Mysql(conn) => assert_eq!(conn.host, "10.1.2.3"),
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_too_many_relations() {
        let relations = Arc::new(MockRelations::new());
        relations.add_relation("mysql", mysql_data());
        relations.add_relation("mysql", mysql_data());
        let component = DatabaseRelation::new(relations);

        assert_eq!(component.status().await, Status::blocked("Too many mysql relations"));
    }
}
