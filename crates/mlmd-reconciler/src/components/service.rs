//! The supervised metadata store server

use super::database::DatabaseRelation;
use crate::collaborators::WorkloadControl;
use crate::component::Component;
use crate::error::ComponentError;
use async_trait::async_trait;
use mlmd_types::{
    CheckLevel, CheckSpec, ContainerFile, DatabaseBackend, GrpcPort, Layer, Override,
    ServiceSpec, Startup, Status,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const SERVER_BINARY: &str = "bin/metadata_store_server";
const PEBBLE_NOT_READY: &str = "Waiting for Pebble to be ready.";
const CHECK_PERIOD: &str = "5s";
const CHECK_TIMEOUT: &str = "2s";

/// Where and as whom the server runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Supervisor service name, also used as the layer label.
    pub service_name: String,
    pub user: String,
    /// Server configuration file for the SQLite backend.
    pub config_file: String,
    pub sqlite_uri: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            service_name: "mlmd".to_string(),
            user: "_daemon_".to_string(),
            config_file: "/config/config.proto".to_string(),
            sqlite_uri: "file:/data/mlmd.db".to_string(),
        }
    }
}

/// Server configuration selecting the embedded SQLite database.
pub fn sqlite_config(uri: &str) -> String {
    format!(
        "connection_config: {{sqlite: {{filename_uri: \"{}\", connection_mode: READWRITE_OPENCREATE}}}}",
        uri
    )
}

/// Command-line arguments of the server, binary excluded.
pub fn server_args(backend: &DatabaseBackend, port: GrpcPort, config_file: &str) -> Vec<String> {
    let mut args = Vec::new();
    match backend {
        DatabaseBackend::Sqlite => {
            args.push(format!("--metadata_store_server_config_file={}", config_file));
        }
        DatabaseBackend::Mysql(conn) => {
            args.push(format!("--mysql_config_database={}", conn.database));
            args.push(format!("--mysql_config_host={}", conn.host));
            args.push(format!("--mysql_config_port={}", conn.port));
            args.push(format!("--mysql_config_user={}", conn.user));
            args.push(format!("--mysql_config_password={}", conn.password));
        }
    }
    args.push(format!("--grpc_port={}", port));
    args.push("--enable_database_upgrade=true".to_string());
    args
}

/// Everything the workload should look like for the current inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredWorkload {
    pub layer: Layer,
    pub files: Vec<ContainerFile>,
}

/// Runs the metadata store server under the workload's supervisor.
pub struct MlmdService {
    name: String,
    settings: ServiceSettings,
    port: GrpcPort,
    workload: Arc<dyn WorkloadControl>,
    database: Arc<DatabaseRelation>,
}

impl MlmdService {
    pub const NAME: &'static str = "mlmd-grpc-service";

    pub fn new(
        settings: ServiceSettings,
        port: GrpcPort,
        workload: Arc<dyn WorkloadControl>,
        database: Arc<DatabaseRelation>,
    ) -> Self {
        Self {
            name: Self::NAME.to_string(),
            settings,
            port,
            workload,
            database,
        }
    }

    pub async fn desired(&self) -> Result<DesiredWorkload, ComponentError> {
        let backend = self.database.backend().await?;

        let mut command = vec![SERVER_BINARY.to_string()];
        command.extend(server_args(&backend, self.port, &self.settings.config_file));

        let service = ServiceSpec {
            override_: Override::Replace,
            summary: "entry point for MLMD GRPC Service".to_string(),
            command: command.join(" "),
            startup: Startup::Enabled,
            user: Some(self.settings.user.clone()),
            environment: BTreeMap::new(),
        };
        let layer = Layer {
            summary: "mlmd layer".to_string(),
            description: "pebble config layer for mlmd".to_string(),
            ..Layer::default()
        }
        .with_service(&self.settings.service_name, service)
        .with_check(
            format!("{}-alive", self.settings.service_name),
            CheckSpec::tcp(CheckLevel::Alive, self.port.get(), CHECK_PERIOD, CHECK_TIMEOUT),
        )
        .with_check(
            format!("{}-ready", self.settings.service_name),
            CheckSpec::tcp(CheckLevel::Ready, self.port.get(), CHECK_PERIOD, CHECK_TIMEOUT),
        );

        let files = match backend {
            DatabaseBackend::Sqlite => vec![ContainerFile::new(
                &self.settings.config_file,
                sqlite_config(&self.settings.sqlite_uri),
            )],
            DatabaseBackend::Mysql(_) => Vec::new(),
        };

        Ok(DesiredWorkload { layer, files })
    }

    async fn ensure_connected(&self) -> Result<(), ComponentError> {
        if self.workload.can_connect().await {
            Ok(())
        } else {
            Err(ComponentError::waiting(PEBBLE_NOT_READY))
        }
    }

    async fn stale_files<'a>(
        &self,
        files: &'a [ContainerFile],
    ) -> Result<Vec<&'a ContainerFile>, ComponentError> {
        let mut stale = Vec::new();
        for file in files {
            let current = self.workload.pull(&file.path).await?;
            if current.as_deref() != Some(file.content.as_str()) {
                stale.push(file);
            }
        }
        Ok(stale)
    }

    async fn stopped_services(&self, layer: &Layer) -> Result<Vec<String>, ComponentError> {
        let mut stopped = Vec::new();
        for name in layer.services.keys() {
            if !self.workload.is_running(name).await? {
                stopped.push(name.clone());
            }
        }
        Ok(stopped)
    }

    async fn check(&self) -> Result<Status, ComponentError> {
        self.ensure_connected().await?;
        let desired = self.desired().await?;

        if !self.stale_files(&desired.files).await?.is_empty() {
            return Ok(Status::waiting("Waiting for configuration files to be pushed"));
        }

        let plan = self.workload.running_plan().await?;
        let diverging = plan.diverging_services(&desired.layer);
        if !diverging.is_empty() {
            return Ok(Status::waiting(format!(
                "Waiting for Pebble services ({}) to be updated",
                diverging.join(", ")
            )));
        }

        let checks = plan.diverging_checks(&desired.layer);
        if !checks.is_empty() {
            return Ok(Status::waiting(format!(
                "Waiting for Pebble checks ({}) to be updated",
                checks.join(", ")
            )));
        }

        let stopped = self.stopped_services(&desired.layer).await?;
        if !stopped.is_empty() {
            return Ok(Status::waiting(format!(
                "Waiting for Pebble services ({}) to start",
                stopped.join(", ")
            )));
        }

        Ok(Status::active())
    }
}

#[async_trait]
impl Component for MlmdService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        match self.check().await {
            Ok(status) => status,
            Err(e) => e.into_status(),
        }
    }

    #[tracing::instrument(skip(self), fields(component = %self.name, port = %self.port))]
    async fn execute(&self) -> Result<(), ComponentError> {
        self.ensure_connected().await?;
        let desired = self.desired().await?;

        let stale = self.stale_files(&desired.files).await?;
        for file in &stale {
            tracing::info!(path = %file.path, "Pushing configuration file");
            self.workload.push(&file.path, &file.content, true).await?;
        }

        let plan = self.workload.running_plan().await?;
        let diverging = plan.diverging_services(&desired.layer);
        let checks = plan.diverging_checks(&desired.layer);
        if !diverging.is_empty() || !checks.is_empty() {
            tracing::info!(services = ?diverging, checks = ?checks, "Updating Pebble layer");
            self.workload
                .replace_layer(&self.settings.service_name, &desired.layer)
                .await?;
        }

        let mut restart: BTreeSet<String> = diverging.into_iter().collect();
        if !stale.is_empty() {
            restart.extend(desired.layer.service_names());
        }
        restart.extend(self.stopped_services(&desired.layer).await?);

        if !restart.is_empty() {
            let services: Vec<String> = restart.into_iter().collect();
            tracing::info!(services = ?services, "Restarting services");
            self.workload.restart(&services).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRelations, MockWorkload, WorkloadCall};
    use mlmd_types::{Databag, MysqlConnection, StatusKind};

    fn service(workload: Arc<MockWorkload>, relations: Arc<MockRelations>, port: u16) -> MlmdService {
        MlmdService::new(
            ServiceSettings::default(),
            GrpcPort::new(port).unwrap(),
            workload,
            Arc::new(DatabaseRelation::new(relations)),
        )
    }

    fn restarts(workload: &MockWorkload) -> usize {
        workload
            .calls()
            .iter()
            .filter(|c| matches!(c, WorkloadCall::Restart { .. }))
            .count()
    }

    #[test]
    fn test_server_args() {
        let port = GrpcPort::new(8080).unwrap();
        assert_eq!(
            server_args(&DatabaseBackend::Sqlite, port, "/config/config.proto"),
            vec![
                "--metadata_store_server_config_file=/config/config.proto",
                "--grpc_port=8080",
                "--enable_database_upgrade=true",
            ]
        );

        let mysql = DatabaseBackend::Mysql(MysqlConnection {
            database: "db".to_string(),
            host: "host".to_string(),
            port: "3306".to_string(),
            user: "u".to_string(),
            password: "p".to_string(),
        });
        let args = server_args(&mysql, port, "/config/config.proto");
        assert_eq!(args[0], "--mysql_config_database=db");
        assert_eq!(args[4], "--mysql_config_password=p");
        assert!(!args.iter().any(|a| a.contains("config_file")));
    }

    #[test]
    fn test_sqlite_config() {
        assert_eq!(
            sqlite_config("file:/data/mlmd.db"),
            r#"connection_config: {sqlite: {filename_uri: "file:/data/mlmd.db", connection_mode: READWRITE_OPENCREATE}}"#
        );
    }

    #[tokio::test]
    async fn test_first_run_then_idempotent() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let component = service(workload.clone(), Arc::new(MockRelations::new()), 8080);

        assert_eq!(component.status().await.kind, StatusKind::Waiting);
        component.execute().await.unwrap();
        assert!(component.status().await.is_active());

        let plan = workload.plan();
        let mlmd = plan.service("mlmd").unwrap();
        assert_eq!(
            mlmd.command,
            "bin/metadata_store_server --metadata_store_server_config_file=/config/config.proto --grpc_port=8080 --enable_database_upgrade=true"
        );
        assert_eq!(mlmd.user.as_deref(), Some("_daemon_"));
        assert!(workload.file("/config/config.proto").unwrap().contains("file:/data/mlmd.db"));
        assert_eq!(restarts(&workload), 1);

        let before = workload.calls().len();
        component.execute().await.unwrap();
        assert_eq!(workload.calls().len(), before);
    }

    #[tokio::test]
    async fn test_port_change_restarts() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let relations = Arc::new(MockRelations::new());
        service(workload.clone(), relations.clone(), 8080).execute().await.unwrap();

        let changed = service(workload.clone(), relations, 9090);
        assert_eq!(
            changed.status().await,
            Status::waiting("Waiting for Pebble services (mlmd) to be updated")
        );
        changed.execute().await.unwrap();
        assert!(changed.status().await.is_active());
        assert_eq!(restarts(&workload), 2);
        assert!(workload.plan().service("mlmd").unwrap().command.contains("--grpc_port=9090"));

        let plan = workload.plan();
        for name in ["mlmd-alive", "mlmd-ready"] {
            assert_eq!(plan.checks[name].tcp.as_ref().unwrap().port, 9090);
        }
    }

    #[tokio::test]
    async fn test_health_checks_follow_port() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let component = service(workload.clone(), Arc::new(MockRelations::new()), 8080);
        component.execute().await.unwrap();

        let alive = &workload.plan().checks["mlmd-alive"];
        assert_eq!(alive.level, Some(CheckLevel::Alive));
        assert_eq!(alive.period, "5s");
        assert_eq!(alive.timeout, "2s");
        assert_eq!(workload.plan().checks["mlmd-ready"].level, Some(CheckLevel::Ready));

        // a layer from elsewhere rewrote only the check
        let stale = Layer::new("manual").with_check(
            "mlmd-ready",
            CheckSpec::tcp(CheckLevel::Ready, 1234, "5s", "2s"),
        );
        workload.replace_layer("manual", &stale).await.unwrap();
        assert_eq!(
            component.status().await,
            Status::waiting("Waiting for Pebble checks (mlmd-ready) to be updated")
        );

        component.execute().await.unwrap();
        assert!(component.status().await.is_active());
        assert_eq!(workload.plan().checks["mlmd-ready"].tcp.as_ref().unwrap().port, 8080);
        // only the check changed, so the server keeps running
        assert_eq!(restarts(&workload), 1);
    }

    #[tokio::test]
    async fn test_changed_config_file_restarts() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let component = service(workload.clone(), Arc::new(MockRelations::new()), 8080);
        component.execute().await.unwrap();

        workload.put_file("/config/config.proto", "connection_config: {}");
        assert_eq!(
            component.status().await,
            Status::waiting("Waiting for configuration files to be pushed")
        );
        component.execute().await.unwrap();
        assert_eq!(restarts(&workload), 2);
        assert!(component.status().await.is_active());
    }

    #[tokio::test]
    async fn test_mysql_backend() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let relations = Arc::new(MockRelations::new());
        let data: Databag = [
            ("database", "mlmd"),
            ("host", "mysql-0"),
            ("port", "3306"),
            ("user", "mlmd"),
            ("password", "pw"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        relations.add_relation("mysql", data);

        let component = service(workload.clone(), relations, 8080);
        component.execute().await.unwrap();
        assert!(component.status().await.is_active());
        assert!(workload.file("/config/config.proto").is_none());
        assert!(workload
            .plan()
            .service("mlmd")
            .unwrap()
            .command
            .contains("--mysql_config_host=mysql-0"));
    }

    #[tokio::test]
    async fn test_crashed_service_is_restarted() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        let component = service(workload.clone(), Arc::new(MockRelations::new()), 8080);
        component.execute().await.unwrap();

        workload.stop_service("mlmd");
        assert_eq!(
            component.status().await,
            Status::waiting("Waiting for Pebble services (mlmd) to start")
        );
        component.execute().await.unwrap();
        assert!(component.status().await.is_active());
        assert_eq!(restarts(&workload), 2);
    }

    #[tokio::test]
    async fn test_unreachable_workload() {
        let workload = Arc::new(MockWorkload::new("mlmd-grpc-server"));
        workload.set_connected(false);
        let component = service(workload.clone(), Arc::new(MockRelations::new()), 8080);

        assert_eq!(component.status().await, Status::waiting(PEBBLE_NOT_READY));
        assert!(component.execute().await.is_err());
        assert!(workload.calls().is_empty());
    }
}
