//! MLMD Operator - hook entry point
//!
//! Invoked once per dispatched hook. Identity and the hook name come from
//! the platform's environment; everything else from [`OperatorSettings`].

use anyhow::Context;
use clap::Parser;
use mlmd_operator::settings::LoggingSettings;
use mlmd_operator::{
    Charm, Collaborators, CommandRunner, HookEvent, Identity, JujuHookTools, KubeResourceApi,
    OperatorError, OperatorSettings, PebbleCli, RelationEventKind,
};
use mlmd_types::RelationId;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MLMD Operator CLI
#[derive(Parser)]
#[command(name = "mlmd-operator")]
#[command(about = "Lifecycle manager for the ML Metadata gRPC server", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file path
    #[arg(short, long, env = "MLMD_CONFIG")]
    config: Option<String>,

    /// Hook to handle, e.g. `hooks/config-changed`
    #[arg(long, env = "JUJU_DISPATCH_PATH")]
    event: String,

    /// Unit name, e.g. `mlmd/0`
    #[arg(long, env = "JUJU_UNIT_NAME")]
    unit: String,

    /// Model name, used as the namespace unless overridden in settings
    #[arg(long, env = "JUJU_MODEL_NAME")]
    model: String,

    /// Relation the hook is about, e.g. `mysql:3`
    #[arg(long, env = "JUJU_RELATION_ID")]
    relation_id: Option<String>,

    /// Log level, overrides settings
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,
}

fn init_tracing(logging: &LoggingSettings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    // stdout belongs to the platform; diagnostics go to stderr
    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// The relation being torn down, if this is a `-relation-broken` hook.
fn departing_relation(
    event: &HookEvent,
    relation_id: Option<&str>,
) -> Result<Option<RelationId>, OperatorError> {
    match (event, relation_id) {
        (
            HookEvent::Relation {
                kind: RelationEventKind::Broken,
                ..
            },
            Some(id),
        ) => id.parse().map(Some).map_err(OperatorError::Event),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        OperatorSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(level) = cli.log_level.clone() {
        settings.logging.level = level;
    }
    settings.logging.json |= cli.json;
    init_tracing(&settings.logging);

    let event: HookEvent = cli.event.parse().map_err(OperatorError::Event)?;
    if !event.triggers_reconcile() {
        tracing::info!(event = %event, "Nothing to do");
        return Ok(());
    }

    let namespace = settings
        .kubernetes
        .namespace
        .clone()
        .unwrap_or_else(|| cli.model.clone());
    let identity = Identity::from_unit(&cli.unit, &namespace)?;
    let departing = departing_relation(&event, cli.relation_id.as_deref())?;

    let hook_tools = Arc::new(
        JujuHookTools::new(CommandRunner::new(settings.juju.timeout()), &identity.app_name)
            .with_departing(departing),
    );
    let resources = KubeResourceApi::try_default(&settings.kubernetes.manager)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Cannot create Kubernetes client");
            e
        })?;

    let collaborators = Collaborators {
        leadership: hook_tools.clone(),
        resources: Arc::new(resources),
        workload: Arc::new(PebbleCli::from_settings(&settings.workload)),
        relations: hook_tools.clone(),
    };
    let charm = Charm::new(
        identity,
        settings.workload.clone(),
        collaborators,
        hook_tools.clone(),
        hook_tools,
    );

    match charm.handle(&event).await {
        Ok(Some(status)) => {
            tracing::info!(event = %event, status = %status, "Hook handled");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::error!(event = %event, error = %e, "Hook failed");
            Err(e.into())
        }
    }
}
