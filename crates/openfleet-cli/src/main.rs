mod config;
mod storage;

use std::sync::Arc;

use color_eyre::Result;
use openfleet_executor::testdoubles::{EphemeralWorktreeManager, InMemoryClaimRegistry, StubAgentPool};
use openfleet_executor::Executor;
use openfleet_kanban::AdapterRegistry;
use openfleet_store::key_provider::KeyringProvider;
use openfleet_webhook::{router, KanbanSyncEngine, LoggingAlertSink, WebhookConfig, WebhookState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Process entry point: resolves the active kanban backend, starts the
/// task executor, and serves the project-sync webhook until interrupted.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let config = config::load()?;
    let data_dir = storage::resolve_data_dir(&config)?;
    info!(?data_dir, project_id = %config.project_id, "starting openfleet");

    let registry = AdapterRegistry::new(
        config.kanban_backend.clone(),
        data_dir,
        config.scope_label.clone(),
        Arc::new(KeyringProvider::for_project(&config.project_id)),
    );
    let kanban = registry
        .active()
        .await
        .map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;
    info!(backend = ?kanban.backend(), "kanban adapter ready");

    // The claim registry, worktree manager, and agent pool are external
    // collaborators by design (spec §1 Non-goals); absent a production
    // integration these reference implementations keep the executor
    // runnable end to end.
    let executor = Executor::new(
        config.executor.clone().apply_env_overrides(),
        config.project_id.clone(),
        config.owner_id.clone(),
        kanban.clone(),
        Arc::new(InMemoryClaimRegistry::new()),
        Arc::new(EphemeralWorktreeManager::new()),
        Arc::new(StubAgentPool::new()),
    );
    executor
        .start()
        .await
        .map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

    let sync_engine: Arc<dyn openfleet_core::collab::SyncEngine> =
        Arc::new(KanbanSyncEngine::new(kanban, config.project_id.clone()));
    let webhook_state = Arc::new(
        WebhookState::new(WebhookConfig::from_env())
            .with_sync_engine(sync_engine)
            .with_alert_sink(Arc::new(LoggingAlertSink)),
    );
    let app = router(webhook_state);

    let listener = tokio::net::TcpListener::bind(&config.webhook_bind).await?;
    info!(addr = %config.webhook_bind, "webhook listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "webhook server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    executor.stop().await;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
