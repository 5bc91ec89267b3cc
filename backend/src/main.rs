use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ekklesia_backend::automations::{AutomationRunner, ExecutorRegistry, MessageOutbox, PgNotifyOutbox};
use ekklesia_backend::store::{AutomationStore, PgAutomationStore};
use ekklesia_backend::{app, config, database, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(db_pool.clone()));
    let outbox: Arc<dyn MessageOutbox> = Arc::new(PgNotifyOutbox::new(db_pool, &config.outbox_channel));
    let runner = Arc::new(AutomationRunner::new(
        store.clone(),
        ExecutorRegistry::standard(store.clone(), outbox),
        config.automation.clone().into(),
    ));

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState {
        runner,
        store,
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!(
        "Server running on {} (pacing {}ms)",
        config.server_addr,
        config.automation.pacing.as_millis()
    );

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, stopping automation runs at their next step");
    shutdown.cancel();
}
