mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use aivis_pipeline::{Orchestrator, PgRunStore, RunSettings, RunStore, WorkerConfig};
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(aivis_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = aivis_db::PoolConfig::from_app_config(&config);
    let pool = aivis_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = aivis_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let pricing = Arc::new(aivis_core::load_pricing_or_default(&config.pricing_path)?);
    let backends = aivis_backend::build_backends(&config, Arc::clone(&pricing))?;
    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        backends,
        pricing,
        RunSettings::from_app_config(&config),
    ));

    let _scheduler = scheduler::build_scheduler(pool.clone(), Arc::clone(&config)).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = if config.worker_enabled {
        let worker_config =
            WorkerConfig::from_app_config(&config, aivis_pipeline::default_worker_id("server"));
        Some(tokio::spawn(aivis_pipeline::run_worker(
            pool.clone(),
            orchestrator,
            worker_config,
            shutdown_rx,
        )))
    } else {
        tracing::info!("embedded worker disabled; runs will wait for an external worker");
        None
    };

    let app = build_app(AppState {
        pool,
        config: Arc::clone(&config),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send_replace(true);
    if let Some(worker) = worker {
        worker.await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
