use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use salond::config::Config;
use salond::engine::Engine;
use salond::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();
    salond::observability::init(&config.bind, config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path(), config.engine_options())?);

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    if config.engine_options().pending_ttl_ms.is_some() {
        tasks.push(tokio::spawn(reaper::run_reaper(engine.clone(), shutdown.clone())));
    }
    tasks.push(tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        shutdown.clone(),
    )));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("salond listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  pending ttl: {}",
        match config.pending_ttl_secs {
            0 => "disabled".to_string(),
            s => format!("{s}s"),
        }
    );
    info!("  indexes: {:?}", config.indexes);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://{}:{p}/metrics", config.bind))
    );

    axum::serve(listener, salond::http::router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background tasks, then fold the WAL so the next start replays less.
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }

    info!("salond stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
