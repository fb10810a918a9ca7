//! Worker entry point.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use worker::{AppState, Backends, Config};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing + metrics once
    let config = Config::from_env();
    let metrics_handle = worker::telemetry::init(&config);

    // 2. Connect storage and wire the components
    let backends = Backends::from_config(&config).await?;
    let state = Arc::new(AppState::new(backends, &config));
    tracing::info!(
        idempotency_mode = %config.idempotency_mode,
        persistent = config.database_url.is_some(),
        "worker configured"
    );

    // 3. Start the reconciliation loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = state.reconciler();
    let interval = state.reconcile_interval;
    let reconcile_task =
        tokio::spawn(async move { reconciler.run(interval, shutdown_rx).await });

    // 4. Serve until a shutdown signal arrives
    let app = worker::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting worker");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Stop background work
    let _ = shutdown_tx.send(true);
    if let Err(e) = reconcile_task.await {
        tracing::warn!(error = %e, "reconciliation task ended abnormally");
    }

    tracing::info!("worker shut down gracefully");
    Ok(())
}
