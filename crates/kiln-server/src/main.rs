use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::impls::{LocalArtifactStore, connect_state_store};
use kiln_core::{OrchestratorBuilder, OrchestratorConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiln_server::config::ServerConfig;
use kiln_server::router::build_app_router;
use kiln_server::runner::CommandRunner;
use kiln_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("KILN_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_server=debug,kiln_core=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    let orchestrator_config = OrchestratorConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        program = %config.runner.program,
        "Loaded server configuration"
    );

    // --- State store ---
    let store = connect_state_store(&orchestrator_config.store, orchestrator_config.ttl).await?;
    if let Err(e) = store.ping().await {
        // 起動は続ける。/health が degraded を返す
        tracing::warn!(error = %e, "State store is not reachable yet");
    }

    // --- Orchestrator ---
    tokio::fs::create_dir_all(&orchestrator_config.artifact_root).await?;
    let artifacts = Arc::new(LocalArtifactStore::new(
        orchestrator_config.artifact_root.clone(),
    ));
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(orchestrator_config)
            .store(store)
            .artifacts(artifacts)
            .runner(Arc::new(CommandRunner::new(config.runner.clone())))
            .build()?,
    );

    // --- Reaper ---
    let reaper_cancel = CancellationToken::new();
    let reaper_handle = orchestrator.spawn_reaper(reaper_cancel.clone());

    // --- App state ---
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    reaper_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    tracing::info!("Reaper stopped");

    orchestrator.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
