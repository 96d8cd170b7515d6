//! Application builder: wires the processor, router, and middleware into a
//! running server.

use std::future::IntoFuture;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use arcad_converter::ConversionProcessor;
use arcad_core::config::AppConfig;
use arcad_core::error::AppError;
use arcad_core::result::AppResult;

use crate::middleware::cors::build_cors_layer;
use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors);
    build_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Runs the ARCAD server until SIGINT or SIGTERM.
pub async fn run_server(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting ARCAD conversion server...");

    // Directories, script installation, and Blender discovery.
    let processor =
        ConversionProcessor::initialize(config.conversion.clone(), &config.storage).await?;

    let addr = config.server.bind_address();
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let app = build_app(AppState::new(config, processor.clone()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    tracing::info!("ARCAD server listening on {}", addr);

    // Fires once the signal arrives so the grace timer below can start.
    let stopping = CancellationToken::new();
    let signal_processor = processor.clone();
    let signal_stopping = stopping.clone();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received; cancelling running conversions");
        signal_processor.shutdown();
        signal_stopping.cancel();
    })
    .into_future();

    tokio::select! {
        res = server => {
            res.map_err(|e| AppError::internal(format!("Server error: {e}")))?;
        }
        _ = async {
            stopping.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(grace_s = grace.as_secs(), "Connections still open after grace period; exiting");
        }
    }

    tracing::info!("ARCAD server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
