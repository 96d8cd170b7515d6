//! Route definitions for the ARCAD HTTP API.
//!
//! The conversion endpoint is mounted at the root (`/convert`) for existing
//! clients and again under `/api` next to the health checks.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build the router with all routes, the body limit, and request logging.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .storage
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .merge(convert_routes())
        .merge(health_routes());

    Router::new()
        .merge(convert_routes())
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(middleware::logging::request_logging))
        .with_state(state)
}

/// Model conversion
fn convert_routes() -> Router<AppState> {
    Router::new().route("/convert", post(handlers::convert::convert))
}

/// Health checks
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed))
}
