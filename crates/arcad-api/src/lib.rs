//! # arcad-api
//!
//! HTTP API layer for ARCAD built on Axum.
//!
//! Exposes the multipart conversion endpoint and health checks, with CORS,
//! request logging, and error-to-response mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::{build_app, run_server};
pub use error::ApiError;
pub use state::AppState;
