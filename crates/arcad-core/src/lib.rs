//! # arcad-core
//!
//! Core crate for the ARCAD conversion service. Contains the configuration
//! schemas and the unified error system shared by the converter and the
//! HTTP layer.
//!
//! This crate has **no** internal dependencies on other ARCAD crates.

pub mod config;
pub mod error;
pub mod result;

pub use config::AppConfig;
pub use error::{AppError, ErrorKind};
pub use result::AppResult;
