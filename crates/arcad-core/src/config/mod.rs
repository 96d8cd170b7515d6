//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section; every field has a default so an empty configuration is valid.

pub mod app;
pub mod conversion;
pub mod logging;
pub mod storage;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::app::{CorsConfig, ServerConfig};
pub use self::conversion::ConversionConfig;
pub use self::logging::LoggingConfig;
pub use self::storage::StorageConfig;

use crate::error::AppError;
use crate::result::AppResult;

/// Prefix for environment variable overrides (`ARCAD__SERVER__PORT=9000`).
const ENV_PREFIX: &str = "ARCAD";

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML files
/// (`default.toml` + environment overlay) and `ARCAD__*` variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Upload, output, and script locations.
    pub storage: StorageConfig,
    /// External conversion tool settings.
    pub conversion: ConversionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `<config_dir>/default.*`, then the
    /// `<config_dir>/<env>.*` overlay, then environment variables.
    ///
    /// Missing files are not an error. The conversion section is validated
    /// after deserialization.
    pub fn load(config_dir: &str, env: &str) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{config_dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate the sections that carry range constraints.
    pub fn validate(&self) -> AppResult<()> {
        self.conversion.validate()?;
        Ok(())
    }
}
