//! Shared application state passed to every handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use arcad_converter::ConversionProcessor;
use arcad_core::config::AppConfig;

/// Application state. Cloned per request; all fields are cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// The conversion processor.
    pub processor: ConversionProcessor,
    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state around an initialized processor.
    pub fn new(config: AppConfig, processor: ConversionProcessor) -> Self {
        Self {
            config: Arc::new(config),
            processor,
            started_at: Utc::now(),
        }
    }

    /// Whole seconds since startup.
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
