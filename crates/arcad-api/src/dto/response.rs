//! Response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arcad_converter::ProcessorHealth;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
    /// Uptime.
    pub uptime_seconds: u64,
}

/// Detailed health response.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealthResponse {
    /// `ok`, or `degraded` when Blender or the script is missing.
    pub status: String,
    /// Version.
    pub version: String,
    /// Uptime.
    pub uptime_seconds: u64,
    /// When this report was produced.
    pub checked_at: DateTime<Utc>,
    /// Converter state.
    pub conversion: ProcessorHealth,
}

impl DetailedHealthResponse {
    /// Overall status for a converter state.
    pub fn status_for(health: &ProcessorHealth) -> &'static str {
        if health.shutting_down {
            "shutting_down"
        } else if health.tool.available && health.script_present {
            "ok"
        } else {
            "degraded"
        }
    }
}
