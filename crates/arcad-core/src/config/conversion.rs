//! Configuration for the Blender conversion subsystem.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Configuration for running Blender as a headless converter.
///
/// When `blender_path` is unset and `candidate_paths` is empty, the binary is
/// located with the host default: the versioned install directories on
/// Windows, the application bundle on macOS, and `PATH` elsewhere.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Explicit Blender executable. Skips host probing when set.
    pub blender_path: Option<PathBuf>,

    /// Ordered candidate executables; the first one that exists wins.
    pub candidate_paths: Vec<PathBuf>,

    /// Maximum number of Blender processes running at once.
    #[validate(range(min = 1, max = 16))]
    pub max_concurrent: usize,

    /// How long a request may wait for a free conversion slot.
    /// Zero means fail immediately when all slots are busy.
    #[validate(range(max = 600))]
    pub queue_timeout_seconds: u64,

    /// Wall-clock limit for a single Blender invocation.
    #[validate(range(min = 1, max = 3600))]
    pub timeout_seconds: u64,

    /// Minimum output file size (bytes) to consider conversion successful.
    #[validate(range(min = 1))]
    pub min_output_bytes: u64,

    /// Bytes of stdout/stderr retained per stream for diagnostics (tail).
    #[validate(range(min = 256, max = 1048576))]
    pub max_captured_output_bytes: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            blender_path: None,
            candidate_paths: Vec::new(),
            max_concurrent: 2,
            queue_timeout_seconds: 30,
            timeout_seconds: 300,
            min_output_bytes: 1,
            max_captured_output_bytes: 64 * 1024,
        }
    }
}

impl ConversionConfig {
    /// Wall-clock limit as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Queue wait limit as a [`Duration`].
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds)
    }
}
