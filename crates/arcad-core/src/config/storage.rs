//! Filesystem layout configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where uploads, converted outputs, and the conversion script live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Transient storage for staged uploads.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    /// Transient storage for converted GLB files.
    #[serde(default = "default_converted_dir")]
    pub converted_dir: String,
    /// Location of the generated Blender conversion script.
    #[serde(default = "default_script_path")]
    pub script_path: String,
    /// Maximum accepted upload size in bytes (default 256 MB).
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            converted_dir: default_converted_dir(),
            script_path: default_script_path(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

impl StorageConfig {
    /// Upload directory as a path.
    pub fn upload_path(&self) -> PathBuf {
        PathBuf::from(&self.upload_dir)
    }

    /// Converted-output directory as a path.
    pub fn converted_path(&self) -> PathBuf {
        PathBuf::from(&self.converted_dir)
    }

    /// Conversion script location as a path.
    pub fn script_file(&self) -> PathBuf {
        PathBuf::from(&self.script_path)
    }
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_converted_dir() -> String {
    "converted".to_string()
}

fn default_script_path() -> String {
    "scripts/convert_to_glb.py".to_string()
}

fn default_max_upload() -> u64 {
    256 * 1024 * 1024
}
