//! Unified error type for the conversion engine.
//!
//! Upload staging, tool discovery, script installation, and process
//! execution all report through [`ConversionError`], which maps onto
//! `arcad_core::error::AppError` with a distinct kind per failure class.

use std::path::PathBuf;

use arcad_core::error::AppError;
use thiserror::Error;

use crate::models::MeshFormat;

/// Unified error type for all conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    // --- Upload errors ---
    /// The request carried no file part.
    #[error("No file uploaded")]
    MissingFile,

    /// The file extension is not one Blender is driven to import.
    #[error(
        "Unsupported file format: '{file_name}'. Supported formats: {}",
        MeshFormat::supported_list()
    )]
    UnsupportedFormat {
        /// Client-supplied file name.
        file_name: String,
    },

    /// The file part contained zero bytes.
    #[error("Uploaded file is empty")]
    EmptyUpload,

    /// The file part exceeded the configured size limit.
    #[error("Uploaded file exceeds the {limit} byte limit")]
    UploadTooLarge {
        /// Configured maximum in bytes.
        limit: u64,
    },

    // --- Environment errors ---
    /// No Blender executable could be located on this host.
    #[error("Blender executable not found on this host")]
    ToolNotFound {
        /// Every location that was probed.
        searched: Vec<PathBuf>,
    },

    /// The Blender process could not be started.
    #[error("Failed to start Blender at {}", .program.display())]
    SpawnFailed {
        /// Executable that failed to start.
        program: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The conversion script could not be written at startup.
    #[error("Failed to install conversion script at {}", .path.display())]
    ScriptInstall {
        /// Target script path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // --- Process errors ---
    /// Blender exited unsuccessfully. Stderr is kept for logs only.
    #[error("Blender exited with {}", describe_exit(.code))]
    ProcessFailed {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Tail of captured stderr.
        stderr_tail: String,
    },

    /// Blender exited zero but produced no output file.
    #[error("Conversion produced no output file")]
    OutputMissing {
        /// Expected output path.
        path: PathBuf,
    },

    /// The output file is smaller than the configured minimum.
    #[error("Conversion output is too small ({size} bytes, minimum {min})")]
    OutputTooSmall {
        /// Actual size.
        size: u64,
        /// Configured minimum.
        min: u64,
    },

    /// The output file existed after exit but could not be read back.
    #[error("Conversion output could not be read")]
    OutputUnreadable {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Blender exceeded the wall-clock limit and was killed.
    #[error("Conversion timed out after {seconds}s")]
    Timeout {
        /// Limit that was exceeded.
        seconds: u64,
    },

    // --- Admission errors ---
    /// No conversion slot became free in time.
    #[error("Server at capacity: all {max_slots} conversion slots are in use")]
    AtCapacity {
        /// Total number of conversion slots.
        max_slots: usize,
    },

    /// The server is shutting down.
    #[error("Conversion was cancelled")]
    Cancelled,

    // --- Generic errors ---
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a termination signal".to_string(),
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        let message = err.to_string();
        match err {
            ConversionError::MissingFile
            | ConversionError::UnsupportedFormat { .. }
            | ConversionError::EmptyUpload => AppError::validation(message),
            ConversionError::UploadTooLarge { .. } => AppError::payload_too_large(message),
            ConversionError::ToolNotFound { .. } => AppError::tool_unavailable(message),
            ConversionError::SpawnFailed { source, .. } => {
                AppError::with_source(arcad_core::ErrorKind::Conversion, message, source)
            }
            ConversionError::ProcessFailed { .. }
            | ConversionError::OutputMissing { .. }
            | ConversionError::OutputTooSmall { .. } => AppError::conversion(message),
            ConversionError::OutputUnreadable { source, .. } => {
                AppError::with_source(arcad_core::ErrorKind::Conversion, message, source)
            }
            ConversionError::Timeout { .. } => AppError::timeout(message),
            ConversionError::AtCapacity { .. } => AppError::rate_limit(message),
            ConversionError::Cancelled => AppError::service_unavailable(message),
            ConversionError::ScriptInstall { source, .. } => {
                AppError::with_source(arcad_core::ErrorKind::Internal, message, source)
            }
            ConversionError::Io(source) => {
                AppError::with_source(arcad_core::ErrorKind::Storage, message, source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcad_core::ErrorKind;

    #[test]
    fn test_process_failure_message_hides_stderr() {
        let err = ConversionError::ProcessFailed {
            code: Some(1),
            stderr_tail: "Traceback: secret/internal/path.py".to_string(),
        };
        let message = err.to_string();
        assert_eq!(message, "Blender exited with exit code 1");

        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::Conversion);
        assert!(!app.message.contains("secret"));
    }

    #[test]
    fn test_signal_exit_is_described() {
        let err = ConversionError::ProcessFailed {
            code: None,
            stderr_tail: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_kind_mapping() {
        let cases: Vec<(ConversionError, ErrorKind)> = vec![
            (ConversionError::MissingFile, ErrorKind::Validation),
            (ConversionError::EmptyUpload, ErrorKind::Validation),
            (
                ConversionError::UnsupportedFormat {
                    file_name: "notes.txt".to_string(),
                },
                ErrorKind::Validation,
            ),
            (
                ConversionError::UploadTooLarge { limit: 10 },
                ErrorKind::PayloadTooLarge,
            ),
            (
                ConversionError::ToolNotFound { searched: vec![] },
                ErrorKind::ToolUnavailable,
            ),
            (
                ConversionError::OutputMissing {
                    path: PathBuf::from("out.glb"),
                },
                ErrorKind::Conversion,
            ),
            (ConversionError::Timeout { seconds: 5 }, ErrorKind::Timeout),
            (
                ConversionError::AtCapacity { max_slots: 2 },
                ErrorKind::RateLimit,
            ),
            (ConversionError::Cancelled, ErrorKind::ServiceUnavailable),
        ];

        for (err, expected) in cases {
            let app: AppError = err.into();
            assert_eq!(app.kind, expected, "{}", app.message);
        }
    }
}
