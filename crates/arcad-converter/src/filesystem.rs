//! Filesystem utilities for the conversion pipeline.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::client_base_name;

/// Filesystem utility functions.
pub struct FsUtils;

impl FsUtils {
    /// Longest sanitized stem kept in on-disk names.
    const MAX_STEM_CHARS: usize = 200;

    /// Stem used when a client name has nothing usable before the extension.
    const FALLBACK_STEM: &'static str = "model";

    /// Client-supplied stem: last path component with the final extension
    /// removed, otherwise verbatim.
    pub fn original_stem(name: &str) -> &str {
        let base = client_base_name(name);
        match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            Some(_) => "",
            None => base,
        }
    }

    /// Name the client sees for the converted file: `<original stem>.glb`.
    pub fn download_name(original_name: &str) -> String {
        let stem = Self::original_stem(original_name);
        if stem.trim().is_empty() {
            format!("{}.glb", Self::FALLBACK_STEM)
        } else {
            format!("{stem}.glb")
        }
    }

    /// Sanitize a filename stem for safe filesystem usage.
    pub fn sanitize_stem(filename: &str) -> String {
        let sanitized: String = Self::original_stem(filename)
            .chars()
            .filter_map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_') {
                    Some(c)
                } else if c.is_whitespace() || c == '.' {
                    Some('_')
                } else {
                    None
                }
            })
            .take(Self::MAX_STEM_CHARS)
            .collect();

        if sanitized.is_empty() {
            Self::FALLBACK_STEM.to_string()
        } else {
            sanitized
        }
    }

    /// Generate unique filename: `[SanitizedStem]__[UUIDv7].[Extension]`.
    pub fn generate_unique_filename(original_name: &str, extension: &str) -> String {
        let stem = Self::sanitize_stem(original_name);
        let uuid = Uuid::now_v7().simple();
        format!("{}__{}.{}", stem, uuid, extension.trim_start_matches('.'))
    }

    /// Create a directory and its parents if missing.
    pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }
}

/// Owns temporary files created while serving one request and deletes each of
/// them exactly once.
///
/// [`ArtifactGuard::release`] removes the files asynchronously. If the guard
/// is dropped without being released (the request future was cancelled, or a
/// panic unwound through it), `Drop` removes whatever is still tracked with
/// blocking calls.
#[derive(Debug, Default)]
pub struct ArtifactGuard {
    paths: Vec<PathBuf>,
}

impl ArtifactGuard {
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file for removal. The file does not need to exist yet.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Files still awaiting removal.
    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every tracked file. Files that never appeared are ignored.
    pub async fn release(&mut self) {
        for path in self.paths.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove temporary file"
                ),
            }
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed abandoned temporary file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove abandoned temporary file"
                ),
            }
        }
    }
}
