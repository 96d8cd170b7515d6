//! Streaming an uploaded file part into the upload directory.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ConversionError;
use crate::filesystem::{ArtifactGuard, FsUtils};
use crate::models::{MeshFormat, StagedUpload};

/// Writes one uploaded file to `<upload_dir>/<stem>__<uuidv7>.<ext>` chunk by
/// chunk, enforcing the size limit as bytes arrive.
///
/// The format is checked before the file is created, so an unsupported
/// upload never touches the disk. If the sink is dropped before
/// [`UploadSink::finish`], the partial file is removed.
#[derive(Debug)]
pub struct UploadSink {
    // Declared before `artifacts` so the handle closes before the guard
    // removes the file.
    file: File,
    path: PathBuf,
    original_name: String,
    format: MeshFormat,
    written: u64,
    limit: u64,
    artifacts: ArtifactGuard,
}

impl UploadSink {
    /// Validate the client file name and create the staging file.
    pub async fn create(
        upload_dir: &Path,
        original_name: &str,
        limit: u64,
    ) -> Result<Self, ConversionError> {
        let format = MeshFormat::from_file_name(original_name).ok_or_else(|| {
            ConversionError::UnsupportedFormat {
                file_name: original_name.to_string(),
            }
        })?;

        let path = upload_dir.join(FsUtils::generate_unique_filename(
            original_name,
            format.extension(),
        ));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let mut artifacts = ArtifactGuard::new();
        artifacts.track(&path);

        debug!(path = %path.display(), format = %format, "Staging upload");

        Ok(Self {
            file,
            path,
            original_name: original_name.to_string(),
            format,
            written: 0,
            limit,
            artifacts,
        })
    }

    /// Append a chunk. Fails without writing if the chunk would cross the
    /// size limit.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), ConversionError> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(ConversionError::UploadTooLarge { limit: self.limit });
        }
        self.file.write_all(chunk).await?;
        self.written = next;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Staging path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and hand the file over. Zero-byte uploads are removed and
    /// rejected.
    pub async fn finish(mut self) -> Result<StagedUpload, ConversionError> {
        if self.written == 0 {
            self.discard().await;
            return Err(ConversionError::EmptyUpload);
        }

        self.file.flush().await?;
        self.file.sync_all().await?;

        let Self {
            file,
            path,
            original_name,
            format,
            written,
            artifacts,
            ..
        } = self;
        drop(file);

        Ok(StagedUpload {
            path,
            original_name,
            format,
            size: written,
            artifacts,
        })
    }

    /// Remove the partial file now instead of waiting for drop.
    pub async fn discard(mut self) {
        // Close the handle before removing the file.
        let _ = self.file.flush().await;
        let Self { file, mut artifacts, .. } = self;
        drop(file);
        artifacts.release().await;
    }
}
