//! Conversion processor: admission control, tool resolution, a single
//! Blender run with timeout and cancellation, output validation, cleanup,
//! and metrics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcad_core::config::{ConversionConfig, StorageConfig};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::blender::{BlenderLocator, LocateError, ToolStatus};
use crate::error::ConversionError;
use crate::executor::{ProcessRunner, describe_command};
use crate::filesystem::{ArtifactGuard, FsUtils};
use crate::metrics::{ConversionMetrics, MetricsSnapshot};
use crate::models::{ConversionJob, ConvertedAsset, StagedUpload};
use crate::scripting::ScriptInstaller;

/// The conversion processor. Cheap to clone; clones share slots, metrics,
/// and the shutdown token.
#[derive(Debug, Clone)]
pub struct ConversionProcessor {
    /// Conversion settings.
    config: ConversionConfig,
    /// Staging directory for uploads.
    upload_dir: PathBuf,
    /// Directory Blender writes GLB files into.
    output_dir: PathBuf,
    /// Installed conversion script.
    script_path: PathBuf,
    /// How Blender is found on this host.
    locator: BlenderLocator,
    /// Semaphore limiting concurrent Blender processes.
    limiter: Arc<Semaphore>,
    /// Process spawner.
    runner: ProcessRunner,
    /// Conversion metrics collector.
    metrics: Arc<ConversionMetrics>,
    /// Cancelled when the server shuts down.
    shutdown: CancellationToken,
}

/// Processor state for the detailed health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorHealth {
    /// Blender resolution performed now.
    pub tool: ToolStatus,
    /// Whether the conversion script is on disk.
    pub script_present: bool,
    /// Installed script location.
    pub script_path: PathBuf,
    /// Free conversion slots.
    pub available_slots: usize,
    /// Configured conversion slots.
    pub max_slots: usize,
    /// Whether shutdown has begun.
    pub shutting_down: bool,
    /// Counters and latency percentiles.
    pub metrics: MetricsSnapshot,
}

impl ConversionProcessor {
    /// Create the upload and output directories, install the conversion
    /// script if absent, and build a processor.
    pub async fn initialize(
        config: ConversionConfig,
        storage: &StorageConfig,
    ) -> Result<Self, ConversionError> {
        let upload_dir = storage.upload_path();
        let output_dir = storage.converted_path();
        FsUtils::ensure_dir(&upload_dir).await?;
        FsUtils::ensure_dir(&output_dir).await?;

        let script_path = storage.script_file();
        ScriptInstaller::ensure(&script_path).await?;

        let locator = BlenderLocator::from_config(&config);
        match locator.resolve().await {
            Ok(tool) => info!(
                blender = %tool.path.display(),
                method = ?tool.method,
                "Blender located"
            ),
            Err(e) => warn!(
                error = %e,
                "Blender not found at startup; conversions will fail until it is installed"
            ),
        }

        Ok(Self::with_locator(
            config,
            upload_dir,
            output_dir,
            script_path,
            locator,
        ))
    }

    /// Build a processor from explicit parts. Directories and the script are
    /// expected to exist already.
    pub fn with_locator(
        config: ConversionConfig,
        upload_dir: PathBuf,
        output_dir: PathBuf,
        script_path: PathBuf,
        locator: BlenderLocator,
    ) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(config.max_concurrent)),
            runner: ProcessRunner::new(config.timeout(), config.max_captured_output_bytes),
            metrics: Arc::new(ConversionMetrics::new()),
            shutdown: CancellationToken::new(),
            config,
            upload_dir,
            output_dir,
            script_path,
            locator,
        }
    }

    /// Convert a staged upload to GLB.
    ///
    /// The staged input and the output file are removed before this returns,
    /// whatever the result. If the returned future is dropped part-way, the
    /// child process is killed and both files are removed on drop.
    #[instrument(
        skip(self, upload),
        fields(job_id, file = %upload.original_name, format = %upload.format)
    )]
    pub async fn convert(&self, upload: StagedUpload) -> Result<ConvertedAsset, ConversionError> {
        let job_id = Uuid::now_v7();
        tracing::Span::current().record("job_id", tracing::field::display(job_id));

        let input_path = upload.path.clone();
        let original_name = upload.original_name.clone();
        let input_bytes = upload.size;
        let is_brep = upload.format.is_brep();
        let mut artifacts = upload.into_artifacts();

        let result = self
            .run_job(job_id, input_path, &original_name, input_bytes, &mut artifacts)
            .await;

        // Exit status 3 is the script's "no importer" code.
        if is_brep
            && matches!(result, Err(ConversionError::ProcessFailed { code: Some(3), .. }))
        {
            warn!(
                "Blender has no STEP importer enabled; install a STEP import add-on to convert STEP files"
            );
        }

        artifacts.release().await;
        result
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        input_path: PathBuf,
        original_name: &str,
        input_bytes: u64,
        artifacts: &mut ArtifactGuard,
    ) -> Result<ConvertedAsset, ConversionError> {
        let _permit = self.acquire_slot().await?;

        if self.shutdown.is_cancelled() {
            self.metrics.record_cancelled();
            return Err(ConversionError::Cancelled);
        }

        let tool = match self.locator.resolve().await {
            Ok(tool) => tool,
            Err(LocateError::NotFound { searched }) => {
                warn!(
                    searched = ?searched,
                    "Blender executable not found; install Blender or set conversion.blender_path"
                );
                self.metrics.record_tool_missing();
                return Err(ConversionError::ToolNotFound { searched });
            }
        };

        let output_path = self
            .output_dir
            .join(FsUtils::generate_unique_filename(original_name, "glb"));
        artifacts.track(&output_path);

        let job = ConversionJob {
            id: job_id,
            input_path,
            output_path,
            script_path: self.script_path.clone(),
            tool_path: tool.path,
            download_name: FsUtils::download_name(original_name),
        };

        self.metrics.record_started(input_bytes);
        let args = job.tool_args();

        let outcome = match self
            .runner
            .run(&job.tool_path, &args, &job.output_path, &self.shutdown)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    command = %describe_command(&job.tool_path, &args),
                    error = %e,
                    "Failed to start Blender"
                );
                self.metrics.record_failure();
                return Err(e);
            }
        };

        if let Err(e) = outcome.verdict(&job.output_path, self.config.min_output_bytes) {
            match &e {
                ConversionError::Timeout { seconds } => {
                    error!(timeout_s = seconds, "Blender timed out and was killed");
                    self.metrics.record_timeout();
                }
                ConversionError::Cancelled => {
                    info!("Conversion cancelled by shutdown");
                    self.metrics.record_cancelled();
                }
                _ => {
                    error!(
                        command = %describe_command(&job.tool_path, &args),
                        exit_code = ?outcome.exit_code(),
                        output_exists = outcome.output_exists,
                        output_bytes = outcome.output_bytes,
                        stderr = %outcome.stderr,
                        stdout = %outcome.stdout,
                        error = %e,
                        "Blender conversion failed"
                    );
                    self.metrics.record_failure();
                }
            }
            return Err(e);
        }

        let data = match Self::read_output(&job.output_path).await {
            Ok(data) => data,
            Err(e) => {
                error!(output = %job.output_path.display(), error = %e, "Converted output unreadable");
                self.metrics.record_failure();
                return Err(e);
            }
        };

        if (data.len() as u64) < self.config.min_output_bytes {
            self.metrics.record_failure();
            return Err(ConversionError::OutputTooSmall {
                size: data.len() as u64,
                min: self.config.min_output_bytes,
            });
        }

        self.metrics.record_success(outcome.elapsed, data.len() as u64);
        info!(
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            output_bytes = data.len(),
            blender_stdout = %outcome.stdout.trim_end(),
            "Conversion completed"
        );

        Ok(ConvertedAsset {
            file_name: job.download_name,
            data: Bytes::from(data),
        })
    }

    /// Wait for a conversion slot, bounded by `queue_timeout_seconds`.
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ConversionError> {
        let limiter = Arc::clone(&self.limiter);
        let wait = self.config.queue_timeout();
        let max_slots = self.config.max_concurrent;

        let acquired = if wait.is_zero() {
            limiter.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => ConversionError::AtCapacity { max_slots },
                TryAcquireError::Closed => ConversionError::Cancelled,
            })
        } else {
            tokio::select! {
                res = tokio::time::timeout(wait, limiter.acquire_owned()) => match res {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_closed)) => Err(ConversionError::Cancelled),
                    Err(_elapsed) => Err(ConversionError::AtCapacity { max_slots }),
                },
                _ = self.shutdown.cancelled() => Err(ConversionError::Cancelled),
            }
        };

        match &acquired {
            Err(ConversionError::AtCapacity { .. }) => {
                warn!(
                    max_slots,
                    queue_timeout_s = wait.as_secs(),
                    "No conversion slot available"
                );
                self.metrics.record_rejected();
            }
            Err(_) => self.metrics.record_cancelled(),
            Ok(_) => {}
        }
        acquired
    }

    async fn read_output(path: &Path) -> Result<Vec<u8>, ConversionError> {
        tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConversionError::OutputMissing {
                    path: path.to_path_buf(),
                }
            } else {
                ConversionError::OutputUnreadable {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })
    }

    /// Begin shutdown: kill running conversions and refuse queued ones.
    pub fn shutdown(&self) {
        info!("Conversion processor shutting down");
        self.shutdown.cancel();
        self.limiter.close();
    }

    /// Staging directory for uploads.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Directory for converted output.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Installed script location.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Get the configuration.
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Free conversion slots.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Get a metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve Blender now and gather processor state.
    pub async fn health(&self) -> ProcessorHealth {
        let script_present = tokio::fs::try_exists(&self.script_path)
            .await
            .unwrap_or(false);
        ProcessorHealth {
            tool: ToolStatus::probe(&self.locator).await,
            script_present,
            script_path: self.script_path.clone(),
            available_slots: self.available_slots(),
            max_slots: self.config.max_concurrent,
            shutting_down: self.shutdown.is_cancelled(),
            metrics: self.metrics_snapshot(),
        }
    }
}
