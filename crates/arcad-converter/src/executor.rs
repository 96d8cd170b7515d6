//! Running the conversion tool as a child process.
//!
//! One call spawns the process, drains its output, waits for it under a
//! wall-clock limit and a cancellation token, and reports everything in a
//! [`ProcessOutcome`]. Deciding whether the run succeeded is left to
//! [`ProcessOutcome::verdict`].

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConversionError;

/// How long to keep draining pipes after the child is gone. A descendant
/// that escaped the process group can hold them open indefinitely. Both
/// pipes share this one window.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

/// Read size for output capture.
const READ_CHUNK: usize = 8 * 1024;

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    /// Killed after exceeding the wall-clock limit.
    TimedOut(Duration),
    /// Killed because the server is shutting down.
    Cancelled,
}

/// Everything observed about one tool run.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// How the process ended.
    pub termination: Termination,
    /// Tail of stdout.
    pub stdout: String,
    /// Tail of stderr.
    pub stderr: String,
    /// Whether the expected output file existed after exit.
    pub output_exists: bool,
    /// Size of the output file, zero when absent.
    pub output_bytes: u64,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

impl ProcessOutcome {
    /// Exit code, when the process exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => code,
            _ => None,
        }
    }

    /// Success requires exit code zero AND an output file of at least
    /// `min_output_bytes`.
    pub fn verdict(
        &self,
        output_path: &Path,
        min_output_bytes: u64,
    ) -> Result<(), ConversionError> {
        match self.termination {
            Termination::TimedOut(limit) => {
                return Err(ConversionError::Timeout {
                    seconds: limit.as_secs(),
                });
            }
            Termination::Cancelled => return Err(ConversionError::Cancelled),
            Termination::Exited(Some(0)) => {}
            Termination::Exited(code) => {
                return Err(ConversionError::ProcessFailed {
                    code,
                    stderr_tail: self.stderr.clone(),
                });
            }
        }

        if !self.output_exists {
            return Err(ConversionError::OutputMissing {
                path: output_path.to_path_buf(),
            });
        }
        if self.output_bytes < min_output_bytes {
            return Err(ConversionError::OutputTooSmall {
                size: self.output_bytes,
                min: min_output_bytes,
            });
        }
        Ok(())
    }
}

/// Spawns the conversion tool with a time limit and bounded output capture.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    max_captured_bytes: usize,
}

impl ProcessRunner {
    /// Create a runner.
    pub fn new(timeout: Duration, max_captured_bytes: usize) -> Self {
        Self {
            timeout,
            max_captured_bytes,
        }
    }

    /// Run `program args...` to completion, timeout, or cancellation.
    ///
    /// Only a failure to start the process is an `Err`; every way the
    /// process can end is described by the returned outcome. On timeout or
    /// cancellation the whole process group is killed and the child reaped
    /// before returning.
    pub async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ConversionError> {
        let mut cmd = Command::new(program);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        // The tool leads its own process group so wrapper launchers and
        // anything they fork die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %program.display(),
            ?args,
            timeout_s = self.timeout.as_secs(),
            "Spawning conversion tool"
        );

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ConversionError::SpawnFailed {
            program: program.to_path_buf(),
            source,
        })?;
        let mut group = ProcessGroup::of(&child);

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_tail(out, self.max_captured_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_tail(err, self.max_captured_bytes)));

        // Race: process completion vs timeout vs cancellation
        let termination = tokio::select! {
            status = child.wait() => Termination::Exited(status?.code()),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(
                    timeout_s = self.timeout.as_secs(),
                    pid = ?child.id(),
                    "Conversion tool timed out, killing"
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill conversion tool");
                }
                Termination::TimedOut(self.timeout)
            }
            _ = cancel.cancelled() => {
                info!(pid = ?child.id(), "Conversion cancelled, killing tool");
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill conversion tool");
                }
                Termination::Cancelled
            }
        };
        let elapsed = start.elapsed();

        // Descendants left behind by a clean exit still hold the pipes.
        group.kill();

        let (stdout, stderr) = tokio::join!(collect(stdout_task), collect(stderr_task));

        let (output_exists, output_bytes) = match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.is_file() => (true, meta.len()),
            _ => (false, 0),
        };

        debug!(
            ?termination,
            elapsed_ms = elapsed.as_millis() as u64,
            output_exists,
            output_bytes,
            "Conversion tool finished"
        );

        Ok(ProcessOutcome {
            termination,
            stdout,
            stderr,
            output_exists,
            output_bytes,
            elapsed,
        })
    }
}

/// The process group led by a spawned tool.
///
/// Killed at most once, either explicitly or on drop when the run future is
/// abandoned mid-flight. Descendants that moved to another group or session
/// are out of reach.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid.take().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Read a stream to EOF, keeping only the last `limit` bytes.
pub async fn read_tail<R>(mut reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&tail).into_owned()
}

async fn collect(task: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = task else {
        return String::new();
    };
    match tokio::time::timeout(CAPTURE_GRACE, &mut handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "Output capture task failed");
            String::new()
        }
        Err(_) => {
            warn!("Output pipe still open after process exit, abandoning capture");
            handle.abort();
            String::new()
        }
    }
}

/// Command line rendered for logs.
pub fn describe_command(program: &Path, args: &[OsString]) -> String {
    let mut parts: Vec<String> = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
