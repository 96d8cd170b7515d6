//! Blender executable discovery.
//!
//! Resolution runs on every conversion and is never cached, so installing or
//! removing Blender takes effect without a restart. Each host class gets one
//! [`BlenderLocator`] variant:
//!
//! 1. An explicitly configured path
//! 2. Windows: the versioned `Blender Foundation` install directories
//! 3. macOS: the application bundle
//! 4. Other Unix: `blender` on `PATH`

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use arcad_core::config::ConversionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Blender releases probed on Windows, newest first.
const WINDOWS_VERSIONS: &[&str] = &["4.4", "4.3", "4.2", "4.1", "4.0", "3.6"];

/// Fallback for `%ProgramFiles%`.
const WINDOWS_PROGRAM_FILES: &str = r"C:\Program Files";

/// Executable inside the macOS application bundle.
const MACOS_BUNDLE_BINARY: &str = "/Applications/Blender.app/Contents/MacOS/Blender";

/// Executable name looked up on `PATH`.
const BLENDER_COMMAND: &str = "blender";

/// Errors from Blender discovery.
#[derive(Debug, Error)]
pub enum LocateError {
    /// No candidate location held an executable.
    #[error("Blender not found. Searched: {}", join_paths(.searched))]
    NotFound {
        /// Every location that was probed, in order.
        searched: Vec<PathBuf>,
    },
}

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(nothing)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the Blender executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// `conversion.blender_path` was set.
    ExplicitConfig,
    /// First existing entry of an ordered candidate list.
    CandidateList,
    /// The single well-known install location for the host.
    FixedInstall,
    /// Looked up on the `PATH` environment variable.
    SystemPath,
}

/// A Blender executable that existed at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTool {
    /// Full path to the executable.
    pub path: PathBuf,
    /// How it was found.
    pub method: DiscoveryMethod,
}

/// Strategy for finding the Blender executable on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlenderLocator {
    /// A configured path that must exist.
    Explicit(PathBuf),
    /// Ordered candidates; the first existing one wins.
    Candidates(Vec<PathBuf>),
    /// A single well-known location.
    Fixed(PathBuf),
    /// A command name searched for on `PATH`.
    OnPath(String),
}

impl BlenderLocator {
    /// Default locator for the host this binary was built for.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            let program_files = std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(WINDOWS_PROGRAM_FILES));
            Self::Candidates(Self::windows_candidates(&program_files))
        } else if cfg!(target_os = "macos") {
            Self::Fixed(PathBuf::from(MACOS_BUNDLE_BINARY))
        } else {
            Self::OnPath(BLENDER_COMMAND.to_string())
        }
    }

    /// Locator honoring configuration overrides: `blender_path`, then
    /// `candidate_paths`, then the host default.
    pub fn from_config(config: &ConversionConfig) -> Self {
        if let Some(path) = config
            .blender_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
        {
            return Self::Explicit(path.clone());
        }
        if !config.candidate_paths.is_empty() {
            return Self::Candidates(config.candidate_paths.clone());
        }
        Self::for_host()
    }

    /// `<program files>\Blender Foundation\Blender <ver>\blender.exe`, newest first.
    pub fn windows_candidates(program_files: &Path) -> Vec<PathBuf> {
        WINDOWS_VERSIONS
            .iter()
            .map(|version| {
                program_files
                    .join("Blender Foundation")
                    .join(format!("Blender {version}"))
                    .join("blender.exe")
            })
            .collect()
    }

    /// Probe the filesystem now.
    pub async fn resolve(&self) -> Result<ResolvedTool, LocateError> {
        match self {
            Self::Explicit(path) => Self::probe_single(path, DiscoveryMethod::ExplicitConfig).await,
            Self::Fixed(path) => Self::probe_single(path, DiscoveryMethod::FixedInstall).await,
            Self::Candidates(paths) => {
                for path in paths {
                    if is_executable(path).await {
                        return Ok(ResolvedTool {
                            path: path.clone(),
                            method: DiscoveryMethod::CandidateList,
                        });
                    }
                    debug!(candidate = %path.display(), "Blender candidate missing");
                }
                Err(LocateError::NotFound {
                    searched: paths.clone(),
                })
            }
            Self::OnPath(command) => {
                let path_var = std::env::var_os("PATH").unwrap_or_default();
                find_on_path(command, &path_var).await
            }
        }
    }

    async fn probe_single(
        path: &Path,
        method: DiscoveryMethod,
    ) -> Result<ResolvedTool, LocateError> {
        if is_executable(path).await {
            Ok(ResolvedTool {
                path: path.to_path_buf(),
                method,
            })
        } else {
            Err(LocateError::NotFound {
                searched: vec![path.to_path_buf()],
            })
        }
    }
}

/// Search each directory of a `PATH`-style value for `command`.
pub async fn find_on_path(command: &str, path_var: &OsStr) -> Result<ResolvedTool, LocateError> {
    let mut searched = Vec::new();

    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for name in command_file_names(command) {
            let candidate = dir.join(&name);
            if is_executable(&candidate).await {
                return Ok(ResolvedTool {
                    path: candidate,
                    method: DiscoveryMethod::SystemPath,
                });
            }
            searched.push(candidate);
        }
    }

    Err(LocateError::NotFound { searched })
}

fn command_file_names(command: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(command).extension().is_none() {
        vec![format!("{command}.exe"), command.to_string()]
    } else {
        vec![command.to_string()]
    }
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Tool status reported by the detailed health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatus {
    /// Whether Blender was found.
    pub available: bool,
    /// Resolved executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// How it was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DiscoveryMethod>,
    /// Why it was not found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolStatus {
    /// Resolve now and summarize the result.
    pub async fn probe(locator: &BlenderLocator) -> Self {
        match locator.resolve().await {
            Ok(tool) => Self {
                available: true,
                path: Some(tool.path),
                method: Some(tool.method),
                error: None,
            },
            Err(e) => Self {
                available: false,
                path: None,
                method: None,
                error: Some(e.to_string()),
            },
        }
    }
}
