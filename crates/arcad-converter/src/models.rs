//! Domain models: mesh formats, staged uploads, jobs, and converted assets.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filesystem::ArtifactGuard;

// ---------------------------------------------------------------------------
// Extension map macro
// ---------------------------------------------------------------------------

macro_rules! define_mesh_formats {
    ($($variant:ident => $ext:literal),* $(,)?) => {
        static EXTENSION_MAP: LazyLock<HashMap<&'static str, MeshFormat>> = LazyLock::new(|| {
            HashMap::from([$(($ext, MeshFormat::$variant),)*])
        });

        impl MeshFormat {
            /// All file extensions accepted for conversion.
            pub const SUPPORTED_EXTENSIONS: &'static [&'static str] = &[$($ext,)*];
        }
    };
}

define_mesh_formats! {
    Stl  => "stl",
    Step => "step",
    Stp  => "stp",
    Obj  => "obj",
    Ply  => "ply",
    Dae  => "dae",
}

/// Input formats Blender is driven to import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    /// Stereolithography (.stl)
    Stl,
    /// STEP (.step)
    Step,
    /// STEP short extension (.stp)
    Stp,
    /// Wavefront OBJ (.obj)
    Obj,
    /// Stanford polygon (.ply)
    Ply,
    /// COLLADA (.dae)
    Dae,
}

impl MeshFormat {
    /// Look up a format by extension, case-insensitively, with or without a
    /// leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        EXTENSION_MAP.get(ext.as_str()).copied()
    }

    /// Detect the format of a client-supplied file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let base = client_base_name(name);
        let (_, ext) = base.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Canonical lowercase extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Stl => "stl",
            Self::Step => "step",
            Self::Stp => "stp",
            Self::Obj => "obj",
            Self::Ply => "ply",
            Self::Dae => "dae",
        }
    }

    /// Whether this is a B-rep format that needs a third-party importer.
    pub fn is_brep(&self) -> bool {
        matches!(self, Self::Step | Self::Stp)
    }

    /// Comma-separated list of supported extensions, for messages.
    pub fn supported_list() -> String {
        Self::SUPPORTED_EXTENSIONS.join(", ")
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Last path component of a client-supplied name. Browsers on Windows have
/// been known to send full paths with either separator.
pub(crate) fn client_base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

// ---------------------------------------------------------------------------
// Upload / job / result
// ---------------------------------------------------------------------------

/// An upload that has been fully written to the upload directory.
///
/// The file is removed exactly once: either by the processor after the
/// conversion finishes, or when this value (or the guard it hands over) is
/// dropped.
#[derive(Debug)]
pub struct StagedUpload {
    /// Request-unique path in the upload directory.
    pub path: PathBuf,
    /// Name as sent by the client.
    pub original_name: String,
    /// Detected input format.
    pub format: MeshFormat,
    /// Bytes written.
    pub size: u64,
    pub(crate) artifacts: ArtifactGuard,
}

impl StagedUpload {
    /// Hand ownership of the staged file's cleanup to the caller.
    pub fn into_artifacts(self) -> ArtifactGuard {
        self.artifacts
    }
}

/// A single Blender invocation, fully resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    /// Job identifier (UUIDv7).
    pub id: Uuid,
    /// Staged input file.
    pub input_path: PathBuf,
    /// Request-unique output file.
    pub output_path: PathBuf,
    /// Installed conversion script.
    pub script_path: PathBuf,
    /// Resolved Blender executable.
    pub tool_path: PathBuf,
    /// Name the client sees for the result.
    pub download_name: String,
}

impl ConversionJob {
    /// Arguments for `blender --background --python <script> -- <in> <out>`.
    pub fn tool_args(&self) -> Vec<OsString> {
        vec![
            OsString::from("--background"),
            OsString::from("--python"),
            self.script_path.clone().into_os_string(),
            OsString::from("--"),
            self.input_path.clone().into_os_string(),
            self.output_path.clone().into_os_string(),
        ]
    }
}

/// The GLB produced by a successful conversion, already read into memory.
#[derive(Debug, Clone)]
pub struct ConvertedAsset {
    /// Client-visible file name (`<original stem>.glb`).
    pub file_name: String,
    /// GLB bytes.
    pub data: Bytes,
}

impl ConvertedAsset {
    /// Size of the GLB in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the GLB is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
