//! # arcad-converter
//!
//! Converts uploaded CAD and mesh files (STL, STEP, OBJ, PLY, DAE) to GLB by
//! running Blender headless:
//!
//! ```text
//! blender --background --python <script> -- <input> <output>
//! ```
//!
//! The Python script is generated once at startup. Every conversion stages
//! the upload under a request-unique name, waits for one of a fixed number
//! of slots, resolves the Blender executable for this host, runs it under a
//! wall-clock limit, and removes both the input and the output before
//! returning the GLB bytes.

pub mod blender;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod scripting;
pub mod upload;

pub use blender::{BlenderLocator, DiscoveryMethod, ResolvedTool, ToolStatus};
pub use error::ConversionError;
pub use models::{ConversionJob, ConvertedAsset, MeshFormat, StagedUpload};
pub use processor::{ConversionProcessor, ProcessorHealth};
pub use scripting::{ConversionScript, InstallStatus, ScriptInstaller};
pub use upload::UploadSink;
