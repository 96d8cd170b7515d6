//! The Blender conversion script and its one-time installation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::error::ConversionError;

/// Python program run inside Blender as
/// `blender --background --python <script> -- <input> <output>`.
///
/// Exit codes: `1` unexpected exception, `2` bad arguments or unsupported
/// extension, `3` no importer available in this Blender build, `4` the
/// exporter left no file behind.
pub struct ConversionScript;

impl ConversionScript {
    /// Script text. Static, so every installation is byte-identical.
    pub const CONTENT: &'static str = r#"import os
import sys
import traceback

import addon_utils
import bpy

IMPORTERS = {
    ".stl": (("io_mesh_stl",), ("wm.stl_import", "import_mesh.stl")),
    ".obj": (("io_scene_obj",), ("wm.obj_import", "import_scene.obj")),
    ".ply": (("io_mesh_ply",), ("wm.ply_import", "import_mesh.ply")),
    ".dae": ((), ("wm.collada_import",)),
    ".step": (("STEPper", "io_import_step"), ("import_scene.step", "import_scene.occ_import_step")),
    ".stp": (("STEPper", "io_import_step"), ("import_scene.step", "import_scene.occ_import_step")),
}


def parse_args():
    argv = sys.argv
    if "--" not in argv:
        print("usage: blender --background --python convert_to_glb.py -- <input> <output>")
        sys.exit(2)
    args = argv[argv.index("--") + 1:]
    if len(args) != 2:
        print("expected two arguments after '--': <input> <output>")
        sys.exit(2)
    return args[0], args[1]


def enable_addons(modules):
    for module in modules:
        try:
            addon_utils.enable(module, default_set=True)
        except Exception:
            pass


def find_operator(names):
    for name in names:
        category, _, op_name = name.partition(".")
        try:
            op = getattr(getattr(bpy.ops, category), op_name)
            op.get_rna_type()
        except (AttributeError, KeyError):
            continue
        return op
    return None


def clear_scene():
    if bpy.context.object is not None and bpy.context.object.mode != "OBJECT":
        bpy.ops.object.mode_set(mode="OBJECT")
    bpy.ops.object.select_all(action="SELECT")
    bpy.ops.object.delete(use_global=False)
    for mesh in list(bpy.data.meshes):
        if mesh.users == 0:
            bpy.data.meshes.remove(mesh)


def main():
    input_path, output_path = parse_args()
    ext = os.path.splitext(input_path)[1].lower()
    if ext not in IMPORTERS:
        print(f"Unsupported input format: {ext}")
        sys.exit(2)

    addons, operators = IMPORTERS[ext]
    enable_addons(addons)
    importer = find_operator(operators)
    if importer is None:
        print(f"No importer available for {ext}")
        sys.exit(3)

    clear_scene()
    importer(filepath=input_path)
    bpy.ops.export_scene.gltf(filepath=output_path, export_format="GLB")

    if not os.path.exists(output_path):
        print(f"Export produced no file at {output_path}")
        sys.exit(4)

    size_mb = os.path.getsize(output_path) / (1024 * 1024)
    print(f"Successfully converted {input_path} to {output_path} ({size_mb:.2f} MB)")


if __name__ == "__main__":
    try:
        main()
    except Exception:
        traceback.print_exc()
        sys.exit(1)
"#;
}

/// What [`ScriptInstaller::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// A file already existed and was left alone.
    AlreadyPresent,
    /// The script was written.
    Installed,
}

/// Installs [`ConversionScript`] at startup.
pub struct ScriptInstaller;

impl ScriptInstaller {
    /// Write the script to `path` unless a file is already there.
    ///
    /// The content goes to a uniquely named file in the same directory first
    /// and is renamed into place, so readers never see a partial script.
    pub async fn ensure(path: &Path) -> Result<InstallStatus, ConversionError> {
        let install_err = |source| ConversionError::ScriptInstall {
            path: path.to_path_buf(),
            source,
        };

        if tokio::fs::try_exists(path).await.map_err(install_err)? {
            info!(script = %path.display(), "Conversion script already present");
            return Ok(InstallStatus::AlreadyPresent);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(install_err)?;
        }

        let temp_path = Self::temp_path(path);
        if let Err(e) = Self::write_and_rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(install_err(e));
        }

        info!(script = %path.display(), "Installed conversion script");
        Ok(InstallStatus::Installed)
    }

    async fn write_and_rename(temp_path: &Path, path: &Path) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await?;
        file.write_all(ConversionScript::CONTENT.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(temp_path, path).await
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        path.with_file_name(format!(".{}.{}.tmp", name, Uuid::now_v7().simple()))
    }
}
