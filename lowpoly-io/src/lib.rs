//! I/O operations for lowpoly assets
//!
//! This crate reads the high resolution source (glTF, GLB, OBJ or binary
//! FBX), writes the
//! low poly result as a self-contained GLB (or OBJ), encodes the baked
//! atlases as PNG and renders the job manifest.
//!
//! Writers come in two flavours: `encode_*` functions produce bytes in
//! memory, `write_*` functions put them on disk. The pipeline encodes every
//! artifact before writing any of them.

pub mod error;
pub mod gltf_import;
pub mod fbx;
pub mod glb_export;
pub mod wavefront;
pub mod atlas;
pub mod manifest;

pub use error::*;
pub use gltf_import::GltfReader;
pub use fbx::FbxReader;
pub use glb_export::{encode_glb, write_glb, GlbTextures};
pub use wavefront::{encode_obj, ObjReader, ObjWriter};
pub use atlas::{decode_png, encode_atlas, encode_png, EncodedAtlas, BASE_COLOR_FILE, NORMAL_FILE};
pub use manifest::{manifest_value, parse_mesh_stats, Manifest, MANIFEST_FILE};

use lowpoly_core::{Error, Material, Result, TriangleMesh};
use std::path::Path;

/// A mesh read from disk together with what the baker needs of its material
#[derive(Debug, Clone)]
pub struct ImportedAsset {
    pub mesh: TriangleMesh,
    pub material: Material,
    /// Number of mesh objects in the file; only the largest is kept
    pub mesh_objects: usize,
}

/// Trait for reading assets from files
pub trait AssetReader {
    fn read_asset<P: AsRef<Path>>(path: P) -> Result<ImportedAsset>;
}

/// Trait for writing meshes to files
pub trait MeshWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()>;
}

/// Lowercased file extension of `path`
fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Auto-detect format and read an asset.
///
/// `.glb`, `.gltf`, `.obj` and binary `.fbx` are understood; anything else
/// is `UnsupportedInput`, as is a file that fails to parse. A file without
/// triangles is `EmptyGeometry`.
pub fn import_asset<P: AsRef<Path>>(path: P) -> Result<ImportedAsset> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    match extension(path).as_deref() {
        Some("glb") | Some("gltf") => GltfReader::read_asset(path),
        Some("obj") => ObjReader::read_asset(path),
        Some("fbx") => FbxReader::read_asset(path),
        other => Err(IoError::UnsupportedFormat {
            format: other.map_or_else(|| "no extension".to_string(), |ext| format!(".{}", ext)),
        }
        .into()),
    }
}

/// Auto-detect format and write a bare mesh (no material)
pub fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("glb") => write_glb(mesh, None, path),
        Some("obj") => ObjWriter::write_mesh(mesh, path),
        _ => Err(Error::Export(format!("cannot write meshes as {}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.stl");
        std::fs::write(&path, b"solid model").unwrap();
        let err = import_asset(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(ref m) if m.contains(".stl")));
    }

    #[test]
    fn test_truncated_fbx_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.fbx");
        std::fs::write(&path, b"Kaydara FBX Binary").unwrap();
        let err = import_asset(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(_)));
    }

    #[test]
    fn test_missing_file_is_unsupported() {
        let err = import_asset("does/not/exist.glb").unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(_)));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(extension(Path::new("A/B/Model.GLB")).as_deref(), Some("glb"));
        assert_eq!(extension(Path::new("noext")), None);
    }

    #[test]
    fn test_write_mesh_rejects_unknown_extension() {
        let mesh = TriangleMesh::new();
        let err = write_mesh(&mesh, "out.ply").unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }
}
