//! Wavefront OBJ import and export
//!
//! OBJ stores `v` with the origin at the bottom of the image; lowpoly keeps
//! glTF's top-left convention, so `v` is flipped on the way in and out.
//! Polygons are fan-triangulated and every distinct position / UV / normal
//! triple becomes one vertex.

use crate::{AssetReader, ImportedAsset, IoError, MeshWriter};
use lowpoly_core::{Material, Point3f, Result, Texture, TriangleMesh, Vector3f};
use obj::raw::object::Polygon;
use obj::raw::{parse_mtl, parse_obj, RawObj};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// OBJ reader; materials come from the first `mtllib` that defines a
/// diffuse map
pub struct ObjReader;

/// OBJ writer with positions, UVs and normals
pub struct ObjWriter;

/// One polygon corner: position, optional UV, optional normal
type Corner = (usize, Option<usize>, Option<usize>);

fn corners(polygon: &Polygon) -> Vec<Corner> {
    match polygon {
        Polygon::P(c) => c.iter().map(|&p| (p, None, None)).collect(),
        Polygon::PT(c) => c.iter().map(|&(p, t)| (p, Some(t), None)).collect(),
        Polygon::PN(c) => c.iter().map(|&(p, n)| (p, None, Some(n))).collect(),
        Polygon::PTN(c) => c.iter().map(|&(p, t, n)| (p, Some(t), Some(n))).collect(),
    }
}

impl AssetReader for ObjReader {
    fn read_asset<P: AsRef<Path>>(path: P) -> Result<ImportedAsset> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| IoError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let raw = parse_obj(BufReader::new(file)).map_err(|e| IoError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;

        let mesh = mesh_from_raw(&raw)?;
        if mesh.face_count() == 0 {
            return Err(IoError::NoGeometry {
                path: path.display().to_string(),
            }
            .into());
        }

        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let material = load_material(&raw, directory);

        info!(
            path = %path.display(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            textured = material.base_color_texture.is_some(),
            "imported OBJ mesh"
        );
        Ok(ImportedAsset {
            mesh,
            material,
            mesh_objects: 1,
        })
    }
}

fn mesh_from_raw(raw: &RawObj) -> Result<TriangleMesh> {
    let mut mesh = TriangleMesh::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut normals: Vec<Vector3f> = Vec::new();
    let mut all_normals = true;
    let mut any_uvs = false;
    let mut index_of: HashMap<Corner, usize> = HashMap::new();

    let out_of_range = |what: &str, index: usize| IoError::ParseError {
        message: format!("{} index {} out of range", what, index),
    };

    for polygon in &raw.polygons {
        let corners = corners(polygon);
        if corners.len() < 3 {
            continue;
        }
        let mut indices = Vec::with_capacity(corners.len());
        for corner in corners {
            if let Some(&index) = index_of.get(&corner) {
                indices.push(index);
                continue;
            }
            let (p, t, n) = corner;
            let &(x, y, z, _) = raw.positions.get(p).ok_or_else(|| out_of_range("position", p))?;
            let index = mesh.add_vertex(Point3f::new(x, y, z));

            match t {
                Some(t) => {
                    let &(u, v, _) = raw.tex_coords.get(t).ok_or_else(|| out_of_range("texture", t))?;
                    uvs.push([u, 1.0 - v]);
                    any_uvs = true;
                }
                None => uvs.push([0.0, 0.0]),
            }
            match n {
                Some(n) => {
                    let &(x, y, z) = raw.normals.get(n).ok_or_else(|| out_of_range("normal", n))?;
                    normals.push(Vector3f::new(x, y, z));
                }
                None => {
                    all_normals = false;
                    normals.push(Vector3f::zeros());
                }
            }
            index_of.insert(corner, index);
            indices.push(index);
        }
        for k in 1..indices.len() - 1 {
            mesh.add_face([indices[0], indices[k], indices[k + 1]]);
        }
    }

    if all_normals && mesh.vertex_count() > 0 {
        mesh.set_normals(normals);
    } else {
        mesh.update_vertex_normals();
    }
    if any_uvs {
        mesh.set_uvs(uvs);
    }
    Ok(mesh)
}

/// Base color texture of the first used material with a `map_Kd`
fn load_material(raw: &RawObj, directory: &Path) -> Material {
    let mut used: Vec<&String> = raw.meshes.keys().collect();
    used.sort();

    for library in &raw.material_libraries {
        let mtl_path = directory.join(library);
        let parsed = File::open(&mtl_path)
            .map_err(|e| e.to_string())
            .and_then(|f| parse_mtl(BufReader::new(f)).map_err(|e| e.to_string()));
        let mtl = match parsed {
            Ok(mtl) => mtl,
            Err(reason) => {
                warn!(path = %mtl_path.display(), %reason, "skipping material library");
                continue;
            }
        };

        let mut names: Vec<&String> = mtl.materials.keys().collect();
        names.sort_by_key(|name| (!used.contains(name), name.as_str()));
        for name in names {
            let Some(map) = mtl.materials.get(name).and_then(|m| m.diffuse_map.as_ref()) else {
                continue;
            };
            let image_path = directory.join(&map.file);
            match load_texture(&image_path) {
                Ok(texture) => {
                    debug!(material = %name, image = %image_path.display(), "base color texture");
                    return Material {
                        name: Some(name.clone()),
                        base_color_texture: Some(texture),
                        ..Material::default()
                    };
                }
                Err(reason) => warn!(image = %image_path.display(), %reason, "ignoring diffuse map"),
            }
        }
    }
    Material::default()
}

fn load_texture(path: &Path) -> std::result::Result<Texture, String> {
    let image = image::open(path).map_err(|e| e.to_string())?.to_rgba8();
    Texture::from_rgba8(image.width(), image.height(), image.as_raw()).map_err(|e| e.to_string())
}

/// Encode `mesh` as OBJ text
pub fn encode_obj(mesh: &TriangleMesh) -> Result<Vec<u8>> {
    let mut w = Vec::new();
    write_obj(mesh, &mut w).map_err(IoError::from)?;
    Ok(w)
}

fn write_obj<W: Write>(mesh: &TriangleMesh, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "# lowpoly OBJ export")?;
    writeln!(w, "# Vertices: {}", mesh.vertex_count())?;
    writeln!(w, "# Triangles: {}", mesh.face_count())?;
    writeln!(w, "o model_low")?;

    for v in &mesh.vertices {
        writeln!(w, "v {} {} {}", v.x, v.y, v.z)?;
    }
    if let Some(uvs) = &mesh.uvs {
        for uv in uvs {
            writeln!(w, "vt {} {}", uv[0], 1.0 - uv[1])?;
        }
    }
    if let Some(normals) = &mesh.normals {
        for n in normals {
            writeln!(w, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }

    let has_uv = mesh.uvs.is_some();
    let has_normal = mesh.normals.is_some();
    for face in &mesh.faces {
        let [a, b, c] = face.map(|i| i + 1);
        match (has_uv, has_normal) {
            (true, true) => writeln!(w, "f {0}/{0}/{0} {1}/{1}/{1} {2}/{2}/{2}", a, b, c)?,
            (false, true) => writeln!(w, "f {0}//{0} {1}//{1} {2}//{2}", a, b, c)?,
            (true, false) => writeln!(w, "f {0}/{0} {1}/{1} {2}/{2}", a, b, c)?,
            (false, false) => writeln!(w, "f {} {} {}", a, b, c)?,
        }
    }
    Ok(())
}

impl MeshWriter for ObjWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = encode_obj(mesh)?;
        std::fs::write(path, bytes).map_err(IoError::from)?;
        info!(path = %path.display(), faces = mesh.face_count(), "wrote OBJ");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lowpoly_core::Error;

    fn read_str(text: &str) -> Result<ImportedAsset> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.obj");
        std::fs::write(&path, text).unwrap();
        ObjReader::read_asset(&path)
    }

    #[test]
    fn test_quad_is_fan_triangulated() {
        let asset = read_str(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();
        assert_eq!(asset.mesh.face_count(), 2);
        assert_eq!(asset.mesh.vertex_count(), 4);
        let uvs = asset.mesh.uvs.as_ref().unwrap();
        // v is flipped into image space
        assert_relative_eq!(uvs[0][1], 1.0);
        assert_relative_eq!(uvs[2][1], 0.0);
        assert!(asset.mesh.normals.is_some());
        assert!(asset.material.base_color_texture.is_none());
    }

    #[test]
    fn test_uv_seams_split_vertices() {
        let asset = read_str(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nvt 0.5 0.5\n\
             f 1/1 2/2 3/3\nf 2/4 4/2 3/3\n",
        )
        .unwrap();
        // Position 2 appears with two different UVs
        assert_eq!(asset.mesh.vertex_count(), 5);
    }

    #[test]
    fn test_no_faces_is_empty_geometry() {
        let err = read_str("v 0 0 0\nv 1 0 0\n").unwrap_err();
        assert!(matches!(err, Error::EmptyGeometry(_)));
    }

    #[test]
    fn test_diffuse_map_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let image = image::RgbaImage::from_fn(2, 2, |x, _| {
            if x == 0 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 255, 255])
            }
        });
        image.save(dir.path().join("albedo.png")).unwrap();
        std::fs::write(dir.path().join("mesh.mtl"), "newmtl skin\nKd 1 1 1\nmap_Kd albedo.png\n").unwrap();
        std::fs::write(
            dir.path().join("mesh.obj"),
            "mtllib mesh.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nusemtl skin\nf 1/1 2/2 3/3\n",
        )
        .unwrap();

        let asset = ObjReader::read_asset(dir.path().join("mesh.obj")).unwrap();
        let texture = asset.material.base_color_texture.unwrap();
        assert_eq!((texture.width(), texture.height()), (2, 2));
        assert_eq!(asset.material.name.as_deref(), Some("skin"));
    }

    #[test]
    fn test_missing_mtl_is_not_fatal() {
        let asset = read_str("mtllib nowhere.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert!(asset.material.base_color_texture.is_none());
    }

    #[test]
    fn test_export_then_import_keeps_counts() {
        let asset = read_str(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nvn 0 0 1\n\
             f 1/1/1 2/2/1 3/3/1 4/4/1\n",
        )
        .unwrap();
        let text = String::from_utf8(encode_obj(&asset.mesh).unwrap()).unwrap();
        let again = read_str(&text).unwrap();
        assert_eq!(again.mesh.vertex_count(), asset.mesh.vertex_count());
        assert_eq!(again.mesh.face_count(), asset.mesh.face_count());
        let (a, b) = (asset.mesh.uvs.unwrap(), again.mesh.uvs.unwrap());
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x[0], y[0]);
            assert_relative_eq!(x[1], y[1]);
        }
    }
}
