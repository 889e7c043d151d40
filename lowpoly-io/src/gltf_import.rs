//! glTF and GLB import
//!
//! Every mesh instance reachable from the default scene is considered and
//! the one with the most triangles wins. Its node transform is baked into
//! positions and normals; mirrored transforms flip the winding so faces
//! keep pointing outward.

use crate::{AssetReader, ImportedAsset, IoError};
use gltf::image::Format;
use gltf::mesh::Mode;
use lowpoly_core::{Material, Point3f, Result, Texture, Transform3D, Transformable, TriangleMesh, Vector3f};
use std::path::Path;
use tracing::{debug, info, warn};

/// glTF 2.0 reader for `.gltf` and `.glb`
pub struct GltfReader;

/// A mesh referenced by a node, with the node's world transform
#[derive(Debug, Clone, Copy)]
struct MeshInstance {
    mesh: usize,
    transform: Transform3D,
}

impl AssetReader for GltfReader {
    fn read_asset<P: AsRef<Path>>(path: P) -> Result<ImportedAsset> {
        let path = path.as_ref();
        let (document, buffers, images) = gltf::import(path).map_err(IoError::from)?;

        let instances = mesh_instances(&document);
        let meshes: Vec<gltf::Mesh> = document.meshes().collect();
        let chosen = instances
            .iter()
            .enumerate()
            .max_by_key(|(order, instance)| {
                // Earliest instance wins ties
                (triangle_count(&meshes[instance.mesh]), std::cmp::Reverse(*order))
            })
            .map(|(_, instance)| *instance)
            .ok_or_else(|| IoError::NoGeometry {
                path: path.display().to_string(),
            })?;

        let source = &meshes[chosen.mesh];
        let (material, tex_coord) = read_material(source, &images);
        let mesh = read_mesh(source, &buffers, tex_coord, &chosen.transform)?;

        if mesh.face_count() == 0 {
            return Err(IoError::NoGeometry {
                path: path.display().to_string(),
            }
            .into());
        }

        info!(
            path = %path.display(),
            mesh = source.name().unwrap_or("<unnamed>"),
            instances = instances.len(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            textured = material.base_color_texture.is_some(),
            "imported glTF mesh"
        );

        Ok(ImportedAsset {
            mesh,
            material,
            mesh_objects: instances.len(),
        })
    }
}

/// Mesh instances of the default scene, or every mesh once when the
/// document has no scene
fn mesh_instances(document: &gltf::Document) -> Vec<MeshInstance> {
    let mut instances = Vec::new();
    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                collect_instances(&node, Transform3D::identity(), &mut instances);
            }
        }
        None => {
            instances.extend(document.meshes().map(|mesh| MeshInstance {
                mesh: mesh.index(),
                transform: Transform3D::identity(),
            }));
        }
    }
    instances
}

fn collect_instances(node: &gltf::Node, parent: Transform3D, out: &mut Vec<MeshInstance>) {
    let world = parent.compose(Transform3D::from_column_major(node.transform().matrix()));
    if let Some(mesh) = node.mesh() {
        out.push(MeshInstance {
            mesh: mesh.index(),
            transform: world,
        });
    }
    for child in node.children() {
        collect_instances(&child, world, out);
    }
}

fn triangle_count(mesh: &gltf::Mesh) -> usize {
    mesh.primitives()
        .map(|p| {
            let count = p
                .indices()
                .or_else(|| p.get(&gltf::Semantic::Positions))
                .map_or(0, |accessor| accessor.count());
            match p.mode() {
                Mode::Triangles => count / 3,
                Mode::TriangleStrip | Mode::TriangleFan => count.saturating_sub(2),
                _ => 0,
            }
        })
        .sum()
}

/// Triangle list for a primitive's index stream, `None` for point and
/// line modes. Strips alternate winding so every triangle keeps the
/// orientation of the first; degenerate triangles are dropped.
fn triangulate(mode: Mode, indices: &[u32]) -> Option<Vec<[u32; 3]>> {
    let triangles: Vec<[u32; 3]> = match mode {
        Mode::Triangles => indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect(),
        Mode::TriangleStrip => indices
            .windows(3)
            .enumerate()
            .map(|(i, w)| if i % 2 == 0 { [w[0], w[1], w[2]] } else { [w[1], w[0], w[2]] })
            .collect(),
        Mode::TriangleFan => match indices.split_first() {
            Some((&hub, rest)) => rest.windows(2).map(|w| [hub, w[0], w[1]]).collect(),
            None => Vec::new(),
        },
        _ => return None,
    };
    Some(
        triangles
            .into_iter()
            .filter(|[a, b, c]| a != b && b != c && a != c)
            .collect(),
    )
}

/// Base color of the first primitive material that has a texture, else of
/// the first primitive. Returns the texture coordinate set to read.
fn read_material(mesh: &gltf::Mesh, images: &[gltf::image::Data]) -> (Material, u32) {
    let materials: Vec<gltf::Material> = mesh.primitives().map(|p| p.material()).collect();
    let textured = materials
        .iter()
        .find(|m| m.pbr_metallic_roughness().base_color_texture().is_some());

    let Some(source) = textured.or(materials.first()) else {
        return (Material::default(), 0);
    };
    let pbr = source.pbr_metallic_roughness();
    let mut material = Material {
        name: source.name().map(String::from),
        base_color_factor: pbr.base_color_factor(),
        base_color_texture: None,
    };

    let Some(info) = pbr.base_color_texture() else {
        return (material, 0);
    };
    let image_index = info.texture().source().index();
    match images.get(image_index).map(texture_from_image) {
        Some(Ok(texture)) => {
            debug!(image = image_index, width = texture.width(), height = texture.height(), "base color texture");
            material.base_color_texture = Some(texture);
        }
        Some(Err(reason)) => warn!(image = image_index, %reason, "ignoring base color texture"),
        None => warn!(image = image_index, "base color texture references a missing image"),
    }
    (material, info.tex_coord())
}

/// Expand a decoded glTF image to 8-bit RGBA
fn texture_from_image(image: &gltf::image::Data) -> std::result::Result<Texture, String> {
    let rgba: Vec<u8> = match image.format {
        Format::R8G8B8A8 => image.pixels.clone(),
        Format::R8G8B8 => image
            .pixels
            .chunks_exact(3)
            .flat_map(|c| [c[0], c[1], c[2], 255])
            .collect(),
        Format::R8G8 => image
            .pixels
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[0], c[0], c[1]])
            .collect(),
        Format::R8 => image.pixels.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        other => return Err(format!("unsupported pixel format {:?}", other)),
    };
    Texture::from_rgba8(image.width, image.height, &rgba).map_err(|e| e.to_string())
}

/// Merge the triangle, strip and fan primitives of `mesh` into one indexed
/// mesh and move it to world space
fn read_mesh(
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    tex_coord: u32,
    transform: &Transform3D,
) -> Result<TriangleMesh> {
    let mut out = TriangleMesh::new();
    let mut normals: Vec<Vector3f> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut all_normals = true;
    let mut any_uvs = false;

    for primitive in mesh.primitives() {
        if !matches!(primitive.mode(), Mode::Triangles | Mode::TriangleStrip | Mode::TriangleFan) {
            warn!(mode = ?primitive.mode(), "skipping non-triangle primitive");
            continue;
        }
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
        let Some(positions) = reader.read_positions() else {
            warn!(primitive = primitive.index(), "skipping primitive without positions");
            continue;
        };
        let positions: Vec<[f32; 3]> = positions.collect();
        let base = out.vertex_count();
        let count = positions.len();

        for p in &positions {
            out.add_vertex(Point3f::new(p[0], p[1], p[2]));
        }

        match reader.read_normals() {
            Some(iter) => normals.extend(iter.map(|n| Vector3f::new(n[0], n[1], n[2]))),
            None => {
                all_normals = false;
                normals.extend(std::iter::repeat(Vector3f::zeros()).take(count));
            }
        }

        match reader.read_tex_coords(tex_coord) {
            Some(iter) => {
                any_uvs = true;
                uvs.extend(iter.into_f32());
            }
            None => uvs.extend(std::iter::repeat([0.0, 0.0]).take(count)),
        }

        let indices: Vec<u32> = match reader.read_indices() {
            Some(iter) => iter.into_u32().collect(),
            None => (0..count as u32).collect(),
        };
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= count) {
            return Err(IoError::ParseError {
                message: format!(
                    "primitive {} index {} out of range for {} vertices",
                    primitive.index(),
                    bad,
                    count
                ),
            }
            .into());
        }
        for [a, b, c] in triangulate(primitive.mode(), &indices).unwrap_or_default() {
            out.add_face([a as usize + base, b as usize + base, c as usize + base]);
        }
    }

    if all_normals && out.vertex_count() > 0 {
        out.set_normals(normals);
    } else {
        out.update_vertex_normals();
    }
    if any_uvs {
        out.set_uvs(uvs);
    }
    out.transform(transform);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_alternates_winding() {
        let tris = triangulate(Mode::TriangleStrip, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(tris, vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]);
    }

    #[test]
    fn test_strip_restart_degenerates_are_dropped() {
        let tris = triangulate(Mode::TriangleStrip, &[0, 1, 2, 2, 3, 3, 4, 5]).unwrap();
        assert!(tris.iter().all(|[a, b, c]| a != b && b != c && a != c));
        assert!(tris.contains(&[0, 1, 2]));
    }

    #[test]
    fn test_fan_shares_first_vertex() {
        let tris = triangulate(Mode::TriangleFan, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
        assert!(triangulate(Mode::TriangleFan, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_lines_are_not_triangulated() {
        assert!(triangulate(Mode::Lines, &[0, 1, 2, 3]).is_none());
        assert_eq!(triangulate(Mode::Triangles, &[0, 1, 2, 3]).unwrap(), vec![[0, 1, 2]]);
    }
}
