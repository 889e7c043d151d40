//! Self-contained GLB export
//!
//! The low mesh is written as a single node with one triangle primitive
//! (positions, normals, `TEXCOORD_0`, `TANGENT`, `u32` indices). When atlas
//! PNGs are supplied they are embedded in the binary chunk and referenced
//! by a metallic 0 / roughness 1 material: base color from the first atlas,
//! tangent-space normal texture (scale 1) from the second.

use crate::IoError;
use gltf_json as json;
use gltf_json::validation::Checked::Valid;
use lowpoly_algorithms::compute_tangents;
use lowpoly_core::{Error, Result, TriangleMesh};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const GENERATOR: &str = concat!("lowpoly ", env!("CARGO_PKG_VERSION"));
const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// PNG-encoded atlases to embed
#[derive(Debug, Clone, Copy)]
pub struct GlbTextures<'a> {
    pub base_color_png: &'a [u8],
    pub normal_png: &'a [u8],
}

/// Binary chunk with its views and accessors
#[derive(Default)]
struct BinaryChunk {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BinaryChunk {
    fn push_view(&mut self, bytes: &[u8], target: Option<json::buffer::Target>) -> json::Index<json::buffer::View> {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: bytes.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });
        align_buffer(&mut self.data);
        json::Index::new(self.views.len() as u32 - 1)
    }

    fn push_accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component: json::accessor::ComponentType,
        type_: json::accessor::Type,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> json::Index<json::Accessor> {
        let (min, max) = match bounds {
            Some((min, max)) => (Some(json_array(min)), Some(json_array(max))),
            None => (None, None),
        };
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(0u64.into()),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });
        json::Index::new(self.accessors.len() as u32 - 1)
    }

    fn push_floats<const N: usize>(
        &mut self,
        items: &[[f32; N]],
        type_: json::accessor::Type,
        with_bounds: bool,
    ) -> json::Index<json::Accessor> {
        let bytes: Vec<u8> = items.iter().flatten().flat_map(|f| f.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(json::buffer::Target::ArrayBuffer));
        let bounds = with_bounds.then(|| compute_bounds(items));
        self.push_accessor(view, items.len(), json::accessor::ComponentType::F32, type_, bounds)
    }

    fn push_indices(&mut self, faces: &[[usize; 3]]) -> json::Index<json::Accessor> {
        let bytes: Vec<u8> = faces
            .iter()
            .flatten()
            .flat_map(|&i| (i as u32).to_le_bytes())
            .collect();
        let view = self.push_view(&bytes, Some(json::buffer::Target::ElementArrayBuffer));
        self.push_accessor(
            view,
            faces.len() * 3,
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            None,
        )
    }

    fn push_png(&mut self, name: &str, png: &[u8]) -> json::Image {
        let view = self.push_view(png, None);
        json::Image {
            buffer_view: Some(view),
            mime_type: Some(json::image::MimeType("image/png".to_string())),
            name: Some(name.to_string()),
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        }
    }
}

fn json_array(values: Vec<f32>) -> json::Value {
    json::Value::Array(values.into_iter().map(json::Value::from).collect())
}

/// Component-wise bounds of `items`
fn compute_bounds<const N: usize>(items: &[[f32; N]]) -> (Vec<f32>, Vec<f32>) {
    let mut min = [f32::MAX; N];
    let mut max = [f32::MIN; N];
    for item in items {
        for i in 0..N {
            min[i] = min[i].min(item[i]);
            max[i] = max[i].max(item[i]);
        }
    }
    (min.to_vec(), max.to_vec())
}

/// Align buffer to 4-byte boundary
fn align_buffer(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

fn texture(name: &str, image: u32) -> json::Texture {
    json::Texture {
        name: Some(name.to_string()),
        sampler: None,
        source: json::Index::new(image),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

/// Encode `mesh` (and optionally its atlases) as a GLB file in memory
pub fn encode_glb(mesh: &TriangleMesh, textures: Option<&GlbTextures>) -> Result<Vec<u8>> {
    if mesh.face_count() == 0 {
        return Err(Error::Export("cannot export a mesh without faces".to_string()));
    }
    mesh.validate()?;
    if textures.is_some() && mesh.uvs.is_none() {
        return Err(Error::Export("textured export needs UV coordinates".to_string()));
    }

    let mut chunk = BinaryChunk::default();
    let mut attributes = BTreeMap::new();

    let positions: Vec<[f32; 3]> = mesh.vertices.iter().map(|p| [p.x, p.y, p.z]).collect();
    let accessor = chunk.push_floats(&positions, json::accessor::Type::Vec3, true);
    attributes.insert(Valid(json::mesh::Semantic::Positions), accessor);

    let normals = mesh
        .normals
        .clone()
        .unwrap_or_else(|| mesh.compute_vertex_normals());
    let normals: Vec<[f32; 3]> = normals.iter().map(|n| [n.x, n.y, n.z]).collect();
    let accessor = chunk.push_floats(&normals, json::accessor::Type::Vec3, false);
    attributes.insert(Valid(json::mesh::Semantic::Normals), accessor);

    if let Some(uvs) = &mesh.uvs {
        let accessor = chunk.push_floats(uvs, json::accessor::Type::Vec2, false);
        attributes.insert(Valid(json::mesh::Semantic::TexCoords(0)), accessor);

        let mut with_normals = mesh.clone();
        if with_normals.normals.is_none() {
            with_normals.update_vertex_normals();
        }
        let tangents = compute_tangents(&with_normals)?;
        let accessor = chunk.push_floats(&tangents, json::accessor::Type::Vec4, false);
        attributes.insert(Valid(json::mesh::Semantic::Tangents), accessor);
    }

    let indices = chunk.push_indices(&mesh.faces);

    let mut images = Vec::new();
    let mut gltf_textures = Vec::new();
    let mut materials = Vec::new();
    if let Some(textures) = textures {
        images.push(chunk.push_png("atlas_basecolor", textures.base_color_png));
        images.push(chunk.push_png("atlas_normal", textures.normal_png));
        gltf_textures.push(texture("atlas_basecolor", 0));
        gltf_textures.push(texture("atlas_normal", 1));

        materials.push(json::Material {
            name: Some("lowpoly_atlas".to_string()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor([1.0; 4]),
                base_color_texture: Some(json::texture::Info {
                    index: json::Index::new(0),
                    tex_coord: 0,
                    extensions: Default::default(),
                    extras: Default::default(),
                }),
                metallic_factor: json::material::StrengthFactor(0.0),
                roughness_factor: json::material::StrengthFactor(1.0),
                ..Default::default()
            },
            normal_texture: Some(json::material::NormalTexture {
                index: json::Index::new(1),
                scale: 1.0,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            ..Default::default()
        });
    }

    let primitive = json::mesh::Primitive {
        attributes,
        extensions: Default::default(),
        extras: Default::default(),
        indices: Some(indices),
        material: (!materials.is_empty()).then(|| json::Index::new(0)),
        mode: Valid(json::mesh::Mode::Triangles),
        targets: None,
    };

    let root = json::Root {
        accessors: chunk.accessors,
        asset: json::Asset {
            copyright: None,
            extensions: Default::default(),
            extras: Default::default(),
            generator: Some(GENERATOR.to_string()),
            min_version: None,
            version: "2.0".to_string(),
        },
        buffers: vec![json::Buffer {
            byte_length: chunk.data.len().into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }],
        buffer_views: chunk.views,
        images,
        materials,
        meshes: vec![json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("model_low".to_string()),
            primitives: vec![primitive],
            weights: None,
        }],
        nodes: vec![json::Node {
            camera: None,
            children: None,
            extensions: Default::default(),
            extras: Default::default(),
            matrix: None,
            mesh: Some(json::Index::new(0)),
            name: Some("model_low".to_string()),
            rotation: None,
            scale: None,
            skin: None,
            translation: None,
            weights: None,
        }],
        scene: Some(json::Index::new(0)),
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Scene".to_string()),
            nodes: vec![json::Index::new(0)],
        }],
        textures: gltf_textures,
        ..Default::default()
    };

    let glb = assemble_glb(&root, &chunk.data)?;
    debug!(
        bytes = glb.len(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        textured = textures.is_some(),
        "encoded GLB"
    );
    Ok(glb)
}

/// Encode and write a GLB file
pub fn write_glb<P: AsRef<Path>>(mesh: &TriangleMesh, textures: Option<&GlbTextures>, path: P) -> Result<()> {
    let path = path.as_ref();
    let glb = encode_glb(mesh, textures)?;
    std::fs::write(path, &glb).map_err(IoError::from)?;
    info!(path = %path.display(), bytes = glb.len(), "wrote GLB");
    Ok(())
}

/// Assemble GLB binary from JSON and buffer data
fn assemble_glb(root: &json::Root, buffer_data: &[u8]) -> Result<Vec<u8>> {
    let json_string = json::serialize::to_string(root).map_err(|e| IoError::WriteError {
        message: format!("failed to serialize glTF JSON: {}", e),
    })?;
    let json_bytes = json_string.as_bytes();

    let json_padding = (4 - json_bytes.len() % 4) % 4;
    let json_chunk_length = json_bytes.len() + json_padding;
    let buffer_padding = (4 - buffer_data.len() % 4) % 4;
    let buffer_chunk_length = buffer_data.len() + buffer_padding;
    let total_length = 12 + 8 + json_chunk_length + 8 + buffer_chunk_length;

    let mut glb = Vec::with_capacity(total_length);
    glb.extend_from_slice(GLB_MAGIC);
    glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
    glb.extend_from_slice(&(total_length as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(json_bytes);
    glb.extend(std::iter::repeat(b' ').take(json_padding));

    glb.extend_from_slice(&(buffer_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    glb.extend_from_slice(buffer_data);
    glb.extend(std::iter::repeat(0u8).take(buffer_padding));

    Ok(glb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowpoly_core::{Point3f, Vector3f};

    fn make_quad() -> TriangleMesh {
        let mut mesh = TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        mesh.set_normals(vec![Vector3f::z(); 4]);
        mesh.set_uvs(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
        mesh
    }

    fn parse(glb: &[u8]) -> gltf::Gltf {
        gltf::Gltf::from_slice(glb).unwrap()
    }

    #[test]
    fn test_header_and_alignment() {
        let glb = encode_glb(&make_quad(), None).unwrap();
        assert_eq!(&glb[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes([glb[4], glb[5], glb[6], glb[7]]), 2);
        assert_eq!(u32::from_le_bytes([glb[8], glb[9], glb[10], glb[11]]) as usize, glb.len());
        assert_eq!(glb.len() % 4, 0);
    }

    #[test]
    fn test_attributes_present() {
        let glb = encode_glb(&make_quad(), None).unwrap();
        let gltf = parse(&glb);
        let primitive = gltf.meshes().next().unwrap().primitives().next().unwrap();
        for semantic in [
            gltf::Semantic::Positions,
            gltf::Semantic::Normals,
            gltf::Semantic::TexCoords(0),
            gltf::Semantic::Tangents,
        ] {
            assert!(primitive.get(&semantic).is_some(), "missing {:?}", semantic);
        }
        let positions = primitive.get(&gltf::Semantic::Positions).unwrap();
        assert_eq!(positions.count(), 4);
        assert_eq!(primitive.indices().unwrap().count(), 6);
        assert!(primitive.material().index().is_none());
    }

    #[test]
    fn test_textured_material() {
        let textures = GlbTextures {
            base_color_png: b"base",
            normal_png: b"normal",
        };
        let glb = encode_glb(&make_quad(), Some(&textures)).unwrap();
        let gltf = parse(&glb);

        assert_eq!(gltf.images().count(), 2);
        let material = gltf.materials().next().unwrap();
        let pbr = material.pbr_metallic_roughness();
        assert_eq!(pbr.metallic_factor(), 0.0);
        assert_eq!(pbr.roughness_factor(), 1.0);
        assert_eq!(pbr.base_color_texture().unwrap().texture().source().index(), 0);
        let normal = material.normal_texture().unwrap();
        assert_eq!(normal.texture().source().index(), 1);
        assert_eq!(normal.scale(), 1.0);
    }

    #[test]
    fn test_textured_export_requires_uvs() {
        let mut mesh = make_quad();
        mesh.uvs = None;
        let textures = GlbTextures {
            base_color_png: b"a",
            normal_png: b"b",
        };
        assert!(matches!(encode_glb(&mesh, Some(&textures)), Err(Error::Export(_))));
        // Untextured export without UVs is fine
        let gltf = parse(&encode_glb(&mesh, None).unwrap());
        let primitive = gltf.meshes().next().unwrap().primitives().next().unwrap();
        assert!(primitive.get(&gltf::Semantic::TexCoords(0)).is_none());
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        assert!(matches!(encode_glb(&TriangleMesh::new(), None), Err(Error::Export(_))));
    }

    #[test]
    fn test_bounds() {
        let (min, max) = compute_bounds(&[[0.0, 2.0, -1.0], [1.0, -2.0, 3.0]]);
        assert_eq!(min, vec![0.0, -2.0, -1.0]);
        assert_eq!(max, vec![1.0, 2.0, 3.0]);
    }
}
