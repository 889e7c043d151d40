//! Binary FBX import
//!
//! Reads the node tree of a binary FBX file (7.x, 32 and 64 bit record
//! headers), takes the `Geometry` nodes of class `Mesh` and fan-triangulates
//! their polygons. The mesh with the most triangles wins, as for glTF.
//!
//! Only geometry is read. Model transforms, layer elements and texture
//! references are ignored, so an FBX job always bakes the fallback base
//! color.

use crate::{AssetReader, ImportedAsset, IoError};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use lowpoly_core::{Material, Point3f, Result, TriangleMesh};
use std::io::{self, Cursor, Read};
use std::path::Path;
use tracing::{debug, info};

const MAGIC: &[u8; 23] = b"Kaydara FBX Binary  \x00\x1a\x00";

/// First version whose node records use 64-bit offsets
const WIDE_RECORD_VERSION: u32 = 7500;

/// Binary FBX reader
pub struct FbxReader;

/// One record of the FBX node tree
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FbxNode {
    pub name: String,
    pub properties: Vec<FbxProperty>,
    pub children: Vec<FbxNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FbxProperty {
    Int(i64),
    Float(f64),
    Text(String),
    Raw(Vec<u8>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

impl FbxNode {
    fn child(&self, name: &str) -> Option<&FbxNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn has_text(&self, text: &str) -> bool {
        self.properties
            .iter()
            .any(|p| matches!(p, FbxProperty::Text(t) if t == text))
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Cursor over the raw file with the record width of its version
struct FbxParser<'a> {
    cursor: Cursor<&'a [u8]>,
    wide: bool,
}

impl<'a> FbxParser<'a> {
    fn new(bytes: &'a [u8]) -> io::Result<(Self, u32)> {
        if bytes.len() < MAGIC.len() + 4 || !bytes.starts_with(MAGIC) {
            return Err(invalid("missing binary FBX header (ASCII FBX is not supported)"));
        }
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(MAGIC.len() as u64);
        let version = cursor.read_u32::<LittleEndian>()?;
        let parser = Self {
            cursor,
            wide: version >= WIDE_RECORD_VERSION,
        };
        Ok((parser, version))
    }

    fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    fn read_offset(&mut self) -> io::Result<u64> {
        if self.wide {
            self.cursor.read_u64::<LittleEndian>()
        } else {
            self.cursor.read_u32::<LittleEndian>().map(u64::from)
        }
    }

    /// Top-level nodes up to the first null record
    fn read_document(&mut self) -> io::Result<Vec<FbxNode>> {
        let mut nodes = Vec::new();
        while self.cursor.position() < self.len() {
            match self.read_node()? {
                Some(node) => nodes.push(node),
                None => break,
            }
        }
        Ok(nodes)
    }

    /// A node record, or `None` for the null record closing a list
    fn read_node(&mut self) -> io::Result<Option<FbxNode>> {
        let end = self.read_offset()?;
        let property_count = self.read_offset()?;
        let _property_bytes = self.read_offset()?;
        let name_len = self.cursor.read_u8()?;
        if end == 0 {
            return Ok(None);
        }
        if end <= self.cursor.position() || end > self.len() {
            return Err(invalid(format!("node record ends at {} outside the file", end)));
        }

        let mut name = vec![0u8; usize::from(name_len)];
        self.cursor.read_exact(&mut name)?;
        let name = String::from_utf8_lossy(&name).into_owned();

        let mut properties = Vec::new();
        for _ in 0..property_count {
            if self.cursor.position() >= end {
                return Err(invalid(format!("properties of {} overrun the record", name)));
            }
            properties.push(self.read_property()?);
        }

        let mut children = Vec::new();
        while self.cursor.position() < end {
            match self.read_node()? {
                Some(child) => children.push(child),
                None => break,
            }
        }
        self.cursor.set_position(end);

        Ok(Some(FbxNode {
            name,
            properties,
            children,
        }))
    }

    fn read_property(&mut self) -> io::Result<FbxProperty> {
        let code = self.cursor.read_u8()?;
        let property = match code {
            b'C' => FbxProperty::Int(i64::from(self.cursor.read_u8()?)),
            b'Y' => FbxProperty::Int(i64::from(self.cursor.read_i16::<LittleEndian>()?)),
            b'I' => FbxProperty::Int(i64::from(self.cursor.read_i32::<LittleEndian>()?)),
            b'L' => FbxProperty::Int(self.cursor.read_i64::<LittleEndian>()?),
            b'F' => FbxProperty::Float(f64::from(self.cursor.read_f32::<LittleEndian>()?)),
            b'D' => FbxProperty::Float(self.cursor.read_f64::<LittleEndian>()?),
            b'S' | b'R' => {
                let bytes = self.read_blob()?;
                if code == b'S' {
                    FbxProperty::Text(String::from_utf8_lossy(&bytes).into_owned())
                } else {
                    FbxProperty::Raw(bytes)
                }
            }
            b'f' => {
                let (count, data) = self.read_array(4)?;
                let mut values = vec![0f32; count];
                data.as_slice().read_f32_into::<LittleEndian>(&mut values)?;
                FbxProperty::FloatArray(values.into_iter().map(f64::from).collect())
            }
            b'd' => {
                let (count, data) = self.read_array(8)?;
                let mut values = vec![0.0; count];
                data.as_slice().read_f64_into::<LittleEndian>(&mut values)?;
                FbxProperty::FloatArray(values)
            }
            b'i' => {
                let (count, data) = self.read_array(4)?;
                let mut values = vec![0i32; count];
                data.as_slice().read_i32_into::<LittleEndian>(&mut values)?;
                FbxProperty::IntArray(values.into_iter().map(i64::from).collect())
            }
            b'l' => {
                let (count, data) = self.read_array(8)?;
                let mut values = vec![0i64; count];
                data.as_slice().read_i64_into::<LittleEndian>(&mut values)?;
                FbxProperty::IntArray(values)
            }
            b'b' => {
                let (_, data) = self.read_array(1)?;
                FbxProperty::IntArray(data.into_iter().map(i64::from).collect())
            }
            other => return Err(invalid(format!("unknown property type {:?}", other as char))),
        };
        Ok(property)
    }

    fn read_blob(&mut self) -> io::Result<Vec<u8>> {
        let len = self.cursor.read_u32::<LittleEndian>()? as usize;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let remaining = self.len().saturating_sub(self.cursor.position());
        if len as u64 > remaining {
            return Err(invalid(format!("{} bytes requested, {} left", len, remaining)));
        }
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Element count and decoded bytes of an array property
    fn read_array(&mut self, element_size: usize) -> io::Result<(usize, Vec<u8>)> {
        let count = self.cursor.read_u32::<LittleEndian>()? as usize;
        let encoding = self.cursor.read_u32::<LittleEndian>()?;
        let stored_len = self.cursor.read_u32::<LittleEndian>()? as usize;
        let stored = self.take(stored_len)?;
        let expected = count
            .checked_mul(element_size)
            .ok_or_else(|| invalid("array length overflows"))?;

        let data = match encoding {
            0 => stored,
            1 => {
                let mut data = Vec::with_capacity(expected);
                ZlibDecoder::new(stored.as_slice())
                    .take(expected as u64 + 1)
                    .read_to_end(&mut data)?;
                data
            }
            other => return Err(invalid(format!("unknown array encoding {}", other))),
        };
        if data.len() != expected {
            return Err(invalid(format!(
                "array holds {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        Ok((count, data))
    }
}

/// Parse the node tree of a binary FBX file
pub(crate) fn parse_fbx(bytes: &[u8]) -> io::Result<(u32, Vec<FbxNode>)> {
    let (mut parser, version) = FbxParser::new(bytes)?;
    let nodes = parser.read_document()?;
    Ok((version, nodes))
}

/// Triangles of one `Geometry` mesh node. Polygon ends are marked by a
/// negated index (`-1 - i`).
fn mesh_from_geometry(geometry: &FbxNode) -> std::result::Result<TriangleMesh, String> {
    let positions = match geometry.child("Vertices").and_then(|n| n.properties.first()) {
        Some(FbxProperty::FloatArray(values)) => values,
        _ => return Err("geometry without a Vertices array".to_string()),
    };
    let polygon_indices = match geometry
        .child("PolygonVertexIndex")
        .and_then(|n| n.properties.first())
    {
        Some(FbxProperty::IntArray(values)) => values,
        _ => return Err("geometry without a PolygonVertexIndex array".to_string()),
    };

    let mut mesh = TriangleMesh::new();
    for p in positions.chunks_exact(3) {
        mesh.add_vertex(Point3f::new(p[0] as f32, p[1] as f32, p[2] as f32));
    }
    let vertex_count = mesh.vertex_count();

    let mut polygon: Vec<usize> = Vec::new();
    for &raw in polygon_indices {
        let (index, closes) = if raw < 0 { (-1 - raw, true) } else { (raw, false) };
        let index = usize::try_from(index)
            .ok()
            .filter(|&i| i < vertex_count)
            .ok_or_else(|| format!("polygon index {} out of range for {} vertices", index, vertex_count))?;
        polygon.push(index);
        if closes {
            for pair in polygon.windows(2).skip(1) {
                mesh.add_face([polygon[0], pair[0], pair[1]]);
            }
            polygon.clear();
        }
    }
    Ok(mesh)
}

impl AssetReader for FbxReader {
    fn read_asset<P: AsRef<Path>>(path: P) -> Result<ImportedAsset> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| IoError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let (version, nodes) = parse_fbx(&bytes).map_err(|e| IoError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;

        let geometries: Vec<&FbxNode> = nodes
            .iter()
            .filter(|n| n.name == "Objects")
            .flat_map(|objects| objects.children.iter())
            .filter(|n| n.name == "Geometry" && n.has_text("Mesh"))
            .collect();

        let mut best: Option<TriangleMesh> = None;
        for geometry in &geometries {
            let mesh = mesh_from_geometry(geometry).map_err(|message| IoError::ParseError {
                message: format!("{}: {}", path.display(), message),
            })?;
            debug!(vertices = mesh.vertex_count(), faces = mesh.face_count(), "FBX geometry");
            if best.as_ref().map_or(true, |b| mesh.face_count() > b.face_count()) {
                best = Some(mesh);
            }
        }

        let mut mesh = best
            .filter(|m| m.face_count() > 0)
            .ok_or_else(|| IoError::NoGeometry {
                path: path.display().to_string(),
            })?;
        mesh.update_vertex_normals();

        info!(
            path = %path.display(),
            version,
            geometries = geometries.len(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "imported FBX mesh"
        );
        Ok(ImportedAsset {
            mesh,
            material: Material::default(),
            mesh_objects: geometries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    enum Prop<'a> {
        Text(&'a str),
        Doubles(&'a [f64]),
        Ints(&'a [i32]),
        ZippedInts(&'a [i32]),
    }

    fn encode_prop(prop: &Prop, out: &mut Vec<u8>) {
        match prop {
            Prop::Text(s) => {
                out.push(b'S');
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Prop::Doubles(values) => {
                out.push(b'd');
                out.extend_from_slice(&(values.len() as u32).to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&(values.len() as u32 * 8).to_le_bytes());
                for v in values.iter() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            Prop::Ints(values) => {
                out.push(b'i');
                out.extend_from_slice(&(values.len() as u32).to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&(values.len() as u32 * 4).to_le_bytes());
                for v in values.iter() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            Prop::ZippedInts(values) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                for v in values.iter() {
                    encoder.write_all(&v.to_le_bytes()).unwrap();
                }
                let zipped = encoder.finish().unwrap();
                out.push(b'i');
                out.extend_from_slice(&(values.len() as u32).to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes());
                out.extend_from_slice(&(zipped.len() as u32).to_le_bytes());
                out.extend_from_slice(&zipped);
            }
        }
    }

    /// Node record with 32-bit offsets starting at absolute `offset`
    fn encode_node(offset: usize, name: &str, props: &[Prop], children: &[(&str, Vec<Prop>)]) -> Vec<u8> {
        let mut properties = Vec::new();
        for prop in props {
            encode_prop(prop, &mut properties);
        }
        let children_start = offset + 13 + name.len() + properties.len();
        let mut nested = Vec::new();
        if !children.is_empty() {
            for (child_name, child_props) in children {
                let child = encode_node(children_start + nested.len(), child_name, child_props, &[]);
                nested.extend_from_slice(&child);
            }
            nested.extend_from_slice(&[0u8; 13]);
        }

        let end = children_start + nested.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(end as u32).to_le_bytes());
        out.extend_from_slice(&(props.len() as u32).to_le_bytes());
        out.extend_from_slice(&(properties.len() as u32).to_le_bytes());
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&properties);
        out.extend_from_slice(&nested);
        out
    }

    /// Unit quad and a triangle as one polygon list
    fn quad_and_triangle_fbx(zipped: bool) -> Vec<u8> {
        let vertices = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0];
        let polygons = [0, 1, 2, -4, 1, 4, -3];
        let index_prop = if zipped { Prop::ZippedInts(&polygons) } else { Prop::Ints(&polygons) };

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&7400u32.to_le_bytes());
        let objects_offset = bytes.len();
        let geometry_offset = objects_offset + 13 + "Objects".len();
        let geometry = encode_node(
            geometry_offset,
            "Geometry",
            &[Prop::Text("Plane\x00\x01Geometry"), Prop::Text("Mesh")],
            &[("Vertices", vec![Prop::Doubles(&vertices)]), ("PolygonVertexIndex", vec![index_prop])],
        );
        let objects_end = geometry_offset + geometry.len() + 13;
        bytes.extend_from_slice(&(objects_end as u32).to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push("Objects".len() as u8);
        bytes.extend_from_slice(b"Objects");
        bytes.extend_from_slice(&geometry);
        bytes.extend_from_slice(&[0u8; 13]);
        bytes.extend_from_slice(&[0u8; 13]);
        bytes
    }

    #[test]
    fn test_parses_node_tree() {
        let (version, nodes) = parse_fbx(&quad_and_triangle_fbx(false)).unwrap();
        assert_eq!(version, 7400);
        assert_eq!(nodes.len(), 1);
        let geometry = &nodes[0].children[0];
        assert_eq!(geometry.name, "Geometry");
        assert!(geometry.has_text("Mesh"));
        assert_eq!(geometry.children.len(), 2);
    }

    #[test]
    fn test_polygons_are_fan_triangulated() {
        let (_, nodes) = parse_fbx(&quad_and_triangle_fbx(false)).unwrap();
        let mesh = mesh_from_geometry(&nodes[0].children[0]).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3], [1, 4, 2]]);
    }

    #[test]
    fn test_compressed_arrays_decode() {
        let (_, plain) = parse_fbx(&quad_and_triangle_fbx(false)).unwrap();
        let (_, zipped) = parse_fbx(&quad_and_triangle_fbx(true)).unwrap();
        assert_eq!(plain, zipped);
    }

    #[test]
    fn test_ascii_fbx_is_rejected() {
        let err = parse_fbx(b"; FBX 7.4.0 project file\nFBXHeaderExtension: {\n}").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let bytes = quad_and_triangle_fbx(false);
        assert!(parse_fbx(&bytes[..bytes.len() - 60]).is_err());
    }

    #[test]
    fn test_out_of_range_polygon_index() {
        let geometry = FbxNode {
            name: "Geometry".into(),
            properties: vec![FbxProperty::Text("Mesh".into())],
            children: vec![
                FbxNode {
                    name: "Vertices".into(),
                    properties: vec![FbxProperty::FloatArray(vec![0.0; 9])],
                    children: Vec::new(),
                },
                FbxNode {
                    name: "PolygonVertexIndex".into(),
                    properties: vec![FbxProperty::IntArray(vec![0, 1, -8])],
                    children: Vec::new(),
                },
            ],
        };
        assert!(mesh_from_geometry(&geometry).is_err());
    }

    #[test]
    fn test_reader_imports_largest_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.fbx");
        std::fs::write(&path, quad_and_triangle_fbx(true)).unwrap();
        let asset = FbxReader::read_asset(&path).unwrap();
        assert_eq!(asset.mesh.face_count(), 3);
        assert_eq!(asset.mesh_objects, 1);
        assert!(asset.mesh.normals.is_some());
        assert!(asset.material.base_color_texture.is_none());
    }
}
