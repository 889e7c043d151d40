//! Mesh data structures and functionality

use crate::point::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shading flags carried by a mesh.
///
/// `hard_edges` holds sorted vertex pairs whose incident faces must not share
/// smoothed normals. It is always empty when auto-smoothing is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shading {
    pub smooth: bool,
    pub auto_smooth_angle: Option<f32>,
    pub hard_edges: Vec<[usize; 2]>,
}

impl Shading {
    /// Smooth shading everywhere, no hard edges
    pub fn fully_smooth() -> Self {
        Self {
            smooth: true,
            auto_smooth_angle: None,
            hard_edges: Vec::new(),
        }
    }

    /// Check whether the edge between two vertices is marked hard
    pub fn is_hard_edge(&self, a: usize, b: usize) -> bool {
        self.hard_edges.binary_search(&edge_key(a, b)).is_ok()
    }
}

/// A triangle mesh with vertices, faces and optional per-vertex attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3f>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3f>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub shading: Shading,
}

/// Undirected edge key with the smaller index first
#[inline]
pub fn edge_key(a: usize, b: usize) -> [usize; 2] {
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            normals: None,
            uvs: None,
            shading: Shading::default(),
        }
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3f>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            ..Self::new()
        }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh
    pub fn add_vertex(&mut self, vertex: Point3f) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: [usize; 3]) {
        self.faces.push(face);
    }

    /// Corner positions of a face
    #[inline]
    pub fn triangle(&self, face: usize) -> [Point3f; 3] {
        let [a, b, c] = self.faces[face];
        [self.vertices[a], self.vertices[b], self.vertices[c]]
    }

    /// Unnormalized face normal; its length is twice the face area
    pub fn face_cross(&self, face: usize) -> Vector3f {
        let [v0, v1, v2] = self.triangle(face);
        (v1 - v0).cross(&(v2 - v0))
    }

    /// Area of a single face
    pub fn face_area(&self, face: usize) -> f32 {
        self.face_cross(face).norm() * 0.5
    }

    /// Total surface area
    pub fn surface_area(&self) -> f32 {
        (0..self.faces.len()).map(|f| self.face_area(f)).sum()
    }

    /// Calculate face normals; degenerate faces get a zero vector
    pub fn calculate_face_normals(&self) -> Vec<Vector3f> {
        (0..self.faces.len())
            .map(|f| {
                self.face_cross(f)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3f::zeros)
            })
            .collect()
    }

    /// Area-weighted vertex normals. Vertices without a usable incident
    /// face get +Z.
    pub fn compute_vertex_normals(&self) -> Vec<Vector3f> {
        let mut accum = vec![Vector3f::zeros(); self.vertices.len()];
        for (fi, face) in self.faces.iter().enumerate() {
            let n = self.face_cross(fi);
            for &v in face {
                accum[v] += n;
            }
        }
        accum
            .into_iter()
            .map(|n| n.try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z))
            .collect()
    }

    /// Recompute and store area-weighted vertex normals
    pub fn update_vertex_normals(&mut self) {
        self.normals = Some(self.compute_vertex_normals());
    }

    /// Set vertex normals
    pub fn set_normals(&mut self, normals: Vec<Vector3f>) {
        if normals.len() == self.vertices.len() {
            self.normals = Some(normals);
        }
    }

    /// Set vertex texture coordinates
    pub fn set_uvs(&mut self, uvs: Vec<[f32; 2]>) {
        if uvs.len() == self.vertices.len() {
            self.uvs = Some(uvs);
        }
    }

    /// Check that every face references existing, distinct vertices and
    /// that attribute arrays match the vertex count.
    pub fn validate(&self) -> Result<()> {
        let n = self.vertices.len();
        for (fi, face) in self.faces.iter().enumerate() {
            if face.iter().any(|&v| v >= n) {
                return Err(Error::InvalidData(format!(
                    "face {} references a vertex outside 0..{}",
                    fi, n
                )));
            }
        }
        if self.normals.as_ref().is_some_and(|a| a.len() != n) {
            return Err(Error::InvalidData("normal count does not match vertex count".into()));
        }
        if self.uvs.as_ref().is_some_and(|a| a.len() != n) {
            return Err(Error::InvalidData("uv count does not match vertex count".into()));
        }
        Ok(())
    }

    /// Merge vertices whose positions fall into the same `epsilon` cell.
    ///
    /// Per-vertex attributes are dropped since merged vertices may disagree
    /// on them. Faces that collapse to fewer than three distinct corners are
    /// removed.
    pub fn welded(&self, epsilon: f32) -> TriangleMesh {
        let inv = if epsilon > 0.0 { 1.0 / epsilon } else { 1.0e6 };
        let mut cells: HashMap<(i64, i64, i64), usize> = HashMap::with_capacity(self.vertices.len());
        let mut remap = Vec::with_capacity(self.vertices.len());
        let mut vertices = Vec::new();

        for p in &self.vertices {
            let key = (
                (p.x * inv).round() as i64,
                (p.y * inv).round() as i64,
                (p.z * inv).round() as i64,
            );
            let idx = *cells.entry(key).or_insert_with(|| {
                vertices.push(*p);
                vertices.len() - 1
            });
            remap.push(idx);
        }

        let faces = self
            .faces
            .iter()
            .map(|f| [remap[f[0]], remap[f[1]], remap[f[2]]])
            .filter(|f| f[0] != f[1] && f[1] != f[2] && f[2] != f[0])
            .collect();

        TriangleMesh {
            vertices,
            faces,
            normals: None,
            uvs: None,
            shading: self.shading.clone(),
        }
    }

    /// Drop vertices no face references, keeping attribute arrays aligned.
    /// Returns the number of removed vertices.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                used[v] = true;
            }
        }
        let removed = used.iter().filter(|u| !**u).count();
        if removed == 0 {
            return 0;
        }

        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0;
        for (i, &u) in used.iter().enumerate() {
            if u {
                remap[i] = next;
                next += 1;
            }
        }

        fn keep<T: Copy>(data: &[T], used: &[bool]) -> Vec<T> {
            data.iter()
                .zip(used)
                .filter(|(_, u)| **u)
                .map(|(d, _)| *d)
                .collect()
        }

        self.vertices = keep(&self.vertices, &used);
        self.normals = self.normals.as_deref().map(|n| keep(n, &used));
        self.uvs = self.uvs.as_deref().map(|t| keep(t, &used));
        for face in &mut self.faces {
            for v in face.iter_mut() {
                *v = remap[*v];
            }
        }
        self.shading.hard_edges = self
            .shading
            .hard_edges
            .iter()
            .map(|e| edge_key(remap[e[0]], remap[e[1]]))
            .collect();
        self.shading.hard_edges.sort_unstable();
        removed
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
        self.normals = None;
        self.uvs = None;
        self.shading = Shading::default();
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}
