//! The per-job scene: both meshes, the source material and bake results
//!
//! Stages receive the scene by reference and name the mesh they work on
//! through [`MeshRole`] rather than through any notion of a selected object.

use crate::mesh::TriangleMesh;
use crate::raster::{BakedAtlas, Texture};
use crate::uv::UvIsland;
use std::path::{Path, PathBuf};

/// Handle naming one of the two meshes of a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRole {
    /// Reference geometry, read-only after import
    High,
    /// Working geometry, mutated by every stage
    Low,
}

/// Material of the imported mesh as far as baking is concerned
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<Texture>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            base_color_factor: [1.0; 4],
            base_color_texture: None,
        }
    }
}

/// Vertex and face counts at one point of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub vertices: usize,
    pub faces: usize,
}

impl MeshStats {
    pub fn of(mesh: &TriangleMesh) -> Self {
        Self {
            vertices: mesh.vertex_count(),
            faces: mesh.face_count(),
        }
    }
}

/// Everything one job works on
#[derive(Debug, Clone)]
pub struct Scene {
    source: PathBuf,
    high: TriangleMesh,
    low: TriangleMesh,
    high_material: Material,
    pub islands: Vec<UvIsland>,
    pub atlas: Option<BakedAtlas>,
}

impl Scene {
    /// Create a scene whose low mesh starts as a copy of the high mesh
    pub fn new(source: impl Into<PathBuf>, mesh: TriangleMesh, material: Material) -> Self {
        Self {
            source: source.into(),
            low: mesh.clone(),
            high: mesh,
            high_material: material,
            islands: Vec::new(),
            atlas: None,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mesh(&self, role: MeshRole) -> &TriangleMesh {
        match role {
            MeshRole::High => &self.high,
            MeshRole::Low => &self.low,
        }
    }

    pub fn high(&self) -> &TriangleMesh {
        &self.high
    }

    pub fn low(&self) -> &TriangleMesh {
        &self.low
    }

    pub fn low_mut(&mut self) -> &mut TriangleMesh {
        &mut self.low
    }

    /// Borrow the reference mesh and the working mesh at the same time
    pub fn high_and_low_mut(&mut self) -> (&TriangleMesh, &mut TriangleMesh) {
        (&self.high, &mut self.low)
    }

    pub fn high_material(&self) -> &Material {
        &self.high_material
    }

    pub fn stats(&self, role: MeshRole) -> MeshStats {
        MeshStats::of(self.mesh(role))
    }
}
