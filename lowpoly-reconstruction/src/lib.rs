//! # Lowpoly Reconstruction
//!
//! Rebuilds mesh surfaces from a volumetric representation.
//!
//! Voxel remeshing samples a signed distance field of the input on a regular
//! grid and extracts a fresh, evenly tessellated surface from it. This is
//! useful ahead of decimation when the source has self-intersections,
//! internal geometry or badly shaped triangles.

pub mod voxel_remesh;

pub use voxel_remesh::*;
