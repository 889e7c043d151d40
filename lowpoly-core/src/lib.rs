//! Core data structures and traits for lowpoly
//!
//! This crate provides the types shared by every stage of the high-to-low
//! pipeline: triangle meshes, the per-job scene, bake rasters, UV island
//! records, stage outcomes and the error type.

pub mod point;
pub mod mesh;
pub mod raster;
pub mod uv;
pub mod scene;
pub mod outcome;
pub mod traits;
pub mod transform;
pub mod error;

pub use point::*;
pub use mesh::*;
pub use raster::*;
pub use uv::*;
pub use scene::*;
pub use outcome::*;
pub use traits::*;
pub use transform::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

// Type aliases for easier imports
pub type Point = Point3f;
pub type Mesh = TriangleMesh;
