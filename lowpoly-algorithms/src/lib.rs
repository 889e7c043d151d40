//! # Lowpoly Algorithms
//!
//! Mesh algorithms shared by the pipeline stages.
//!
//! This crate provides a triangle BVH for ray casting and closest point
//! queries, edge adjacency, hole filling, normal orientation and smoothing
//! groups, surface conforming, UV unwrapping with atlas packing, and
//! tangent frames for normal maps.

pub mod spatial;
pub mod topology;
pub mod normals;
pub mod holes;
pub mod conform;
pub mod uv_unwrap;
pub mod tangents;

// Re-export commonly used items
pub use spatial::*;
pub use topology::*;
pub use normals::*;
pub use holes::*;
pub use conform::*;
pub use uv_unwrap::*;
pub use tangents::*;
