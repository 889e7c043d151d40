//! # Lowpoly Bake
//!
//! Transfers surface detail from a high resolution mesh onto the UV layout
//! of its low resolution counterpart: a base color atlas and a tangent-space
//! normal atlas.
//!
//! Ray queries go through a [`RayBackend`]. The CPU backend is always
//! available; the `gpu` feature adds a wgpu compute backend. Both feed the
//! same shading code, so the atlases do not depend on the device.

pub mod backend;
pub mod baker;
pub mod dilate;
pub mod rasterize;

pub use backend::*;
pub use baker::*;
pub use dilate::dilate;
pub use rasterize::{TexelSample, UvRasterizer};
