//! # Lowpoly GPU
//!
//! GPU-accelerated ray queries for texture baking using WGPU.
//!
//! The device context opens the first suitable adapter and reports
//! `DeviceUnavailable` when there is none, so callers can fall back to the
//! CPU path. Ray casting walks the same BVH layout as the CPU query.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lowpoly_algorithms::{Bvh, Ray};
//! use lowpoly_core::{Point3f, TriangleMesh, Vector3f};
//! use lowpoly_gpu::{GpuContext, GpuRayCaster};
//!
//! fn example(mesh: &TriangleMesh) -> lowpoly_core::Result<()> {
//!     let context = GpuContext::new_blocking()?;
//!     let caster = GpuRayCaster::new(&context);
//!     let ray = Ray::new(Point3f::new(0.0, 0.0, 1.0), -Vector3f::z());
//!     let hits = caster.trace_blocking(&Bvh::build(mesh), &[ray], 10.0)?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod raycast;

pub use device::GpuContext;
pub use raycast::{GpuRayCaster, RAYS_PER_DISPATCH};
