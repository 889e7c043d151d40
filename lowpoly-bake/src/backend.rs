//! Ray query backends
//!
//! The baker only needs nearest hits for batches of rays. Everything else
//! (rasterization, shading, dilation) runs on the CPU, so switching backends
//! cannot change how a hit is turned into a texel.

use lowpoly_algorithms::{Bvh, Ray, RayHit};
use lowpoly_core::{Degradation, DegradationKind, Result};
use rayon::prelude::*;
use tracing::{info, warn};

/// Something that can answer nearest-hit queries against a BVH
pub trait RayBackend: Send + Sync {
    /// Short name recorded in logs and the manifest
    fn name(&self) -> String;

    /// Nearest hit per ray with `t` up to `t_max`, in ray order
    fn trace(&self, bvh: &Bvh, rays: &[Ray], t_max: f32) -> Result<Vec<Option<RayHit>>>;
}

/// Multithreaded software backend
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl RayBackend for CpuBackend {
    fn name(&self) -> String {
        "cpu".to_string()
    }

    fn trace(&self, bvh: &Bvh, rays: &[Ray], t_max: f32) -> Result<Vec<Option<RayHit>>> {
        Ok(rays.par_iter().map(|ray| bvh.intersect(ray, t_max)).collect())
    }
}

/// Compute shader backend
#[cfg(feature = "gpu")]
pub struct GpuBackend {
    context: lowpoly_gpu::GpuContext,
}

#[cfg(feature = "gpu")]
impl GpuBackend {
    /// Open the default adapter; `DeviceUnavailable` when there is none
    pub fn new() -> Result<Self> {
        Ok(Self {
            context: lowpoly_gpu::GpuContext::new_blocking()?,
        })
    }
}

#[cfg(feature = "gpu")]
impl RayBackend for GpuBackend {
    fn name(&self) -> String {
        format!("gpu: {}", self.context.adapter_name())
    }

    fn trace(&self, bvh: &Bvh, rays: &[Ray], t_max: f32) -> Result<Vec<Option<RayHit>>> {
        lowpoly_gpu::GpuRayCaster::new(&self.context).trace_blocking(bvh, rays, t_max)
    }
}

/// Pick the ray backend for a job.
///
/// With `prefer_gpu` the compute backend is tried first; if it cannot be
/// opened (or the crate was built without it) the CPU backend is returned
/// together with a `DeviceUnavailable` degradation.
pub fn select_backend(prefer_gpu: bool) -> (Box<dyn RayBackend>, Option<Degradation>) {
    if !prefer_gpu {
        info!("using CPU ray backend");
        return (Box::new(CpuBackend), None);
    }

    #[cfg(feature = "gpu")]
    let reason = match GpuBackend::new() {
        Ok(backend) => {
            info!(backend = %backend.name(), "using GPU ray backend");
            return (Box::new(backend), None);
        }
        Err(e) => e.to_string(),
    };
    #[cfg(not(feature = "gpu"))]
    let reason = "built without GPU support".to_string();

    warn!(%reason, "GPU unavailable, baking on the CPU");
    (
        Box::new(CpuBackend),
        Some(Degradation::new(
            DegradationKind::DeviceUnavailable,
            format!("{}; CPU baking used", reason),
        )),
    )
}
