//! GPU nearest-hit ray casting against a [`Bvh`]
//!
//! The compute shader walks the same flattened hierarchy as the CPU query
//! and repeats its Möller-Trumbore arithmetic and `(t, face)` tie-break, so
//! both report the same hit records.

use crate::GpuContext;
use lowpoly_algorithms::{Bvh, Ray, RayHit, PARALLEL_EPSILON, RAY_T_EPSILON};
use lowpoly_core::{Error, Result};
use tracing::debug;

/// Rays submitted per dispatch
pub const RAYS_PER_DISPATCH: usize = 1 << 20;

const WORKGROUP_SIZE: usize = 64;

/// Marks a ray that hit nothing
const MISS: u32 = u32::MAX;

const RAYCAST_SHADER: &str = r#"
struct Node {
    min: vec3<f32>,
    left_or_first: u32,
    max: vec3<f32>,
    count: u32,
}

struct GpuRay {
    origin: vec4<f32>,
    direction: vec4<f32>,
}

struct Hit {
    face: u32,
    t: f32,
    u: f32,
    v: f32,
}

struct Params {
    ray_count: u32,
    node_count: u32,
    t_max: f32,
    t_epsilon: f32,
    parallel_epsilon: f32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<storage, read> nodes: array<Node>;
@group(0) @binding(1) var<storage, read> order: array<u32>;
@group(0) @binding(2) var<storage, read> corners: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> rays: array<GpuRay>;
@group(0) @binding(4) var<storage, read_write> hits: array<Hit>;
@group(0) @binding(5) var<uniform> params: Params;

const MISS: u32 = 0xffffffffu;
const STACK_SIZE: u32 = 64u;

fn safe_inverse(d: f32) -> f32 {
    if (abs(d) < 1e-30) {
        return select(-1e30, 1e30, d >= 0.0);
    }
    return 1.0 / d;
}

fn ray_enters(node: Node, origin: vec3<f32>, inv_dir: vec3<f32>, t_max: f32) -> bool {
    var t0 = -params.t_epsilon;
    var t1 = t_max;
    for (var k = 0u; k < 3u; k++) {
        let a = (node.min[k] - origin[k]) * inv_dir[k];
        let b = (node.max[k] - origin[k]) * inv_dir[k];
        let near = min(a, b);
        let far = max(a, b);
        if (near > t0) { t0 = near; }
        if (far < t1) { t1 = far; }
        if (t0 > t1) { return false; }
    }
    return true;
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let index = global_id.x;
    if (index >= params.ray_count) {
        return;
    }

    let origin = rays[index].origin.xyz;
    let dir = rays[index].direction.xyz;
    let inv_dir = vec3<f32>(safe_inverse(dir.x), safe_inverse(dir.y), safe_inverse(dir.z));

    var best = Hit(MISS, 0.0, 0.0, 0.0);
    var limit = params.t_max;
    var stack: array<u32, STACK_SIZE>;
    var top = 0u;
    if (params.node_count > 0u) {
        stack[0] = 0u;
        top = 1u;
    }

    while (top > 0u) {
        top -= 1u;
        let node = nodes[stack[top]];
        if (!ray_enters(node, origin, inv_dir, limit)) {
            continue;
        }
        if (node.count > 0u) {
            for (var i = 0u; i < node.count; i++) {
                let face = order[node.left_or_first + i];
                let v0 = corners[face * 3u].xyz;
                let v1 = corners[face * 3u + 1u].xyz;
                let v2 = corners[face * 3u + 2u].xyz;

                let e1 = v1 - v0;
                let e2 = v2 - v0;
                let p = cross(dir, e2);
                let det = dot(e1, p);
                if (abs(det) < params.parallel_epsilon) { continue; }
                let inv_det = 1.0 / det;
                let s = origin - v0;
                let u = dot(s, p) * inv_det;
                if (u < 0.0 || u > 1.0) { continue; }
                let q = cross(s, e1);
                let v = dot(dir, q) * inv_det;
                if (v < 0.0 || u + v > 1.0) { continue; }
                let t = dot(e2, q) * inv_det;
                if (t < -params.t_epsilon || t > limit) { continue; }

                if (best.face == MISS || t < best.t || (t == best.t && face < best.face)) {
                    best = Hit(face, t, u, v);
                    limit = t;
                }
            }
        } else if (top + 2u <= STACK_SIZE) {
            stack[top] = node.left_or_first + 1u;
            stack[top + 1u] = node.left_or_first;
            top += 2u;
        }
    }

    hits[index] = best;
}
"#;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuRay {
    origin: [f32; 4],
    direction: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuHit {
    face: u32,
    t: f32,
    u: f32,
    v: f32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RaycastParams {
    ray_count: u32,
    node_count: u32,
    t_max: f32,
    t_epsilon: f32,
    parallel_epsilon: f32,
    _pad: [u32; 3],
}

/// Finite stand-in for an unbounded `t_max` in the uniform block
fn finite_t_max(t_max: f32) -> f32 {
    if t_max.is_nan() {
        f32::MAX
    } else {
        t_max.clamp(-f32::MAX, f32::MAX)
    }
}

/// Compiled ray query pipeline bound to one device
pub struct GpuRayCaster<'a> {
    context: &'a GpuContext,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl<'a> GpuRayCaster<'a> {
    pub fn new(context: &'a GpuContext) -> Self {
        use wgpu::BufferBindingType::{Storage, Uniform};
        let layout = context.create_buffer_layout(
            "raycast",
            &[
                Storage { read_only: true },
                Storage { read_only: true },
                Storage { read_only: true },
                Storage { read_only: true },
                Storage { read_only: false },
                Uniform,
            ],
        );
        let shader = context.create_shader_module("raycast", RAYCAST_SHADER);
        let pipeline = context.create_compute_pipeline("raycast", &shader, &layout, "main");
        Self { context, layout, pipeline }
    }

    /// Nearest hit per ray with `t` in `[-RAY_T_EPSILON, t_max]`
    pub async fn trace(&self, bvh: &Bvh, rays: &[Ray], t_max: f32) -> Result<Vec<Option<RayHit>>> {
        if rays.is_empty() {
            return Ok(Vec::new());
        }
        if bvh.is_empty() {
            return Ok(vec![None; rays.len()]);
        }

        let corners: Vec<[f32; 4]> = bvh
            .triangles()
            .iter()
            .flat_map(|tri| tri.iter().map(|p| [p.x, p.y, p.z, 0.0]))
            .collect();

        let limit = self.context.max_storage_binding();
        let largest = [
            std::mem::size_of_val(bvh.nodes()),
            std::mem::size_of_val(corners.as_slice()),
            RAYS_PER_DISPATCH.min(rays.len()) * std::mem::size_of::<GpuRay>(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0) as u64;
        if largest > limit {
            return Err(Error::Gpu(format!(
                "mesh needs a {} byte storage binding, device allows {}",
                largest, limit
            )));
        }

        let storage = wgpu::BufferUsages::STORAGE;
        let nodes = self.context.create_buffer_init("bvh nodes", bvh.nodes(), storage);
        let order = self.context.create_buffer_init("bvh order", bvh.order(), storage);
        let corners = self.context.create_buffer_init("triangle corners", &corners, storage);

        let mut results = Vec::with_capacity(rays.len());
        for batch in rays.chunks(RAYS_PER_DISPATCH) {
            let gpu_rays: Vec<GpuRay> = batch
                .iter()
                .map(|r| GpuRay {
                    origin: [r.origin.x, r.origin.y, r.origin.z, 0.0],
                    direction: [r.direction.x, r.direction.y, r.direction.z, 0.0],
                })
                .collect();
            let params = RaycastParams {
                ray_count: batch.len() as u32,
                node_count: bvh.nodes().len() as u32,
                t_max: finite_t_max(t_max),
                t_epsilon: RAY_T_EPSILON,
                parallel_epsilon: PARALLEL_EPSILON,
                _pad: [0; 3],
            };

            let ray_buffer = self.context.create_buffer_init("rays", &gpu_rays, storage);
            let hit_size = (batch.len() * std::mem::size_of::<GpuHit>()) as u64;
            let hit_buffer = self.context.create_buffer(
                "hits",
                hit_size,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            );
            let params_buffer = self
                .context
                .create_buffer_init("raycast params", &[params], wgpu::BufferUsages::UNIFORM);

            let bind_group = self.context.create_buffer_bind_group(
                "raycast",
                &self.layout,
                &[&nodes, &order, &corners, &ray_buffer, &hit_buffer, &params_buffer],
            );

            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("raycast") });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("raycast pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                let workgroups = batch.len().div_ceil(WORKGROUP_SIZE);
                pass.dispatch_workgroups(workgroups as u32, 1, 1);
            }
            self.context.queue.submit(std::iter::once(encoder.finish()));

            let hits: Vec<GpuHit> = self.context.read_buffer(&hit_buffer, hit_size).await?;
            results.extend(hits.into_iter().map(|h| {
                (h.face != MISS).then_some(RayHit {
                    face: h.face as usize,
                    t: h.t,
                    u: h.u,
                    v: h.v,
                })
            }));
            debug!(rays = batch.len(), "raycast batch done");
        }
        Ok(results)
    }

    /// Blocking variant of [`GpuRayCaster::trace`]
    pub fn trace_blocking(&self, bvh: &Bvh, rays: &[Ray], t_max: f32) -> Result<Vec<Option<RayHit>>> {
        pollster::block_on(self.trace(bvh, rays, t_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowpoly_core::{Point3f, TriangleMesh, Vector3f};

    fn make_grid(n: usize) -> TriangleMesh {
        let mut mesh = TriangleMesh::new();
        for y in 0..=n {
            for x in 0..=n {
                let (fx, fy) = (x as f32 / n as f32, y as f32 / n as f32);
                mesh.add_vertex(Point3f::new(fx, fy, 0.1 * (fx * 7.0).sin() * fy));
            }
        }
        for y in 0..n {
            for x in 0..n {
                let a = y * (n + 1) + x;
                mesh.add_face([a, a + 1, a + n + 2]);
                mesh.add_face([a, a + n + 2, a + n + 1]);
            }
        }
        mesh
    }

    #[test]
    fn test_gpu_hits_match_cpu() {
        // Machines without an adapter have nothing to compare
        let context = match GpuContext::new_blocking() {
            Ok(context) => context,
            Err(_) => return,
        };
        let mesh = make_grid(16);
        let bvh = Bvh::build(&mesh);
        let rays: Vec<Ray> = (0..40)
            .flat_map(|i| (0..40).map(move |j| (i, j)))
            .map(|(i, j)| {
                Ray::new(
                    Point3f::new(i as f32 / 39.0 * 1.2 - 0.1, j as f32 / 39.0 * 1.2 - 0.1, 1.0),
                    Vector3f::new(0.0, 0.0, -1.0),
                )
            })
            .collect();

        let caster = GpuRayCaster::new(&context);
        let gpu = caster.trace_blocking(&bvh, &rays, 5.0).unwrap();
        assert_eq!(gpu.len(), rays.len());
        for (ray, hit) in rays.iter().zip(&gpu) {
            let cpu = bvh.intersect(ray, 5.0);
            assert_eq!(cpu.map(|h| h.face), hit.map(|h| h.face));
            if let (Some(a), Some(b)) = (cpu, hit) {
                assert!((a.t - b.t).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_t_max_upload_is_finite() {
        assert_eq!(finite_t_max(f32::INFINITY), f32::MAX);
        assert_eq!(finite_t_max(f32::NAN), f32::MAX);
        assert_eq!(finite_t_max(2.5), 2.5);
    }

    #[test]
    fn test_gpu_unbounded_search_matches_cpu() {
        let context = match GpuContext::new_blocking() {
            Ok(context) => context,
            Err(_) => return,
        };
        let bvh = Bvh::build(&make_grid(4));
        let ray = Ray::new(Point3f::new(0.3, 0.6, 1000.0), Vector3f::new(0.0, 0.0, -1.0));
        let caster = GpuRayCaster::new(&context);
        let gpu = caster.trace_blocking(&bvh, &[ray], f32::INFINITY).unwrap();
        let cpu = bvh.intersect(&ray, f32::MAX);
        assert!(cpu.is_some());
        assert_eq!(gpu[0].map(|h| h.face), cpu.map(|h| h.face));
    }

    #[test]
    fn test_gpu_empty_inputs() {
        let context = match GpuContext::new_blocking() {
            Ok(context) => context,
            Err(_) => return,
        };
        let caster = GpuRayCaster::new(&context);
        let bvh = Bvh::build(&TriangleMesh::new());
        let ray = Ray::new(Point3f::origin(), Vector3f::z());
        assert!(caster.trace_blocking(&bvh, &[], 1.0).unwrap().is_empty());
        assert_eq!(caster.trace_blocking(&bvh, &[ray], 1.0).unwrap(), vec![None]);
    }
}
