//! High-to-low surface baking
//!
//! For every atlas texel covered by the low mesh a ray starts on the cage
//! (the low surface pushed out along its normal) and travels inward. The
//! nearest hit on the high mesh supplies the base color and the normal that
//! end up in the two atlases.

use crate::backend::{CpuBackend, RayBackend};
use crate::dilate::dilate;
use crate::rasterize::{TexelSample, UvRasterizer};
use lowpoly_algorithms::{compute_tangents, Bvh, Ray, RayHit};
use lowpoly_core::{
    BakeImage, BakedAtlas, Degradation, DegradationKind, Error, Material, Result, Scene, StageOutcome,
    TriangleMesh, Vector3f, BASE_COLOR_FILL, NORMAL_FILL,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Default atlas edge length in texels
pub const DEFAULT_ATLAS_SIZE: u32 = 4096;
/// Default search distance past the cage
pub const DEFAULT_RAY_DISTANCE: f32 = 0.02;
/// Default cage extrusion
pub const DEFAULT_CAGE_EXTRUSION: f32 = 0.06;
/// Default dilation passes
pub const DEFAULT_BAKE_MARGIN: u32 = 12;

/// Texels traced per band of atlas rows
const RAYS_PER_BAND: usize = 1 << 20;

/// Baking parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BakeConfig {
    /// Atlas edge length in texels
    pub size: u32,
    /// How far past the cage a ray may travel; non-positive is unbounded
    pub ray_distance: f32,
    /// Distance the cage is pushed out along the low mesh normals
    pub cage_extrusion: f32,
    /// Dilation passes around baked texels
    pub margin: u32,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_ATLAS_SIZE,
            ray_distance: DEFAULT_RAY_DISTANCE,
            cage_extrusion: DEFAULT_CAGE_EXTRUSION,
            margin: DEFAULT_BAKE_MARGIN,
        }
    }
}

impl BakeConfig {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn with_ray_distance(mut self, distance: f32) -> Self {
        self.ray_distance = distance;
        self
    }

    pub fn with_cage_extrusion(mut self, extrusion: f32) -> Self {
        self.cage_extrusion = extrusion;
        self
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Cage extrusion actually applied
    fn cage(&self) -> f32 {
        self.cage_extrusion.max(0.0)
    }

    /// Largest ray parameter accepted as a hit, always finite
    pub fn max_ray_t(&self) -> f32 {
        if self.ray_distance > 0.0 {
            (self.cage() + self.ray_distance).min(f32::MAX)
        } else {
            f32::MAX
        }
    }
}

/// Counters of one bake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BakeStats {
    pub covered: usize,
    pub hits: usize,
    pub misses: usize,
    /// Backend that produced the hits
    pub backend: String,
}

/// Atlases, outcome and counters of one bake
#[derive(Debug, Clone)]
pub struct BakeResult {
    pub atlas: BakedAtlas,
    pub outcome: StageOutcome,
    pub stats: BakeStats,
}

/// Low mesh attributes needed per texel
struct LowSurface<'a> {
    mesh: &'a TriangleMesh,
    normals: &'a [Vector3f],
    tangents: Vec<[f32; 4]>,
}

struct TexelFrame {
    position: lowpoly_core::Point3f,
    normal: Vector3f,
    tangent: Vector3f,
    bitangent: Vector3f,
}

impl LowSurface<'_> {
    fn frame(&self, sample: &TexelSample) -> TexelFrame {
        let face = self.mesh.faces[sample.face as usize];
        let b = sample.bary;

        let mut position = Vector3f::zeros();
        let mut normal = Vector3f::zeros();
        let mut tangent = Vector3f::zeros();
        let mut handedness = 0.0;
        for k in 0..3 {
            let v = face[k];
            position += self.mesh.vertices[v].coords * b[k];
            normal += self.normals[v] * b[k];
            let t = self.tangents[v];
            tangent += Vector3f::new(t[0], t[1], t[2]) * b[k];
            handedness += t[3] * b[k];
        }

        let normal = normal
            .try_normalize(f32::EPSILON)
            .or_else(|| self.mesh.face_cross(sample.face as usize).try_normalize(f32::EPSILON))
            .unwrap_or_else(Vector3f::z);
        let tangent = (tangent - normal * normal.dot(&tangent))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| perpendicular(&normal));
        let sign = if handedness < 0.0 { -1.0 } else { 1.0 };
        let bitangent = normal.cross(&tangent) * sign;

        TexelFrame {
            position: position.into(),
            normal,
            tangent,
            bitangent,
        }
    }
}

fn perpendicular(n: &Vector3f) -> Vector3f {
    let helper = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    (helper - n * n.dot(&helper)).normalize()
}

/// High mesh attributes needed per hit
struct HighSurface<'a> {
    mesh: &'a TriangleMesh,
    face_normals: Vec<Vector3f>,
    color: Option<(&'a lowpoly_core::Texture, &'a [[f32; 2]])>,
    factor: [f32; 4],
}

impl HighSurface<'_> {
    fn normal(&self, hit: &RayHit) -> Vector3f {
        let face = self.mesh.faces[hit.face];
        let smooth = self.mesh.normals.as_ref().and_then(|normals| {
            let b = hit.barycentric();
            let n = (0..3).fold(Vector3f::zeros(), |acc, k| acc + normals[face[k]] * b[k]);
            n.try_normalize(f32::EPSILON)
        });
        smooth.unwrap_or(self.face_normals[hit.face])
    }

    fn base_color(&self, hit: &RayHit) -> Option<[f32; 4]> {
        let (texture, uvs) = self.color?;
        let face = self.mesh.faces[hit.face];
        let b = hit.barycentric();
        let mut uv = [0.0; 2];
        for k in 0..3 {
            uv[0] += uvs[face[k]][0] * b[k];
            uv[1] += uvs[face[k]][1] * b[k];
        }
        let texel = texture.sample_bilinear(uv);
        Some([0, 1, 2, 3].map(|c| texel[c] * self.factor[c]))
    }
}

/// Encode a tangent-space normal into `[0, 1]` color channels
fn encode_normal(n: &Vector3f) -> [f32; 4] {
    [n.x * 0.5 + 0.5, n.y * 0.5 + 0.5, n.z * 0.5 + 0.5, 1.0]
}

/// Bakes base color and tangent-space normal atlases
pub struct SurfaceBaker<'a> {
    config: BakeConfig,
    backend: &'a dyn RayBackend,
}

impl<'a> SurfaceBaker<'a> {
    pub fn new(config: BakeConfig, backend: &'a dyn RayBackend) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    /// Bake `high` (with its material) onto the UV layout of `low`.
    ///
    /// `low` must carry UVs and normals. An empty `high` mesh is fatal.
    pub fn bake(&self, high: &TriangleMesh, material: &Material, low: &TriangleMesh) -> Result<BakeResult> {
        if high.face_count() == 0 {
            return Err(Error::BakeTargetMissing);
        }
        let size = self.config.size;
        if size == 0 {
            return Err(Error::InvalidData("atlas size must be positive".to_string()));
        }
        let low_uvs = low
            .uvs
            .as_ref()
            .ok_or_else(|| Error::InvalidData("low mesh has no UV layout to bake into".to_string()))?;
        let low_normals = low
            .normals
            .as_ref()
            .ok_or_else(|| Error::InvalidData("low mesh has no normals".to_string()))?;

        let mut degradations = Vec::new();
        let color = match (&material.base_color_texture, high.uvs.as_ref()) {
            (Some(texture), Some(uvs)) => Some((texture, uvs.as_slice())),
            (Some(_), None) => {
                degradations.push(Degradation::new(
                    DegradationKind::NoBaseColorTexture,
                    "high mesh has a base color texture but no UVs; flat gray written",
                ));
                None
            }
            (None, _) => {
                degradations.push(Degradation::new(
                    DegradationKind::NoBaseColorTexture,
                    "high mesh has no base color texture; flat gray written",
                ));
                None
            }
        };
        if color.is_none() {
            warn!("skipping base color pass");
        }

        let low_surface = LowSurface {
            mesh: low,
            normals: low_normals,
            tangents: compute_tangents(low)?,
        };
        let high_surface = HighSurface {
            mesh: high,
            face_normals: high.calculate_face_normals(),
            color,
            factor: material.base_color_factor,
        };

        let uv_triangles = low.faces.iter().map(|f| f.map(|v| low_uvs[v])).collect();
        let rasterizer = UvRasterizer::new(size, uv_triangles);
        let bvh = Bvh::build(high);

        let mut base_color = BakeImage::filled(size, BASE_COLOR_FILL);
        let mut normal = BakeImage::filled(size, NORMAL_FILL);
        let mut covered = vec![false; size as usize * size as usize];
        let mut stats = BakeStats {
            backend: self.backend.name(),
            ..BakeStats::default()
        };

        let cage = self.config.cage();
        let t_max = self.config.max_ray_t();
        let band_rows = (RAYS_PER_BAND / size as usize).max(1) as u32;
        let mut fallback: Option<CpuBackend> = None;

        info!(
            size,
            backend = %stats.backend,
            high_faces = high.face_count(),
            low_faces = low.face_count(),
            "baking atlases"
        );

        let mut row = 0;
        while row < size {
            let band = row..(row + band_rows).min(size);
            row = band.end;

            let samples = rasterizer.rasterize_rows(band);
            if samples.is_empty() {
                continue;
            }
            let frames: Vec<TexelFrame> = samples.par_iter().map(|s| low_surface.frame(s)).collect();
            let rays: Vec<Ray> = frames
                .iter()
                .map(|f| Ray::new(f.position + f.normal * cage, -f.normal))
                .collect();

            let hits = match &fallback {
                Some(cpu) => cpu.trace(&bvh, &rays, t_max)?,
                None => match self.backend.trace(&bvh, &rays, t_max) {
                    Ok(hits) => hits,
                    Err(e) if self.backend.name() != CpuBackend.name() => {
                        warn!(error = %e, "ray backend failed, continuing on the CPU");
                        degradations.push(Degradation::new(
                            DegradationKind::DeviceUnavailable,
                            format!("{} failed during baking: {}; CPU baking used", stats.backend, e),
                        ));
                        stats.backend = CpuBackend.name();
                        let cpu = CpuBackend;
                        let hits = cpu.trace(&bvh, &rays, t_max)?;
                        fallback = Some(cpu);
                        hits
                    }
                    Err(e) => return Err(e),
                },
            };

            let shaded: Vec<Option<(Option<[f32; 4]>, [f32; 4])>> = frames
                .par_iter()
                .zip(hits.par_iter())
                .map(|(frame, hit)| {
                    hit.as_ref().map(|hit| {
                        let n = high_surface.normal(hit);
                        let local = Vector3f::new(n.dot(&frame.tangent), n.dot(&frame.bitangent), n.dot(&frame.normal))
                            .try_normalize(f32::EPSILON)
                            .unwrap_or_else(Vector3f::z);
                        (high_surface.base_color(hit), encode_normal(&local))
                    })
                })
                .collect();

            for (sample, shade) in samples.iter().zip(shaded) {
                let index = sample.y as usize * size as usize + sample.x as usize;
                covered[index] = true;
                stats.covered += 1;
                match shade {
                    Some((color, encoded)) => {
                        stats.hits += 1;
                        normal.set(sample.x, sample.y, encoded);
                        if let Some(color) = color {
                            base_color.set(sample.x, sample.y, color);
                        }
                    }
                    None => stats.misses += 1,
                }
            }
            debug!(rows = row, covered = stats.covered, "bake band done");
        }

        if stats.misses > 0 {
            warn!(misses = stats.misses, covered = stats.covered, "some texels found no high surface");
            degradations.push(Degradation::new(
                DegradationKind::RayMiss,
                format!(
                    "{} of {} texels found no surface within {}",
                    stats.misses, stats.covered, t_max
                ),
            ));
        }

        let margin = self.config.margin;
        if high_surface.color.is_some() {
            let mut mask = covered.clone();
            dilate(&mut base_color, &mut mask, margin);
        }
        dilate(&mut normal, &mut covered, margin);

        info!(hits = stats.hits, misses = stats.misses, "bake done");
        Ok(BakeResult {
            atlas: BakedAtlas { base_color, normal },
            outcome: StageOutcome::from_degradations(degradations),
            stats,
        })
    }

    /// Bake the scene's high mesh onto its low mesh and store the atlases
    pub fn bake_scene(&self, scene: &mut Scene) -> Result<(StageOutcome, BakeStats)> {
        let result = self.bake(scene.high(), scene.high_material(), scene.low())?;
        scene.atlas = Some(result.atlas);
        Ok((result.outcome, result.stats))
    }
}
