//! Job options
//!
//! Values come from three layers, lowest precedence first: [`Default`],
//! an optional TOML file, command line flags. Every field may be omitted
//! from the TOML file.

use lowpoly_algorithms::{DEFAULT_ANGLE_LIMIT, DEFAULT_ISLAND_MARGIN, DEFAULT_MAX_HOLE_EDGES};
use lowpoly_bake::{DEFAULT_ATLAS_SIZE, DEFAULT_BAKE_MARGIN, DEFAULT_CAGE_EXTRUSION, DEFAULT_RAY_DISTANCE};
use lowpoly_core::{Error, Result};
use lowpoly_reconstruction::DEFAULT_MAX_REMESH_CELLS;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_TARGET_TRIS: i64 = 5000;
pub const DEFAULT_VOLUME_TOLERANCE: f32 = 0.05;
/// Largest accepted atlas edge in texels
pub const MAX_TEX_SIZE: u32 = 16384;

/// Immutable configuration snapshot of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobOptions {
    /// Triangle budget of the low mesh
    pub target_tris: i64,
    /// Atlas edge length in texels
    pub tex_size: u32,
    /// Search distance past the cage; non-positive means unbounded
    pub ray_distance: f32,
    /// Spacing between UV islands, shrinking with the island count
    pub island_margin: f32,
    /// Dilation passes in texels
    pub bake_margin: u32,
    /// Cage offset along the low mesh normals
    pub cage_extrusion: f32,
    /// Largest conform displacement; non-positive skips conforming
    pub shrinkwrap_offset: f32,
    /// Remesh voxel edge; non-positive skips remeshing
    pub remesh_voxel_size: f32,
    /// Crease angle in degrees; non-positive keeps every edge smooth
    pub auto_smooth_angle: f32,
    /// Seam angle of the unwrapper in degrees
    pub uv_angle_limit: f32,
    pub max_hole_edges: usize,
    pub remesh_remove_disconnected: bool,
    pub max_remesh_cells: usize,
    pub prefer_gpu: bool,
    /// Relative local volume change above which collapses are penalized
    pub volume_tolerance: f32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            target_tris: DEFAULT_TARGET_TRIS,
            tex_size: DEFAULT_ATLAS_SIZE,
            ray_distance: DEFAULT_RAY_DISTANCE,
            island_margin: DEFAULT_ISLAND_MARGIN,
            bake_margin: DEFAULT_BAKE_MARGIN,
            cage_extrusion: DEFAULT_CAGE_EXTRUSION,
            shrinkwrap_offset: 0.0,
            remesh_voxel_size: 0.0,
            auto_smooth_angle: 0.0,
            uv_angle_limit: DEFAULT_ANGLE_LIMIT,
            max_hole_edges: DEFAULT_MAX_HOLE_EDGES,
            remesh_remove_disconnected: false,
            max_remesh_cells: DEFAULT_MAX_REMESH_CELLS,
            prefer_gpu: true,
            volume_tolerance: DEFAULT_VOLUME_TOLERANCE,
        }
    }
}

impl JobOptions {
    pub fn with_target_tris(mut self, target: i64) -> Self {
        self.target_tris = target;
        self
    }

    pub fn with_tex_size(mut self, size: u32) -> Self {
        self.tex_size = size;
        self
    }

    pub fn with_ray_distance(mut self, distance: f32) -> Self {
        self.ray_distance = distance;
        self
    }

    pub fn with_island_margin(mut self, margin: f32) -> Self {
        self.island_margin = margin;
        self
    }

    pub fn with_bake_margin(mut self, margin: u32) -> Self {
        self.bake_margin = margin;
        self
    }

    pub fn with_cage_extrusion(mut self, extrusion: f32) -> Self {
        self.cage_extrusion = extrusion;
        self
    }

    pub fn with_shrinkwrap_offset(mut self, offset: f32) -> Self {
        self.shrinkwrap_offset = offset;
        self
    }

    pub fn with_remesh_voxel_size(mut self, voxel: f32) -> Self {
        self.remesh_voxel_size = voxel;
        self
    }

    pub fn with_auto_smooth_angle(mut self, degrees: f32) -> Self {
        self.auto_smooth_angle = degrees;
        self
    }

    pub fn with_max_hole_edges(mut self, edges: usize) -> Self {
        self.max_hole_edges = edges;
        self
    }

    pub fn with_prefer_gpu(mut self, prefer: bool) -> Self {
        self.prefer_gpu = prefer;
        self
    }

    /// Parse TOML; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidData(format!("invalid job options: {}", e)))
    }

    /// Read a TOML options file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::InvalidData(format!("{}: {}", path.display(), e)))
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("ray_distance", self.ray_distance),
            ("island_margin", self.island_margin),
            ("cage_extrusion", self.cage_extrusion),
            ("shrinkwrap_offset", self.shrinkwrap_offset),
            ("remesh_voxel_size", self.remesh_voxel_size),
            ("auto_smooth_angle", self.auto_smooth_angle),
            ("uv_angle_limit", self.uv_angle_limit),
            ("volume_tolerance", self.volume_tolerance),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidData(format!("{} must be finite, got {}", name, value)));
        }
        if self.tex_size == 0 || !self.tex_size.is_power_of_two() {
            return Err(Error::InvalidData(format!(
                "tex_size must be a non-zero power of two, got {}",
                self.tex_size
            )));
        }
        if self.tex_size > MAX_TEX_SIZE {
            return Err(Error::InvalidData(format!(
                "tex_size must be at most {}, got {}",
                MAX_TEX_SIZE, self.tex_size
            )));
        }
        if self.island_margin < 0.0 {
            return Err(Error::InvalidData(format!(
                "island_margin must not be negative, got {}",
                self.island_margin
            )));
        }
        if self.cage_extrusion < 0.0 {
            return Err(Error::InvalidData(format!(
                "cage_extrusion must not be negative, got {}",
                self.cage_extrusion
            )));
        }
        if !(self.uv_angle_limit > 0.0 && self.uv_angle_limit <= 180.0) {
            return Err(Error::InvalidData(format!(
                "uv_angle_limit must be in (0, 180], got {}",
                self.uv_angle_limit
            )));
        }
        if self.volume_tolerance < 0.0 {
            return Err(Error::InvalidData(format!(
                "volume_tolerance must not be negative, got {}",
                self.volume_tolerance
            )));
        }
        Ok(())
    }

    /// Every option as a `key`/`value` pair, in manifest order
    pub fn manifest_settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("target_tris", self.target_tris.to_string()),
            ("tex_size", self.tex_size.to_string()),
            ("ray_distance", self.ray_distance.to_string()),
            ("island_margin", self.island_margin.to_string()),
            ("bake_margin", self.bake_margin.to_string()),
            ("cage_extrusion", self.cage_extrusion.to_string()),
            ("shrinkwrap_offset", self.shrinkwrap_offset.to_string()),
            ("remesh_voxel_size", self.remesh_voxel_size.to_string()),
            ("auto_smooth_angle", self.auto_smooth_angle.to_string()),
            ("uv_angle_limit", self.uv_angle_limit.to_string()),
            ("max_hole_edges", self.max_hole_edges.to_string()),
            ("remesh_remove_disconnected", self.remesh_remove_disconnected.to_string()),
            ("max_remesh_cells", self.max_remesh_cells.to_string()),
            ("prefer_gpu", self.prefer_gpu.to_string()),
            ("volume_tolerance", self.volume_tolerance.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.target_tris, 5000);
        assert_eq!(options.tex_size, 4096);
        assert_eq!(options.ray_distance, 0.02);
        assert_eq!(options.island_margin, 0.06);
        assert_eq!(options.bake_margin, 12);
        assert_eq!(options.cage_extrusion, 0.06);
        assert_eq!(options.shrinkwrap_offset, 0.0);
        assert_eq!(options.remesh_voxel_size, 0.0);
        assert_eq!(options.auto_smooth_angle, 0.0);
        assert_eq!(options.uv_angle_limit, 66.0);
        assert_eq!(options.max_hole_edges, 50);
        assert!(!options.remesh_remove_disconnected);
        assert_eq!(options.max_remesh_cells, 512);
        assert!(options.prefer_gpu);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options = JobOptions::from_toml_str("target_tris = 1000\ntex_size = 512\nprefer_gpu = false\n").unwrap();
        assert_eq!(options.target_tris, 1000);
        assert_eq!(options.tex_size, 512);
        assert!(!options.prefer_gpu);
        assert_eq!(options.bake_margin, 12);
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        assert!(JobOptions::from_toml_str("target_triangles = 10").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let options = JobOptions::default().with_target_tris(42).with_auto_smooth_angle(30.0);
        let text = toml::to_string(&options).unwrap();
        assert_eq!(JobOptions::from_toml_str(&text).unwrap(), options);
    }

    #[test]
    fn test_validation() {
        assert!(JobOptions::default().with_tex_size(0).validate().is_err());
        assert!(JobOptions::default().with_tex_size(1000).validate().is_err());
        assert!(JobOptions::default().with_island_margin(-0.1).validate().is_err());
        assert!(JobOptions::default().with_ray_distance(f32::NAN).validate().is_err());
        assert!(JobOptions::default().with_cage_extrusion(-1.0).validate().is_err());
        assert!(JobOptions::default().with_tex_size(MAX_TEX_SIZE).validate().is_ok());
        assert!(JobOptions::default().with_tex_size(1 << 20).validate().is_err());
        // Disabling values are fine
        assert!(JobOptions::default()
            .with_ray_distance(0.0)
            .with_shrinkwrap_offset(-1.0)
            .with_target_tris(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_manifest_settings_order() {
        let keys: Vec<&str> = JobOptions::default().manifest_settings().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys.first(), Some(&"target_tris"));
        assert_eq!(keys[8], "auto_smooth_angle");
        assert_eq!(keys.last(), Some(&"volume_tolerance"));
    }

    #[test]
    fn test_manifest_settings_cover_every_field() {
        let options = JobOptions::default().with_max_hole_edges(12);
        let table: toml::Table = toml::to_string(&options).unwrap().parse().unwrap();
        let settings = options.manifest_settings();

        let mut fields: Vec<&str> = table.keys().map(String::as_str).collect();
        let mut keys: Vec<&str> = settings.iter().map(|(k, _)| *k).collect();
        fields.sort_unstable();
        keys.sort_unstable();
        assert_eq!(keys, fields);
        assert!(settings.contains(&("max_hole_edges", "12".to_string())));
    }
}
