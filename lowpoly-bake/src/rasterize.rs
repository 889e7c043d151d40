//! UV-space rasterization of the low mesh
//!
//! Texel `(x, y)` is sampled at its center `((x + 0.5) / size, (y + 0.5) / size)`
//! in UV space. Where triangles share a texel the one with the lowest face
//! index wins.

use rayon::prelude::*;
use std::ops::Range;

/// Barycentric weights below this are still treated as inside
const EDGE_TOLERANCE: f32 = 1e-6;

/// One covered texel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexelSample {
    pub x: u32,
    pub y: u32,
    pub face: u32,
    /// Weights of the face's three corners
    pub bary: [f32; 3],
}

/// Low mesh triangles in texel space, bucketed by the rows they touch
pub struct UvRasterizer {
    size: u32,
    triangles: Vec<[[f32; 2]; 3]>,
    rows: Vec<Vec<u32>>,
}

impl UvRasterizer {
    /// Prepare triangles given as per-face UV corners
    pub fn new(size: u32, uv_triangles: Vec<[[f32; 2]; 3]>) -> Self {
        let scale = size as f32;
        let triangles: Vec<[[f32; 2]; 3]> = uv_triangles
            .into_iter()
            .map(|tri| tri.map(|uv| [uv[0] * scale, uv[1] * scale]))
            .collect();

        let mut rows = vec![Vec::new(); size as usize];
        for (face, tri) in triangles.iter().enumerate() {
            if signed_area(tri).abs() <= f32::EPSILON {
                continue;
            }
            let (lo, hi) = tri
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p[1]), hi.max(p[1])));
            if let Some(range) = center_range(lo, hi, size) {
                for y in range {
                    rows[y as usize].push(face as u32);
                }
            }
        }
        Self { size, triangles, rows }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Covered texels of a band of rows, in row-major order
    pub fn rasterize_rows(&self, rows: Range<u32>) -> Vec<TexelSample> {
        let end = rows.end.min(self.size);
        let start = rows.start.min(end);
        let per_row: Vec<Vec<TexelSample>> = (start..end)
            .into_par_iter()
            .map(|y| self.rasterize_row(y))
            .collect();
        per_row.into_iter().flatten().collect()
    }

    fn rasterize_row(&self, y: u32) -> Vec<TexelSample> {
        let size = self.size as usize;
        let mut owner: Vec<Option<(u32, [f32; 3])>> = vec![None; size];
        let cy = y as f32 + 0.5;

        for &face in &self.rows[y as usize] {
            let tri = &self.triangles[face as usize];
            let (lo, hi) = tri
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
            let Some(columns) = center_range(lo, hi, self.size) else {
                continue;
            };
            for x in columns {
                if owner[x as usize].is_some() {
                    continue;
                }
                if let Some(bary) = barycentric(tri, [x as f32 + 0.5, cy]) {
                    owner[x as usize] = Some((face, bary));
                }
            }
        }

        owner
            .into_iter()
            .enumerate()
            .filter_map(|(x, hit)| {
                hit.map(|(face, bary)| TexelSample {
                    x: x as u32,
                    y,
                    face,
                    bary,
                })
            })
            .collect()
    }
}

/// Texel indices whose centers fall in `[lo, hi]`
fn center_range(lo: f32, hi: f32, size: u32) -> Option<Range<u32>> {
    let first = (lo - 0.5).ceil().max(0.0);
    let last = (hi - 0.5).floor().min(size as f32 - 1.0);
    if !(first <= last) {
        return None;
    }
    Some(first as u32..last as u32 + 1)
}

fn signed_area(tri: &[[f32; 2]; 3]) -> f32 {
    let [a, b, c] = tri;
    (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
}

/// Barycentric weights of `p`, or `None` if it lies outside
fn barycentric(tri: &[[f32; 2]; 3], p: [f32; 2]) -> Option<[f32; 3]> {
    let area = signed_area(tri);
    if area.abs() <= f32::EPSILON {
        return None;
    }
    let [a, b, c] = tri;
    let w0 = ((b[0] - p[0]) * (c[1] - p[1]) - (c[0] - p[0]) * (b[1] - p[1])) / area;
    let w1 = ((c[0] - p[0]) * (a[1] - p[1]) - (a[0] - p[0]) * (c[1] - p[1])) / area;
    let w2 = 1.0 - w0 - w1;
    if w0 < -EDGE_TOLERANCE || w1 < -EDGE_TOLERANCE || w2 < -EDGE_TOLERANCE {
        return None;
    }
    Some([w0, w1, w2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_quad_covers_every_texel() {
        let tris = vec![
            [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            [[0.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        ];
        let raster = UvRasterizer::new(8, tris);
        let samples = raster.rasterize_rows(0..8);
        assert_eq!(samples.len(), 64);
        // Row-major order
        assert_eq!((samples[0].x, samples[0].y), (0, 0));
        assert_eq!((samples[9].x, samples[9].y), (1, 1));
    }

    #[test]
    fn test_first_face_wins_on_overlap() {
        let tri = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let raster = UvRasterizer::new(4, vec![tri, tri]);
        let samples = raster.rasterize_rows(0..4);
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.face == 0));
    }

    #[test]
    fn test_barycentric_reconstructs_center() {
        let tri = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let raster = UvRasterizer::new(4, vec![tri]);
        for s in raster.rasterize_rows(0..4) {
            let u = s.bary[1] * 4.0;
            let v = s.bary[2] * 4.0;
            assert_relative_eq!(u, s.x as f32 + 0.5, epsilon = 1e-4);
            assert_relative_eq!(v, s.y as f32 + 0.5, epsilon = 1e-4);
            assert_relative_eq!(s.bary.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_winding_does_not_matter() {
        let ccw = UvRasterizer::new(16, vec![[[0.1, 0.1], [0.9, 0.2], [0.4, 0.8]]]);
        let cw = UvRasterizer::new(16, vec![[[0.1, 0.1], [0.4, 0.8], [0.9, 0.2]]]);
        let a: Vec<(u32, u32)> = ccw.rasterize_rows(0..16).iter().map(|s| (s.x, s.y)).collect();
        let b: Vec<(u32, u32)> = cw.rasterize_rows(0..16).iter().map(|s| (s.x, s.y)).collect();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_band_splits_match_whole_image() {
        let tris = vec![[[0.05, 0.1], [0.95, 0.3], [0.2, 0.9]]];
        let raster = UvRasterizer::new(32, tris);
        let whole = raster.rasterize_rows(0..32);
        let mut banded = raster.rasterize_rows(0..10);
        banded.extend(raster.rasterize_rows(10..32));
        assert_eq!(whole, banded);
    }

    #[test]
    fn test_degenerate_triangle_is_ignored() {
        let raster = UvRasterizer::new(8, vec![[[0.1, 0.1], [0.5, 0.5], [0.9, 0.9]]]);
        assert!(raster.rasterize_rows(0..8).is_empty());
    }
}
