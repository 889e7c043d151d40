//! Raster types: bake targets and source textures
//!
//! Texture space follows glTF: `u` grows to the right, `v` grows downward
//! and row 0 is the top of the image.

use crate::{Error, Result};

/// Fill value of the base color atlas before baking, and the flat fallback
/// used when the high resolution mesh has no color texture.
pub const BASE_COLOR_FILL: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

/// Fill value of the normal atlas: an unperturbed tangent-space normal.
pub const NORMAL_FILL: [f32; 4] = [0.5, 0.5, 1.0, 1.0];

/// Square RGBA raster with floating point channels
#[derive(Debug, Clone, PartialEq)]
pub struct BakeImage {
    size: u32,
    pixels: Vec<[f32; 4]>,
}

impl BakeImage {
    /// Create a `size` x `size` image filled with one value
    pub fn filled(size: u32, fill: [f32; 4]) -> Self {
        Self {
            size,
            pixels: vec![fill; size as usize * size as usize],
        }
    }

    /// Edge length in texels
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let i = self.index(x, y);
        self.pixels[i] = value;
    }

    /// Row-major texel storage
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.pixels
    }

    /// True if every texel equals `value` exactly
    pub fn is_uniform(&self, value: [f32; 4]) -> bool {
        self.pixels.iter().all(|p| *p == value)
    }

    /// Quantize to interleaved 8-bit RGBA
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| p.map(quantize_channel))
            .collect()
    }

    /// Largest per-channel absolute difference to another image of the same size
    pub fn max_abs_difference(&self, other: &BakeImage) -> Option<f32> {
        if self.size != other.size {
            return None;
        }
        Some(
            self.pixels
                .iter()
                .zip(&other.pixels)
                .flat_map(|(a, b)| (0..4).map(move |c| (a[c] - b[c]).abs()))
                .fold(0.0, f32::max),
        )
    }
}

#[inline]
fn quantize_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A source texture sampled during baking
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl Texture {
    /// Build from interleaved 8-bit RGBA data
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(Error::InvalidData(format!(
                "texture {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        let texels = data
            .chunks_exact(4)
            .map(|c| {
                [
                    c[0] as f32 / 255.0,
                    c[1] as f32 / 255.0,
                    c[2] as f32 / 255.0,
                    c[3] as f32 / 255.0,
                ]
            })
            .collect();
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    /// Single-color texture, mostly useful for tests
    pub fn solid(width: u32, height: u32, color: [f32; 4]) -> Self {
        Self {
            width,
            height,
            texels: vec![color; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.rem_euclid(self.height as i64) as usize;
        self.texels[y * self.width as usize + x]
    }

    /// Bilinear sample with repeat wrapping
    pub fn sample_bilinear(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = uv[0] * self.width as f32 - 0.5;
        let y = uv[1] * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let t00 = self.texel(x0, y0);
        let t10 = self.texel(x0 + 1, y0);
        let t01 = self.texel(x0, y0 + 1);
        let t11 = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = t00[c] + (t10[c] - t00[c]) * fx;
            let bottom = t01[c] + (t11[c] - t01[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        out
    }
}

/// The two rasters produced by the baker
#[derive(Debug, Clone, PartialEq)]
pub struct BakedAtlas {
    pub base_color: BakeImage,
    pub normal: BakeImage,
}
