//! PNG encoding of baked atlases

use crate::IoError;
use image::{ImageFormat, RgbaImage};
use lowpoly_core::{BakeImage, BakedAtlas, Result, Texture};
use std::io::Cursor;

/// File names of the two atlases inside `textures/`
pub const BASE_COLOR_FILE: &str = "atlas_basecolor.png";
pub const NORMAL_FILE: &str = "atlas_normal.png";

/// Both atlases as PNG bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAtlas {
    pub base_color_png: Vec<u8>,
    pub normal_png: Vec<u8>,
}

/// Quantize `image` to 8-bit RGBA and encode it as PNG
pub fn encode_png(image: &BakeImage) -> Result<Vec<u8>> {
    let size = image.size();
    let rgba = RgbaImage::from_raw(size, size, image.to_rgba8()).ok_or_else(|| IoError::WriteError {
        message: format!("raster of size {} has the wrong number of texels", size),
    })?;
    let mut bytes = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(IoError::from)?;
    Ok(bytes)
}

pub fn encode_atlas(atlas: &BakedAtlas) -> Result<EncodedAtlas> {
    Ok(EncodedAtlas {
        base_color_png: encode_png(&atlas.base_color)?,
        normal_png: encode_png(&atlas.normal)?,
    })
}

/// Decode PNG (or JPEG) bytes into a sampling texture
pub fn decode_png(bytes: &[u8]) -> Result<Texture> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| IoError::ParseError { message: e.to_string() })?
        .to_rgba8();
    Texture::from_rgba8(image.width(), image.height(), image.as_raw())
}
