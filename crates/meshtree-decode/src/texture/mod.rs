//! Texture decompression for tile meshes.
//!
//! Tiles carry their textures compressed, usually as JPEG and sometimes as
//! PNG when an alpha channel is needed. Both decode to RGBA pixel data
//! suitable for GPU upload.

mod codec;

pub use codec::{decode_jpeg_to_rgba, decode_png_to_rgba};

use crate::error::DecodeResult;

/// Texture format indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// JPEG-compressed RGB data.
    Jpeg,
    /// PNG data, possibly with alpha.
    Png,
}

/// A texture as stored in a tile, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedTexture {
    /// Codec of `data`.
    pub format: TextureFormat,
    /// Encoded bytes.
    pub data: Vec<u8>,
}

/// Decoded texture data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// RGBA pixel data (4 bytes per pixel).
    pub data: Vec<u8>,
    /// Texture width in pixels.
    pub width: u32,
    /// Texture height in pixels.
    pub height: u32,
    /// Whether any pixel is not fully opaque.
    pub has_alpha: bool,
}

impl DecodedImage {
    /// Create a new decoded image, scanning the pixels for transparency.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        let has_alpha = data.chunks_exact(4).any(|px| px[3] != u8::MAX);
        Self {
            data,
            width,
            height,
            has_alpha,
        }
    }

    /// Bytes the image occupies once uploaded.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// Decode a texture from compressed data to RGBA.
pub fn decode_texture(texture: &CompressedTexture) -> DecodeResult<DecodedImage> {
    match texture.format {
        TextureFormat::Jpeg => decode_jpeg_to_rgba(&texture.data),
        TextureFormat::Png => decode_png_to_rgba(&texture.data),
    }
}
