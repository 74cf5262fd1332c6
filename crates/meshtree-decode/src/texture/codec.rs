//! JPEG and PNG decoding via the `image` crate.

use image::ImageFormat;

use super::DecodedImage;
use crate::error::DecodeResult;

/// Decode JPEG data to RGBA.
pub fn decode_jpeg_to_rgba(data: &[u8]) -> DecodeResult<DecodedImage> {
    decode_with_format(data, ImageFormat::Jpeg)
}

/// Decode PNG data to RGBA.
pub fn decode_png_to_rgba(data: &[u8]) -> DecodeResult<DecodedImage> {
    decode_with_format(data, ImageFormat::Png)
}

fn decode_with_format(data: &[u8], format: ImageFormat) -> DecodeResult<DecodedImage> {
    let img = image::load_from_memory_with_format(data, format)?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage::new(rgba.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageBuffer, Rgba, RgbaImage};

    use super::*;
    use crate::error::DecodeError;

    fn encode(img: &RgbaImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        if format == ImageFormat::Jpeg {
            // JPEG has no alpha channel.
            image::DynamicImage::ImageRgba8(img.clone())
                .to_rgb8()
                .write_to(&mut Cursor::new(&mut bytes), format)
                .unwrap();
        } else {
            img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        }
        bytes
    }

    #[test]
    fn test_decode_png_keeps_alpha() {
        let img: RgbaImage = ImageBuffer::from_pixel(4, 2, Rgba([200, 100, 50, 64]));
        let decoded = decode_png_to_rgba(&encode(&img, ImageFormat::Png)).unwrap();

        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(decoded.data.len(), decoded.byte_size());
        assert!(decoded.has_alpha);
        assert_eq!(&decoded.data[..4], &[200, 100, 50, 64]);
    }

    #[test]
    fn test_decode_jpeg_is_opaque() {
        let img: RgbaImage = ImageBuffer::from_pixel(8, 8, Rgba([90, 90, 90, 255]));
        let decoded = decode_jpeg_to_rgba(&encode(&img, ImageFormat::Jpeg)).unwrap();

        assert_eq!((decoded.width, decoded.height), (8, 8));
        assert!(!decoded.has_alpha);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_jpeg_to_rgba(&[0xFF, 0xD8, 0x00, 0x00]);
        assert!(matches!(result, Err(DecodeError::Image { .. })));
    }
}
