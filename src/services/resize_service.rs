//! Thumbnail generation.
//!
//! Decodes JPEG or PNG bytes, scales them to a fixed width while keeping the
//! aspect ratio, and re-encodes in the container format they arrived in.

use image::{
    DynamicImage, ImageFormat, ImageReader, codecs::jpeg::JpegEncoder, imageops::FilterType,
};
use std::io::Cursor;
use thiserror::Error;

/// Default thumbnail width in pixels.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 200;

/// JPEG quality used when re-encoding (1-100).
pub const JPEG_QUALITY: u8 = 80;

/// Sources above this pixel count are rejected before decoding.
pub const MAX_SOURCE_PIXELS: u64 = 100_000_000;

/// Largest configurable thumbnail width.
pub const MAX_THUMBNAIL_WIDTH: u32 = 4096;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("image resolution exceeds maximum ({width}x{height})")]
    ResolutionTooLarge { width: u32, height: u32 },
    #[error("encode failed: {0}")]
    Encode(String),
}

/// A re-encoded thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    pub fn content_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "image/png",
            _ => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resizer {
    width: u32,
    max_pixels: u64,
}

impl Resizer {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            max_pixels: MAX_SOURCE_PIXELS,
        }
    }

    /// Resize `input` to the configured width. Narrower sources are scaled up.
    pub fn resize(&self, input: &[u8]) -> Result<Thumbnail, ResizeError> {
        let (img, format) = decode(input, self.max_pixels)?;

        let (src_w, src_h) = (img.width(), img.height());
        let height = scaled_height(src_w, src_h, self.width);
        let resized = img.resize_exact(self.width, height, FilterType::Lanczos3);
        let bytes = encode(&resized, format)?;

        Ok(Thumbnail {
            bytes,
            format,
            width: self.width,
            height,
        })
    }
}

/// Height that keeps the aspect ratio at `target_w`, never below one pixel.
pub fn scaled_height(src_w: u32, src_h: u32, target_w: u32) -> u32 {
    if src_w == 0 {
        return 1;
    }
    let height = (src_h as f64 * target_w as f64 / src_w as f64).round();
    height.max(1.0) as u32
}

/// Sniff the container, check the header dimensions against `max_pixels`,
/// and only then decode the pixel data.
fn decode(input: &[u8], max_pixels: u64) -> Result<(DynamicImage, ImageFormat), ResizeError> {
    let reader = ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .map_err(|e| ResizeError::Decode(format!("failed to guess format: {e}")))?;

    let format = match reader.format() {
        Some(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => format,
        Some(other) => return Err(ResizeError::UnsupportedFormat(format!("{other:?}"))),
        None => return Err(ResizeError::Decode("unrecognized image data".into())),
    };

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ResizeError::Decode(e.to_string()))?;
    if width as u64 * height as u64 > max_pixels {
        return Err(ResizeError::ResolutionTooLarge { width, height });
    }

    let img = ImageReader::with_format(Cursor::new(input), format)
        .decode()
        .map_err(|e| ResizeError::Decode(e.to_string()))?;

    Ok((img, format))
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ResizeError> {
    let mut buf = Cursor::new(Vec::new());

    match format {
        ImageFormat::Png => {
            img.write_to(&mut buf, ImageFormat::Png)
                .map_err(|e| ResizeError::Encode(format!("PNG encode failed: {e}")))?;
        }
        _ => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            img.to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| ResizeError::Encode(format!("JPEG encode failed: {e}")))?;
        }
    }

    Ok(buf.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Encode a solid image of the given size, for use as test input.
    pub(crate) fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 90])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_scaled_height() {
        assert_eq!(scaled_height(400, 300, 200), 150);
        assert_eq!(scaled_height(1000, 333, 200), 67);
        assert_eq!(scaled_height(5000, 1, 200), 1);
        assert_eq!(scaled_height(0, 10, 200), 1);
    }

    #[test]
    fn test_resize_png_keeps_format() {
        let input = sample_image(400, 300, ImageFormat::Png);
        let thumb = Resizer::new(DEFAULT_THUMBNAIL_WIDTH).resize(&input).unwrap();

        assert_eq!(thumb.format, ImageFormat::Png);
        assert_eq!(thumb.content_type(), "image/png");
        assert_eq!((thumb.width, thumb.height), (200, 150));
        assert_eq!(&thumb.bytes[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(decoded_dimensions(&thumb.bytes), (200, 150));
    }

    #[test]
    fn test_resize_jpeg_keeps_format() {
        let input = sample_image(1000, 500, ImageFormat::Jpeg);
        let thumb = Resizer::new(DEFAULT_THUMBNAIL_WIDTH).resize(&input).unwrap();

        assert_eq!(thumb.format, ImageFormat::Jpeg);
        assert_eq!(thumb.content_type(), "image/jpeg");
        assert_eq!(&thumb.bytes[0..2], &[0xFF, 0xD8]);
        assert_eq!(decoded_dimensions(&thumb.bytes), (200, 100));
    }

    #[test]
    fn test_small_source_is_scaled_up() {
        let input = sample_image(50, 40, ImageFormat::Png);
        let thumb = Resizer::new(200).resize(&input).unwrap();
        assert_eq!(decoded_dimensions(&thumb.bytes), (200, 160));
    }

    #[test]
    fn test_truncated_file_fails_to_decode() {
        let input = sample_image(400, 300, ImageFormat::Png);
        let result = Resizer::new(200).resize(&input[..input.len() / 2]);
        assert!(matches!(result, Err(ResizeError::Decode(_))));
    }

    #[test]
    fn test_non_image_bytes_fail_to_decode() {
        let result = Resizer::new(200).resize(b"definitely not an image");
        assert!(matches!(result, Err(ResizeError::Decode(_))));
    }

    #[test]
    fn test_oversized_source_is_rejected_from_header() {
        let resizer = Resizer {
            width: 200,
            max_pixels: 10_000,
        };
        let input = sample_image(400, 300, ImageFormat::Png);

        let result = resizer.resize(&input);
        assert!(matches!(
            result,
            Err(ResizeError::ResolutionTooLarge {
                width: 400,
                height: 300
            })
        ));

        // Only the header is read, so a body that would fail to decode still
        // reports the size.
        let result = resizer.resize(&input[..input.len() / 2]);
        assert!(matches!(result, Err(ResizeError::ResolutionTooLarge { .. })));
    }

    #[test]
    fn test_other_raster_format_is_unsupported() {
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&[0u8; 32]);
        let result = Resizer::new(200).resize(&gif);
        assert!(matches!(result, Err(ResizeError::UnsupportedFormat(_))));
    }
}
