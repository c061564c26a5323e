//! Image decoding and normalisation.
//!
//! Every stored image is re-encoded to lossy WebP at the configured quality
//! after being scaled down so that neither side exceeds the configured
//! maximum. The codec sits behind a trait so services can be exercised with any
//! implementation.

use crate::errors::{StagingError, StagingResult};
use image::{DynamicImage, ImageFormat, imageops::FilterType};

/// A decoded, normalised image ready to be written to disk.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub trait ImageCodec: Send + Sync {
    /// Decode `bytes` (declared as `content_type`) and return its dimensions.
    fn dimensions(&self, bytes: &[u8], content_type: &str) -> StagingResult<(u32, u32)>;

    /// Decode, downscale to fit `max_dimension` preserving aspect ratio, and
    /// re-encode to the normalised format at `quality` (1-100).
    fn normalize(
        &self,
        bytes: &[u8],
        content_type: &str,
        max_dimension: u32,
        quality: u8,
    ) -> StagingResult<EncodedImage>;
}

/// Codec decoding with the `image` crate and encoding lossy WebP with `webp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpCodec;

impl WebpCodec {
    fn decode(&self, bytes: &[u8], content_type: &str) -> StagingResult<DynamicImage> {
        let declared = ImageFormat::from_mime_type(content_type.trim());
        let decoded = match declared {
            Some(format) => image::load_from_memory_with_format(bytes, format)
                .or_else(|_| image::load_from_memory(bytes)),
            None => image::load_from_memory(bytes),
        };

        decoded.map_err(|err| StagingError::InvalidImage(err.to_string()))
    }
}

impl ImageCodec for WebpCodec {
    fn dimensions(&self, bytes: &[u8], content_type: &str) -> StagingResult<(u32, u32)> {
        let img = self.decode(bytes, content_type)?;
        Ok((img.width(), img.height()))
    }

    fn normalize(
        &self,
        bytes: &[u8],
        content_type: &str,
        max_dimension: u32,
        quality: u8,
    ) -> StagingResult<EncodedImage> {
        let mut img = self.decode(bytes, content_type)?;

        if img.width() > max_dimension || img.height() > max_dimension {
            img = img.resize(max_dimension, max_dimension, FilterType::Triangle);
        }

        // libwebp accepts 8-bit RGB(A) only.
        let img = if img.color().has_alpha() {
            DynamicImage::ImageRgba8(img.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
        };
        let encoder = webp::Encoder::from_image(&img)
            .map_err(|err| StagingError::InvalidImage(format!("re-encoding failed: {err}")))?;
        let encoded = encoder.encode(f32::from(quality.clamp(1, 100)));

        Ok(EncodedImage {
            bytes: encoded.to_vec(),
            width: img.width(),
            height: img.height(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// A solid-colour PNG of the given size.
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 80, 20]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// A PNG with gradients and grain, compressing like a photograph.
    pub fn photo(width: u32, height: u32) -> Vec<u8> {
        let mut seed = 0x2545_f491_u32;
        let img = RgbImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let grain = (seed % 24) as u8;
            Rgb([
                ((x * 255 / width) as u8).saturating_add(grain),
                ((y * 255 / height) as u8).saturating_add(grain),
                (((x + y) * 127 / (width + height)) as u8).saturating_add(grain),
            ])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_small_images_at_their_size() {
        let encoded = WebpCodec.normalize(&fixtures::png(40, 30), "image/png", 1200, 50).unwrap();
        assert_eq!((encoded.width, encoded.height), (40, 30));
        assert_eq!(
            image::guess_format(&encoded.bytes).unwrap(),
            ImageFormat::WebP
        );
    }

    #[test]
    fn downscales_preserving_aspect_ratio() {
        let encoded = WebpCodec.normalize(&fixtures::png(400, 100), "image/png", 200, 50).unwrap();
        assert_eq!((encoded.width, encoded.height), (200, 50));
    }

    #[test]
    fn lossy_output_shrinks_photographs() {
        let input = fixtures::photo(480, 360);
        let low = WebpCodec.normalize(&input, "image/png", 1200, 20).unwrap();
        let high = WebpCodec.normalize(&input, "image/png", 1200, 90).unwrap();

        assert_eq!(image::guess_format(&low.bytes).unwrap(), ImageFormat::WebP);
        assert!(low.bytes.len() < high.bytes.len());
        assert!(
            high.bytes.len() < input.len(),
            "webp {} bytes, png input {} bytes",
            high.bytes.len(),
            input.len()
        );
    }

    #[test]
    fn keeps_transparency() {
        let img = image::RgbaImage::from_pixel(16, 16, image::Rgba([10, 20, 30, 0]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, ImageFormat::Png).unwrap();

        let encoded = WebpCodec
            .normalize(png.get_ref(), "image/png", 1200, 50)
            .unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn tolerates_a_wrong_declared_subtype() {
        let dims = WebpCodec.dimensions(&fixtures::png(10, 12), "image/jpeg").unwrap();
        assert_eq!(dims, (10, 12));
    }

    #[test]
    fn rejects_undecodable_bytes() {
        assert!(matches!(
            WebpCodec.normalize(b"definitely not an image", "image/png", 1200, 50),
            Err(StagingError::InvalidImage(_))
        ));
    }
}
