//! Image loading, resizing, and base64 encoding for vision APIs.
//!
//! Everything sent to a provider is at most 1024px on its longest edge.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, info};

use super::AnalyzerError;
use crate::imaging::{crop_rgb, BoundingBox};

/// Maximum dimension (width or height) for images sent to vision APIs.
pub const MAX_IMAGE_DIMENSION: u32 = 1024;

/// Minimum dimension for valid analysis (too small = poor detection).
pub const MIN_IMAGE_DIMENSION: u32 = 200;

/// Width of the divider drawn between the two halves of a region pair.
const PAIR_GAP: u32 = 4;

/// Prepare an encoded image for a vision API: decode, validate, resize,
/// re-encode as base64 JPEG.
///
/// # Errors
/// - Image cannot be decoded
/// - Image too small (< 200px on shortest side)
pub fn prepare_image(image_bytes: &[u8]) -> Result<String, AnalyzerError> {
    let img =
        image::load_from_memory(image_bytes).map_err(|e| AnalyzerError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    info!("Loaded image: {}x{}", width, height);

    if width.min(height) < MIN_IMAGE_DIMENSION {
        return Err(AnalyzerError::TooSmall {
            width,
            height,
            min: MIN_IMAGE_DIMENSION,
        });
    }

    encode_base64(&resize_if_needed(img, MAX_IMAGE_DIMENSION))
}

/// Prepare an in-memory board image. Small images are scaled up rather than
/// rejected.
pub fn prepare_rgb(image: &RgbImage) -> Result<String, AnalyzerError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(AnalyzerError::TooSmall {
            width: image.width(),
            height: image.height(),
            min: MIN_IMAGE_DIMENSION,
        });
    }
    let img = upscale_if_needed(DynamicImage::ImageRgb8(image.clone()), MIN_IMAGE_DIMENSION);
    encode_base64(&resize_if_needed(img, MAX_IMAGE_DIMENSION))
}

/// Crop `bbox` (grown by `padding`) out of both images and lay the crops
/// side by side: reference on the left, candidate on the right.
pub fn prepare_region_pair(
    reference: &RgbImage,
    candidate: &RgbImage,
    bbox: &BoundingBox,
    padding: u32,
) -> Result<String, AnalyzerError> {
    let pair = region_pair_image(reference, candidate, bbox, padding)?;
    prepare_rgb(&pair)
}

fn region_pair_image(
    reference: &RgbImage,
    candidate: &RgbImage,
    bbox: &BoundingBox,
    padding: u32,
) -> Result<RgbImage, AnalyzerError> {
    let width = reference.width().min(candidate.width());
    let height = reference.height().min(candidate.height());
    let region = bbox.padded(padding, width, height);
    if region.area() == 0 {
        return Err(AnalyzerError::EmptyRegion(*bbox));
    }

    let left = crop_rgb(reference, &region);
    let right = crop_rgb(candidate, &region);
    let mut pair = RgbImage::from_pixel(
        left.width() + PAIR_GAP + right.width(),
        left.height().max(right.height()),
        Rgb([255, 255, 255]),
    );
    imageops::replace(&mut pair, &left, 0, 0);
    imageops::replace(&mut pair, &right, (left.width() + PAIR_GAP) as i64, 0);
    debug!(
        "Region pair for {:?}: {}x{}",
        region,
        pair.width(),
        pair.height()
    );
    Ok(pair)
}

/// Resize image if either dimension exceeds max, maintaining aspect ratio.
fn resize_if_needed(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    let scale = max_dimension as f32 / width.max(height) as f32;
    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;

    img.resize(new_width, new_height, imageops::FilterType::Lanczos3)
}

/// Scale up so the shortest side reaches `min_dimension`.
fn upscale_if_needed(img: DynamicImage, min_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let shortest = width.min(height);
    if shortest >= min_dimension {
        return img;
    }

    let scale = min_dimension as f32 / shortest as f32;
    let new_width = (width as f32 * scale).ceil() as u32;
    let new_height = (height as f32 * scale).ceil() as u32;
    img.resize_exact(new_width, new_height, imageops::FilterType::CatmullRom)
}

fn encode_base64(img: &DynamicImage) -> Result<String, AnalyzerError> {
    let jpeg_bytes = encode_to_jpeg(img)?;
    debug!("Encoded to JPEG: {} bytes", jpeg_bytes.len());
    Ok(STANDARD.encode(&jpeg_bytes))
}

/// Encode DynamicImage to JPEG bytes.
fn encode_to_jpeg(img: &DynamicImage) -> Result<Vec<u8>, AnalyzerError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| AnalyzerError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Get the media type for vision API payloads.
pub fn image_media_type() -> &'static str {
    "image/jpeg"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn decode(b64: &str) -> DynamicImage {
        let bytes = STANDARD.decode(b64).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn test_prepare_image_rejects_too_small() {
        let result = prepare_image(&png_bytes(50, 50));
        assert!(matches!(result, Err(AnalyzerError::TooSmall { .. })));
        assert!(result.unwrap_err().to_string().contains("too small"));
    }

    #[test]
    fn test_prepare_image_rejects_invalid() {
        let err = prepare_image(b"not an image").unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
    }

    #[test]
    fn test_prepare_image_valid_image() {
        let b64 = prepare_image(&png_bytes(300, 300)).unwrap();
        assert_eq!(decode(&b64).width(), 300);
    }

    #[test]
    fn test_resize_if_needed() {
        let img = resize_if_needed(DynamicImage::new_rgb8(500, 300), 1024);
        assert_eq!((img.width(), img.height()), (500, 300));

        let img = resize_if_needed(DynamicImage::new_rgb8(2000, 1000), 1024);
        assert_eq!((img.width(), img.height()), (1024, 512));

        let img = resize_if_needed(DynamicImage::new_rgb8(1000, 2000), 1024);
        assert_eq!((img.width(), img.height()), (512, 1024));
    }

    #[test]
    fn test_small_rgb_is_upscaled() {
        let b64 = prepare_rgb(&RgbImage::new(40, 20)).unwrap();
        let img = decode(&b64);
        assert_eq!(img.height(), 200);
        assert_eq!(img.width(), 400);
    }

    #[test]
    fn test_region_pair_layout() {
        let reference = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let candidate = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        let pair =
            region_pair_image(&reference, &candidate, &BoundingBox::new(40, 40, 10, 10), 5).unwrap();

        assert_eq!(pair.dimensions(), (20 + PAIR_GAP + 20, 20));
        assert_eq!(pair.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(pair.get_pixel(20, 0), &Rgb([255, 255, 255]));
        assert_eq!(pair.get_pixel(20 + PAIR_GAP, 0), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_region_pair_outside_image_is_rejected() {
        let img = RgbImage::new(50, 50);
        let err = prepare_region_pair(&img, &img, &BoundingBox::new(80, 80, 10, 10), 0).unwrap_err();
        assert!(matches!(err, AnalyzerError::EmptyRegion(_)));
    }

    #[test]
    fn test_image_media_type() {
        assert_eq!(image_media_type(), "image/jpeg");
    }
}
