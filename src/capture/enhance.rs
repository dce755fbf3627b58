//! Contrast enhancement applied to fresh captures before storage.

use image::RgbImage;
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;

use crate::imaging::{gray_to_rgb, to_gray};

/// Sigma roughly matching a 3x3 Gaussian kernel.
const DENOISE_SIGMA: f32 = 0.8;

/// Grayscale, equalize the histogram, then lightly blur to suppress sensor noise.
///
/// The result is returned as RGB so it can be stored alongside colour captures.
pub fn enhance_image(frame: &RgbImage) -> RgbImage {
    let gray = to_gray(frame);
    let equalized = equalize_histogram(&gray);
    let smoothed = gaussian_blur_f32(&equalized, DENOISE_SIGMA);
    gray_to_rgb(&smoothed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_enhance_preserves_dimensions() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([120, 60, 30]));
        let out = enhance_image(&frame);
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn test_enhance_stretches_low_contrast() {
        // Two close gray levels should be pushed apart by equalization.
        let frame = RgbImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                Rgb([100, 100, 100])
            } else {
                Rgb([110, 110, 110])
            }
        });
        let out = enhance_image(&frame);
        let dark = out.get_pixel(4, 32)[0] as i32;
        let bright = out.get_pixel(60, 32)[0] as i32;
        assert!(bright - dark > 50, "dark={} bright={}", dark, bright);
    }

    #[test]
    fn test_enhance_output_is_gray() {
        let frame = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 50]));
        let out = enhance_image(&frame);
        for p in out.pixels() {
            assert_eq!(p[0], p[1]);
            assert_eq!(p[1], p[2]);
        }
    }
}
