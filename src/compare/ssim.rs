//! Structural similarity over a sliding 7x7 window.
//!
//! Window statistics come from summed-area tables, so the map costs a fixed
//! number of lookups per pixel regardless of window size. Windows are clipped
//! at the image border, and variances use the sample (n - 1) normalisation.

use image::GrayImage;

use crate::imaging::BoundingBox;

const WINDOW: u32 = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Per-pixel SSIM values for two equally sized images.
#[derive(Debug, Clone)]
pub struct SsimMap {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl SsimMap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.values[(y * self.width + x) as usize]
    }

    /// Mean SSIM over the whole map. An empty map scores 0.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Mean SSIM over pixels where `mask` is non-zero, `None` if there are none.
    pub fn mean_masked(&self, mask: &GrayImage) -> Option<f64> {
        let mut total = 0.0;
        let mut n = 0usize;
        for (x, y, p) in mask.enumerate_pixels() {
            if p[0] != 0 && x < self.width && y < self.height {
                total += self.get(x, y);
                n += 1;
            }
        }
        (n > 0).then(|| total / n as f64)
    }

    /// Mean SSIM inside `bbox` (clipped to the map).
    pub fn mean_in(&self, bbox: &BoundingBox) -> f64 {
        let b = bbox.clipped(self.width, self.height);
        if b.area() == 0 {
            return 0.0;
        }
        let mut total = 0.0;
        for y in b.y..b.y + b.height {
            for x in b.x..b.x + b.width {
                total += self.get(x, y);
            }
        }
        total / b.area() as f64
    }
}

/// Summed-area table with a zero row and column in front.
struct Integral {
    stride: usize,
    data: Vec<f64>,
}

impl Integral {
    fn build(width: u32, height: u32, value: impl Fn(u32, u32) -> f64) -> Self {
        let stride = width as usize + 1;
        let mut data = vec![0.0; stride * (height as usize + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(x, y);
                let i = (y as usize + 1) * stride + x as usize + 1;
                data[i] = data[i - stride] + row;
            }
        }
        Self { stride, data }
    }

    /// Sum over `[x0, x1) x [y0, y1)`.
    fn sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let at = |x: u32, y: u32| self.data[y as usize * self.stride + x as usize];
        at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0)
    }
}

/// Compute the SSIM map of `a` against `b`.
///
/// # Panics
///
/// Panics if the images differ in size.
pub fn ssim_map(a: &GrayImage, b: &GrayImage) -> SsimMap {
    assert_eq!(
        a.dimensions(),
        b.dimensions(),
        "SSIM inputs must have the same dimensions"
    );
    let (width, height) = a.dimensions();

    let pa = |x: u32, y: u32| a.get_pixel(x, y)[0] as f64;
    let pb = |x: u32, y: u32| b.get_pixel(x, y)[0] as f64;
    let sum_a = Integral::build(width, height, pa);
    let sum_b = Integral::build(width, height, pb);
    let sum_aa = Integral::build(width, height, |x, y| pa(x, y) * pa(x, y));
    let sum_bb = Integral::build(width, height, |x, y| pb(x, y) * pb(x, y));
    let sum_ab = Integral::build(width, height, |x, y| pa(x, y) * pb(x, y));

    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);
    let half = WINDOW / 2;

    let mut values = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(height);
        for x in 0..width {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(width);
            let n = ((x1 - x0) * (y1 - y0)) as f64;

            let mu_a = sum_a.sum(x0, y0, x1, y1) / n;
            let mu_b = sum_b.sum(x0, y0, x1, y1) / n;
            let norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
            let var_a = (sum_aa.sum(x0, y0, x1, y1) / n - mu_a * mu_a) * norm;
            let var_b = (sum_bb.sum(x0, y0, x1, y1) / n - mu_b * mu_b) * norm;
            let cov = (sum_ab.sum(x0, y0, x1, y1) / n - mu_a * mu_b) * norm;

            let num = (2.0 * mu_a * mu_b + c1) * (2.0 * cov + c2);
            let den = (mu_a * mu_a + mu_b * mu_b + c1) * (var_a + var_b + c2);
            values.push(num / den);
        }
    }

    SsimMap {
        width,
        height,
        values,
    }
}

/// Mean SSIM of two equally sized images.
pub fn ssim_score(a: &GrayImage, b: &GrayImage) -> f64 {
    ssim_map(a, b).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::textured_gray;
    use image::Luma;

    #[test]
    fn test_identical_images_score_one() {
        let img = textured_gray(64, 48, 3);
        let map = ssim_map(&img, &img);
        assert_eq!(map.width(), 64);
        assert!((map.mean() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_images_with_different_levels() {
        let a = GrayImage::from_pixel(20, 20, Luma([100]));
        let b = GrayImage::from_pixel(20, 20, Luma([200]));
        let c1 = (K1 * DATA_RANGE).powi(2);
        let expected = (2.0 * 100.0 * 200.0 + c1) / (100.0f64.powi(2) + 200.0f64.powi(2) + c1);
        assert!((ssim_score(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_texture_is_anticorrelated() {
        let a = textured_gray(64, 64, 9);
        let mut b = a.clone();
        image::imageops::invert(&mut b);
        assert!(ssim_score(&a, &b) < 0.0);
    }

    #[test]
    fn test_local_change_only_affects_its_neighbourhood() {
        let a = textured_gray(80, 80, 4);
        let mut b = a.clone();
        for y in 40..50 {
            for x in 40..50 {
                b.put_pixel(x, y, Luma([255 - a.get_pixel(x, y)[0]]));
            }
        }
        let map = ssim_map(&a, &b);
        assert!((map.get(5, 5) - 1.0).abs() < 1e-9);
        assert!(map.get(45, 45) < 0.5);
        assert!(map.mean_in(&BoundingBox::new(40, 40, 10, 10)) < map.mean());
    }

    #[test]
    fn test_mean_masked_ignores_excluded_pixels() {
        let a = textured_gray(32, 32, 1);
        let mut b = a.clone();
        for y in 0..32 {
            for x in 24..32 {
                b.put_pixel(x, y, Luma([0]));
            }
        }
        let mut mask = GrayImage::from_pixel(32, 32, Luma([255]));
        for y in 0..32 {
            for x in 16..32 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        let map = ssim_map(&a, &b);
        let masked = map.mean_masked(&mask).unwrap();
        assert!((masked - 1.0).abs() < 1e-9);
        assert!(map.mean() < masked);
        assert!(map.mean_masked(&GrayImage::new(32, 32)).is_none());
    }
}
