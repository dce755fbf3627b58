//! Synthetic boards for unit tests.

use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Blocky random texture with plenty of corners.
pub fn textured_gray(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let block = 8;
    let cols = width.div_ceil(block);
    let rows = height.div_ceil(block);
    let levels: Vec<u8> = (0..cols * rows).map(|_| rng.random_range(0..=255)).collect();
    GrayImage::from_fn(width, height, |x, y| {
        Luma([levels[((y / block) * cols + x / block) as usize]])
    })
}

/// A green board with randomly placed "components" of varying brightness.
pub fn synthetic_board(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::from_pixel(width, height, Rgb([20, 110, 40]));
    for _ in 0..(width * height / 600) {
        let w = rng.random_range(4..14);
        let h = rng.random_range(4..14);
        let x = rng.random_range(0..width.saturating_sub(w).max(1));
        let y = rng.random_range(0..height.saturating_sub(h).max(1));
        let v: u8 = rng.random_range(0..=255);
        let color = Rgb([v, v / 2 + 40, 255 - v]);
        fill_rect(&mut img, x, y, w, h, color);
    }
    img
}

pub fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for yy in y..(y + h).min(img.height()) {
        for xx in x..(x + w).min(img.width()) {
            img.put_pixel(xx, yy, color);
        }
    }
}
