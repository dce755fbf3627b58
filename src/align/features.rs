//! Oriented keypoints and steered binary descriptors.
//!
//! Corners come from FAST-9. Each corner gets an orientation from the
//! intensity centroid of its neighbourhood, and the 256 BRIEF sample pairs
//! are rotated by that angle before comparison, so the same physical
//! feature yields the same bits regardless of how the board is turned.

use std::sync::OnceLock;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AlignmentConfig;

/// Radius of the patch used for the orientation estimate.
const ORIENTATION_RADIUS: i32 = 15;
/// BRIEF sample points lie inside this radius.
const PATTERN_RADIUS: f32 = 12.0;
/// Keypoints closer than this to the border are dropped.
const BORDER: u32 = ORIENTATION_RADIUS as u32 + 1;
/// Side of the grid cell used for non-maximum suppression.
const NMS_CELL: u32 = 4;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x5eed_b0a2d;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    /// Orientation in radians.
    pub angle: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detect, orient and describe features in a grayscale image.
pub fn extract_features(gray: &GrayImage, config: &AlignmentConfig) -> FeatureSet {
    let (width, height) = gray.dimensions();
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return FeatureSet::default();
    }

    let corners = corners_fast9(gray, config.fast_threshold);
    let mut candidates: Vec<(u32, u32, f32)> = corners
        .into_iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER)
        .filter(|c| c.x < width - BORDER && c.y < height - BORDER)
        .map(|c| (c.x, c.y, c.score))
        .collect();

    candidates = suppress_non_maximum(candidates, width, height);
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));
    candidates.truncate(config.max_features);

    let smoothed = gaussian_blur_f32(gray, 2.0);
    let pattern = brief_pattern();

    let mut features = FeatureSet::default();
    for (x, y, score) in candidates {
        let angle = intensity_centroid_angle(&smoothed, x, y);
        let descriptor = steered_descriptor(&smoothed, x, y, angle, pattern);
        features.keypoints.push(Keypoint {
            x: x as f32,
            y: y as f32,
            score,
            angle,
        });
        features.descriptors.push(descriptor);
    }
    features
}

/// Keep the strongest corner per grid cell.
fn suppress_non_maximum(
    corners: Vec<(u32, u32, f32)>,
    width: u32,
    height: u32,
) -> Vec<(u32, u32, f32)> {
    let cols = width.div_ceil(NMS_CELL) as usize;
    let rows = height.div_ceil(NMS_CELL) as usize;
    let mut best: Vec<Option<(u32, u32, f32)>> = vec![None; cols * rows];

    for c in corners {
        let idx = (c.1 / NMS_CELL) as usize * cols + (c.0 / NMS_CELL) as usize;
        match best[idx] {
            Some(existing) if existing.2 >= c.2 => {}
            _ => best[idx] = Some(c),
        }
    }
    best.into_iter().flatten().collect()
}

fn intensity_centroid_angle(image: &GrayImage, cx: u32, cy: u32) -> f32 {
    let mut m10 = 0.0f64;
    let mut m01 = 0.0f64;
    let r = ORIENTATION_RADIUS;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let px = (cx as i32 + dx) as u32;
            let py = (cy as i32 + dy) as u32;
            let v = image.get_pixel(px, py)[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10) as f32
}

fn steered_descriptor(
    image: &GrayImage,
    cx: u32,
    cy: u32,
    angle: f32,
    pattern: &[[f32; 4]],
) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |dx: f32, dy: f32| -> u8 {
        let rx = (cos * dx - sin * dy).round() as i32;
        let ry = (sin * dx + cos * dy).round() as i32;
        image.get_pixel((cx as i32 + rx) as u32, (cy as i32 + ry) as u32)[0]
    };

    let mut bits = [0u64; 4];
    for (i, pair) in pattern.iter().enumerate() {
        if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
            bits[i / 64] |= 1u64 << (i % 64);
        }
    }
    Descriptor(bits)
}

/// Fixed set of sample pairs inside the pattern disk, shared by all images.
fn brief_pattern() -> &'static [[f32; 4]] {
    static PATTERN: OnceLock<Vec<[f32; 4]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = move || loop {
            let x: f32 = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let y: f32 = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (x, y);
            }
        };
        (0..DESCRIPTOR_BITS)
            .map(|_| {
                let (x1, y1) = point();
                let (x2, y2) = point();
                [x1, y1, x2, y2]
            })
            .collect()
    })
}
