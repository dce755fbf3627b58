//! Locate the board inside a camera frame.
//!
//! Edges are extracted with Canny, thickened so the board outline forms one
//! component, and the largest component is scored by how much of its
//! bounding-box perimeter is backed by edge pixels.

use image::{GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::Connectivity;
use serde::Serialize;
use tracing::debug;

use crate::config::BoardDetectionConfig;
use crate::imaging::{crop_rgb, mask_components, to_gray, BoundingBox};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// Search radius when checking perimeter support.
const SUPPORT_RADIUS: u32 = 3;
/// Frame coverage at which the size score saturates.
const FULL_SIZE_COVERAGE: f64 = 0.1;

/// A board candidate found in a frame.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BoardRegion {
    pub bbox: BoundingBox,
    /// Bounding-box area in pixels.
    pub area: u64,
    /// 0.0-1.0 score combining outline support and size.
    pub confidence: f32,
}

/// Find the board in `frame`, or `None` if nothing passes the configured gates.
pub fn detect_board(frame: &RgbImage, config: &BoardDetectionConfig) -> Option<BoardRegion> {
    let gray = gaussian_blur_f32(&to_gray(frame), 1.0);
    let edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
    let outline = dilate(&edges, Norm::LInf, 2);

    let frame_area = frame.width() as u64 * frame.height() as u64;
    let best = mask_components(&outline, Connectivity::Eight)
        .into_iter()
        .filter(|c| c.bbox.area() >= config.min_board_area as u64)
        // A component spanning the whole frame is background clutter, not a board.
        .filter(|c| (c.bbox.area() as f64) < 0.98 * frame_area as f64)
        .max_by_key(|c| c.bbox.area())?;

    let support = perimeter_support(&outline, &best.bbox);
    let coverage = best.bbox.area() as f64 / frame_area as f64;
    let size_score = (coverage / FULL_SIZE_COVERAGE).min(1.0);
    let confidence = (0.7 * support + 0.3 * size_score) as f32;

    debug!(
        "Board candidate {:?}: support={:.2} coverage={:.2} confidence={:.2}",
        best.bbox, support, coverage, confidence
    );

    if confidence < config.confidence_threshold {
        return None;
    }

    Some(BoardRegion {
        bbox: best.bbox,
        area: best.bbox.area(),
        confidence,
    })
}

/// Crop `frame` to the detected board plus `margin` pixels.
pub fn crop_to_board(frame: &RgbImage, region: &BoardRegion, margin: u32) -> RgbImage {
    let bbox = region.bbox.padded(margin, frame.width(), frame.height());
    crop_rgb(frame, &bbox)
}

/// Fraction of sampled perimeter points that have an edge pixel nearby.
fn perimeter_support(mask: &GrayImage, bbox: &BoundingBox) -> f64 {
    let x0 = bbox.x;
    let y0 = bbox.y;
    let x1 = bbox.x + bbox.width.saturating_sub(1);
    let y1 = bbox.y + bbox.height.saturating_sub(1);

    let mut samples = Vec::new();
    for x in (x0..=x1).step_by(2) {
        samples.push((x, y0));
        samples.push((x, y1));
    }
    for y in (y0..=y1).step_by(2) {
        samples.push((x0, y));
        samples.push((x1, y));
    }
    if samples.is_empty() {
        return 0.0;
    }

    let hits = samples
        .iter()
        .filter(|&&(x, y)| has_edge_near(mask, x, y, SUPPORT_RADIUS))
        .count();
    hits as f64 / samples.len() as f64
}

fn has_edge_near(mask: &GrayImage, x: u32, y: u32, radius: u32) -> bool {
    let xs = x.saturating_sub(radius)..=(x + radius).min(mask.width() - 1);
    for yy in y.saturating_sub(radius)..=(y + radius).min(mask.height() - 1) {
        for xx in xs.clone() {
            if mask.get_pixel(xx, yy)[0] > 0 {
                return true;
            }
        }
    }
    false
}
