//! Small image helpers shared by capture, comparison and the describer.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    /// Grow by `padding` on every side, clipped to `max_width` x `max_height`.
    pub fn padded(&self, padding: u32, max_width: u32, max_height: u32) -> Self {
        let x0 = self.x.saturating_sub(padding);
        let y0 = self.y.saturating_sub(padding);
        let x1 = (self.x + self.width + padding).min(max_width);
        let y1 = (self.y + self.height + padding).min(max_height);
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Clip to an image of the given size.
    pub fn clipped(&self, max_width: u32, max_height: u32) -> Self {
        self.padded(0, max_width, max_height)
    }
}

/// One labelled connected component of a binary mask.
#[derive(Debug, Clone, Copy)]
pub struct Component {
    pub bbox: BoundingBox,
    /// Number of foreground pixels in the component.
    pub pixel_count: u64,
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    image::DynamicImage::ImageLuma8(image.clone()).to_rgb8()
}

/// Copy out `bbox` (clipped to the image).
pub fn crop_rgb(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let b = bbox.clipped(image.width(), image.height());
    imageops::crop_imm(image, b.x, b.y, b.width, b.height).to_image()
}

pub fn crop_gray(image: &GrayImage, bbox: &BoundingBox) -> GrayImage {
    let b = bbox.clipped(image.width(), image.height());
    imageops::crop_imm(image, b.x, b.y, b.width, b.height).to_image()
}

/// Label the non-zero pixels of `mask` and return per-component statistics,
/// ordered by label.
pub fn mask_components(mask: &GrayImage, connectivity: Connectivity) -> Vec<Component> {
    let labels = connected_components(mask, connectivity, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, count)
    let mut stats: Vec<Option<(u32, u32, u32, u32, u64)>> = Vec::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel[0] as usize;
        if label == 0 {
            continue;
        }
        if stats.len() <= label {
            stats.resize(label + 1, None);
        }
        let entry = stats[label].get_or_insert((x, y, x, y, 0));
        entry.0 = entry.0.min(x);
        entry.1 = entry.1.min(y);
        entry.2 = entry.2.max(x);
        entry.3 = entry.3.max(y);
        entry.4 += 1;
    }

    stats
        .into_iter()
        .flatten()
        .map(|(x0, y0, x1, y1, count)| Component {
            bbox: BoundingBox::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
            pixel_count: count,
        })
        .collect()
}
