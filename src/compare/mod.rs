//! Region comparison of an aligned candidate against the reference sample.

pub mod components;
pub mod ssim;

use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::Connectivity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::resize_to_reference;
use crate::config::ComparisonConfig;
use crate::imaging::{crop_gray, mask_components, to_gray, BoundingBox};

pub use components::{classify_aspect, detect_components, ComponentKind, DetectedComponent};
pub use ssim::{ssim_map, ssim_score, SsimMap};

/// Where a region of interest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSource {
    /// A connected blob of the SSIM difference mask.
    Difference,
    /// A cell of the configured fixed grid.
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub id: usize,
    pub bbox: BoundingBox,
    /// Pixel area of the difference blob, or the cell area for grid regions.
    pub area: u64,
    pub center: (u32, u32),
    /// SSIM of the reference and candidate crops.
    pub similarity: f64,
    pub source: RegionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub similarity_score: f64,
    pub difference_percentage: f64,
    pub regions_of_interest: Vec<RegionOfInterest>,
    pub total_regions: usize,
    pub threshold: f64,
    pub passed: bool,
}

impl ComparisonResult {
    /// Regions scoring below `threshold`, worst first.
    pub fn defective_regions(&self, threshold: f64) -> Vec<&RegionOfInterest> {
        let mut regions: Vec<&RegionOfInterest> = self
            .regions_of_interest
            .iter()
            .filter(|r| r.similarity < threshold)
            .collect();
        regions.sort_by(|a, b| a.similarity.total_cmp(&b.similarity));
        regions
    }
}

/// Compare `candidate` against `reference`.
///
/// `valid_mask`, when given, marks the candidate pixels that carry real data
/// (see [`crate::align::Alignment::valid_mask`]); everything else is left out
/// of the score and the difference mask.
pub fn compare_images(
    reference: &RgbImage,
    candidate: &RgbImage,
    valid_mask: Option<&GrayImage>,
    config: &ComparisonConfig,
) -> ComparisonResult {
    let candidate = if candidate.dimensions() != reference.dimensions() {
        debug!(
            "Resizing candidate {:?} to reference {:?}",
            candidate.dimensions(),
            reference.dimensions()
        );
        resize_to_reference(candidate, reference)
    } else {
        candidate.clone()
    };
    let valid_mask = valid_mask.filter(|m| {
        let fits = m.dimensions() == reference.dimensions();
        if !fits {
            warn!("Ignoring valid mask with mismatched size {:?}", m.dimensions());
        }
        fits
    });

    let ref_gray = to_gray(reference);
    let cand_gray = to_gray(&candidate);
    let map = ssim_map(&ref_gray, &cand_gray);

    let similarity_score = match valid_mask {
        Some(mask) => map.mean_masked(mask).unwrap_or(0.0),
        None => map.mean(),
    };

    let (diff_mask, diff_pixels, valid_pixels) = difference_mask(&map, valid_mask, config.threshold);
    let difference_percentage = if valid_pixels == 0 {
        0.0
    } else {
        diff_pixels as f64 / valid_pixels as f64 * 100.0
    };

    let mut blobs: Vec<_> = mask_components(&diff_mask, Connectivity::Eight)
        .into_iter()
        .filter(|c| c.pixel_count > config.min_region_area as u64)
        .collect();
    blobs.sort_by(|a, b| b.pixel_count.cmp(&a.pixel_count));

    let regions: Vec<RegionOfInterest> = blobs
        .iter()
        .map(|c| (c.bbox, c.pixel_count, RegionSource::Difference))
        .chain(
            grid_regions(reference.width(), reference.height(), config.grid_rows, config.grid_cols)
                .into_iter()
                .map(|b| (b, b.area(), RegionSource::Grid)),
        )
        .enumerate()
        .map(|(id, (bbox, area, source))| RegionOfInterest {
            id,
            bbox,
            area,
            center: bbox.center(),
            similarity: region_similarity(&ref_gray, &cand_gray, &bbox),
            source,
        })
        .collect();

    let passed = similarity_score >= config.threshold;
    info!(
        "Comparison: similarity {:.4}, {} regions, {:.2}% different, {}",
        similarity_score,
        regions.len(),
        difference_percentage,
        if passed { "passed" } else { "failed" }
    );

    ComparisonResult {
        similarity_score,
        difference_percentage,
        total_regions: regions.len(),
        regions_of_interest: regions,
        threshold: config.threshold,
        passed,
    }
}

/// Split a `width` x `height` image into a `rows` x `cols` grid. Either
/// dimension being zero disables the grid.
pub fn grid_regions(width: u32, height: u32, rows: u32, cols: u32) -> Vec<BoundingBox> {
    if rows == 0 || cols == 0 || width < cols || height < rows {
        return Vec::new();
    }
    let mut cells = Vec::with_capacity((rows * cols) as usize);
    for r in 0..rows {
        let y0 = r * height / rows;
        let y1 = (r + 1) * height / rows;
        for c in 0..cols {
            let x0 = c * width / cols;
            let x1 = (c + 1) * width / cols;
            cells.push(BoundingBox::new(x0, y0, x1 - x0, y1 - y0));
        }
    }
    cells
}

/// SSIM of the two crops at `bbox`.
pub fn region_similarity(reference: &GrayImage, candidate: &GrayImage, bbox: &BoundingBox) -> f64 {
    let a = crop_gray(reference, bbox);
    let b = crop_gray(candidate, bbox);
    if a.width() == 0 || a.height() == 0 || a.dimensions() != b.dimensions() {
        return 0.0;
    }
    ssim_score(&a, &b)
}

/// Pixels whose local SSIM falls below `threshold`, restricted to `valid`.
/// Returns the mask, the number of flagged pixels and the number of pixels
/// considered.
fn difference_mask(
    map: &SsimMap,
    valid: Option<&GrayImage>,
    threshold: f64,
) -> (GrayImage, u64, u64) {
    let mut mask = GrayImage::new(map.width(), map.height());
    let mut flagged = 0u64;
    let mut considered = 0u64;
    for y in 0..map.height() {
        for x in 0..map.width() {
            if valid.is_some_and(|v| v.get_pixel(x, y)[0] == 0) {
                continue;
            }
            considered += 1;
            if map.get(x, y) < threshold {
                mask.put_pixel(x, y, Luma([255]));
                flagged += 1;
            }
        }
    }
    (mask, flagged, considered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fill_rect, synthetic_board};
    use image::Rgb;

    #[test]
    fn test_identical_boards_pass_without_regions() {
        let board = synthetic_board(200, 150, 1);
        let result = compare_images(&board, &board, None, &ComparisonConfig::default());

        assert!((result.similarity_score - 1.0).abs() < 1e-9);
        assert!(result.passed);
        assert_eq!(result.total_regions, 0);
        assert_eq!(result.difference_percentage, 0.0);
    }

    #[test]
    fn test_changed_patch_becomes_region() {
        let board = synthetic_board(200, 150, 2);
        let mut candidate = board.clone();
        fill_rect(&mut candidate, 80, 60, 24, 24, Rgb([0, 0, 0]));

        let result = compare_images(&board, &candidate, None, &ComparisonConfig::default());
        assert!(result.similarity_score < 1.0);
        assert!(result.difference_percentage > 0.0);

        let hit = result
            .regions_of_interest
            .iter()
            .find(|r| {
                r.bbox.x <= 92
                    && r.bbox.y <= 72
                    && r.bbox.x + r.bbox.width > 92
                    && r.bbox.y + r.bbox.height > 72
            })
            .expect("patch should be reported");
        assert_eq!(hit.source, RegionSource::Difference);
        assert!(hit.similarity < 0.9, "similarity={}", hit.similarity);

        let defective = result.defective_regions(0.9);
        assert!(!defective.is_empty());
        assert!(defective
            .windows(2)
            .all(|w| w[0].similarity <= w[1].similarity));
    }

    #[test]
    fn test_unrelated_board_fails() {
        let a = synthetic_board(160, 120, 3);
        let b = synthetic_board(160, 120, 4);
        let result = compare_images(&a, &b, None, &ComparisonConfig::default());
        assert!(!result.passed);
        assert!(result.total_regions > 0);
    }

    #[test]
    fn test_invalid_pixels_are_ignored() {
        let board = synthetic_board(160, 120, 5);
        let mut candidate = board.clone();
        fill_rect(&mut candidate, 130, 0, 30, 120, Rgb([0, 0, 0]));
        let mut valid = GrayImage::from_pixel(160, 120, Luma([255]));
        for y in 0..120 {
            for x in 126..160 {
                valid.put_pixel(x, y, Luma([0]));
            }
        }

        let result = compare_images(&board, &candidate, Some(&valid), &ComparisonConfig::default());
        assert_eq!(result.total_regions, 0);
        assert!(result.passed);
    }

    #[test]
    fn test_grid_regions_tile_the_image() {
        let cells = grid_regions(100, 50, 2, 3);
        assert_eq!(cells.len(), 6);
        let covered: u64 = cells.iter().map(|c| c.area()).sum();
        assert_eq!(covered, 5000);
        assert_eq!(cells[5].x + cells[5].width, 100);
        assert_eq!(cells[5].y + cells[5].height, 50);
        assert!(grid_regions(100, 50, 0, 3).is_empty());
    }

    #[test]
    fn test_grid_cells_are_scored() {
        let board = synthetic_board(120, 120, 6);
        let mut candidate = board.clone();
        fill_rect(&mut candidate, 0, 0, 60, 60, Rgb([0, 0, 0]));
        let config = ComparisonConfig {
            grid_rows: 2,
            grid_cols: 2,
            ..ComparisonConfig::default()
        };

        let result = compare_images(&board, &candidate, None, &config);
        let grid: Vec<_> = result
            .regions_of_interest
            .iter()
            .filter(|r| r.source == RegionSource::Grid)
            .collect();
        assert_eq!(grid.len(), 4);
        assert!(grid[0].similarity < 0.5);
        assert!((grid[3].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_sizes_are_resized() {
        let reference = synthetic_board(100, 80, 7);
        let candidate = image::imageops::resize(
            &reference,
            50,
            40,
            image::imageops::FilterType::Triangle,
        );
        let result = compare_images(&reference, &candidate, None, &ComparisonConfig::default());
        assert!(result.similarity_score > 0.0);
        assert!(result.similarity_score < 1.0);
    }
}
