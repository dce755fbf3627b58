//! Geometric alignment of a candidate capture onto the reference sample.
//!
//! Features are extracted from both images, matched, and a homography from
//! candidate to reference is estimated with RANSAC. The candidate is then
//! warped into the reference frame so regions can be compared pixel for pixel.

pub mod features;
pub mod homography;
pub mod matcher;

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AlignmentConfig;
use crate::imaging::to_gray;

pub use features::{extract_features, Descriptor, FeatureSet, Keypoint};
pub use homography::{fit_ransac, RansacParams};
pub use matcher::{match_descriptors, Match};

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("No features detected in {0} image")]
    NoFeatures(&'static str),

    #[error("Insufficient matches for alignment: found {found}, need {needed}")]
    InsufficientMatches { found: usize, needed: usize },

    #[error("Homography computation failed: {0}")]
    HomographyFailed(String),
}

/// Summary of a successful alignment, kept in inspection reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentInfo {
    pub matches_count: usize,
    pub inlier_count: usize,
    /// Candidate -> reference transform, row-major.
    pub homography: [[f64; 3]; 3],
    pub rotation_degrees: f64,
    pub success: bool,
}

/// Candidate image in the reference frame plus how it got there.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub image: RgbImage,
    /// 255 where the warped image has candidate data, 0 where it was filled.
    pub valid_mask: GrayImage,
    pub info: AlignmentInfo,
}

/// Align `candidate` to `reference`.
pub fn align_images(
    reference: &RgbImage,
    candidate: &RgbImage,
    config: &AlignmentConfig,
) -> Result<Alignment, AlignError> {
    let ref_features = extract_features(&to_gray(reference), config);
    let cand_features = extract_features(&to_gray(candidate), config);
    info!(
        "Features: reference={}, candidate={}",
        ref_features.len(),
        cand_features.len()
    );

    if ref_features.is_empty() {
        warn!("No features detected in reference image");
        return Err(AlignError::NoFeatures("reference"));
    }
    if cand_features.is_empty() {
        warn!("No features detected in candidate image");
        return Err(AlignError::NoFeatures("candidate"));
    }

    let matches = match_descriptors(
        &ref_features.descriptors,
        &cand_features.descriptors,
        config.ratio_test,
    );
    let needed = config.min_matches.max(4);
    if matches.len() < needed {
        warn!("Insufficient good matches for alignment: {}", matches.len());
        return Err(AlignError::InsufficientMatches {
            found: matches.len(),
            needed,
        });
    }

    let cand_pts: Vec<[f64; 2]> = matches
        .iter()
        .map(|m| {
            let k = &cand_features.keypoints[m.train];
            [k.x as f64, k.y as f64]
        })
        .collect();
    let ref_pts: Vec<[f64; 2]> = matches
        .iter()
        .map(|m| {
            let k = &ref_features.keypoints[m.query];
            [k.x as f64, k.y as f64]
        })
        .collect();

    let params = RansacParams {
        max_iterations: config.ransac_iterations,
        threshold: config.ransac_threshold,
        seed: config.seed,
    };
    let fit = fit_ransac(&cand_pts, &ref_pts, &params)
        .ok_or_else(|| AlignError::HomographyFailed("no consistent model".to_string()))?;

    if fit.inlier_count < needed {
        return Err(AlignError::HomographyFailed(format!(
            "only {} inliers",
            fit.inlier_count
        )));
    }
    if !homography::is_plausible(&fit.h) {
        return Err(AlignError::HomographyFailed(
            "degenerate transform (mirrored or extreme scale)".to_string(),
        ));
    }

    let (image, valid_mask) =
        warp_to_reference(candidate, &fit.h, reference.width(), reference.height())?;
    let info = AlignmentInfo {
        matches_count: matches.len(),
        inlier_count: fit.inlier_count,
        homography: to_rows(&fit.h),
        rotation_degrees: homography::rotation_degrees(&fit.h),
        success: true,
    };
    info!(
        "Aligned with {} matches ({} inliers), rotation {:.1} deg",
        info.matches_count, info.inlier_count, info.rotation_degrees
    );

    Ok(Alignment {
        image,
        valid_mask,
        info,
    })
}

/// Fallback when alignment fails: bring the candidate to the reference size.
pub fn resize_to_reference(candidate: &RgbImage, reference: &RgbImage) -> RgbImage {
    if candidate.dimensions() == reference.dimensions() {
        return candidate.clone();
    }
    imageops::resize(
        candidate,
        reference.width(),
        reference.height(),
        imageops::FilterType::Triangle,
    )
}

fn warp_to_reference(
    candidate: &RgbImage,
    h: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> Result<(RgbImage, GrayImage), AlignError> {
    let rows = to_rows(h);
    let mut m = [0f32; 9];
    for (i, v) in rows.iter().flatten().enumerate() {
        m[i] = *v as f32;
    }
    let projection = Projection::from_matrix(m)
        .ok_or_else(|| AlignError::HomographyFailed("transform is not invertible".to_string()))?;

    let mut out = RgbImage::new(width, height);
    warp_into(
        candidate,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut out,
    );

    let coverage = GrayImage::from_pixel(candidate.width(), candidate.height(), Luma([255]));
    let mut valid = GrayImage::new(width, height);
    warp_into(
        &coverage,
        &projection,
        Interpolation::Nearest,
        Luma([0]),
        &mut valid,
    );
    Ok((out, valid))
}

fn to_rows(h: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [h[(0, 0)], h[(0, 1)], h[(0, 2)]],
        [h[(1, 0)], h[(1, 1)], h[(1, 2)]],
        [h[(2, 0)], h[(2, 1)], h[(2, 2)]],
    ]
}
