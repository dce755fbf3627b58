//! Homography estimation: normalized DLT inside a RANSAC loop.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Desired probability that at least one RANSAC sample is all-inlier.
const RANSAC_CONFIDENCE: f64 = 0.999;
/// Adaptive termination never stops before this many samples.
const MIN_ITERATIONS: usize = 32;

#[derive(Debug, Clone)]
pub struct RansacParams {
    pub max_iterations: usize,
    /// Reprojection threshold in pixels.
    pub threshold: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub h: Matrix3<f64>,
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
}

/// Map a point through `h`. Returns `None` at infinity.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        None
    } else {
        Some([p[0] / p[2], p[1] / p[2]])
    }
}

fn reprojection_error(h: &Matrix3<f64>, src: [f64; 2], dst: [f64; 2]) -> f64 {
    match project(h, src[0], src[1]) {
        Some(p) => ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt(),
        None => f64::INFINITY,
    }
}

/// Translate to the centroid and scale to mean distance sqrt(2).
fn normalizing_transform(points: &[[f64; 2]]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Direct linear transform from at least four correspondences, `dst ~ H * src`.
pub fn estimate_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let s = project(&t_src, src[i][0], src[i][1])?;
        let d = project(&t_dst, dst[i][0], dst[i][1])?;
        let (sx, sy, dx, dy) = (s[0], s[1], d[0], d[1]);

        let r = 2 * i;
        a[(r, 3)] = -sx;
        a[(r, 4)] = -sy;
        a[(r, 5)] = -1.0;
        a[(r, 6)] = dy * sx;
        a[(r, 7)] = dy * sy;
        a[(r, 8)] = dy;

        a[(r + 1, 0)] = sx;
        a[(r + 1, 1)] = sy;
        a[(r + 1, 2)] = 1.0;
        a[(r + 1, 6)] = -dx * sx;
        a[(r + 1, 7)] = -dx * sy;
        a[(r + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of A^T A with the smallest eigenvalue.
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))?;
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let h = t_dst.try_inverse()? * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|x| x.is_finite()) {
        return None;
    }
    Some(h / scale)
}

/// Robust fit: random minimal samples, keep the model with most inliers,
/// then refit on all inliers.
pub fn fit_ransac(src: &[[f64; 2]], dst: &[[f64; 2]], params: &RansacParams) -> Option<HomographyFit> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, usize)> = None;
    let mut max_iterations = params.max_iterations;
    let mut iteration = 0;

    while iteration < max_iterations {
        iteration += 1;
        let idx = sample_distinct(&mut rng, n);
        let s: Vec<[f64; 2]> = idx.iter().map(|&i| src[i]).collect();
        let d: Vec<[f64; 2]> = idx.iter().map(|&i| dst[i]).collect();
        let Some(h) = estimate_dlt(&s, &d) else {
            continue;
        };

        let count = (0..n)
            .filter(|&i| reprojection_error(&h, src[i], dst[i]) < params.threshold)
            .count();
        if best.as_ref().map_or(true, |b| count > b.1) {
            best = Some((h, count));

            let w = count as f64 / n as f64;
            let p_fail = 1.0 - w.powi(4);
            if p_fail <= f64::EPSILON && iteration >= MIN_ITERATIONS {
                break;
            }
            let needed = ((1.0 - RANSAC_CONFIDENCE).ln() / p_fail.ln()).ceil();
            if needed.is_finite() {
                let needed = (needed as usize).max(MIN_ITERATIONS);
                max_iterations = max_iterations.min(needed);
            }
        }
    }

    let (h, count) = best?;
    if count < 4 {
        return None;
    }

    let mask: Vec<bool> = (0..n)
        .map(|i| reprojection_error(&h, src[i], dst[i]) < params.threshold)
        .collect();
    let in_src: Vec<[f64; 2]> = (0..n).filter(|&i| mask[i]).map(|i| src[i]).collect();
    let in_dst: Vec<[f64; 2]> = (0..n).filter(|&i| mask[i]).map(|i| dst[i]).collect();
    let refined = estimate_dlt(&in_src, &in_dst).unwrap_or(h);

    let inliers: Vec<bool> = (0..n)
        .map(|i| reprojection_error(&refined, src[i], dst[i]) < params.threshold)
        .collect();
    let inlier_count = inliers.iter().filter(|&&b| b).count();
    debug!(
        "RANSAC: {} iterations, {}/{} inliers",
        iteration, inlier_count, n
    );

    // Refit can drift on degenerate inlier sets; keep whichever explains more.
    let (h, inliers, inlier_count) = if inlier_count >= count {
        (refined, inliers, inlier_count)
    } else {
        (h, mask, count)
    };

    Some(HomographyFit {
        h,
        inliers,
        inlier_count,
    })
}

fn sample_distinct(rng: &mut StdRng, n: usize) -> [usize; 4] {
    let mut out = [0usize; 4];
    let mut filled = 0;
    while filled < 4 {
        let candidate = rng.random_range(0..n);
        if !out[..filled].contains(&candidate) {
            out[filled] = candidate;
            filled += 1;
        }
    }
    out
}

/// In-plane rotation implied by `h`, in degrees.
pub fn rotation_degrees(h: &Matrix3<f64>) -> f64 {
    h[(1, 0)].atan2(h[(0, 0)]).to_degrees()
}

/// Reject mirrored or wildly scaled transforms.
pub fn is_plausible(h: &Matrix3<f64>) -> bool {
    let det = h[(0, 0)] * h[(1, 1)] - h[(0, 1)] * h[(1, 0)];
    det > 0.04 && det < 25.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_h() -> Matrix3<f64> {
        let (s, c) = 0.3f64.sin_cos();
        Matrix3::new(1.1 * c, -1.1 * s, 20.0, 1.1 * s, 1.1 * c, -5.0, 1e-4, -2e-4, 1.0)
    }

    fn grid_points() -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        for y in 0..6 {
            for x in 0..6 {
                pts.push([x as f64 * 37.0 + 3.0, y as f64 * 29.0 + 11.0]);
            }
        }
        pts
    }

    fn assert_close(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}\n{}\n{}", x, y, a, b);
        }
    }

    #[test]
    fn test_dlt_recovers_exact_homography() {
        let h = known_h();
        let src = grid_points();
        let dst: Vec<[f64; 2]> = src.iter().map(|p| project(&h, p[0], p[1]).unwrap()).collect();

        let corners = [0usize, 5, 30, 35];
        let s4: Vec<[f64; 2]> = corners.iter().map(|&i| src[i]).collect();
        let d4: Vec<[f64; 2]> = corners.iter().map(|&i| dst[i]).collect();
        let est = estimate_dlt(&s4, &d4).unwrap();
        for p in &src {
            let a = project(&h, p[0], p[1]).unwrap();
            let b = project(&est, p[0], p[1]).unwrap();
            assert!((a[0] - b[0]).abs() < 1e-6 && (a[1] - b[1]).abs() < 1e-6);
        }

        let est_all = estimate_dlt(&src, &dst).unwrap();
        assert_close(&est_all, &h, 1e-6);
    }

    #[test]
    fn test_dlt_needs_four_points() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert!(estimate_dlt(&pts, &pts).is_none());
    }

    #[test]
    fn test_ransac_ignores_outliers() {
        let h = known_h();
        let src = grid_points();
        let mut dst: Vec<[f64; 2]> = src.iter().map(|p| project(&h, p[0], p[1]).unwrap()).collect();
        // Corrupt every fifth correspondence.
        for (i, d) in dst.iter_mut().enumerate() {
            if i % 5 == 0 {
                d[0] += 80.0 + i as f64;
                d[1] -= 45.0;
            }
        }

        let params = RansacParams {
            max_iterations: 2000,
            threshold: 2.0,
            seed: 1,
        };
        let fit = fit_ransac(&src, &dst, &params).unwrap();
        assert_eq!(fit.inlier_count, src.len() - src.len().div_ceil(5));
        for (i, inlier) in fit.inliers.iter().enumerate() {
            assert_eq!(*inlier, i % 5 != 0, "index {}", i);
        }
        assert_close(&fit.h, &h, 1e-4);
    }

    #[test]
    fn test_rotation_and_plausibility() {
        let quarter = Matrix3::new(0.0, 1.0, 0.0, -1.0, 0.0, 99.0, 0.0, 0.0, 1.0);
        assert!((rotation_degrees(&quarter) + 90.0).abs() < 1e-9);
        assert!(is_plausible(&quarter));

        let mirrored = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(!is_plausible(&mirrored));
    }
}
