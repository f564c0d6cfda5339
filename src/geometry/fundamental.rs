//! Fundamental-matrix estimation and essential-matrix decomposition.
//!
//! The estimator is the normalized 8-point algorithm (Hartley) wrapped in a
//! RANSAC loop scored with the symmetric point-to-epipolar-line distance.
//! The inlier threshold is `3.841 * sigma^2`, the chi-squared 95% bound for
//! one degree of freedom.
//!
//! Conventions: correspondences are pixel coordinates, `x2ᵀ F x1 = 0` with
//! `x1` in the first (reference) image and `x2` in the second.

use nalgebra::{Matrix3, SMatrix, SymmetricEigen, Vector2, Vector3};
use rand::Rng;

/// Number of correspondences in one RANSAC sample.
const MODEL_POINTS: usize = 8;

/// RANSAC confidence used for the adaptive iteration count.
const CONFIDENCE: f64 = 0.99;

/// Outcome of robust fundamental-matrix estimation.
#[derive(Debug, Clone)]
pub struct FundamentalResult {
    /// The estimated fundamental matrix, refit on the full inlier set.
    pub f: Matrix3<f32>,
    /// Inlier mask under `f`, index-aligned with the input correspondences.
    pub inliers: Vec<bool>,
    /// Number of `true` entries in `inliers`.
    pub num_inliers: usize,
}

/// Estimate F from pixel correspondences with RANSAC + normalized 8-point.
///
/// `sigma` is the expected reprojection noise in pixels; `max_iterations` is
/// clamped to `[1, 1000]`. Returns `None` when fewer than 8 correspondences
/// are given or every sampled model was degenerate.
///
/// The final matrix is refit on the best inlier set and the mask re-scored
/// against it, so `num_inliers` counts exactly the correspondences whose
/// symmetric epipolar squared distance is below threshold under `f`.
pub fn find_fundamental(
    pts1: &[Vector2<f32>],
    pts2: &[Vector2<f32>],
    sigma: f32,
    max_iterations: usize,
    rng: &mut impl Rng,
) -> Option<FundamentalResult> {
    let n = pts1.len();
    debug_assert_eq!(n, pts2.len());
    if n < MODEL_POINTS {
        return None;
    }

    let threshold = 3.841 * sigma * sigma;
    let max_iters = max_iterations.clamp(1, 1000);

    let mut best_inliers = vec![false; n];
    let mut best_count = 0usize;

    let mut sample1 = Vec::with_capacity(MODEL_POINTS);
    let mut sample2 = Vec::with_capacity(MODEL_POINTS);

    let mut niters = max_iters;
    let mut iter = 0;
    while iter < niters {
        iter += 1;

        // Draw 8 distinct indices by swap-with-tail on a working index list.
        let mut indices: Vec<usize> = (0..n).collect();
        sample1.clear();
        sample2.clear();
        for _ in 0..MODEL_POINTS {
            let r = rng.gen_range(0..indices.len());
            let idx = indices[r];
            sample1.push(pts1[idx]);
            sample2.push(pts2[idx]);
            let last = indices.len() - 1;
            indices.swap(r, last);
            indices.pop();
        }

        let f = match run_8point(&sample1, &sample2) {
            Some(f) => f,
            None => continue,
        };

        let (inliers, count) = score_model(&f, pts1, pts2, threshold);
        if count > best_count {
            best_count = count;
            best_inliers = inliers;

            if count == n {
                break;
            }

            // n_iter = log(1 - p) / log(1 - omega^8), capped at max_iters.
            let num = (1.0 - CONFIDENCE).ln();
            let omega = count as f64 / n as f64;
            let denom = (1.0 - omega.powi(MODEL_POINTS as i32)).ln();
            niters = if denom >= 0.0 || -num >= max_iters as f64 * (-denom) {
                max_iters
            } else {
                (num / denom).round() as usize
            };
        }
    }

    if best_count < MODEL_POINTS {
        return None;
    }

    // Refit on the whole best-inlier set, then re-score so the reported mask
    // and count belong to the reported matrix.
    let refit1: Vec<Vector2<f32>> = pts1
        .iter()
        .zip(&best_inliers)
        .filter(|(_, &keep)| keep)
        .map(|(p, _)| *p)
        .collect();
    let refit2: Vec<Vector2<f32>> = pts2
        .iter()
        .zip(&best_inliers)
        .filter(|(_, &keep)| keep)
        .map(|(p, _)| *p)
        .collect();

    let f = run_8point(&refit1, &refit2)?;
    let (inliers, num_inliers) = score_model(&f, pts1, pts2, threshold);

    Some(FundamentalResult {
        f,
        inliers,
        num_inliers,
    })
}

fn score_model(
    f: &Matrix3<f32>,
    pts1: &[Vector2<f32>],
    pts2: &[Vector2<f32>],
    threshold: f32,
) -> (Vec<bool>, usize) {
    let mut inliers = vec![false; pts1.len()];
    let mut count = 0;
    for (i, (p1, p2)) in pts1.iter().zip(pts2.iter()).enumerate() {
        let (err1, err2) = epipolar_errors(p1, p2, f);
        if err1.max(err2) < threshold {
            inliers[i] = true;
            count += 1;
        }
    }
    (inliers, count)
}

/// Fit F on all given correspondences with the normalized 8-point algorithm.
///
/// Returns `None` for degenerate inputs: fewer than 8 points, or a point set
/// whose spread along some axis vanishes (normalization would divide by
/// zero). When `|F33|` ends up below machine epsilon the usual `F33 = 1`
/// scaling is skipped and the unscaled matrix is returned.
pub fn run_8point(pts1: &[Vector2<f32>], pts2: &[Vector2<f32>]) -> Option<Matrix3<f32>> {
    let n = pts1.len();
    debug_assert_eq!(n, pts2.len());
    if n < MODEL_POINTS {
        return None;
    }

    let (norm1, t1) = normalize_points(pts1)?;
    let (norm2, t2) = normalize_points(pts2)?;

    // Accumulate AᵀA directly instead of materializing the N×9 design
    // matrix; row i is [u2u1, u2v1, u2, v2u1, v2v1, v2, u1, v1, 1].
    let mut ata = SMatrix::<f32, 9, 9>::zeros();
    for (p1, p2) in norm1.iter().zip(norm2.iter()) {
        let (u1, v1) = (p1.x, p1.y);
        let (u2, v2) = (p2.x, p2.y);
        let a = [
            u2 * u1,
            u2 * v1,
            u2,
            v2 * u1,
            v2 * v1,
            v2,
            u1,
            v1,
            1.0,
        ];
        for i in 0..9 {
            for j in 0..9 {
                ata[(i, j)] += a[i] * a[j];
            }
        }
    }

    // The solution is the eigenvector of AᵀA for the smallest eigenvalue.
    let eig = SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let fv = eig.eigenvectors.column(min_idx);

    let f_pre = Matrix3::new(
        fv[0], fv[1], fv[2], fv[3], fv[4], fv[5], fv[6], fv[7], fv[8],
    );

    // Enforce rank 2: zero the smallest singular value and recompose.
    let svd = f_pre.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut s = svd.singular_values;
    let s_min = s
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    s[s_min] = 0.0;
    let f_norm = u * Matrix3::from_diagonal(&s) * v_t;

    let mut f = t2.transpose() * f_norm * t1;
    let f33 = f[(2, 2)];
    if f33.abs() > f32::EPSILON {
        f /= f33;
    }
    Some(f)
}

/// Translate a point set so its centroid is the origin and scale each axis
/// so the mean absolute deviation along it is 1.
///
/// Returns the normalized points and the 3×3 transform `T` with
/// `x_norm = T * x_h`. `None` when the set is empty or has no spread along
/// an axis.
pub fn normalize_points(pts: &[Vector2<f32>]) -> Option<(Vec<Vector2<f32>>, Matrix3<f32>)> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f32;

    let mut mean = Vector2::zeros();
    for p in pts {
        mean += p;
    }
    mean /= n;

    let mut mean_dev = Vector2::zeros();
    let mut centered = Vec::with_capacity(pts.len());
    for p in pts {
        let c = p - mean;
        mean_dev.x += c.x.abs();
        mean_dev.y += c.y.abs();
        centered.push(c);
    }
    mean_dev /= n;

    if mean_dev.x <= f32::EPSILON || mean_dev.y <= f32::EPSILON {
        return None;
    }

    let scale_x = 1.0 / mean_dev.x;
    let scale_y = 1.0 / mean_dev.y;
    for c in centered.iter_mut() {
        c.x *= scale_x;
        c.y *= scale_y;
    }

    let t = Matrix3::new(
        scale_x,
        0.0,
        -mean.x * scale_x,
        0.0,
        scale_y,
        -mean.y * scale_y,
        0.0,
        0.0,
        1.0,
    );
    Some((centered, t))
}

/// Squared point-to-epipolar-line distances for one correspondence, in both
/// images: `(d²(x1, Fᵀx2), d²(x2, Fx1))`.
pub fn epipolar_errors(p1: &Vector2<f32>, p2: &Vector2<f32>, f: &Matrix3<f32>) -> (f32, f32) {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let x2 = Vector3::new(p2.x, p2.y, 1.0);

    // Epipolar line in the second image: l2 = F * x1.
    let l2 = f * x1;
    // Epipolar line in the first image: l1 = Fᵀ * x2.
    let l1 = f.transpose() * x2;

    let dist2 = l2.dot(&x2);
    let sq_dist2 = dist2 * dist2 / (l2.x * l2.x + l2.y * l2.y);

    let dist1 = l1.dot(&x1);
    let sq_dist1 = dist1 * dist1 / (l1.x * l1.x + l1.y * l1.y);

    (sq_dist1, sq_dist2)
}

/// Decompose an essential matrix into its two rotation hypotheses and the
/// unit translation direction.
///
/// Both factors are flipped to proper rotations when their determinant is
/// negative. The four relative-pose hypotheses are `(R1, ±t)` and `(R2, ±t)`;
/// picking among them is the cheirality check's job.
pub fn decompose_essential(
    e: &Matrix3<f32>,
) -> Option<(Matrix3<f32>, Matrix3<f32>, Vector3<f32>)> {
    let svd = e.svd(true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;

    if u.determinant() < 0.0 {
        u = -u;
    }
    if v_t.determinant() < 0.0 {
        v_t = -v_t;
    }

    let w = Matrix3::new(0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0);

    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).into_owned().normalize();

    Some((r1, r2, t))
}
