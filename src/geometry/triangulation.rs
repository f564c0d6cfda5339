//! DLT triangulation and cheirality-based relative-pose selection.
//!
//! An essential matrix decomposes into four pose hypotheses. Each inlier
//! correspondence is triangulated under every hypothesis and the one that
//! places the most points in front of both cameras (and inside the depth
//! window) wins; the result is the relative pose and the 3-D seed cloud.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Vector2, Vector3};
use tracing::warn;

use super::se3::SE3;

/// Reconstructed points farther than this (in baseline-normalized units
/// inherited from the intrinsics) are treated as unreliable.
pub const MAX_POINT_DEPTH: f32 = 50.0;

/// Fraction of pre-check inliers the winning hypothesis must retain.
const MIN_GOOD_RATIO: f32 = 0.9;

/// Result of the four-way cheirality disambiguation.
#[derive(Debug, Clone)]
pub struct PoseSelection {
    /// Relative transform from the reference camera to the current camera.
    pub pose: SE3,
    /// Triangulated points in the reference camera frame, index-aligned with
    /// the input correspondences. Only entries flagged in `inliers` hold a
    /// reconstructed point.
    pub points: Vec<Vector3<f32>>,
    /// Correspondences surviving the cheirality check.
    pub inliers: Vec<bool>,
    /// Number of `true` entries in `inliers`.
    pub num_good: usize,
}

/// Triangulate one correspondence given two 3×4 projection matrices.
///
/// Solves the stacked DLT system for the homogeneous point and
/// dehomogenizes. `None` when the homogeneous scale vanishes.
pub fn triangulate(
    p1: &Matrix3x4<f32>,
    p2: &Matrix3x4<f32>,
    x1: &Vector2<f32>,
    x2: &Vector2<f32>,
) -> Option<Vector3<f32>> {
    let mut a = Matrix4::<f32>::zeros();
    for j in 0..4 {
        a[(0, j)] = x1.x * p1[(2, j)] - p1[(0, j)];
        a[(1, j)] = x1.y * p1[(2, j)] - p1[(1, j)];
        a[(2, j)] = x2.x * p2[(2, j)] - p2[(0, j)];
        a[(3, j)] = x2.y * p2[(2, j)] - p2[(1, j)];
    }

    // Homogeneous solution: right singular vector at the smallest singular
    // value.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let min_idx = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let row = v_t.row(min_idx);

    let w = row[3];
    if w.abs() < 1e-10 {
        return None;
    }
    Some(Vector3::new(row[0] / w, row[1] / w, row[2] / w))
}

/// Pick the pose hypothesis under which the most inliers triangulate in
/// front of both cameras within the depth window.
///
/// `mask` flags the correspondences that survived the epipolar check; it is
/// the baseline for the 90% acceptance requirement. Hypotheses are tried in
/// the order `(R1, t)`, `(R2, t)`, `(R1, -t)`, `(R2, -t)` and ties go to the
/// earlier one.
pub fn select_best_pose(
    r1: &Matrix3<f32>,
    r2: &Matrix3<f32>,
    t: &Vector3<f32>,
    k1: &Matrix3<f32>,
    k2: &Matrix3<f32>,
    pts1: &[Vector2<f32>],
    pts2: &[Vector2<f32>],
    mask: &[bool],
) -> Option<PoseSelection> {
    let n = pts1.len();
    debug_assert_eq!(n, pts2.len());
    debug_assert_eq!(n, mask.len());

    let p0 = k1 * SE3::identity().matrix3x4();
    let num_good0 = mask.iter().filter(|&&m| m).count();

    let hypotheses = [
        SE3::from_rt(*r1, *t),
        SE3::from_rt(*r2, *t),
        SE3::from_rt(*r1, -t),
        SE3::from_rt(*r2, -t),
    ];

    let mut best: Option<PoseSelection> = None;
    for pose in hypotheses {
        let p = k2 * pose.matrix3x4();

        let mut points = vec![Vector3::zeros(); n];
        let mut inliers = vec![false; n];
        let mut num_good = 0;
        for i in 0..n {
            if !mask[i] {
                continue;
            }
            let Some(x) = triangulate(&p0, &p, &pts1[i], &pts2[i]) else {
                continue;
            };
            if x.z <= 0.0 || x.z >= MAX_POINT_DEPTH {
                continue;
            }
            let x_cur = pose.transform_point(&x);
            if x_cur.z <= 0.0 || x_cur.z >= MAX_POINT_DEPTH {
                continue;
            }
            points[i] = x;
            inliers[i] = true;
            num_good += 1;
        }

        // Strictly greater keeps the first hypothesis on ties.
        if best.as_ref().map_or(true, |b| num_good > b.num_good) {
            best = Some(PoseSelection {
                pose,
                points,
                inliers,
                num_good,
            });
        }
    }

    let best = best?;
    if (best.num_good as f32) < MIN_GOOD_RATIO * num_good0 as f32 {
        warn!(
            "[Init] cheirality check kept {}/{} inliers, rejecting",
            best.num_good, num_good0
        );
        return None;
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fundamental::{decompose_essential, find_fundamental};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn camera_k() -> Matrix3<f32> {
        Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 320.0, 0.0, 0.0, 1.0)
    }

    fn project(k: &Matrix3<f32>, p: &Vector3<f32>) -> Vector2<f32> {
        Vector2::new(
            k[(0, 0)] * p.x / p.z + k[(0, 2)],
            k[(1, 1)] * p.y / p.z + k[(1, 2)],
        )
    }

    /// Points in a 2 m × 2 m × [2, 5] m box viewed by two cameras related by
    /// a pure x-translation. Optionally half the points are mirrored behind
    /// the cameras.
    fn two_view_scene(
        n: usize,
        baseline: f32,
        half_behind: bool,
    ) -> (Vec<Vector2<f32>>, Vec<Vector2<f32>>) {
        let k = camera_k();
        let mut rng = StdRng::seed_from_u64(21);
        let mut pts1 = Vec::with_capacity(n);
        let mut pts2 = Vec::with_capacity(n);
        for i in 0..n {
            let x = rng.gen_range(-1.0..1.0_f32);
            let y = rng.gen_range(-1.0..1.0_f32);
            let mut z = rng.gen_range(2.0..5.0_f32);
            if half_behind && i % 2 == 1 {
                z = -z;
            }
            let p = Vector3::new(x, y, z);
            let p_cur = Vector3::new(x - baseline, y, z);
            pts1.push(project(&k, &p));
            pts2.push(project(&k, &p_cur));
        }
        (pts1, pts2)
    }

    #[test]
    fn test_triangulate_exact_point() {
        let k = camera_k();
        let pose = SE3::from_rt(Matrix3::identity(), Vector3::new(-1.0, 0.0, 0.0));
        let p0 = k * SE3::identity().matrix3x4();
        let p1 = k * pose.matrix3x4();

        let point = Vector3::new(0.4, -0.2, 5.0);
        let x1 = project(&k, &point);
        let x2 = project(&k, &pose.transform_point(&point));

        let recovered = triangulate(&p0, &p1, &x1, &x2).unwrap();
        assert!((recovered - point).norm() < 1e-3, "recovered {recovered:?}");
    }

    #[test]
    fn test_select_pose_pure_translation() {
        let (pts1, pts2) = two_view_scene(200, 0.3, false);
        let k = camera_k();
        let mut rng = StdRng::seed_from_u64(22);

        let est = find_fundamental(&pts1, &pts2, 1.0, 1000, &mut rng).unwrap();
        let e = k.transpose() * est.f * k;
        let (r1, r2, t) = decompose_essential(&e).unwrap();

        let selection =
            select_best_pose(&r1, &r2, &t, &k, &k, &pts1, &pts2, &est.inliers).unwrap();

        assert!((selection.pose.rotation - Matrix3::identity()).norm() < 1e-2);
        // Translation direction along ±x within 1 degree.
        assert!(selection.pose.translation.x.abs() > 0.99985_f32);
        assert!(selection.num_good >= (0.9 * est.num_inliers as f32) as usize);

        // Every reported point sits inside the depth window of both views.
        for (i, p) in selection.points.iter().enumerate() {
            if !selection.inliers[i] {
                continue;
            }
            let p_cur = selection.pose.transform_point(p);
            assert!(p.z > 0.0 && p.z < MAX_POINT_DEPTH);
            assert!(p_cur.z > 0.0 && p_cur.z < MAX_POINT_DEPTH);
        }
    }

    #[test]
    fn test_select_pose_rejects_ambiguous_cheirality() {
        let (pts1, pts2) = two_view_scene(100, 0.3, true);
        let k = camera_k();
        let mut rng = StdRng::seed_from_u64(23);

        // The epipolar constraint is sign-blind, so RANSAC accepts all of
        // them.
        let est = find_fundamental(&pts1, &pts2, 1.0, 1000, &mut rng).unwrap();
        assert!(est.num_inliers >= 95, "inliers: {}", est.num_inliers);

        let e = k.transpose() * est.f * k;
        let (r1, r2, t) = decompose_essential(&e).unwrap();
        let selection = select_best_pose(&r1, &r2, &t, &k, &k, &pts1, &pts2, &est.inliers);
        assert!(selection.is_none());
    }

    #[test]
    fn test_select_pose_rejects_far_points() {
        // Same geometry but depths past the window once scaled by the unit
        // baseline: z/|t| ≥ 60 for every point.
        let k = camera_k();
        let mut rng = StdRng::seed_from_u64(24);
        let mut pts1 = Vec::new();
        let mut pts2 = Vec::new();
        for _ in 0..100 {
            let x = rng.gen_range(-20.0..20.0_f32);
            let y = rng.gen_range(-20.0..20.0_f32);
            let z = rng.gen_range(60.0..90.0_f32);
            pts1.push(project(&k, &Vector3::new(x, y, z)));
            pts2.push(project(&k, &Vector3::new(x - 1.0, y, z)));
        }

        let est = find_fundamental(&pts1, &pts2, 1.0, 1000, &mut rng).unwrap();
        let e = k.transpose() * est.f * k;
        let (r1, r2, t) = decompose_essential(&e).unwrap();
        let selection = select_best_pose(&r1, &r2, &t, &k, &k, &pts1, &pts2, &est.inliers);
        assert!(selection.is_none());
    }
}
