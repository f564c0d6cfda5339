//! Two-view map initialization.
//!
//! A stateful pipeline that bootstraps a monocular map: seed with a
//! reference frame, then feed candidate current frames until the two-view
//! geometry yields a relative pose and a 3-D point cloud. Stages: KLT
//! tracking, disparity gate, robust fundamental-matrix estimation, essential
//! decomposition, cheirality disambiguation.

use std::sync::Arc;

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::geometry::{decompose_essential, find_fundamental, select_best_pose, SE3};
use crate::tracking::frame::Frame;
use crate::tracking::klt::{self, KltParams};

/// Outcome of an initializer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitResult {
    /// The call succeeded; after `add_second_frame` the pose and point cloud
    /// are readable.
    Success,
    /// A geometric check failed (parallax, epipolar inliers or cheirality).
    /// The caller may try another current frame without re-seeding.
    Failure,
    /// Too few corners or tracked points. The caller must re-seed with a new
    /// reference frame.
    Reset,
}

/// Two-view initializer state.
pub struct Initializer {
    config: Config,
    klt_params: KltParams,
    rng: StdRng,

    frame_ref: Option<Arc<Frame>>,
    pts_ref: Vec<Vector2<f32>>,
    pts_cur: Vec<Vector2<f32>>,
    disparities: Vec<f32>,
    inliers: Vec<bool>,
    p3ds: Vec<Vector3<f32>>,
    pose_cur_from_ref: Option<SE3>,
}

impl Initializer {
    pub fn new(config: Config) -> Self {
        let rng = StdRng::seed_from_u64(config.ransac_seed);
        Self {
            config,
            klt_params: KltParams::default(),
            rng,
            frame_ref: None,
            pts_ref: Vec::new(),
            pts_cur: Vec::new(),
            disparities: Vec::new(),
            inliers: Vec::new(),
            p3ds: Vec::new(),
            pose_cur_from_ref: None,
        }
    }

    /// Install a reference frame, resetting all pipeline state.
    ///
    /// Copies the frame's key-points into the reference set and seeds the
    /// current set with the same positions as the optical-flow initial
    /// estimate. `Reset` when the frame has too few corners.
    pub fn add_first_frame(&mut self, frame_ref: Arc<Frame>) -> InitResult {
        self.reset_state();

        if frame_ref.keypoints().len() < self.config.init_min_corners {
            warn!(
                "[Init] first frame has too few corners: {} < {}",
                frame_ref.keypoints().len(),
                self.config.init_min_corners
            );
            return InitResult::Reset;
        }

        self.pts_ref = frame_ref.keypoints().to_vec();
        self.pts_cur = self.pts_ref.clone();
        self.frame_ref = Some(frame_ref);
        InitResult::Success
    }

    /// Run the full two-view pipeline against a candidate current frame.
    pub fn add_second_frame(&mut self, frame_cur: Arc<Frame>) -> InitResult {
        let Some(frame_ref) = self.frame_ref.clone() else {
            warn!("[Init] no reference frame installed");
            return InitResult::Reset;
        };

        self.track(&frame_ref, &frame_cur);
        self.inliers = vec![true; self.pts_ref.len()];

        debug!("[Init] KLT tracked points: {}", self.disparities.len());
        if self.disparities.is_empty() || self.disparities.len() < self.config.init_min_tracked {
            return InitResult::Reset;
        }

        let mean_disparity =
            self.disparities.iter().sum::<f32>() / self.disparities.len() as f32;
        debug!("[Init] mean disparity: {:.2} px", mean_disparity);
        if mean_disparity < self.config.init_min_disparity {
            warn!(
                "[Init] insufficient parallax: {:.2} < {:.2} px",
                mean_disparity, self.config.init_min_disparity
            );
            return InitResult::Failure;
        }

        let Some(estimate) = find_fundamental(
            &self.pts_ref,
            &self.pts_cur,
            self.config.init_sigma,
            self.config.init_max_ransac_iters,
            &mut self.rng,
        ) else {
            warn!("[Init] fundamental estimation failed");
            return InitResult::Failure;
        };
        debug!(
            "[Init] inliers after fundamental RANSAC: {}",
            estimate.num_inliers
        );
        if estimate.num_inliers < self.config.init_min_inliers {
            warn!(
                "[Init] too few epipolar inliers: {} < {}",
                estimate.num_inliers, self.config.init_min_inliers
            );
            return InitResult::Failure;
        }
        self.inliers = estimate.inliers;

        let k1 = frame_ref.camera().k();
        let k2 = frame_cur.camera().k();
        let e = k1.transpose() * estimate.f * k2;
        let Some((r1, r2, t)) = decompose_essential(&e) else {
            warn!("[Init] essential decomposition failed");
            return InitResult::Failure;
        };

        let Some(selection) = select_best_pose(
            &r1,
            &r2,
            &t,
            &k1,
            &k2,
            &self.pts_ref,
            &self.pts_cur,
            &self.inliers,
        ) else {
            return InitResult::Failure;
        };

        // Compact every sequence down to the cheirality survivors,
        // index-aligned; the mask is spent after this.
        let n = self.pts_ref.len();
        let mut pts_ref = Vec::with_capacity(selection.num_good);
        let mut pts_cur = Vec::with_capacity(selection.num_good);
        let mut p3ds = Vec::with_capacity(selection.num_good);
        for i in 0..n {
            if !selection.inliers[i] {
                continue;
            }
            pts_ref.push(self.pts_ref[i]);
            pts_cur.push(self.pts_cur[i]);
            p3ds.push(selection.points[i]);
        }
        self.pts_ref = pts_ref;
        self.pts_cur = pts_cur;
        self.p3ds = p3ds;
        self.inliers.clear();
        self.pose_cur_from_ref = Some(selection.pose);

        info!(
            "[Init] initialization succeeded: {} points, {} inliers after cheirality",
            self.p3ds.len(),
            selection.num_good
        );
        InitResult::Success
    }

    /// The surviving correspondences, inlier-masked and index-aligned.
    pub fn get_tracked_points(&self) -> (Vec<Vector2<f32>>, Vec<Vector2<f32>>) {
        if self.inliers.is_empty() {
            return (self.pts_ref.clone(), self.pts_cur.clone());
        }
        let pts_ref = self
            .pts_ref
            .iter()
            .zip(&self.inliers)
            .filter(|(_, &keep)| keep)
            .map(|(p, _)| *p)
            .collect();
        let pts_cur = self
            .pts_cur
            .iter()
            .zip(&self.inliers)
            .filter(|(_, &keep)| keep)
            .map(|(p, _)| *p)
            .collect();
        (pts_ref, pts_cur)
    }

    /// Triangulated points in the reference camera frame; non-empty only
    /// after a successful `add_second_frame`.
    pub fn points(&self) -> &[Vector3<f32>] {
        &self.p3ds
    }

    /// Relative transform from the reference to the current camera.
    pub fn pose_cur_from_ref(&self) -> Option<&SE3> {
        self.pose_cur_from_ref.as_ref()
    }

    fn reset_state(&mut self) {
        self.frame_ref = None;
        self.pts_ref.clear();
        self.pts_cur.clear();
        self.disparities.clear();
        self.inliers.clear();
        self.p3ds.clear();
        self.pose_cur_from_ref = None;
    }

    /// KLT-track the correspondence set and drop failures by swap-with-tail,
    /// recording the disparity of every survivor. Order within the surviving
    /// set is not preserved.
    fn track(&mut self, frame_ref: &Frame, frame_cur: &Frame) {
        let mut status = klt::track(
            frame_ref.pyramid(),
            frame_cur.pyramid(),
            &self.pts_ref,
            &mut self.pts_cur,
            &self.klt_params,
        );

        self.disparities.clear();
        let mut len = self.pts_ref.len();
        let mut i = 0;
        while i < len {
            if !status[i] {
                len -= 1;
                self.pts_ref.swap(i, len);
                self.pts_cur.swap(i, len);
                status.swap(i, len);
                continue;
            }
            self.disparities.push((self.pts_ref[i] - self.pts_cur[i]).norm());
            i += 1;
        }
        self.pts_ref.truncate(len);
        self.pts_cur.truncate(len);

        debug_assert_eq!(self.pts_ref.len(), self.pts_cur.len());
        debug_assert_eq!(self.pts_ref.len(), self.disparities.len());
    }
}
