//! Runtime configuration for the initializer and the covisibility graph.

use serde::{Deserialize, Serialize};

/// Tunable parameters recognized by the crate.
///
/// All fields have working defaults; deserializing a partial document fills
/// the rest from [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum key-point count on the reference frame.
    pub init_min_corners: usize,

    /// Minimum number of correspondences surviving KLT tracking.
    pub init_min_tracked: usize,

    /// Minimum mean disparity (pixels) between the two views.
    pub init_min_disparity: f32,

    /// Reprojection error sigma (pixels) for the RANSAC inlier threshold.
    pub init_sigma: f32,

    /// Minimum fundamental-matrix inlier count.
    pub init_min_inliers: usize,

    /// RANSAC iteration cap. Clamped to [1, 1000] at use.
    pub init_max_ransac_iters: usize,

    /// Covisibility weight threshold: neighbors sharing at least this many
    /// map points become graph edges.
    pub min_connection_observations: u32,

    /// Seed for the RANSAC sampler, so runs are reproducible.
    pub ransac_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            init_min_corners: 50,
            init_min_tracked: 50,
            init_min_disparity: 5.0,
            init_sigma: 1.0,
            init_min_inliers: 40,
            init_max_ransac_iters: 1000,
            min_connection_observations: 15,
            ransac_seed: 0,
        }
    }
}
