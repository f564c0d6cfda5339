//! Geometry core: rigid transforms, epipolar estimation, triangulation.

pub mod fundamental;
pub mod se3;
pub mod triangulation;

pub use fundamental::{decompose_essential, find_fundamental, run_8point, FundamentalResult};
pub use se3::SE3;
pub use triangulation::{select_best_pose, triangulate, PoseSelection, MAX_POINT_DEPTH};
