//! Frames consumed by the initializer.
//!
//! A frame carries what an upstream feature pipeline produced: a grayscale
//! image pyramid, detected key-points in pixel coordinates, the camera
//! intrinsics and a pose estimate. The core never builds pyramids or detects
//! corners itself; [`build_pyramid`] exists for frame sources and tests.

use anyhow::{ensure, Result};
use image::GrayImage;
use nalgebra::{Matrix3, Vector2};
use parking_lot::RwLock;

use crate::geometry::SE3;
use crate::map::types::FrameId;

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraModel {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Extract the intrinsics from a 3×3 K matrix.
    pub fn from_k(k: &Matrix3<f32>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    /// The 3×3 intrinsic matrix K.
    pub fn k(&self) -> Matrix3<f32> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}

/// A single camera frame: pyramid, key-points, intrinsics, pose.
pub struct Frame {
    pub id: FrameId,
    /// Capture time in seconds.
    pub timestamp: f64,
    camera: CameraModel,
    pyramid: Vec<GrayImage>,
    keypoints: Vec<Vector2<f32>>,
    pose: RwLock<SE3>,
}

impl Frame {
    /// Create a frame from a pre-built pyramid and key-point list.
    ///
    /// Level 0 must be the full-resolution image; every level must be
    /// non-empty.
    pub fn new(
        id: FrameId,
        timestamp: f64,
        camera: CameraModel,
        pyramid: Vec<GrayImage>,
        keypoints: Vec<Vector2<f32>>,
    ) -> Result<Self> {
        ensure!(!pyramid.is_empty(), "frame {id} has an empty image pyramid");
        for (level, img) in pyramid.iter().enumerate() {
            ensure!(
                img.width() > 0 && img.height() > 0,
                "frame {id} pyramid level {level} is empty"
            );
        }
        Ok(Self {
            id,
            timestamp,
            camera,
            pyramid,
            keypoints,
            pose: RwLock::new(SE3::identity()),
        })
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn pyramid(&self) -> &[GrayImage] {
        &self.pyramid
    }

    /// Image at the given pyramid level (0 = full resolution).
    pub fn level(&self, level: usize) -> &GrayImage {
        &self.pyramid[level]
    }

    pub fn keypoints(&self) -> &[Vector2<f32>] {
        &self.keypoints
    }

    pub fn pose(&self) -> SE3 {
        *self.pose.read()
    }

    pub fn set_pose(&self, pose: SE3) {
        *self.pose.write() = pose;
    }
}

/// Build a half-sampling pyramid by 2×2 averaging.
///
/// Stops early when a level would fall below 2 pixels on a side, so the
/// returned vector may be shorter than `levels`.
pub fn build_pyramid(base: GrayImage, levels: usize) -> Vec<GrayImage> {
    let mut pyramid = Vec::with_capacity(levels.max(1));
    pyramid.push(base);

    while pyramid.len() < levels {
        let prev = &pyramid[pyramid.len() - 1];
        let (w, h) = (prev.width() / 2, prev.height() / 2);
        if w < 2 || h < 2 {
            break;
        }
        let mut down = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let sum = prev.get_pixel(2 * x, 2 * y).0[0] as u16
                    + prev.get_pixel(2 * x + 1, 2 * y).0[0] as u16
                    + prev.get_pixel(2 * x, 2 * y + 1).0[0] as u16
                    + prev.get_pixel(2 * x + 1, 2 * y + 1).0[0] as u16;
                down.put_pixel(x, y, image::Luma([(sum / 4) as u8]));
            }
        }
        pyramid.push(down);
    }
    pyramid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_k_roundtrip() {
        let cam = CameraModel::new(500.0, 510.0, 320.0, 240.0);
        let k = cam.k();
        assert_eq!(CameraModel::from_k(&k), cam);
        assert_eq!(k[(2, 2)], 1.0);
        assert_eq!(k[(1, 0)], 0.0);
    }

    #[test]
    fn test_build_pyramid_halves_dimensions() {
        let base = GrayImage::new(64, 48);
        let pyr = build_pyramid(base, 3);
        assert_eq!(pyr.len(), 3);
        assert_eq!(pyr[1].dimensions(), (32, 24));
        assert_eq!(pyr[2].dimensions(), (16, 12));
    }

    #[test]
    fn test_build_pyramid_stops_on_tiny_images() {
        let base = GrayImage::new(8, 8);
        let pyr = build_pyramid(base, 6);
        assert_eq!(pyr.len(), 3); // 8 -> 4 -> 2
    }

    #[test]
    fn test_build_pyramid_averages() {
        let mut base = GrayImage::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                base.put_pixel(x, y, image::Luma([(10 * (y * 4 + x)) as u8]));
            }
        }
        let pyr = build_pyramid(base, 2);
        assert_eq!(pyr.len(), 2);
        // Top-left 2x2 block of the base is 0, 10, 40, 50 -> mean 25.
        assert_eq!(pyr[1].get_pixel(0, 0).0[0], 25);
    }

    #[test]
    fn test_frame_rejects_empty_pyramid() {
        let cam = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        assert!(Frame::new(FrameId(0), 0.0, cam, vec![], vec![]).is_err());
    }
}
