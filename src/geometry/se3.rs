//! Rigid-body transform in 3-D, stored as a rotation matrix and translation.
//!
//! The initializer produces rotation matrices directly from SVD factors, so
//! the matrix form is kept throughout instead of a quaternion. Everything is
//! `f32`, matching the precision of the two-view pipeline.

use nalgebra::{Matrix3, Matrix3x4, Vector3};

/// A rigid transform `[R|t]`: `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f32>, translation: Vector3<f32>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The inverse transform: `[Rᵀ | -Rᵀt]`.
    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.transpose();
        Self {
            rotation: r_inv,
            translation: -(r_inv * self.translation),
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * p + self.translation
    }

    /// The 3×4 matrix `[R|t]`.
    pub fn matrix3x4(&self) -> Matrix3x4<f32> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_noop() {
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(SE3::identity().transform_point(&p), p);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let angle = 0.3_f32;
        let rotation = Matrix3::new(
            angle.cos(),
            -angle.sin(),
            0.0,
            angle.sin(),
            angle.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        );
        let t = SE3::from_rt(rotation, Vector3::new(0.5, -1.0, 2.0));
        let p = Vector3::new(0.7, 0.2, 4.0);

        let roundtrip = t.inverse().transform_point(&t.transform_point(&p));
        assert!((roundtrip - p).norm() < 1e-5);
    }

    #[test]
    fn test_matrix3x4_layout() {
        let t = SE3::from_rt(Matrix3::identity(), Vector3::new(1.0, 2.0, 3.0));
        let m = t.matrix3x4();
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(0, 3)], 1.0);
        assert_eq!(m[(1, 3)], 2.0);
        assert_eq!(m[(2, 3)], 3.0);
    }
}
