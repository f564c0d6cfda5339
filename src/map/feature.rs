//! Feature observations attached to keyframes.

use nalgebra::Vector2;

/// A 2-D feature observation: pixel position and the pyramid level it was
/// detected at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub px: Vector2<f32>,
    pub level: usize,
}

impl Feature {
    pub fn new(px: Vector2<f32>, level: usize) -> Self {
        Self { px, level }
    }
}
