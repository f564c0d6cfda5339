//! Pyramidal Lucas–Kanade sparse feature tracking.
//!
//! Forward-additive iterative LK with gradients taken from the reference
//! window, run coarse-to-fine over the image pyramid. Each point is
//! warm-started from the caller's current estimate, so a tracker that seeds
//! `pts_cur` with the reference positions gets the zero-flow initial guess
//! and one that seeds with a prediction gets a head start.

use image::GrayImage;
use nalgebra::{Matrix2, Vector2};

/// Tracking parameters. The defaults are the usual sparse-flow settings:
/// 21×21 window, 3 pyramid levels, 30 iterations, ε = 0.001.
#[derive(Debug, Clone)]
pub struct KltParams {
    /// Side length of the square tracking window, odd.
    pub win_size: usize,
    /// Number of pyramid levels used (clamped to the frames' pyramid depth).
    pub max_levels: usize,
    /// Iteration cap per pyramid level.
    pub max_iters: usize,
    /// Convergence threshold on the update norm, in pixels.
    pub eps: f32,
}

impl Default for KltParams {
    fn default() -> Self {
        Self {
            win_size: 21,
            max_levels: 3,
            max_iters: 30,
            eps: 0.001,
        }
    }
}

/// Reject windows whose gradient matrix has a smaller eigenvalue below this
/// per-pixel bound (intensities sampled in [0, 1]); catches flat and
/// one-dimensional texture.
const MIN_EIGEN_PER_PIXEL: f32 = 1e-4;

/// Track `pts_ref` from the reference pyramid into the current pyramid.
///
/// `pts_cur` holds the initial estimates on input and the tracked positions
/// on output; entries whose status is `false` are left untouched. Both
/// pyramids must share level-0 resolution.
pub fn track(
    pyr_ref: &[GrayImage],
    pyr_cur: &[GrayImage],
    pts_ref: &[Vector2<f32>],
    pts_cur: &mut [Vector2<f32>],
    params: &KltParams,
) -> Vec<bool> {
    debug_assert_eq!(pts_ref.len(), pts_cur.len());
    let mut status = vec![false; pts_ref.len()];
    for i in 0..pts_ref.len() {
        if let Some(tracked) = track_point(pyr_ref, pyr_cur, pts_ref[i], pts_cur[i], params) {
            pts_cur[i] = tracked;
            status[i] = true;
        }
    }
    status
}

fn track_point(
    pyr_ref: &[GrayImage],
    pyr_cur: &[GrayImage],
    p_ref: Vector2<f32>,
    guess: Vector2<f32>,
    params: &KltParams,
) -> Option<Vector2<f32>> {
    let levels = params
        .max_levels
        .min(pyr_ref.len())
        .min(pyr_cur.len())
        .max(1);
    let top = levels - 1;
    let half = (params.win_size / 2) as i32;
    let win_area = params.win_size * params.win_size;

    let mut g = guess / (1u32 << top) as f32;

    for level in (0..levels).rev() {
        let scale = (1u32 << level) as f32;
        let p = p_ref / scale;
        let img_ref = &pyr_ref[level];
        let img_cur = &pyr_cur[level];

        // Gradient sampling reaches one pixel past the window.
        if !window_inside(img_ref, &p, half as f32 + 1.0) {
            return None;
        }

        // Template intensities and spatial gradients, fixed per level.
        let mut template = Vec::with_capacity(win_area);
        let mut grad = Vec::with_capacity(win_area);
        let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -half..=half {
            for dx in -half..=half {
                let x = p.x + dx as f32;
                let y = p.y + dy as f32;
                template.push(sample(img_ref, x, y));
                let gx = 0.5 * (sample(img_ref, x + 1.0, y) - sample(img_ref, x - 1.0, y));
                let gy = 0.5 * (sample(img_ref, x, y + 1.0) - sample(img_ref, x, y - 1.0));
                grad.push(Vector2::new(gx, gy));
                gxx += gx * gx;
                gxy += gx * gy;
                gyy += gy * gy;
            }
        }

        let trace = gxx + gyy;
        let det = gxx * gyy - gxy * gxy;
        let lambda_min = 0.5 * (trace - (trace * trace - 4.0 * det).max(0.0).sqrt());
        if lambda_min < MIN_EIGEN_PER_PIXEL * win_area as f32 {
            return None;
        }
        let g_inv = Matrix2::new(gxx, gxy, gxy, gyy).try_inverse()?;

        for _ in 0..params.max_iters {
            if !window_inside(img_cur, &g, half as f32) {
                return None;
            }

            let mut b = Vector2::zeros();
            let mut idx = 0;
            for dy in -half..=half {
                for dx in -half..=half {
                    let residual =
                        template[idx] - sample(img_cur, g.x + dx as f32, g.y + dy as f32);
                    b += grad[idx] * residual;
                    idx += 1;
                }
            }

            let delta = g_inv * b;
            if !delta.x.is_finite() || !delta.y.is_finite() {
                return None;
            }
            g += delta;
            if delta.norm() < params.eps {
                break;
            }
        }

        if level > 0 {
            g *= 2.0;
        }
    }

    if !window_inside(&pyr_cur[0], &g, 1.0) {
        return None;
    }
    Some(g)
}

fn window_inside(img: &GrayImage, center: &Vector2<f32>, margin: f32) -> bool {
    let (w, h) = img.dimensions();
    center.x - margin >= 0.0
        && center.y - margin >= 0.0
        && center.x + margin < (w - 1) as f32
        && center.y + margin < (h - 1) as f32
}

/// Bilinear sample normalized to [0, 1]. The caller guarantees the position
/// is inside the interpolatable region.
fn sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as u32, y0 as u32);

    let p00 = img.get_pixel(x0, y0).0[0] as f32;
    let p10 = img.get_pixel(x0 + 1, y0).0[0] as f32;
    let p01 = img.get_pixel(x0, y0 + 1).0[0] as f32;
    let p11 = img.get_pixel(x0 + 1, y0 + 1).0[0] as f32;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    (top * (1.0 - fy) + bottom * fy) / 255.0
}
