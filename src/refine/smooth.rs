//! Gaussian-like smoothing restricted to alpha transitions

use super::is_transition;
use ndarray::{Array2, ArrayView2};
use std::ops::Range;

/// Smoothing radius bounds
pub const MIN_SMOOTH_RADIUS: u32 = 1;
pub const MAX_SMOOTH_RADIUS: u32 = 5;

/// Normalized `(2r+1)²` weight table with σ = r/2
#[must_use]
pub fn gaussian_kernel(radius: u32) -> Array2<f32> {
    let r = radius as i64;
    let size = (2 * r + 1) as usize;
    let sigma = (radius as f32 / 2.0).max(0.5);
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut kernel = Array2::from_shape_fn((size, size), |(ky, kx)| {
        let dy = ky as i64 - r;
        let dx = kx as i64 - r;
        (-((dx * dx + dy * dy) as f32) / two_sigma_sq).exp()
    });
    let sum = kernel.sum();
    if sum > 0.0 {
        kernel.mapv_inplace(|w| w / sum);
    }
    kernel
}

/// Weighted average of transition pixels; everything else passes through
///
/// The radius is clamped to 1-5. Near the image border the average is
/// renormalized over the weights that fall inside the image.
#[must_use]
pub fn smooth(mask: ArrayView2<u8>, radius: u32) -> Array2<u8> {
    let mut output = mask.to_owned();
    smooth_rows(mask, radius, 0..mask.nrows(), &mut output);
    output
}

/// [`smooth`] for rows `rows` only, written into the same rows of `output`
///
/// `output` must start as a copy of `mask`: non-transition pixels are not
/// written.
pub fn smooth_rows(mask: ArrayView2<u8>, radius: u32, rows: Range<usize>, output: &mut Array2<u8>) {
    let radius = radius.clamp(MIN_SMOOTH_RADIUS, MAX_SMOOTH_RADIUS);
    let kernel = gaussian_kernel(radius);
    let r = radius as isize;
    let (height, width) = mask.dim();

    for y in rows {
        for x in 0..width {
            if !is_transition(mask, x, y) {
                continue;
            }

            let mut acc = 0.0f32;
            let mut weight_sum = 0.0f32;
            for dy in -r..=r {
                let sy = y as isize + dy;
                if sy < 0 || sy >= height as isize {
                    continue;
                }
                for dx in -r..=r {
                    let sx = x as isize + dx;
                    if sx < 0 || sx >= width as isize {
                        continue;
                    }
                    let w = kernel[[(dy + r) as usize, (dx + r) as usize]];
                    acc += w * f32::from(mask[[sy as usize, sx as usize]]);
                    weight_sum += w;
                }
            }

            if weight_sum > 0.0 {
                output[[y, x]] = (acc / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
