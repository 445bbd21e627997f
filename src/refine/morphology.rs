//! Grayscale morphology on alpha masks: erode, dilate, edge blur

use ndarray::{Array2, ArrayView2};
use std::ops::Range;

/// Morphology radius bounds
pub const MIN_MORPH_RADIUS: u32 = 1;
pub const MAX_MORPH_RADIUS: u32 = 3;

/// Offsets of a disk-shaped structuring element
fn disk_offsets(radius: u32) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let r_sq = r * r;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r_sq {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Fold `pick` over the in-bounds disk neighbourhood of each pixel in `rows`
fn neighbourhood_fold_rows(
    mask: ArrayView2<u8>,
    radius: u32,
    init: u8,
    pick: impl Fn(u8, u8) -> u8,
    rows: Range<usize>,
    output: &mut Array2<u8>,
) {
    let offsets = disk_offsets(radius.clamp(MIN_MORPH_RADIUS, MAX_MORPH_RADIUS));
    let (height, width) = mask.dim();

    for y in rows {
        for x in 0..width {
            output[[y, x]] = offsets.iter().fold(init, |acc, &(dx, dy)| {
                let sx = x as isize + dx;
                let sy = y as isize + dy;
                if sx < 0 || sy < 0 || sx >= width as isize || sy >= height as isize {
                    acc
                } else {
                    pick(acc, mask[[sy as usize, sx as usize]])
                }
            });
        }
    }
}

/// Erode rows `rows` of `mask` into the same rows of `output`
pub fn erode_rows(mask: ArrayView2<u8>, radius: u32, rows: Range<usize>, output: &mut Array2<u8>) {
    neighbourhood_fold_rows(mask, radius, u8::MAX, u8::min, rows, output);
}

/// Dilate rows `rows` of `mask` into the same rows of `output`
pub fn dilate_rows(mask: ArrayView2<u8>, radius: u32, rows: Range<usize>, output: &mut Array2<u8>) {
    neighbourhood_fold_rows(mask, radius, u8::MIN, u8::max, rows, output);
}

/// Per-pixel minimum over a disk (radius clamped to 1-3)
#[must_use]
pub fn erode(mask: ArrayView2<u8>, radius: u32) -> Array2<u8> {
    let mut output = mask.to_owned();
    erode_rows(mask, radius, 0..mask.nrows(), &mut output);
    output
}

/// Per-pixel maximum over a disk (radius clamped to 1-3)
#[must_use]
pub fn dilate(mask: ArrayView2<u8>, radius: u32) -> Array2<u8> {
    let mut output = mask.to_owned();
    dilate_rows(mask, radius, 0..mask.nrows(), &mut output);
    output
}

/// Edge blur for rows `rows` of `mask`, written into the same rows of `output`
pub fn edge_blur_rows(mask: ArrayView2<u8>, rows: Range<usize>, output: &mut Array2<u8>) {
    let (height, width) = mask.dim();

    for y in rows {
        for x in 0..width {
            let mut sum = 0u32;
            let mut count = 0u32;
            let mut lo = u8::MAX;
            let mut hi = u8::MIN;
            for sy in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for sx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let v = mask[[sy, sx]];
                    sum += u32::from(v);
                    count += 1;
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
            output[[y, x]] = if lo != hi && count > 0 {
                ((sum + count / 2) / count) as u8
            } else {
                mask[[y, x]]
            };
        }
    }
}

/// 3×3 box blur applied only where the 3×3 neighbourhood is not uniform
#[must_use]
pub fn edge_blur(mask: ArrayView2<u8>) -> Array2<u8> {
    let mut output = mask.to_owned();
    edge_blur_rows(mask, 0..mask.nrows(), &mut output);
    output
}
