//! Color-spill removal on semi-transparent edge pixels
//!
//! Pixels along a keyed edge carry a blend of foreground and background color.
//! For each edge pixel the strength of the contamination is estimated from how
//! close it is to the background color and how transparent it is. Strongly
//! contaminated pixels are pulled toward a clean foreground color sampled
//! from nearby fully opaque interior pixels.

use super::is_edge_pixel;
use crate::{
    color::{distance, ColorSample, MAX_DISTANCE},
    types::{PixelBuffer, CHANNELS},
};
use ndarray::ArrayView2;
use std::ops::Range;

/// Contamination below this strength is left alone
pub const MIN_STRENGTH: f32 = 0.05;

/// Lower bound on alpha when unmixing from the background
const MIN_UNMIX_ALPHA: f32 = 0.05;

/// Background similarity times background influence for one pixel
#[inline]
#[must_use]
pub fn contamination_strength(color: ColorSample, alpha: u8, background: ColorSample) -> f32 {
    let similarity = 1.0 - (distance(color, background) / MAX_DISTANCE).min(1.0);
    let influence = 1.0 - f32::from(alpha) / 255.0;
    similarity * influence
}

/// Mean color of opaque, non-edge pixels within ±`radius` of (x, y)
#[must_use]
pub fn sample_foreground(
    buffer: &PixelBuffer,
    mask: ArrayView2<u8>,
    x: usize,
    y: usize,
    radius: usize,
) -> Option<ColorSample> {
    let (height, width) = mask.dim();
    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);

    for sy in y.saturating_sub(radius)..=(y + radius).min(height - 1) {
        for sx in x.saturating_sub(radius)..=(x + radius).min(width - 1) {
            if mask[[sy, sx]] != 255 || is_edge_pixel(mask, sx, sy) {
                continue;
            }
            let c = buffer.color_at(sy * width + sx);
            r += u64::from(c.r);
            g += u64::from(c.g);
            b += u64::from(c.b);
            count += 1;
        }
    }

    (count > 0).then(|| {
        ColorSample::new((r / count) as u8, (g / count) as u8, (b / count) as u8)
    })
}

/// Recover the foreground color by removing the background contribution
#[inline]
#[must_use]
pub fn unmix(color: ColorSample, alpha: u8, background: ColorSample) -> [f32; 3] {
    let a = (f32::from(alpha) / 255.0).max(MIN_UNMIX_ALPHA);
    let channel = |c: u8, bg: u8| (f32::from(c) - (1.0 - a) * f32::from(bg)) / a;
    [
        channel(color.r, background.r),
        channel(color.g, background.g),
        channel(color.b, background.b),
    ]
}

/// Return a copy of `buffer` with background spill removed along mask edges
///
/// `mask` is the refined alpha estimate (already smoothed). The returned buffer
/// carries `mask` in its alpha channel.
#[must_use]
pub fn decontaminate(
    buffer: &PixelBuffer,
    mask: ArrayView2<u8>,
    background: ColorSample,
    radius: u32,
) -> PixelBuffer {
    let mut output = buffer.clone();
    decontaminate_rows(&mut output, mask, background, radius, 0..mask.nrows());
    output.apply_alpha_mask(mask);
    output
}

/// Remove spill from the edge pixels of rows `rows`, in place
///
/// Only edge pixels are rewritten and only non-edge pixels are sampled, so
/// bands may run in any order on the same buffer. Alpha is not touched.
pub fn decontaminate_rows(
    buffer: &mut PixelBuffer,
    mask: ArrayView2<u8>,
    background: ColorSample,
    radius: u32,
    rows: Range<usize>,
) {
    let width = mask.ncols();
    let radius = radius.max(1) as usize;

    for y in rows {
        for x in 0..width {
            let alpha = mask[[y, x]];
            if !is_edge_pixel(mask, x, y) {
                continue;
            }

            let index = y * width + x;
            let color = buffer.color_at(index);
            let strength = contamination_strength(color, alpha, background);
            if strength <= MIN_STRENGTH {
                continue;
            }

            let target = match sample_foreground(buffer, mask, x, y, radius) {
                Some(fg) => [f32::from(fg.r), f32::from(fg.g), f32::from(fg.b)],
                None => unmix(color, alpha, background),
            };
            let current = [f32::from(color.r), f32::from(color.g), f32::from(color.b)];

            let offset = index * CHANNELS;
            for channel in 0..3 {
                let shifted = current[channel] + strength * (target[channel] - current[channel]);
                buffer.data[offset + channel] = shifted.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Red foreground on the right half, green background spill in the
    /// two-pixel transition band.
    fn spill_fixture() -> (PixelBuffer, Array2<u8>) {
        let (width, height) = (12u32, 6u32);
        let mut buffer = PixelBuffer::filled(width, height, ColorSample::new(0, 255, 0));
        let mut mask = Array2::<u8>::zeros((height as usize, width as usize));
        for y in 0..height as usize {
            for x in 0..width as usize {
                let idx = (y * width as usize + x) * 4;
                if x >= 6 {
                    buffer.data[idx..idx + 3].copy_from_slice(&[220, 20, 20]);
                    mask[[y, x]] = 255;
                } else if x >= 4 {
                    buffer.data[idx..idx + 3].copy_from_slice(&[110, 140, 10]);
                    mask[[y, x]] = if x == 4 { 60 } else { 140 };
                }
            }
        }
        (buffer, mask)
    }

    #[test]
    fn test_strength_components() {
        let bg = ColorSample::new(0, 255, 0);
        assert_eq!(contamination_strength(bg, 255, bg), 0.0);
        assert!((contamination_strength(bg, 0, bg) - 1.0).abs() < 1e-6);
        let far = ColorSample::new(255, 0, 255);
        assert_eq!(contamination_strength(far, 0, bg), 0.0);
    }

    #[test]
    fn test_unmix_recovers_blend() {
        let fg = ColorSample::new(200, 0, 0);
        let bg = ColorSample::new(0, 200, 0);
        // 50% blend of fg over bg
        let mixed = ColorSample::new(100, 100, 0);
        let recovered = unmix(mixed, 128, bg);
        assert!((recovered[0] - f32::from(fg.r)).abs() < 2.0);
        assert!(recovered[1].abs() < 2.0);
    }

    #[test]
    fn test_spill_is_pulled_toward_foreground() {
        let (buffer, mask) = spill_fixture();
        let out = decontaminate(&buffer, mask.view(), ColorSample::new(0, 255, 0), 4);

        let edge = out.color_at(2 * 12 + 4);
        let before = buffer.color_at(2 * 12 + 4);
        assert!(edge.g < before.g, "green spill should be reduced");
        assert!(edge.r >= before.r, "red should move toward the foreground");

        // Interior pixels are untouched and alpha comes from the mask
        assert_eq!(out.color_at(2 * 12 + 10), ColorSample::new(220, 20, 20));
        assert_eq!(out.alpha_at(2 * 12 + 4), 60);
        assert_eq!(out.alpha_at(2 * 12 + 0), 0);
    }

    #[test]
    fn test_bands_in_reverse_order_match_whole_image() {
        let (buffer, mask) = spill_fixture();
        let background = ColorSample::new(0, 255, 0);
        let mut banded = buffer.clone();
        for start in [4, 2, 0] {
            decontaminate_rows(&mut banded, mask.view(), background, 4, start..start + 2);
        }
        banded.apply_alpha_mask(mask.view());
        assert_eq!(banded, decontaminate(&buffer, mask.view(), background, 4));
    }

    #[test]
    fn test_sample_foreground_skips_edges() {
        let (buffer, mask) = spill_fixture();
        let fg = sample_foreground(&buffer, mask.view(), 5, 2, 3).unwrap();
        assert_eq!(fg, ColorSample::new(220, 20, 20));
        assert!(sample_foreground(&buffer, mask.view(), 0, 0, 1).is_none());
    }
}
