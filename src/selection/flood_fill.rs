//! Contiguous color selection seeded from a single pixel

use super::state::{MagicRegion, RegionMode};
use crate::{
    color::{distance_squared, tolerance_to_distance, ColorSample},
    error::{BgKeyError, Result},
    mask::RleMask,
    types::{Bounds, PixelBuffer},
};
use tracing::debug;

const NEIGHBOURS_4: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Select the 4-connected region of pixels similar to the seed pixel
///
/// A pixel is accepted when its weighted squared distance to the seed color is
/// at most `(tolerance * 4.42)²`. The fill uses an explicit stack, so region
/// size is bounded by memory rather than call depth. The resulting mask is
/// relative to the region's bounding box and the region mode is `remove`.
pub fn select(buffer: &PixelBuffer, seed_x: u32, seed_y: u32, tolerance: f32) -> Result<MagicRegion> {
    buffer.validate()?;
    if !buffer.contains(seed_x, seed_y) {
        return Err(BgKeyError::out_of_bounds(
            seed_x,
            seed_y,
            buffer.width,
            buffer.height,
        ));
    }

    let width = buffer.width as usize;
    let height = buffer.height as usize;
    let seed_color = buffer.color_at(buffer.index_of(seed_x, seed_y));
    let cutoff = tolerance_to_distance(tolerance.clamp(0.0, 100.0));
    let cutoff_sq = cutoff * cutoff;

    let mut visited = vec![false; width * height];
    let mut selected: Vec<usize> = Vec::new();
    let mut stack = vec![(seed_x as usize, seed_y as usize)];
    visited[buffer.index_of(seed_x, seed_y)] = true;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (width, height, 0usize, 0usize);
    let (mut sum_r, mut sum_g, mut sum_b) = (0u64, 0u64, 0u64);

    while let Some((x, y)) = stack.pop() {
        let index = y * width + x;
        let color = buffer.color_at(index);
        if distance_squared(color, seed_color) as f32 > cutoff_sq {
            continue;
        }

        selected.push(index);
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
        sum_r += u64::from(color.r);
        sum_g += u64::from(color.g);
        sum_b += u64::from(color.b);

        for (dx, dy) in NEIGHBOURS_4 {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let neighbour = ny as usize * width + nx as usize;
            if !visited[neighbour] {
                visited[neighbour] = true;
                stack.push((nx as usize, ny as usize));
            }
        }
    }

    let pixel_count = selected.len();
    let average_color = match pixel_count as u64 {
        0 => seed_color,
        count => ColorSample::new(
            (sum_r / count) as u8,
            (sum_g / count) as u8,
            (sum_b / count) as u8,
        ),
    };

    // The seed always matches itself, so the box is never empty here
    let bounds = Bounds::new(
        min_x as u32,
        min_y as u32,
        (max_x + 1 - min_x) as u32,
        (max_y + 1 - min_y) as u32,
    );
    let box_width = bounds.width as usize;
    let mut relative = vec![false; bounds.area()];
    for index in selected {
        let (x, y) = (index % width, index / width);
        relative[(y - min_y) * box_width + (x - min_x)] = true;
    }
    let mask_rle = RleMask::encode(&relative);

    debug!(
        seed_x,
        seed_y,
        tolerance,
        pixel_count,
        runs = mask_rle.run_count(),
        "Magic selection filled"
    );

    Ok(MagicRegion::new(
        mask_rle,
        bounds,
        pixel_count,
        average_color,
        RegionMode::Remove,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_with_black_dot() -> PixelBuffer {
        let mut buffer = PixelBuffer::filled(4, 4, ColorSample::WHITE);
        let index = buffer.index_of(2, 2) * 4;
        buffer.data[index..index + 3].copy_from_slice(&[0, 0, 0]);
        buffer
    }

    #[test]
    fn test_excludes_dissimilar_pixel() {
        let buffer = white_with_black_dot();
        let region = select(&buffer, 0, 0, 10.0).unwrap();

        assert_eq!(region.pixel_count, 15);
        assert_eq!(region.mask_rle.count_set_bits(), 15);
        assert_eq!(region.bounds, Bounds::new(0, 0, 4, 4));
        assert_eq!(region.mode, RegionMode::Remove);
        assert_eq!(region.average_color, ColorSample::WHITE);
        assert!(!region.contains(2, 2));
        assert!(region.contains(3, 3));
    }

    #[test]
    fn test_seed_on_isolated_pixel() {
        let buffer = white_with_black_dot();
        let region = select(&buffer, 2, 2, 10.0).unwrap();
        assert_eq!(region.pixel_count, 1);
        assert_eq!(region.bounds, Bounds::new(2, 2, 1, 1));
        assert_eq!(region.mask_rle.as_slice(), &[0, 1]);
        assert_eq!(region.average_color, ColorSample::BLACK);
    }

    #[test]
    fn test_fill_is_four_connected() {
        // Two red pixels touching only diagonally
        let mut buffer = PixelBuffer::filled(3, 3, ColorSample::WHITE);
        for (x, y) in [(0u32, 0u32), (1, 1)] {
            let i = buffer.index_of(x, y) * 4;
            buffer.data[i..i + 3].copy_from_slice(&[255, 0, 0]);
        }
        let region = select(&buffer, 0, 0, 5.0).unwrap();
        assert_eq!(region.pixel_count, 1);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        // (0,5,0) vs black: d² = 4*25 = 100, cutoff at tolerance 10/4.42 ≈ 2.26 → 10.0
        let mut buffer = PixelBuffer::filled(2, 1, ColorSample::BLACK);
        buffer.data[4..7].copy_from_slice(&[0, 5, 0]);
        let cutoff_tolerance = 10.0 / 4.42;
        let region = select(&buffer, 0, 0, cutoff_tolerance + 1e-4).unwrap();
        assert_eq!(region.pixel_count, 2);
        let region = select(&buffer, 0, 0, cutoff_tolerance - 0.01).unwrap();
        assert_eq!(region.pixel_count, 1);
    }

    #[test]
    fn test_seed_out_of_bounds() {
        let buffer = white_with_black_dot();
        let err = select(&buffer, 4, 0, 10.0).unwrap_err();
        assert!(matches!(err, BgKeyError::InvalidGeometry(_)));
        assert!(err.to_string().contains("(4, 0)"));
    }

    #[test]
    fn test_invalid_buffer_rejected() {
        let buffer = PixelBuffer {
            width: 2,
            height: 2,
            data: vec![0; 3],
        };
        assert!(select(&buffer, 0, 0, 10.0).is_err());
    }

    #[test]
    fn test_large_region_does_not_recurse() {
        let buffer = PixelBuffer::filled(600, 600, ColorSample::new(0, 200, 0));
        let region = select(&buffer, 300, 300, 1.0).unwrap();
        assert_eq!(region.pixel_count, 360_000);
        assert_eq!(region.mask_rle.run_count(), 1);
    }
}
