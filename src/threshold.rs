//! Histogram-based automatic threshold estimation (Otsu's method)

use crate::{
    color::{detect_dominant_color, distance, ColorSample, MAX_DISTANCE},
    error::Result,
    types::PixelBuffer,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of histogram bins
pub const HISTOGRAM_BINS: usize = 256;
/// Only every n-th pixel contributes to the histogram
pub const SAMPLE_STRIDE: usize = 4;
/// Lowest threshold the estimator will return
pub const MIN_AUTO_THRESHOLD: f32 = 20.0;
/// Highest threshold the estimator will return
pub const MAX_AUTO_THRESHOLD: f32 = 150.0;

/// Result of automatic threshold estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoThreshold {
    /// Distance cutoff separating background from foreground
    pub threshold: f32,
    /// Background color the distances were measured against
    pub dominant_color: ColorSample,
}

/// Estimate the background color and an optimal distance threshold
pub fn calculate_auto_threshold(buffer: &PixelBuffer) -> Result<AutoThreshold> {
    buffer.validate()?;

    let dominant_color = detect_dominant_color(buffer);
    let histogram = distance_histogram(buffer, dominant_color);
    let bin = otsu_bin(&histogram);
    let threshold = bin_to_threshold(bin);

    debug!(
        bin,
        threshold,
        dominant = %dominant_color.to_hex(),
        "Estimated auto threshold"
    );

    Ok(AutoThreshold {
        threshold,
        dominant_color,
    })
}

/// Histogram of distances to `reference`, sampled every `SAMPLE_STRIDE` pixels
#[must_use]
pub fn distance_histogram(buffer: &PixelBuffer, reference: ColorSample) -> [u64; HISTOGRAM_BINS] {
    let mut histogram = [0u64; HISTOGRAM_BINS];
    for index in (0..buffer.pixel_count()).step_by(SAMPLE_STRIDE) {
        let d = distance(buffer.color_at(index), reference);
        let bin = ((d / MAX_DISTANCE) * 255.0).floor() as usize;
        histogram[bin.min(HISTOGRAM_BINS - 1)] += 1;
    }
    histogram
}

/// Bin maximizing between-class variance
///
/// Bins `0..=t` form the background class. Returns 0 for an empty or
/// single-valued histogram.
#[must_use]
pub fn otsu_bin(histogram: &[u64; HISTOGRAM_BINS]) -> usize {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    let mut best_variance = 0.0f64;
    let mut best_bin = 0usize;

    for (t, &count) in histogram.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }

        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (total_sum - sum_bg) / weight_fg as f64;
        let variance = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_bin = t;
        }
    }
    best_bin
}

/// Convert a histogram bin to a distance cutoff, clamped to the allowed range
///
/// Uses the bin's upper edge so that the classifier's strict `distance <
/// threshold` test keeps every bin up to and including `bin` in the
/// background class.
#[must_use]
pub fn bin_to_threshold(bin: usize) -> f32 {
    let upper_edge = (bin as f32 + 1.0) * MAX_DISTANCE / 255.0;
    upper_edge
        .round()
        .clamp(MIN_AUTO_THRESHOLD, MAX_AUTO_THRESHOLD)
}
