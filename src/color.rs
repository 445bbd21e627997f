//! Color metrics used by classification, selection and auto-thresholding

use crate::{
    error::{BgKeyError, Result},
    types::PixelBuffer,
};
use serde::{Deserialize, Serialize};

/// Red channel weight in the perceptual distance
pub const WEIGHT_R: u32 = 2;
/// Green channel weight in the perceptual distance
pub const WEIGHT_G: u32 = 4;
/// Blue channel weight in the perceptual distance
pub const WEIGHT_B: u32 = 3;

/// Upper end of the distance normalization range (Euclidean RGB diagonal)
pub const MAX_DISTANCE: f32 = 442.0;

/// Scale from the 0-100 UI tolerance to distance units
pub const TOLERANCE_SCALE: f32 = 4.42;

/// Plain RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for ColorSample {
    fn default() -> Self {
        Self::WHITE
    }
}

impl ColorSample {
    pub const WHITE: ColorSample = ColorSample::new(255, 255, 255);
    pub const BLACK: ColorSample = ColorSample::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a hex color string
    ///
    /// Supports both #RRGGBB and #RGB formats, with or without the `#`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim().trim_start_matches('#');
        let component = |s: &str, name: &str| {
            u8::from_str_radix(s, 16).map_err(|_| {
                BgKeyError::invalid_config(format!("Invalid {} component in hex color", name))
            })
        };

        match hex.len() {
            6 if hex.is_ascii() => Ok(Self::new(
                component(&hex[0..2], "red")?,
                component(&hex[2..4], "green")?,
                component(&hex[4..6], "blue")?,
            )),
            3 if hex.is_ascii() => Ok(Self::new(
                component(&hex[0..1], "red")? * 17,
                component(&hex[1..2], "green")? * 17,
                component(&hex[2..3], "blue")? * 17,
            )),
            _ => Err(BgKeyError::invalid_config(
                "Color must be in #RRGGBB or #RGB format",
            )),
        }
    }

    /// Format as `#rrggbb`
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Weighted squared distance `2ΔR² + 4ΔG² + 3ΔB²`
///
/// Use this for comparisons in hot loops; take the root only when an actual
/// metric value is needed.
#[inline]
#[must_use]
pub fn distance_squared(a: ColorSample, b: ColorSample) -> u32 {
    let dr = u32::from(a.r.abs_diff(b.r));
    let dg = u32::from(a.g.abs_diff(b.g));
    let db = u32::from(a.b.abs_diff(b.b));
    WEIGHT_R * dr * dr + WEIGHT_G * dg * dg + WEIGHT_B * db * db
}

/// Weighted color distance
#[inline]
#[must_use]
pub fn distance(a: ColorSample, b: ColorSample) -> f32 {
    (distance_squared(a, b) as f32).sqrt()
}

/// Convert a 0-100 tolerance into a distance cutoff
#[inline]
#[must_use]
pub fn tolerance_to_distance(tolerance: f32) -> f32 {
    tolerance * TOLERANCE_SCALE
}

const QUANT_SHIFT: u32 = 5;
const QUANT_LEVELS: usize = 8;

#[derive(Clone, Copy, Default)]
struct Bucket {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

/// Estimate the background color from the four image corners
///
/// Each corner contributes a square block of side `min(20, min(w, h) / 10)`
/// (at least one pixel). Samples are quantized to 8 levels per channel and
/// the average of the most populated bucket wins. An empty buffer yields white.
#[must_use]
pub fn detect_dominant_color(buffer: &PixelBuffer) -> ColorSample {
    let (width, height) = (buffer.width, buffer.height);
    if width == 0 || height == 0 || buffer.data.len() < buffer.pixel_count() * 4 {
        return ColorSample::WHITE;
    }

    let block = (width.min(height) / 10).clamp(1, 20);
    let corners = [
        (0, 0),
        (width - block, 0),
        (0, height - block),
        (width - block, height - block),
    ];

    let mut buckets = [Bucket::default(); QUANT_LEVELS * QUANT_LEVELS * QUANT_LEVELS];
    for (cx, cy) in corners {
        for y in cy..cy + block {
            for x in cx..cx + block {
                let c = buffer.color_at(buffer.index_of(x, y));
                let key = (usize::from(c.r >> QUANT_SHIFT) * QUANT_LEVELS
                    + usize::from(c.g >> QUANT_SHIFT))
                    * QUANT_LEVELS
                    + usize::from(c.b >> QUANT_SHIFT);
                let bucket = &mut buckets[key];
                bucket.count += 1;
                bucket.r += u64::from(c.r);
                bucket.g += u64::from(c.g);
                bucket.b += u64::from(c.b);
            }
        }
    }

    // max_by_key keeps the last maximum; scan in reverse so ties go to the lowest index
    let best = buckets
        .iter()
        .rev()
        .max_by_key(|bucket| bucket.count)
        .copied()
        .unwrap_or_default();

    if best.count == 0 {
        return ColorSample::WHITE;
    }
    ColorSample::new(
        (best.r / best.count) as u8,
        (best.g / best.count) as u8,
        (best.b / best.count) as u8,
    )
}
