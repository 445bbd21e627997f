//! Core types shared by the keying pipeline

use crate::{
    color::ColorSample,
    error::{BgKeyError, Result},
};
use image::RgbaImage;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Bytes per RGBA pixel
pub const CHANNELS: usize = 4;

/// RGBA8 pixel buffer, row-major, 4 bytes per pixel
///
/// Buffers are moved into jobs rather than shared. Clone before submitting
/// if the original pixels are still needed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes, checking that the length matches the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let buffer = Self {
            width,
            height,
            data,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    /// Create a buffer filled with a single opaque color
    #[must_use]
    pub fn filled(width: u32, height: u32, color: ColorSample) -> Self {
        let data = [color.r, color.g, color.b, 255].repeat(width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Check for zero dimensions and a data length mismatch
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BgKeyError::invalid_geometry(format!(
                "Buffer has zero size ({}x{})",
                self.width, self.height
            )));
        }
        let expected = self.pixel_count() * CHANNELS;
        if self.data.len() != expected {
            return Err(BgKeyError::invalid_geometry(format!(
                "Buffer data length {} does not match {}x{} RGBA ({} bytes)",
                self.data.len(),
                self.width,
                self.height,
                expected
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Flattened pixel index of (x, y)
    #[must_use]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// RGB of the pixel at a flattened index
    #[must_use]
    pub fn color_at(&self, index: usize) -> ColorSample {
        let offset = index * CHANNELS;
        ColorSample::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        )
    }

    #[must_use]
    pub fn alpha_at(&self, index: usize) -> u8 {
        self.data[index * CHANNELS + 3]
    }

    pub fn set_alpha(&mut self, index: usize, alpha: u8) {
        self.data[index * CHANNELS + 3] = alpha;
    }

    /// Copy of the alpha channel as a (height, width) array
    #[must_use]
    pub fn alpha_mask(&self) -> Array2<u8> {
        let alphas: Vec<u8> = self.data.chunks_exact(CHANNELS).map(|px| px[3]).collect();
        Array2::from_shape_vec((self.height as usize, self.width as usize), alphas)
            .unwrap_or_else(|_| Array2::zeros((self.height as usize, self.width as usize)))
    }

    /// Overwrite the alpha channel from a (height, width) mask
    pub fn apply_alpha_mask(&mut self, mask: ArrayView2<u8>) {
        for (px, &alpha) in self.data.chunks_exact_mut(CHANNELS).zip(mask.iter()) {
            px[3] = alpha;
        }
    }

    /// Convert into an `image` crate buffer without copying pixel data
    pub fn into_rgba_image(self) -> Result<RgbaImage> {
        let (width, height) = (self.width, self.height);
        RgbaImage::from_raw(width, height, self.data).ok_or_else(|| {
            BgKeyError::invalid_geometry(format!(
                "Buffer data does not fit a {}x{} RGBA image",
                width, height
            ))
        })
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered by the rectangle
    #[must_use]
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Exclusive right edge, or `None` if it lies past `u32::MAX`
    #[must_use]
    pub fn right(&self) -> Option<u32> {
        self.x.checked_add(self.width)
    }

    /// Exclusive bottom edge, or `None` if it lies past `u32::MAX`
    #[must_use]
    pub fn bottom(&self) -> Option<u32> {
        self.y.checked_add(self.height)
    }

    /// Whether the rectangle lies inside a `width`×`height` image
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        matches!((self.right(), self.bottom()), (Some(r), Some(b)) if r <= width && b <= height)
    }

    /// Smallest rectangle covering both
    ///
    /// Edges past `u32::MAX` saturate.
    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.x.saturating_add(self.width).max(other.x.saturating_add(other.width));
        let y1 = self.y.saturating_add(self.height).max(other.y.saturating_add(other.height));
        Bounds::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Wall-clock timings of one processing job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTimings {
    /// Key color resolution, including auto-threshold estimation
    pub keying_ms: u64,
    pub classification_ms: u64,
    pub refinement_ms: u64,
    pub stamping_ms: u64,
    pub total_ms: u64,
}
