//! Edge refinement pipeline for advanced edge modes
//!
//! The classifier hands over an auxiliary alpha estimate. Each phase here maps
//! that mask (and, for decontamination, the pixel colors) to a new value; no
//! phase mutates the output of an earlier one in place. Phases can run in row
//! bands so a caller can stop between bands.

pub mod decontaminate;
pub mod morphology;
pub mod smooth;

pub use decontaminate::{decontaminate, decontaminate_rows};
pub use morphology::{dilate, dilate_rows, edge_blur, edge_blur_rows, erode, erode_rows};
pub use smooth::{smooth, smooth_rows};

use crate::{
    color::ColorSample,
    config::EdgeMode,
    services::ProcessingStage,
    types::PixelBuffer,
};
use ndarray::{Array2, ArrayView2};
use std::ops::Range;

/// Alpha midpoint separating "mostly transparent" from "mostly opaque"
pub const ALPHA_MIDPOINT: u8 = 128;

const NEIGHBOURS_4: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

fn neighbours(mask: ArrayView2<u8>, x: usize, y: usize) -> impl Iterator<Item = u8> + '_ {
    let (height, width) = mask.dim();
    NEIGHBOURS_4.iter().filter_map(move |&(dx, dy)| {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        (nx >= 0 && ny >= 0 && nx < width as isize && ny < height as isize)
            .then(|| mask[[ny as usize, nx as usize]])
    })
}

/// Whether some 4-neighbour has a different alpha
#[must_use]
pub fn is_transition(mask: ArrayView2<u8>, x: usize, y: usize) -> bool {
    let alpha = mask[[y, x]];
    neighbours(mask, x, y).any(|n| n != alpha)
}

/// Semi-transparent pixels, and hard pixels with a 4-neighbour across the midpoint
#[must_use]
pub fn is_edge_pixel(mask: ArrayView2<u8>, x: usize, y: usize) -> bool {
    let alpha = mask[[y, x]];
    if alpha > 0 && alpha < 255 {
        return true;
    }
    let opaque = alpha >= ALPHA_MIDPOINT;
    neighbours(mask, x, y).any(|n| (n >= ALPHA_MIDPOINT) != opaque)
}

/// One step of the refinement pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefinePhase {
    Smooth { radius: u32 },
    Erode { radius: u32 },
    Dilate { radius: u32 },
    EdgeBlur,
    Decontaminate { radius: u32, background: ColorSample },
}

impl RefinePhase {
    /// Phases run for `edge_mode`; empty for non-advanced modes
    #[must_use]
    pub fn plan(edge_mode: EdgeMode, radius: u32, background: ColorSample) -> Vec<RefinePhase> {
        match edge_mode {
            EdgeMode::Hard | EdgeMode::Feathered => Vec::new(),
            EdgeMode::Smooth => vec![RefinePhase::Smooth { radius }],
            EdgeMode::Refine => vec![
                RefinePhase::Erode { radius },
                RefinePhase::Dilate { radius },
                RefinePhase::EdgeBlur,
            ],
            EdgeMode::Decontaminate => vec![
                RefinePhase::Smooth {
                    radius: (radius / 2).max(1),
                },
                RefinePhase::Decontaminate { radius, background },
            ],
        }
    }

    /// Progress stage reported while this phase runs
    #[must_use]
    pub fn stage(&self) -> ProcessingStage {
        match self {
            RefinePhase::Smooth { .. } => ProcessingStage::Smoothing,
            RefinePhase::Erode { .. } => ProcessingStage::Erosion,
            RefinePhase::Dilate { .. } => ProcessingStage::Dilation,
            RefinePhase::EdgeBlur => ProcessingStage::EdgeBlur,
            RefinePhase::Decontaminate { .. } => ProcessingStage::Decontamination,
        }
    }

    /// Run the phase over the whole image, producing a new buffer and mask
    #[must_use]
    pub fn apply(&self, mut buffer: PixelBuffer, mask: Array2<u8>) -> (PixelBuffer, Array2<u8>) {
        let mut next = mask.clone();
        self.apply_rows(&mut buffer, mask.view(), 0..mask.nrows(), &mut next);
        if matches!(self, RefinePhase::Decontaminate { .. }) {
            buffer.apply_alpha_mask(next.view());
        }
        (buffer, next)
    }

    /// Run the phase over rows `rows`
    ///
    /// Mask phases read `mask` and write the same rows of `next`, which must
    /// start as a copy of `mask`. Decontamination rewrites colors in `buffer`
    /// and leaves `next` alone. Bands may be run in any order.
    pub fn apply_rows(
        &self,
        buffer: &mut PixelBuffer,
        mask: ArrayView2<u8>,
        rows: Range<usize>,
        next: &mut Array2<u8>,
    ) {
        match *self {
            RefinePhase::Smooth { radius } => smooth_rows(mask, radius, rows, next),
            RefinePhase::Erode { radius } => erode_rows(mask, radius, rows, next),
            RefinePhase::Dilate { radius } => dilate_rows(mask, radius, rows, next),
            RefinePhase::EdgeBlur => edge_blur_rows(mask, rows, next),
            RefinePhase::Decontaminate { radius, background } => {
                decontaminate_rows(buffer, mask, background, radius, rows);
            },
        }
    }
}

/// Rows per refinement band for a `width`-pixel image, at least one
#[must_use]
pub fn band_rows(width: usize, chunk_size: usize) -> usize {
    (chunk_size / width.max(1)).max(1)
}
