//! Magic selection regions and the preview/commit state machine

use super::flood_fill::select;
use crate::{
    color::ColorSample,
    error::{BgKeyError, Result},
    mask::RleMask,
    types::{Bounds, PixelBuffer},
};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default magic selection tolerance (0-100)
pub const DEFAULT_TOLERANCE: f32 = 32.0;

/// What a committed region does to the alpha channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegionMode {
    /// Restore the pixels' original alpha
    Keep,
    /// Make the pixels fully transparent
    Remove,
}

impl Default for RegionMode {
    fn default() -> Self {
        Self::Remove
    }
}

impl std::fmt::Display for RegionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

impl std::str::FromStr for RegionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown region mode '{other}' (expected keep or remove)")),
        }
    }
}

/// A selected region stored as an RLE mask relative to its bounding box
///
/// Regions are never modified after construction. Changing the mode or
/// merging produces a new region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicRegion {
    pub id: String,
    pub mask_rle: RleMask,
    pub bounds: Bounds,
    pub pixel_count: usize,
    pub average_color: ColorSample,
    pub mode: RegionMode,
}

impl MagicRegion {
    #[must_use]
    pub fn new(
        mask_rle: RleMask,
        bounds: Bounds,
        pixel_count: usize,
        average_color: ColorSample,
        mode: RegionMode,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mask_rle,
            bounds,
            pixel_count,
            average_color,
            mode,
        }
    }

    /// Copy of this region with a different mode
    #[must_use]
    pub fn with_mode(&self, mode: RegionMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Check that the bounds fit the coordinate space and the mask agrees
    /// with them and with `pixel_count`
    pub fn validate(&self) -> Result<()> {
        let b = &self.bounds;
        if b.right().is_none() || b.bottom().is_none() {
            return Err(BgKeyError::invalid_geometry(format!(
                "Region {} at ({}, {}) size {}x{} extends past the coordinate range",
                self.id, b.x, b.y, b.width, b.height
            )));
        }
        if let Some((start, length)) = self.mask_rle.iter_runs().last() {
            if u64::from(start) + u64::from(length) > b.area() as u64 {
                return Err(BgKeyError::invalid_mask(format!(
                    "Region {} has runs past its {}x{} bounding box",
                    self.id, b.width, b.height
                )));
            }
        }
        let set = self.mask_rle.count_set_bits();
        if set != self.pixel_count {
            return Err(BgKeyError::invalid_mask(format!(
                "Region {} claims {} pixels but its mask sets {}",
                self.id, self.pixel_count, set
            )));
        }
        Ok(())
    }

    /// Whether the absolute pixel (x, y) is selected
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        let b = &self.bounds;
        let inside_x = x >= b.x && u64::from(x) < u64::from(b.x) + u64::from(b.width);
        let inside_y = y >= b.y && u64::from(y) < u64::from(b.y) + u64::from(b.height);
        if !inside_x || !inside_y {
            return false;
        }
        let relative = (y - b.y) as usize * b.width as usize + (x - b.x) as usize;
        self.mask_rle.contains(relative)
    }

    /// Visit the absolute coordinates of every selected pixel
    ///
    /// Run positions beyond the bounding box, and coordinates past
    /// `u32::MAX`, are ignored.
    pub fn for_each_pixel<F: FnMut(u32, u32)>(&self, mut f: F) {
        let box_width = self.bounds.width as usize;
        let area = self.bounds.area();
        if box_width == 0 {
            return;
        }
        for (start, length) in self.mask_rle.iter_runs() {
            let start = start as usize;
            let end = start.saturating_add(length as usize).min(area);
            for relative in start..end {
                let x = self.bounds.x.checked_add((relative % box_width) as u32);
                let y = self.bounds.y.checked_add((relative / box_width) as u32);
                if let (Some(x), Some(y)) = (x, y) {
                    f(x, y);
                }
            }
        }
    }

    /// Decode the mask into the coordinate frame of `target`
    ///
    /// Pixels falling outside `target` are dropped.
    #[must_use]
    pub fn reproject(&self, target: Bounds) -> Vec<bool> {
        let mut mask = vec![false; target.area()];
        let target_width = target.width as usize;
        let right = u64::from(target.x) + u64::from(target.width);
        let bottom = u64::from(target.y) + u64::from(target.height);
        self.for_each_pixel(|x, y| {
            if x >= target.x && y >= target.y && u64::from(x) < right && u64::from(y) < bottom {
                mask[(y - target.y) as usize * target_width + (x - target.x) as usize] = true;
            }
        });
        mask
    }
}

/// Merge same-mode regions into one region per mode
///
/// Output order follows the first appearance of each mode. Inputs are left
/// untouched.
#[must_use]
pub fn consolidate(regions: &[MagicRegion]) -> Vec<MagicRegion> {
    let mut modes: Vec<RegionMode> = Vec::new();
    for region in regions {
        if !modes.contains(&region.mode) {
            modes.push(region.mode);
        }
    }

    modes
        .into_iter()
        .filter_map(|mode| {
            let group: Vec<&MagicRegion> = regions.iter().filter(|r| r.mode == mode).collect();
            merge_group(&group, mode)
        })
        .collect()
}

fn merge_group(group: &[&MagicRegion], mode: RegionMode) -> Option<MagicRegion> {
    let first = group.first()?;
    let bounds = group
        .iter()
        .skip(1)
        .fold(first.bounds, |acc, region| acc.union(&region.bounds));
    let size = bounds.area();

    let merged = group.iter().fold(RleMask::empty(), |acc, region| {
        acc.merge(&RleMask::encode(&region.reproject(bounds)), size)
    });

    // Weighted by each region's own pixel count; overlaps count twice
    let (mut r, mut g, mut b, mut weight) = (0u64, 0u64, 0u64, 0u64);
    for region in group {
        let w = region.pixel_count as u64;
        r += u64::from(region.average_color.r) * w;
        g += u64::from(region.average_color.g) * w;
        b += u64::from(region.average_color.b) * w;
        weight += w;
    }
    let average_color = if weight > 0 {
        ColorSample::new((r / weight) as u8, (g / weight) as u8, (b / weight) as u8)
    } else {
        first.average_color
    };

    let pixel_count = merged.count_set_bits();
    Some(MagicRegion::new(merged, bounds, pixel_count, average_color, mode))
}

/// Apply committed regions to a buffer's alpha channel, in order
///
/// `remove` regions clear alpha. `keep` regions restore the alpha the pixel
/// had before the job, taken from `original_alpha` (shape `(height, width)`).
/// Pixels outside the buffer are skipped. Returns the number of pixels written.
pub fn stamp_regions(
    buffer: &mut PixelBuffer,
    regions: &[MagicRegion],
    original_alpha: ArrayView2<u8>,
) -> usize {
    let mut stamped = 0;
    for region in regions {
        region.for_each_pixel(|x, y| {
            if !buffer.contains(x, y) {
                return;
            }
            let alpha = match region.mode {
                RegionMode::Remove => 0,
                RegionMode::Keep => original_alpha
                    .get([y as usize, x as usize])
                    .copied()
                    .unwrap_or(255),
            };
            let index = buffer.index_of(x, y);
            buffer.set_alpha(index, alpha);
            stamped += 1;
        });
    }
    stamped
}

/// Preview/commit state of the magic selection tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MagicSelectionState {
    pub is_active: bool,
    /// Fill tolerance (0-100)
    pub tolerance: f32,
    pub preview_region: Option<MagicRegion>,
    pub applied_regions: Vec<MagicRegion>,
    pub last_seed: Option<(u32, u32)>,
}

impl Default for MagicSelectionState {
    fn default() -> Self {
        Self {
            is_active: false,
            tolerance: DEFAULT_TOLERANCE,
            preview_region: None,
            applied_regions: Vec::new(),
            last_seed: None,
        }
    }
}

impl MagicSelectionState {
    /// Validate the preview and every applied region
    pub fn validate(&self) -> Result<()> {
        self.preview_region
            .iter()
            .chain(&self.applied_regions)
            .try_for_each(MagicRegion::validate)
    }

    /// Check that every applied region lies inside a `width`×`height` image
    pub fn check_fits(&self, width: u32, height: u32) -> Result<()> {
        match self
            .applied_regions
            .iter()
            .find(|region| !region.bounds.fits_within(width, height))
        {
            Some(region) => Err(BgKeyError::invalid_geometry(format!(
                "Region {} at ({}, {}) size {}x{} does not fit a {}x{} image",
                region.id,
                region.bounds.x,
                region.bounds.y,
                region.bounds.width,
                region.bounds.height,
                width,
                height
            ))),
            None => Ok(()),
        }
    }

    /// Run a fill at (x, y) and store it as the preview
    pub fn select_at(&mut self, buffer: &PixelBuffer, x: u32, y: u32) -> Result<&MagicRegion> {
        let region = select(buffer, x, y, self.tolerance)?;
        self.last_seed = Some((x, y));
        self.is_active = true;
        Ok(&*self.preview_region.insert(region))
    }

    /// Change the tolerance, re-running the last fill if there is one
    pub fn set_tolerance(
        &mut self,
        tolerance: f32,
        buffer: &PixelBuffer,
    ) -> Result<Option<&MagicRegion>> {
        self.tolerance = tolerance.clamp(0.0, 100.0);
        match self.last_seed {
            Some((x, y)) => self.select_at(buffer, x, y).map(Some),
            None => Ok(None),
        }
    }

    /// Move the preview into the applied list with `mode`
    ///
    /// When more than `max_applied` regions are applied, same-mode regions are
    /// consolidated. Returns false if there was no preview.
    pub fn commit(&mut self, mode: RegionMode, max_applied: usize) -> bool {
        let Some(preview) = self.preview_region.take() else {
            return false;
        };
        self.applied_regions.push(preview.with_mode(mode));
        self.last_seed = None;

        if self.applied_regions.len() > max_applied {
            let before = self.applied_regions.len();
            self.applied_regions = consolidate(&self.applied_regions);
            debug!(
                before,
                after = self.applied_regions.len(),
                "Consolidated applied magic regions"
            );
        }
        true
    }

    /// Drop the preview without committing it
    pub fn cancel_preview(&mut self) {
        self.preview_region = None;
        self.last_seed = None;
    }

    /// Drop the preview and every applied region; the tolerance is kept
    pub fn clear(&mut self) {
        *self = Self {
            tolerance: self.tolerance,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn striped() -> PixelBuffer {
        // Left two columns navy, right two columns blue; distance ≈ 346
        let mut buffer = PixelBuffer::filled(4, 3, ColorSample::new(0, 0, 255));
        for y in 0..3 {
            for x in 0..2 {
                let i = buffer.index_of(x, y) * 4;
                buffer.data[i..i + 3].copy_from_slice(&[0, 0, 55]);
            }
        }
        buffer
    }

    #[test]
    fn test_select_and_commit() {
        let buffer = striped();
        let mut state = MagicSelectionState::default();

        let preview = state.select_at(&buffer, 0, 0).unwrap();
        assert_eq!(preview.pixel_count, 6);
        assert!(state.is_active);
        assert_eq!(state.last_seed, Some((0, 0)));

        assert!(state.commit(RegionMode::Keep, 20));
        assert!(state.preview_region.is_none());
        assert_eq!(state.applied_regions.len(), 1);
        assert_eq!(state.applied_regions[0].mode, RegionMode::Keep);

        // Nothing left to commit
        assert!(!state.commit(RegionMode::Keep, 20));
    }

    #[test]
    fn test_set_tolerance_reselects() {
        let buffer = striped();
        let mut state = MagicSelectionState::default();
        assert!(state.set_tolerance(50.0, &buffer).unwrap().is_none());

        state.select_at(&buffer, 3, 0).unwrap();
        let region = state.set_tolerance(100.0, &buffer).unwrap().unwrap();
        assert_eq!(region.pixel_count, 12);
        assert_eq!(state.tolerance, 100.0);

        state.set_tolerance(250.0, &buffer).unwrap();
        assert_eq!(state.tolerance, 100.0);
    }

    #[test]
    fn test_cancel_and_clear() {
        let buffer = striped();
        let mut state = MagicSelectionState::default();
        state.select_at(&buffer, 0, 0).unwrap();
        state.commit(RegionMode::Remove, 20);
        state.select_at(&buffer, 3, 2).unwrap();

        state.cancel_preview();
        assert!(state.preview_region.is_none());
        assert_eq!(state.applied_regions.len(), 1);

        state.tolerance = 12.0;
        state.clear();
        assert!(state.applied_regions.is_empty());
        assert!(!state.is_active);
        assert_eq!(state.tolerance, 12.0);
    }

    #[test]
    fn test_consolidation_keeps_union() {
        let buffer = PixelBuffer::filled(8, 8, ColorSample::WHITE);
        let mut state = MagicSelectionState {
            tolerance: 0.0,
            ..MagicSelectionState::default()
        };
        let seeds = [(0u32, 0u32), (7, 7), (3, 4)];
        for (x, y) in seeds {
            state.select_at(&buffer, x, y).unwrap();
            // Shrink the preview to the single seed pixel
            let region = MagicRegion::new(
                RleMask::encode(&[true]),
                Bounds::new(x, y, 1, 1),
                1,
                ColorSample::WHITE,
                RegionMode::Remove,
            );
            state.preview_region = Some(region);
            state.commit(RegionMode::Remove, 2);
        }

        assert_eq!(state.applied_regions.len(), 1);
        let merged = &state.applied_regions[0];
        assert_eq!(merged.bounds, Bounds::new(0, 0, 8, 8));
        assert_eq!(merged.pixel_count, 3);
        assert_eq!(merged.pixel_count, merged.mask_rle.count_set_bits());
        for (x, y) in seeds {
            assert!(merged.contains(x, y));
        }
        assert!(!merged.contains(1, 1));
    }

    #[test]
    fn test_consolidation_groups_by_mode() {
        let a = MagicRegion::new(
            RleMask::encode(&[true, true]),
            Bounds::new(0, 0, 2, 1),
            2,
            ColorSample::BLACK,
            RegionMode::Keep,
        );
        let b = MagicRegion::new(
            RleMask::encode(&[true]),
            Bounds::new(5, 5, 1, 1),
            1,
            ColorSample::WHITE,
            RegionMode::Remove,
        );
        let c = MagicRegion::new(
            RleMask::encode(&[true]),
            Bounds::new(1, 2, 1, 1),
            1,
            ColorSample::BLACK,
            RegionMode::Keep,
        );
        let inputs = vec![a.clone(), b.clone(), c.clone()];
        let merged = consolidate(&inputs);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].mode, RegionMode::Keep);
        assert_eq!(merged[0].bounds, Bounds::new(0, 0, 2, 3));
        assert_eq!(merged[0].pixel_count, 3);
        assert_eq!(merged[1].pixel_count, 1);
        // Originals are unchanged
        assert_eq!(inputs, vec![a, b, c]);
    }

    #[test]
    fn test_stamp_remove_then_keep() {
        let mut buffer = PixelBuffer::filled(3, 1, ColorSample::WHITE);
        let mut original = Array2::from_elem((1, 3), 255u8);
        original[[0, 2]] = 90;

        let remove_all = MagicRegion::new(
            RleMask::encode(&[true, true, true]),
            Bounds::new(0, 0, 3, 1),
            3,
            ColorSample::WHITE,
            RegionMode::Remove,
        );
        let keep_right = MagicRegion::new(
            RleMask::encode(&[true, true]),
            Bounds::new(1, 0, 2, 1),
            2,
            ColorSample::WHITE,
            RegionMode::Keep,
        );

        let stamped = stamp_regions(&mut buffer, &[remove_all, keep_right], original.view());
        assert_eq!(stamped, 5);
        assert_eq!(buffer.alpha_at(0), 0);
        assert_eq!(buffer.alpha_at(1), 255);
        assert_eq!(buffer.alpha_at(2), 90);
    }

    #[test]
    fn test_stamp_clips_to_buffer() {
        let mut buffer = PixelBuffer::filled(2, 2, ColorSample::WHITE);
        let original = buffer.alpha_mask();
        let overhanging = MagicRegion::new(
            RleMask::encode(&[true; 4]),
            Bounds::new(1, 1, 2, 2),
            4,
            ColorSample::WHITE,
            RegionMode::Remove,
        );
        assert_eq!(stamp_regions(&mut buffer, &[overhanging], original.view()), 1);
        assert_eq!(buffer.alpha_at(3), 0);
    }

    #[test]
    fn test_region_near_u32_max_does_not_overflow() {
        let edge = MagicRegion::new(
            RleMask::encode(&[true; 4]),
            Bounds::new(u32::MAX - 1, 0, 4, 1),
            4,
            ColorSample::WHITE,
            RegionMode::Remove,
        );
        assert!(matches!(edge.validate(), Err(BgKeyError::InvalidGeometry(_))));

        // Only the coordinates that exist are visited
        let mut visited = Vec::new();
        edge.for_each_pixel(|x, y| visited.push((x, y)));
        assert_eq!(visited, vec![(u32::MAX - 1, 0), (u32::MAX, 0)]);
        assert!(edge.contains(u32::MAX, 0));
        assert!(!edge.contains(0, 0));

        let target = Bounds::new(u32::MAX - 3, 0, 3, 1);
        assert_eq!(edge.reproject(target), vec![false, false, true]);

        let mut buffer = PixelBuffer::filled(4, 4, ColorSample::WHITE);
        let original = buffer.alpha_mask();
        assert_eq!(stamp_regions(&mut buffer, &[edge], original.view()), 0);
    }

    #[test]
    fn test_region_validation() {
        let good = MagicRegion::new(
            RleMask::encode(&[true, false, true, true]),
            Bounds::new(1, 1, 2, 2),
            3,
            ColorSample::WHITE,
            RegionMode::Keep,
        );
        assert!(good.validate().is_ok());

        let miscounted = MagicRegion {
            pixel_count: 9,
            ..good.clone()
        };
        let err = miscounted.validate().unwrap_err();
        assert!(matches!(err, BgKeyError::InvalidMask(_)));
        assert!(err.to_string().contains("claims 9 pixels"));

        let overrun = MagicRegion {
            mask_rle: RleMask::from_runs(vec![2, 3]).unwrap(),
            ..good.clone()
        };
        assert!(matches!(overrun.validate(), Err(BgKeyError::InvalidMask(_))));

        let state = MagicSelectionState {
            preview_region: Some(miscounted),
            applied_regions: vec![good.clone()],
            ..MagicSelectionState::default()
        };
        assert!(state.validate().is_err());

        let state = MagicSelectionState {
            applied_regions: vec![good],
            ..MagicSelectionState::default()
        };
        assert!(state.validate().is_ok());
        assert!(state.check_fits(3, 3).is_ok());
        assert!(matches!(
            state.check_fits(2, 3),
            Err(BgKeyError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_region_mode_parsing() {
        assert_eq!("Keep".parse::<RegionMode>().unwrap(), RegionMode::Keep);
        assert!("erase".parse::<RegionMode>().is_err());
    }

    #[test]
    fn test_state_serde_uses_camel_case() {
        let json = serde_json::to_value(MagicSelectionState::default()).unwrap();
        assert_eq!(json["isActive"], false);
        assert!(json["appliedRegions"].as_array().unwrap().is_empty());
        let parsed: MagicSelectionState = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, MagicSelectionState::default());
    }
}
