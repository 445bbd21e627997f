//! Per-pixel foreground/background classification
//!
//! Every pixel is tested against one or more key colors. The first key color
//! whose cutoff the pixel falls strictly inside wins. What happens on a match
//! depends on the edge mode:
//!
//! - `hard`: alpha becomes 0
//! - `feathered`: alpha becomes a smoothstep falloff of the distance
//! - advanced modes: alpha is left alone and a normalized distance ratio is
//!   written to an auxiliary mask for the refinement pipeline
//!
//! Pixels that match nothing keep their alpha. Classification of one pixel
//! never looks at its neighbours, so any chunking of the index space gives the
//! same output.

use crate::{
    color::{detect_dominant_color, distance_squared, ColorSample},
    config::{EdgeMode, ProcessingMode, ProcessingSettings},
    error::Result,
    threshold::calculate_auto_threshold,
    types::{PixelBuffer, CHANNELS},
};
use ndarray::Array2;
use std::ops::Range;
use tracing::debug;

/// Fraction of the cutoff below which feathered alpha is fully transparent
pub const FEATHER_INNER_RATIO: f32 = 0.7;

/// A color to remove together with its distance cutoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyColor {
    pub color: ColorSample,
    pub cutoff: f32,
}

impl KeyColor {
    #[must_use]
    pub fn new(color: ColorSample, cutoff: f32) -> Self {
        Self { color, cutoff }
    }
}

/// Key colors and background estimate resolved from settings for one image
#[derive(Debug, Clone, PartialEq)]
pub struct Keying {
    pub keys: Vec<KeyColor>,
    /// Background color used by decontamination
    pub background: ColorSample,
    /// Effective threshold in auto/manual mode
    pub threshold: Option<f32>,
}

impl Keying {
    /// Resolve key colors for `buffer` under `settings`
    ///
    /// Auto mode reuses a cached threshold when the settings carry one and runs
    /// the estimator otherwise.
    pub fn resolve(buffer: &PixelBuffer, settings: &ProcessingSettings) -> Result<Self> {
        buffer.validate()?;

        let keying = match settings.mode {
            ProcessingMode::Auto => {
                let (threshold, background) = match settings.auto_threshold {
                    Some(cached) => (cached, detect_dominant_color(buffer)),
                    None => {
                        let auto = calculate_auto_threshold(buffer)?;
                        (auto.threshold, auto.dominant_color)
                    },
                };
                Self {
                    keys: vec![KeyColor::new(background, threshold)],
                    background,
                    threshold: Some(threshold),
                }
            },
            ProcessingMode::Manual => {
                let background = detect_dominant_color(buffer);
                Self {
                    keys: vec![KeyColor::new(background, settings.threshold)],
                    background,
                    threshold: Some(settings.threshold),
                }
            },
            ProcessingMode::ColorPicker => {
                let keys: Vec<KeyColor> = settings
                    .selected_colors
                    .iter()
                    .map(|selected| KeyColor::new(selected.color, selected.cutoff()))
                    .collect();
                let background = match keys.first() {
                    Some(first) => first.color,
                    None => detect_dominant_color(buffer),
                };
                Self {
                    keys,
                    background,
                    threshold: None,
                }
            },
        };

        debug!(
            mode = %settings.mode,
            keys = keying.keys.len(),
            background = %keying.background.to_hex(),
            threshold = ?keying.threshold,
            "Resolved keying parameters"
        );
        Ok(keying)
    }
}

/// Pixel classifier for one job
#[derive(Debug, Clone)]
pub struct Classifier {
    keys: Vec<KeyColor>,
    edge_mode: EdgeMode,
    feather_radius: f32,
}

impl Classifier {
    #[must_use]
    pub fn new(keys: Vec<KeyColor>, edge_mode: EdgeMode, feather_radius: u32) -> Self {
        Self {
            keys,
            edge_mode,
            feather_radius: feather_radius.max(1) as f32,
        }
    }

    #[must_use]
    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    /// First key color the pixel matches, with the metric distance to it
    #[inline]
    #[must_use]
    pub fn match_color(&self, color: ColorSample) -> Option<(KeyColor, f32)> {
        self.keys.iter().find_map(|key| {
            let d_sq = distance_squared(color, key.color) as f32;
            (d_sq < key.cutoff * key.cutoff).then(|| (*key, d_sq.sqrt()))
        })
    }

    /// Classify the pixels with flattened indices in `range`
    ///
    /// `data` is the whole RGBA buffer. `aux` must be the whole auxiliary mask
    /// (one byte per pixel) when the edge mode is advanced; it is ignored
    /// otherwise.
    pub fn classify_range(&self, data: &mut [u8], mut aux: Option<&mut [u8]>, range: Range<usize>) {
        for index in range {
            let offset = index * CHANNELS;
            let color = ColorSample::new(data[offset], data[offset + 1], data[offset + 2]);
            let Some((key, d)) = self.match_color(color) else {
                continue;
            };

            match self.edge_mode {
                EdgeMode::Hard => data[offset + 3] = 0,
                EdgeMode::Feathered => {
                    data[offset + 3] = feather_alpha(d, key.cutoff, self.feather_radius);
                },
                EdgeMode::Smooth | EdgeMode::Refine | EdgeMode::Decontaminate => {
                    if let Some(aux) = aux.as_deref_mut() {
                        aux[index] = distance_ratio(d, key.cutoff);
                    }
                },
            }
        }
    }

    /// Classify a whole buffer in one pass
    ///
    /// Returns the auxiliary mask for advanced edge modes.
    pub fn classify(&self, buffer: &mut PixelBuffer) -> Option<Array2<u8>> {
        let pixels = buffer.pixel_count();
        if self.edge_mode.is_advanced() {
            let mut aux = buffer.alpha_mask();
            if let Some(aux_slice) = aux.as_slice_mut() {
                self.classify_range(&mut buffer.data, Some(aux_slice), 0..pixels);
            }
            Some(aux)
        } else {
            self.classify_range(&mut buffer.data, None, 0..pixels);
            None
        }
    }
}

/// Cubic smoothstep falloff from `cutoff * 0.7` over `radius`
#[inline]
#[must_use]
pub fn feather_alpha(distance: f32, cutoff: f32, radius: f32) -> u8 {
    let t = ((distance - cutoff * FEATHER_INNER_RATIO) / radius.max(1.0)).clamp(0.0, 1.0);
    (255.0 * t * t * (3.0 - 2.0 * t)).round() as u8
}

/// Distance as a fraction of the cutoff, scaled to 0-255
#[inline]
#[must_use]
pub fn distance_ratio(distance: f32, cutoff: f32) -> u8 {
    if cutoff <= 0.0 {
        return 0;
    }
    ((distance / cutoff).min(1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingSettings;

    fn paint(buffer: &mut PixelBuffer, x: u32, y: u32, color: ColorSample) {
        let idx = buffer.index_of(x, y) * 4;
        buffer.data[idx..idx + 3].copy_from_slice(&[color.r, color.g, color.b]);
    }

    #[test]
    fn test_feather_alpha_curve() {
        // Fully transparent inside 70% of the cutoff
        assert_eq!(feather_alpha(10.0, 100.0, 5.0), 0);
        assert_eq!(feather_alpha(70.0, 100.0, 5.0), 0);
        // Fully opaque past 70% + radius
        assert_eq!(feather_alpha(75.0, 100.0, 5.0), 255);
        // Midpoint of smoothstep is 0.5
        assert_eq!(feather_alpha(72.5, 100.0, 5.0), 128);
    }

    #[test]
    fn test_distance_ratio() {
        assert_eq!(distance_ratio(0.0, 50.0), 0);
        assert_eq!(distance_ratio(25.0, 50.0), 128);
        assert_eq!(distance_ratio(80.0, 50.0), 255);
        assert_eq!(distance_ratio(5.0, 0.0), 0);
    }

    #[test]
    fn test_hard_mode_is_binary() {
        let mut buffer = PixelBuffer::filled(8, 8, ColorSample::WHITE);
        paint(&mut buffer, 3, 3, ColorSample::new(250, 250, 250));
        paint(&mut buffer, 4, 4, ColorSample::new(10, 10, 200));

        let classifier = Classifier::new(
            vec![KeyColor::new(ColorSample::WHITE, 40.0)],
            EdgeMode::Hard,
            5,
        );
        assert!(classifier.classify(&mut buffer).is_none());

        assert_eq!(buffer.alpha_at(buffer.index_of(0, 0)), 0);
        assert_eq!(buffer.alpha_at(buffer.index_of(3, 3)), 0);
        assert_eq!(buffer.alpha_at(buffer.index_of(4, 4)), 255);
        assert!(buffer.data.chunks(4).all(|px| px[3] == 0 || px[3] == 255));
    }

    #[test]
    fn test_strict_boundary() {
        // Distance exactly equal to the cutoff does not match
        let color = ColorSample::new(0, 1, 0); // d² = 4 from black
        let classifier = Classifier::new(
            vec![KeyColor::new(ColorSample::BLACK, 2.0)],
            EdgeMode::Hard,
            1,
        );
        assert!(classifier.match_color(color).is_none());
        assert!(classifier.match_color(ColorSample::BLACK).is_some());

        let zero = Classifier::new(
            vec![KeyColor::new(ColorSample::BLACK, 0.0)],
            EdgeMode::Hard,
            1,
        );
        assert!(zero.match_color(ColorSample::BLACK).is_none());
    }

    #[test]
    fn test_first_matching_color_wins() {
        let classifier = Classifier::new(
            vec![
                KeyColor::new(ColorSample::new(0, 200, 0), 10.0),
                KeyColor::new(ColorSample::new(0, 190, 0), 100.0),
            ],
            EdgeMode::Feathered,
            5,
        );
        let (key, _) = classifier.match_color(ColorSample::new(0, 200, 0)).unwrap();
        assert_eq!(key.cutoff, 10.0);
        let (key, _) = classifier.match_color(ColorSample::new(0, 180, 0)).unwrap();
        assert_eq!(key.cutoff, 100.0);
    }

    #[test]
    fn test_advanced_mode_writes_aux_mask_only() {
        let mut buffer = PixelBuffer::filled(4, 4, ColorSample::WHITE);
        paint(&mut buffer, 1, 1, ColorSample::BLACK);
        let original = buffer.clone();

        let classifier = Classifier::new(
            vec![KeyColor::new(ColorSample::WHITE, 50.0)],
            EdgeMode::Smooth,
            3,
        );
        let aux = classifier.classify(&mut buffer).unwrap();

        assert_eq!(buffer, original);
        assert_eq!(aux[[0, 0]], 0);
        assert_eq!(aux[[1, 1]], 255);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let mut whole = PixelBuffer::filled(10, 7, ColorSample::new(240, 240, 240));
        for i in 0..70u32 {
            paint(&mut whole, i % 10, i / 10, ColorSample::new((i * 3) as u8, 200, 240));
        }
        let mut chunked = whole.clone();

        let classifier = Classifier::new(
            vec![KeyColor::new(ColorSample::new(100, 200, 240), 120.0)],
            EdgeMode::Feathered,
            8,
        );
        classifier.classify(&mut whole);
        for start in (0..70).step_by(9) {
            classifier.classify_range(&mut chunked.data, None, start..(start + 9).min(70));
        }
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_resolve_manual_and_picker() {
        let buffer = PixelBuffer::filled(20, 20, ColorSample::new(0, 255, 0));

        let manual = ProcessingSettings::builder()
            .mode(ProcessingMode::Manual)
            .threshold(55.0)
            .build()
            .unwrap();
        let keying = Keying::resolve(&buffer, &manual).unwrap();
        assert_eq!(keying.keys, vec![KeyColor::new(ColorSample::new(0, 255, 0), 55.0)]);
        assert_eq!(keying.threshold, Some(55.0));

        let picker = ProcessingSettings::builder()
            .mode(ProcessingMode::ColorPicker)
            .select_color(ColorSample::new(255, 0, 255), 10.0)
            .build()
            .unwrap();
        let keying = Keying::resolve(&buffer, &picker).unwrap();
        assert_eq!(keying.background, ColorSample::new(255, 0, 255));
        assert!((keying.keys[0].cutoff - 44.2).abs() < 1e-4);
        assert!(keying.threshold.is_none());
    }

    #[test]
    fn test_resolve_auto_uses_cached_threshold() {
        let buffer = PixelBuffer::filled(20, 20, ColorSample::WHITE);
        let settings = ProcessingSettings::builder()
            .auto_threshold(Some(77.0))
            .build()
            .unwrap();
        let keying = Keying::resolve(&buffer, &settings).unwrap();
        assert_eq!(keying.threshold, Some(77.0));
    }
}
