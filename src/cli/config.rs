//! Conversion of CLI arguments into processing settings

use crate::cli::main_impl::{Cli, CliEdgeMode, CliMode};
use crate::{
    color::ColorSample,
    config::{EdgeMode, ProcessingMode, ProcessingSettings, SelectedColor},
    selection::RegionMode,
};
use anyhow::{bail, Context, Result};

/// Tolerance used by `--pick-color` when none is given
pub const DEFAULT_PICK_TOLERANCE: f32 = 20.0;

/// One `--magic X,Y,TOL[,keep|remove]` argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagicSpec {
    pub x: u32,
    pub y: u32,
    pub tolerance: f32,
    pub mode: RegionMode,
}

/// Parse `HEX[:TOL]` into a selected color
pub fn parse_pick_color(arg: &str) -> Result<SelectedColor> {
    let (hex, tolerance) = match arg.split_once(':') {
        Some((hex, tol)) => {
            let tolerance: f32 = tol
                .trim()
                .parse()
                .with_context(|| format!("Invalid tolerance in --pick-color '{arg}'"))?;
            (hex, tolerance)
        },
        None => (arg, DEFAULT_PICK_TOLERANCE),
    };
    if !(0.0..=100.0).contains(&tolerance) {
        bail!("Tolerance {tolerance} in --pick-color '{arg}' is outside 0-100");
    }
    let color = ColorSample::from_hex(hex.trim())
        .with_context(|| format!("Invalid color in --pick-color '{arg}'"))?;
    Ok(SelectedColor::new(color, tolerance))
}

/// Parse `X,Y,TOL[,keep|remove]`
pub fn parse_magic_spec(arg: &str) -> Result<MagicSpec> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if !(3..=4).contains(&parts.len()) {
        bail!("Expected X,Y,TOL[,keep|remove] in --magic '{arg}'");
    }
    let x = parts[0]
        .parse()
        .with_context(|| format!("Invalid X in --magic '{arg}'"))?;
    let y = parts[1]
        .parse()
        .with_context(|| format!("Invalid Y in --magic '{arg}'"))?;
    let tolerance: f32 = parts[2]
        .parse()
        .with_context(|| format!("Invalid tolerance in --magic '{arg}'"))?;
    if !(0.0..=100.0).contains(&tolerance) {
        bail!("Tolerance {tolerance} in --magic '{arg}' is outside 0-100");
    }
    let mode = match parts.get(3) {
        Some(mode) => mode.parse::<RegionMode>().map_err(anyhow::Error::msg)?,
        None => RegionMode::Remove,
    };
    Ok(MagicSpec {
        x,
        y,
        tolerance,
        mode,
    })
}

/// Builds [`ProcessingSettings`] from parsed arguments
pub struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Settings file first, then explicit flags on top
    ///
    /// When `--mode` is absent, `--pick-color` implies color-picker mode and
    /// `--threshold` implies manual mode.
    pub fn from_cli(cli: &Cli) -> Result<ProcessingSettings> {
        let mut settings = match &cli.settings {
            Some(path) => ProcessingSettings::from_json_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ProcessingSettings::default(),
        };

        if let Some(threshold) = cli.threshold {
            settings.threshold = threshold;
        }
        if !cli.pick_color.is_empty() {
            settings.selected_colors = cli
                .pick_color
                .iter()
                .map(|arg| parse_pick_color(arg))
                .collect::<Result<_>>()?;
        }

        settings.mode = match cli.mode {
            Some(mode) => mode.into(),
            None if !cli.pick_color.is_empty() => ProcessingMode::ColorPicker,
            None if cli.threshold.is_some() => ProcessingMode::Manual,
            None => settings.mode,
        };
        if let Some(edge_mode) = cli.edge_mode {
            settings.edge_mode = edge_mode.into();
        }
        if let Some(radius) = cli.feather_radius {
            settings.feather_radius = radius;
        }

        settings.validate().context("Invalid processing settings")?;
        Ok(settings)
    }

    /// Parsed `--magic` arguments, in order
    pub fn magic_specs(cli: &Cli) -> Result<Vec<MagicSpec>> {
        cli.magic.iter().map(|arg| parse_magic_spec(arg)).collect()
    }
}

impl From<CliMode> for ProcessingMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Auto => ProcessingMode::Auto,
            CliMode::Manual => ProcessingMode::Manual,
            CliMode::ColorPicker => ProcessingMode::ColorPicker,
        }
    }
}

impl From<CliEdgeMode> for EdgeMode {
    fn from(mode: CliEdgeMode) -> Self {
        match mode {
            CliEdgeMode::Hard => EdgeMode::Hard,
            CliEdgeMode::Feathered => EdgeMode::Feathered,
            CliEdgeMode::Decontaminate => EdgeMode::Decontaminate,
            CliEdgeMode::Smooth => EdgeMode::Smooth,
            CliEdgeMode::Refine => EdgeMode::Refine,
        }
    }
}
