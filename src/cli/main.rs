//! bgkey command-line tool
//!
//! Decodes an image, keys out its background through the worker protocol and
//! writes the result as PNG.

use super::config::{CliConfigBuilder, MagicSpec};
use crate::{
    config::{EngineConfig, ProcessingSettings},
    remove_background_with_reporter,
    services::ConsoleProgressReporter,
    tracing_config::{events, init_cli_tracing, spans},
    types::PixelBuffer,
    worker::{Request, Response, Worker, WorkerHandle},
};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Color-keyed background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgkey")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image (PNG or JPEG)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output PNG file
    #[arg(short, long, value_name = "OUTPUT", required_unless_present = "detect_only")]
    pub output: Option<PathBuf>,

    /// Background detection mode [default: auto, or implied by --pick-color/--threshold]
    #[arg(short, long, value_enum)]
    pub mode: Option<CliMode>,

    /// Distance threshold for manual mode (0-255)
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Color to remove as HEX[:TOLERANCE]; repeatable
    #[arg(long = "pick-color", value_name = "HEX[:TOL]")]
    pub pick_color: Vec<String>,

    /// Edge treatment [default: hard]
    #[arg(short, long, value_enum)]
    pub edge_mode: Option<CliEdgeMode>,

    /// Feather / refinement radius (1-20)
    #[arg(long)]
    pub feather_radius: Option<u32>,

    /// Magic selection seeded at X,Y with a tolerance, committed as keep or remove; repeatable
    #[arg(long, value_name = "X,Y,TOL[,keep|remove]")]
    pub magic: Vec<String>,

    /// JSON settings file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Print the detected background color and auto threshold, then exit
    #[arg(long)]
    pub detect_only: bool,

    /// Show a progress bar
    #[arg(short, long)]
    pub progress: bool,

    /// Emit logs as JSON (requires the `tracing-json` feature)
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Background detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    Auto,
    Manual,
    ColorPicker,
}

/// Edge treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliEdgeMode {
    Hard,
    Feathered,
    Decontaminate,
    Smooth,
    Refine,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    let settings = CliConfigBuilder::from_cli(&cli).context("Invalid CLI arguments")?;
    let magic_specs = CliConfigBuilder::magic_specs(&cli).context("Invalid CLI arguments")?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = spans::session(
        &session_id,
        &settings.mode.to_string(),
        &settings.edge_mode.to_string(),
    );
    run(&cli, settings, &magic_specs).instrument(session).await
}

async fn run(cli: &Cli, mut settings: ProcessingSettings, magic_specs: &[MagicSpec]) -> Result<()> {
    let buffer = load_image(&cli.input)?;
    info!(
        "Loaded {} ({}x{})",
        cli.input.display(),
        buffer.width,
        buffer.height
    );

    let engine = EngineConfig::default();
    let mut worker = Worker::spawn(engine.clone()).context("Failed to start keying worker")?;

    if cli.detect_only {
        return detect(&mut worker, buffer).await;
    }

    if !magic_specs.is_empty() {
        apply_magic_selections(&mut worker, &buffer, magic_specs, &mut settings, &engine)
            .instrument(spans::magic_selection(magic_specs.len()))
            .await?;
    }

    let start = Instant::now();
    let result = if cli.progress {
        process_with_worker(&mut worker, buffer, settings).await?
    } else {
        let reporter = ConsoleProgressReporter::new(cli.verbose > 0);
        remove_background_with_reporter(buffer, settings, Box::new(reporter))
            .await
            .map_err(|e| {
                events::error_with_context(&e, "keying");
                e
            })?
            .into_buffer()
            .context("Job was cancelled")?
    };
    events::performance_metric("keying", start.elapsed().as_millis() as u64);

    let Some(output) = cli.output.as_deref() else {
        bail!("--output is required unless --detect-only is given");
    };
    save_png(result, output)?;
    info!(
        "Wrote {} in {:.2}s",
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn load_image(path: &Path) -> Result<PixelBuffer> {
    let _span = spans::file_io("decode", path).entered();
    let image = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?;
    Ok(PixelBuffer::from(image.to_rgba8()))
}

fn save_png(buffer: PixelBuffer, path: &Path) -> Result<()> {
    let _span = spans::file_io("encode", path).entered();
    if path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !ext.eq_ignore_ascii_case("png"))
    {
        events::warning_with_recommendation(
            "Output is always PNG-encoded",
            "use a .png extension to match the file contents",
        );
    }
    buffer
        .into_rgba_image()?
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn detect(worker: &mut WorkerHandle, buffer: PixelBuffer) -> Result<()> {
    worker
        .send(Request::CalculateAutoThreshold { buffer })
        .await?;
    match worker.recv().await {
        Some(Response::AutoThreshold {
            threshold,
            dominant_color,
        }) => {
            println!("dominant color: {}", dominant_color.to_hex());
            println!("auto threshold: {threshold}");
            Ok(())
        },
        Some(Response::Error { message }) => bail!("Detection failed: {message}"),
        other => bail!("Unexpected worker response: {other:?}"),
    }
}

async fn apply_magic_selections(
    worker: &mut WorkerHandle,
    buffer: &PixelBuffer,
    specs: &[MagicSpec],
    settings: &mut ProcessingSettings,
    engine: &EngineConfig,
) -> Result<()> {
    for spec in specs {
        worker
            .send(Request::MagicSelect {
                buffer: buffer.clone(),
                seed_x: spec.x,
                seed_y: spec.y,
                tolerance: spec.tolerance,
            })
            .await?;
        let region = match worker.recv().await {
            Some(Response::MagicSelectResult { region }) => region,
            Some(Response::Error { message }) => {
                bail!("Magic selection at ({}, {}) failed: {message}", spec.x, spec.y)
            },
            other => bail!("Unexpected worker response: {other:?}"),
        };
        debug!(
            x = spec.x,
            y = spec.y,
            pixels = region.pixel_count,
            mode = %spec.mode,
            "Committing magic selection"
        );

        let state = &mut settings.magic_selection;
        state.tolerance = spec.tolerance;
        state.last_seed = Some((spec.x, spec.y));
        state.preview_region = Some(region);
        state.commit(spec.mode, engine.max_applied_regions);
    }
    Ok(())
}

async fn process_with_worker(
    worker: &mut WorkerHandle,
    buffer: PixelBuffer,
    settings: ProcessingSettings,
) -> Result<PixelBuffer> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    bar.set_message("keying");

    worker.send(Request::Process { buffer, settings }).await?;

    let mut cancel_sent = false;
    loop {
        tokio::select! {
            response = worker.recv() => match response {
                Some(Response::Progress { percent }) => bar.set_position(u64::from(percent)),
                Some(Response::Complete { buffer }) => {
                    bar.finish_with_message("done");
                    return Ok(buffer);
                },
                Some(Response::Cancelled) => {
                    bar.abandon_with_message("cancelled");
                    bail!("Processing was cancelled");
                },
                Some(Response::Error { message }) => {
                    bar.abandon_with_message("failed");
                    bail!("Processing failed: {message}");
                },
                Some(other) => debug!(response = ?other, "Ignoring unrelated response"),
                None => bail!("Keying worker stopped unexpectedly"),
            },
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                signal.context("Failed to listen for Ctrl-C")?;
                warn!("Interrupt received, cancelling at the next chunk boundary");
                worker.send(Request::Cancel).await?;
                cancel_sent = true;
            },
        }
    }
}
