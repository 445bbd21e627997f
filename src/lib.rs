#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgkey
//!
//! Color-keyed background removal for RGBA images: distance-based keying with
//! an Otsu auto-threshold, edge refinement, flood-fill "magic" selections and
//! a cancellable, progress-reporting job protocol.
//!
//! ## Features
//!
//! - **Three keying modes**: automatic (dominant color + Otsu threshold),
//!   manual threshold, and a color picker with per-color tolerances
//! - **Edge treatments**: hard, feathered, smooth, refine (erode/dilate/blur)
//!   and color decontamination
//! - **Magic selection**: 4-connected flood fill producing run-length encoded
//!   regions that are kept or removed on top of the keying result
//! - **Job protocol**: chunked processing with throttled progress,
//!   cooperative cancellation and a JSON-serializable request/response worker
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgkey::{remove_background, EdgeMode, PixelBuffer, ProcessingMode, ProcessingSettings};
//!
//! # async fn example(buffer: PixelBuffer) -> anyhow::Result<()> {
//! let settings = ProcessingSettings::builder()
//!     .mode(ProcessingMode::Auto)
//!     .edge_mode(EdgeMode::Smooth)
//!     .feather_radius(3)
//!     .build()?;
//!
//! let outcome = remove_background(buffer, settings).await?;
//! if let Some(keyed) = outcome.into_buffer() {
//!     keyed.into_rgba_image()?.save("output.png")?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Worker Protocol
//!
//! ```rust,no_run
//! use bgkey::{EngineConfig, PixelBuffer, Request, Response, Worker};
//!
//! # async fn example(buffer: PixelBuffer) -> anyhow::Result<()> {
//! let mut worker = Worker::spawn(EngineConfig::default())?;
//! worker.send(Request::Process { buffer, settings: Default::default() }).await?;
//! while let Some(response) = worker.recv().await {
//!     match response {
//!         Response::Progress { percent } => println!("{percent}%"),
//!         Response::Complete { .. } | Response::Cancelled | Response::Error { .. } => break,
//!         _ => {},
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): Command-line interface, progress bar and tracing subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! bgkey = { version = "0.1", default-features = false }
//! ```

pub mod classifier;
#[cfg(feature = "cli")]
pub mod cli;
pub mod color;
pub mod config;
pub mod error;
pub mod mask;
pub mod processor;
pub mod refine;
pub mod selection;
pub mod services;
pub mod threshold;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod worker;

// Public API exports
pub use classifier::{Classifier, KeyColor, Keying};
pub use color::{detect_dominant_color, distance, ColorSample};
pub use config::{
    EdgeMode, EngineConfig, EngineConfigBuilder, ProcessingMode, ProcessingSettings,
    ProcessingSettingsBuilder, SelectedColor,
};
pub use error::{BgKeyError, Result};
pub use mask::RleMask;
pub use processor::{JobOutcome, JobRunner, JobState};
pub use selection::{MagicRegion, MagicSelectionState, RegionMode};
pub use services::{
    ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
pub use threshold::{calculate_auto_threshold, AutoThreshold};
pub use types::{Bounds, PixelBuffer, ProcessingTimings};
pub use worker::{ChannelProgressReporter, Request, Response, Worker, WorkerHandle};

#[cfg(feature = "cli")]
pub use tracing_config::{events, init_cli_tracing, spans, TracingConfig, TracingFormat};

/// Key out the background of an RGBA buffer
///
/// Runs a single job on a fresh [`JobRunner`] with the default
/// [`EngineConfig`] and no progress reporting.
///
/// # Examples
///
/// ```rust,no_run
/// use bgkey::{remove_background, ColorSample, PixelBuffer, ProcessingSettings};
///
/// # async fn example() -> anyhow::Result<()> {
/// let buffer = PixelBuffer::filled(64, 64, ColorSample::WHITE);
/// let outcome = remove_background(buffer, ProcessingSettings::default()).await?;
/// assert!(!outcome.is_cancelled());
/// # Ok(())
/// # }
/// ```
pub async fn remove_background(
    buffer: PixelBuffer,
    settings: ProcessingSettings,
) -> Result<JobOutcome> {
    JobRunner::new(EngineConfig::default())
        .run(buffer, settings, ProgressTracker::no_op())
        .await
}

/// Key out the background, reporting progress to `reporter`
///
/// Progress is throttled to the default [`EngineConfig::progress_step`].
pub async fn remove_background_with_reporter(
    buffer: PixelBuffer,
    settings: ProcessingSettings,
    reporter: Box<dyn ProgressReporter>,
) -> Result<JobOutcome> {
    let config = EngineConfig::default();
    let tracker = ProgressTracker::new(reporter, config.progress_step);
    JobRunner::new(config).run(buffer, settings, tracker).await
}

/// Decode an encoded image (PNG or JPEG) and key out its background
///
/// Suitable for web servers and other memory-based callers.
///
/// ```rust,no_run
/// use bgkey::{remove_background_from_bytes, ProcessingSettings};
///
/// # async fn example(upload_bytes: Vec<u8>) -> anyhow::Result<()> {
/// let outcome = remove_background_from_bytes(&upload_bytes, ProcessingSettings::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    settings: ProcessingSettings,
) -> Result<JobOutcome> {
    let image = image::load_from_memory(image_bytes)?;
    remove_background(PixelBuffer::from(image.to_rgba8()), settings).await
}
