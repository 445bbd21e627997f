//! Progress reporting service
//!
//! This module separates progress reporting concerns from the keying engine,
//! allowing different frontends (the worker protocol, the CLI, tests) to
//! implement their own progress handling.

use crate::types::ProcessingTimings;
use instant::Instant;

/// Progress stages of a keying job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Validating input and resolving key colors
    Initialization,
    /// Per-pixel color classification
    Classification,
    /// Gaussian smoothing of alpha transitions
    Smoothing,
    /// Morphological erosion
    Erosion,
    /// Morphological dilation
    Dilation,
    /// Light blur of remaining transitions
    EdgeBlur,
    /// Background color-spill removal
    Decontamination,
    /// Stamping committed magic selection regions
    RegionStamping,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Initialization => "Resolving key colors",
            ProcessingStage::Classification => "Classifying pixels",
            ProcessingStage::Smoothing => "Smoothing edges",
            ProcessingStage::Erosion => "Eroding mask",
            ProcessingStage::Dilation => "Dilating mask",
            ProcessingStage::EdgeBlur => "Blurring edge transitions",
            ProcessingStage::Decontamination => "Removing color spill",
            ProcessingStage::RegionStamping => "Applying magic selections",
            ProcessingStage::Completed => "Processing completed",
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(stage: ProcessingStage, progress: u8, start_time: Instant) -> Self {
        Self {
            progress: progress.min(100),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Trait for reporting progress during keying jobs
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: ProcessingTimings);

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str);

    /// Report that the job stopped at a chunk boundary after a cancel request
    fn report_cancelled(&self, stage: ProcessingStage) {
        drop(stage);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress through `log`
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show detailed timing information
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!("✅ Background keyed out in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Keying: {}ms", timings.keying_ms);
            log::info!("    • Classification: {}ms", timings.classification_ms);
            log::info!("    • Refinement: {}ms", timings.refinement_ms);
            log::info!("    • Region stamping: {}ms", timings.stamping_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }

    fn report_cancelled(&self, stage: ProcessingStage) {
        log::warn!("⏹️  Cancelled during {}", stage.description());
    }
}

/// Progress tracker that manages timing, throttling and reporting
///
/// Percentages are reported only when they have advanced by at least `step`
/// points since the last report, or when they reach 100, which bounds the
/// message volume of long jobs.
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
    last_reported: Option<u8>,
    step: u8,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>, step: u8) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
            last_reported: None,
            step: step.max(1),
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter), 10)
    }

    /// Create a progress tracker with console reporter
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(verbose)), 10)
    }

    /// Enter a stage without reporting a percentage
    pub fn enter_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
    }

    /// Report a percentage for `stage`, subject to throttling
    ///
    /// Returns whether an update was forwarded to the reporter.
    pub fn report(&mut self, stage: ProcessingStage, percent: u8) -> bool {
        self.current_stage = Some(stage);
        let percent = percent.min(100);
        let due = match self.last_reported {
            None => percent >= self.step || percent == 100,
            Some(last) => {
                percent > last && (percent - last >= self.step || percent == 100)
            },
        };
        if due {
            self.last_reported = Some(percent);
            self.reporter
                .report_progress(ProgressUpdate::new(stage, percent, self.start_time));
        }
        due
    }

    /// Report completion with final timings
    pub fn report_completion(&self, timings: ProcessingTimings) {
        self.reporter.report_completion(timings);
    }

    /// Report an error during processing
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::Initialization);
        self.reporter.report_error(stage, error);
    }

    /// Report cancellation at the current stage
    pub fn report_cancelled(&self) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::Initialization);
        self.reporter.report_cancelled(stage);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the current processing stage
    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }

    /// Last percentage forwarded to the reporter
    #[must_use]
    pub fn last_reported(&self) -> Option<u8> {
        self.last_reported
    }
}
