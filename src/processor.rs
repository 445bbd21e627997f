//! Chunked, cancellable keying job runner
//!
//! A [`JobRunner`] drives one job at a time through key resolution,
//! classification, optional edge refinement and magic-region stamping. The
//! classifier runs over fixed-size pixel chunks. Before each chunk the runner
//! checks its cancellation token, and after each chunk it reports progress and
//! yields to the scheduler, so a cancel request is observed at the next chunk
//! boundary and never in the middle of one. Refinement phases run the same
//! way over row bands of roughly one chunk each.
//!
//! Job lifecycle:
//!
//! ```text
//! Idle ──submit──▶ Running ──▶ Done | Error
//!                     │
//!                  cancel
//!                     ▼
//!                 Cancelling ──▶ Cancelled
//! ```
//!
//! Terminal states accept a new submission. Submitting while a job is
//! `Running` or `Cancelling` fails with [`BgKeyError::JobInFlight`].

use crate::{
    classifier::{Classifier, Keying},
    config::{EngineConfig, ProcessingSettings},
    error::{BgKeyError, Result},
    refine::{band_rows, RefinePhase},
    selection::stamp_regions,
    services::{ProcessingStage, ProgressTracker},
    types::{PixelBuffer, ProcessingTimings},
};
use instant::Instant;
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Progress share of classification when refinement follows it
const CLASSIFICATION_SHARE_ADVANCED: u64 = 50;

/// Lifecycle state of a [`JobRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Cancelling,
    Done,
    Cancelled,
    Error,
}

impl JobState {
    /// Whether a job is currently in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

/// Terminal outcome of a job that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The processed buffer
    Complete(PixelBuffer),
    /// The job stopped at a chunk boundary; no partial buffer is exposed
    Cancelled,
}

impl JobOutcome {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The processed buffer, if the job completed
    #[must_use]
    pub fn into_buffer(self) -> Option<PixelBuffer> {
        match self {
            Self::Complete(buffer) => Some(buffer),
            Self::Cancelled => None,
        }
    }
}

#[derive(Debug)]
struct RunnerShared {
    state: JobState,
    token: Option<CancellationToken>,
}

/// Runs keying jobs one at a time
///
/// Cloning yields another handle to the same runner, so a job can be driven on
/// a spawned task while the owner keeps the ability to cancel it.
#[derive(Debug, Clone)]
pub struct JobRunner {
    config: EngineConfig,
    shared: Arc<Mutex<RunnerShared>>,
}

impl JobRunner {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(RunnerShared {
                state: JobState::Idle,
                token: None,
            })),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Request cancellation of the running job
    ///
    /// Returns false when no job is running.
    pub fn cancel(&self) -> bool {
        let mut shared = self.lock();
        if shared.state != JobState::Running {
            return false;
        }
        shared.state = JobState::Cancelling;
        if let Some(token) = &shared.token {
            token.cancel();
        }
        true
    }

    /// Start a job and return the future that drives it
    ///
    /// The runner moves to `Running` before this returns, so a `cancel` issued
    /// right after `submit` is never lost even if the future has not been
    /// polled yet. If the future is dropped before it finishes, or panics, the
    /// runner moves to `Error` and accepts the next submission.
    ///
    /// # Errors
    ///
    /// Returns [`BgKeyError::JobInFlight`] if a job is already running.
    pub fn submit(
        &self,
        buffer: PixelBuffer,
        settings: ProcessingSettings,
        mut tracker: ProgressTracker,
    ) -> Result<impl Future<Output = Result<JobOutcome>> + Send + 'static> {
        let token = self.begin()?;
        let span = info_span!(
            "keying_job",
            width = buffer.width,
            height = buffer.height,
            mode = %settings.mode,
            edge_mode = %settings.edge_mode
        );

        let guard = JobGuard {
            runner: self.clone(),
            finished: false,
        };

        Ok(async move {
            let result = guard
                .runner
                .execute(buffer, &settings, &mut tracker, &token)
                .await;
            if let Err(e) = &result {
                warn!(error = %e, "Keying job failed");
                tracker.report_error(&e.to_string());
            }
            guard.finish(&result);
            result
        }
        .instrument(span))
    }

    /// Submit a job and wait for it
    ///
    /// # Errors
    ///
    /// Returns the first error raised by validation, key resolution or a
    /// concurrent submission.
    pub async fn run(
        &self,
        buffer: PixelBuffer,
        settings: ProcessingSettings,
        tracker: ProgressTracker,
    ) -> Result<JobOutcome> {
        self.submit(buffer, settings, tracker)?.await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunnerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<CancellationToken> {
        let mut shared = self.lock();
        if shared.state.is_busy() {
            warn!(state = ?shared.state, "Rejected job submission while busy");
            return Err(BgKeyError::JobInFlight);
        }
        let token = CancellationToken::new();
        shared.state = JobState::Running;
        shared.token = Some(token.clone());
        Ok(token)
    }

    fn abandon(&self) {
        let mut shared = self.lock();
        shared.state = JobState::Error;
        shared.token = None;
    }

    fn finish(&self, result: &Result<JobOutcome>) {
        let mut shared = self.lock();
        shared.state = match result {
            Ok(JobOutcome::Complete(_)) => JobState::Done,
            Ok(JobOutcome::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Error,
        };
        shared.token = None;
    }

    async fn execute(
        &self,
        mut buffer: PixelBuffer,
        settings: &ProcessingSettings,
        tracker: &mut ProgressTracker,
        token: &CancellationToken,
    ) -> Result<JobOutcome> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        info!(
            pixels = buffer.pixel_count(),
            chunk_size = self.config.chunk_size,
            "Starting keying job"
        );

        tracker.enter_stage(ProcessingStage::Initialization);
        buffer.validate()?;
        settings.validate()?;
        settings
            .magic_selection
            .check_fits(buffer.width, buffer.height)?;

        let phase_start = Instant::now();
        let keying = Keying::resolve(&buffer, settings)?;
        timings.keying_ms = phase_start.elapsed().as_millis() as u64;

        let regions = &settings.magic_selection.applied_regions;
        let original_alpha = (!regions.is_empty()).then(|| buffer.alpha_mask());

        // Classification
        let advanced = settings.edge_mode.is_advanced();
        let classification_share = if advanced {
            CLASSIFICATION_SHARE_ADVANCED
        } else {
            100
        };
        let classifier = Classifier::new(keying.keys.clone(), settings.edge_mode, settings.feather_radius);
        let mut aux = advanced.then(|| buffer.alpha_mask());
        let pixels = buffer.pixel_count();
        let chunk_size = self.config.chunk_size.max(1);

        let phase_start = Instant::now();
        tracker.enter_stage(ProcessingStage::Classification);
        let mut start = 0;
        while start < pixels {
            if token.is_cancelled() {
                return Ok(Self::cancelled(tracker));
            }
            let end = (start + chunk_size).min(pixels);
            {
                let aux_slice = aux.as_mut().and_then(|mask| mask.as_slice_mut());
                classifier.classify_range(&mut buffer.data, aux_slice, start..end);
            }
            tracker.report(
                ProcessingStage::Classification,
                scaled_percent(end, pixels, 0, classification_share),
            );
            start = end;
            tokio::task::yield_now().await;
        }
        timings.classification_ms = phase_start.elapsed().as_millis() as u64;
        debug!(
            elapsed_ms = timings.classification_ms,
            chunks = pixels.div_ceil(chunk_size),
            "Classification finished"
        );

        // Refinement, in row bands of about one chunk each
        if let Some(mut mask) = aux {
            let phase_start = Instant::now();
            let phases = RefinePhase::plan(settings.edge_mode, settings.feather_radius, keying.background);
            let (height, width) = mask.dim();
            let band = band_rows(width, chunk_size);
            let total_bands = phases.len() * height.div_ceil(band);
            let mut done_bands = 0;
            for phase in phases {
                let stage = phase.stage();
                tracker.enter_stage(stage);
                let step_start = Instant::now();
                let mut next = mask.clone();
                let mut row = 0;
                while row < height {
                    if token.is_cancelled() {
                        return Ok(Self::cancelled(tracker));
                    }
                    let end = (row + band).min(height);
                    phase.apply_rows(&mut buffer, mask.view(), row..end, &mut next);
                    done_bands += 1;
                    tracker.report(
                        stage,
                        scaled_percent(done_bands, total_bands, CLASSIFICATION_SHARE_ADVANCED, 100),
                    );
                    row = end;
                    tokio::task::yield_now().await;
                }
                mask = next;
                debug!(
                    phase = ?phase,
                    bands = height.div_ceil(band),
                    elapsed_ms = step_start.elapsed().as_millis() as u64,
                    "Refinement phase finished"
                );
            }
            buffer.apply_alpha_mask(mask.view());
            timings.refinement_ms = phase_start.elapsed().as_millis() as u64;
        }

        // Committed magic regions override classification
        if let Some(original_alpha) = original_alpha {
            if token.is_cancelled() {
                return Ok(Self::cancelled(tracker));
            }
            let phase_start = Instant::now();
            tracker.enter_stage(ProcessingStage::RegionStamping);
            let stamped = stamp_regions(&mut buffer, regions, original_alpha.view());
            timings.stamping_ms = phase_start.elapsed().as_millis() as u64;
            debug!(
                regions = regions.len(),
                stamped,
                elapsed_ms = timings.stamping_ms,
                "Magic regions stamped"
            );
        }

        if token.is_cancelled() {
            return Ok(Self::cancelled(tracker));
        }

        tracker.report(ProcessingStage::Completed, 100);
        timings.total_ms = total_start.elapsed().as_millis() as u64;
        info!(total_ms = timings.total_ms, "Keying job finished");
        tracker.report_completion(timings);
        Ok(JobOutcome::Complete(buffer))
    }

    fn cancelled(tracker: &ProgressTracker) -> JobOutcome {
        info!(stage = ?tracker.current_stage(), "Keying job cancelled");
        tracker.report_cancelled();
        JobOutcome::Cancelled
    }
}

/// Moves the runner to `Error` when a job future ends without reporting
struct JobGuard {
    runner: JobRunner,
    finished: bool,
}

impl JobGuard {
    fn finish(mut self, result: &Result<JobOutcome>) {
        self.runner.finish(result);
        self.finished = true;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Keying job ended without a result");
            self.runner.abandon();
        }
    }
}

/// Map `done / total` onto the `[from, to]` percentage range
fn scaled_percent(done: usize, total: usize, from: u64, to: u64) -> u8 {
    if total == 0 {
        return to.min(100) as u8;
    }
    let span = to.saturating_sub(from);
    (from + done as u64 * span / total as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        color::ColorSample,
        config::{EdgeMode, ProcessingMode},
        mask::RleMask,
        selection::{MagicRegion, MagicSelectionState, RegionMode},
        services::{progress::tests::TestProgressReporter, ProgressReporter, ProgressUpdate},
        types::Bounds,
    };

    /// White frame around a red square
    fn framed_square(size: u32, inset: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::filled(size, size, ColorSample::WHITE);
        for y in inset..size - inset {
            for x in inset..size - inset {
                let i = buffer.index_of(x, y) * 4;
                buffer.data[i..i + 3].copy_from_slice(&[200, 20, 20]);
            }
        }
        buffer
    }

    fn manual(threshold: f32, edge_mode: EdgeMode) -> ProcessingSettings {
        ProcessingSettings::builder()
            .mode(ProcessingMode::Manual)
            .threshold(threshold)
            .edge_mode(edge_mode)
            .build()
            .unwrap()
    }

    fn small_chunks(chunk_size: usize) -> JobRunner {
        JobRunner::new(
            EngineConfig::builder()
                .chunk_size(chunk_size)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_uniform_image_at_zero_threshold_stays_opaque() {
        let runner = JobRunner::new(EngineConfig::default());
        let buffer = PixelBuffer::filled(5, 5, ColorSample::new(12, 200, 40));
        let outcome = runner
            .run(buffer, manual(0.0, EdgeMode::Hard), ProgressTracker::no_op())
            .await
            .unwrap();

        let out = outcome.into_buffer().unwrap();
        assert!((0..25).all(|i| out.alpha_at(i) == 255));
        assert_eq!(runner.state(), JobState::Done);
    }

    #[tokio::test]
    async fn test_hard_mode_is_binary() {
        let runner = small_chunks(13);
        let outcome = runner
            .run(framed_square(16, 4), manual(40.0, EdgeMode::Hard), ProgressTracker::no_op())
            .await
            .unwrap();
        let out = outcome.into_buffer().unwrap();

        assert!((0..out.pixel_count()).all(|i| matches!(out.alpha_at(i), 0 | 255)));
        assert_eq!(out.alpha_at(0), 0);
        assert_eq!(out.alpha_at(out.index_of(8, 8)), 255);
    }

    #[tokio::test]
    async fn test_chunk_size_does_not_change_output() {
        let settings = manual(60.0, EdgeMode::Feathered);
        let a = small_chunks(7)
            .run(framed_square(20, 5), settings.clone(), ProgressTracker::no_op())
            .await
            .unwrap();
        let b = small_chunks(1_000_000)
            .run(framed_square(20, 5), settings, ProgressTracker::no_op())
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_progress_is_throttled_and_ends_at_100() {
        let reporter = TestProgressReporter::default();
        let tracker = ProgressTracker::new(Box::new(reporter.clone()), 10);
        small_chunks(10)
            .run(framed_square(10, 2), manual(30.0, EdgeMode::Hard), tracker)
            .await
            .unwrap();

        let percents = reporter.percents();
        assert_eq!(percents, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_advanced_mode_splits_progress() {
        let reporter = TestProgressReporter::default();
        let tracker = ProgressTracker::new(Box::new(reporter.clone()), 10);
        let outcome = small_chunks(20)
            .run(framed_square(20, 5), manual(60.0, EdgeMode::Refine), tracker)
            .await
            .unwrap();
        assert!(!outcome.is_cancelled());

        let updates = reporter.progress_updates.lock().unwrap();
        let last_classification = updates
            .iter()
            .filter(|u| u.stage == ProcessingStage::Classification)
            .map(|u| u.progress)
            .max()
            .unwrap();
        assert_eq!(last_classification, 50);
        assert!(updates.iter().any(|u| u.stage == ProcessingStage::Erosion));
        assert_eq!(updates.last().unwrap().progress, 100);
        assert!(updates.windows(2).all(|w| w[0].progress < w[1].progress));
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk() {
        let reporter = TestProgressReporter::default();
        let runner = small_chunks(4);
        let job = runner
            .submit(
                framed_square(8, 2),
                manual(30.0, EdgeMode::Hard),
                ProgressTracker::new(Box::new(reporter.clone()), 10),
            )
            .unwrap();
        assert_eq!(runner.state(), JobState::Running);
        assert!(runner.cancel());
        assert_eq!(runner.state(), JobState::Cancelling);

        let outcome = job.await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled);
        assert_eq!(runner.state(), JobState::Cancelled);
        assert!(reporter.percents().is_empty());
        assert_eq!(reporter.cancellations.lock().unwrap().len(), 1);

        // A cancelled runner accepts the next job
        assert!(!runner.cancel());
        let outcome = runner
            .run(framed_square(8, 2), manual(30.0, EdgeMode::Hard), ProgressTracker::no_op())
            .await
            .unwrap();
        assert!(outcome.into_buffer().is_some());
    }

    #[tokio::test]
    async fn test_second_submission_is_rejected() {
        let runner = JobRunner::new(EngineConfig::default());
        let first = runner
            .submit(framed_square(8, 2), manual(30.0, EdgeMode::Hard), ProgressTracker::no_op())
            .unwrap();
        let second = runner.submit(
            framed_square(8, 2),
            manual(30.0, EdgeMode::Hard),
            ProgressTracker::no_op(),
        );
        assert!(matches!(second, Err(BgKeyError::JobInFlight)));

        first.await.unwrap();
        assert_eq!(runner.state(), JobState::Done);
    }

    #[tokio::test]
    async fn test_invalid_input_sets_error_state() {
        let reporter = TestProgressReporter::default();
        let runner = JobRunner::new(EngineConfig::default());
        let buffer = PixelBuffer {
            width: 0,
            height: 4,
            data: Vec::new(),
        };
        let err = runner
            .run(
                buffer,
                ProcessingSettings::default(),
                ProgressTracker::new(Box::new(reporter.clone()), 10),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BgKeyError::InvalidGeometry(_)));
        assert_eq!(runner.state(), JobState::Error);
        assert_eq!(reporter.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_keep_region_overrides_classification() {
        // Keep the top-left 2x2 block of white background
        let keep = MagicRegion::new(
            RleMask::encode(&[true; 4]),
            Bounds::new(0, 0, 2, 2),
            4,
            ColorSample::WHITE,
            RegionMode::Keep,
        );
        let mut settings = manual(40.0, EdgeMode::Hard);
        settings.magic_selection = MagicSelectionState {
            applied_regions: vec![keep],
            ..MagicSelectionState::default()
        };

        let out = JobRunner::new(EngineConfig::default())
            .run(framed_square(8, 3), settings, ProgressTracker::no_op())
            .await
            .unwrap()
            .into_buffer()
            .unwrap();

        assert_eq!(out.alpha_at(out.index_of(1, 1)), 255);
        assert_eq!(out.alpha_at(out.index_of(2, 2)), 0);
        assert_eq!(out.alpha_at(out.index_of(4, 4)), 255);
    }

    /// Cancels the runner on the first update from `stage`
    struct CancelAtStage {
        runner: JobRunner,
        stage: ProcessingStage,
        seen: TestProgressReporter,
    }

    impl ProgressReporter for CancelAtStage {
        fn report_progress(&self, update: ProgressUpdate) {
            if update.stage == self.stage {
                self.runner.cancel();
            }
            self.seen.report_progress(update);
        }

        fn report_completion(&self, timings: ProcessingTimings) {
            self.seen.report_completion(timings);
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.seen.report_error(stage, error);
        }

        fn report_cancelled(&self, stage: ProcessingStage) {
            self.seen.report_cancelled(stage);
        }
    }

    #[tokio::test]
    async fn test_cancel_lands_between_refinement_bands() {
        let runner = small_chunks(16);
        let seen = TestProgressReporter::default();
        let tracker = ProgressTracker::new(
            Box::new(CancelAtStage {
                runner: runner.clone(),
                stage: ProcessingStage::Erosion,
                seen: seen.clone(),
            }),
            1,
        );

        let outcome = runner
            .run(framed_square(32, 8), manual(60.0, EdgeMode::Refine), tracker)
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Cancelled);
        assert_eq!(runner.state(), JobState::Cancelled);
        let updates = seen.progress_updates.lock().unwrap();
        assert_eq!(
            updates.last().map(|u| u.stage),
            Some(ProcessingStage::Erosion)
        );
        assert!(updates.iter().all(|u| u.progress < 60));
        assert_eq!(seen.cancellations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_banding_does_not_change_refined_output() {
        for edge_mode in [EdgeMode::Smooth, EdgeMode::Refine, EdgeMode::Decontaminate] {
            let settings = ProcessingSettings::builder()
                .mode(ProcessingMode::Manual)
                .threshold(60.0)
                .edge_mode(edge_mode)
                .feather_radius(3)
                .build()
                .unwrap();
            let banded = small_chunks(7)
                .run(framed_square(24, 7), settings.clone(), ProgressTracker::no_op())
                .await
                .unwrap();
            let whole = JobRunner::new(EngineConfig::default())
                .run(framed_square(24, 7), settings, ProgressTracker::no_op())
                .await
                .unwrap();
            assert_eq!(banded, whole, "{edge_mode}");
        }
    }

    #[tokio::test]
    async fn test_dropped_job_releases_runner() {
        let runner = JobRunner::new(EngineConfig::default());
        let job = runner
            .submit(framed_square(8, 2), manual(30.0, EdgeMode::Hard), ProgressTracker::no_op())
            .unwrap();
        assert_eq!(runner.state(), JobState::Running);

        drop(job);
        assert_eq!(runner.state(), JobState::Error);
        assert!(!runner.cancel());

        let outcome = runner
            .run(framed_square(8, 2), manual(30.0, EdgeMode::Hard), ProgressTracker::no_op())
            .await
            .unwrap();
        assert!(outcome.into_buffer().is_some());
        assert_eq!(runner.state(), JobState::Done);
    }

    #[tokio::test]
    async fn test_region_outside_image_is_rejected() {
        let reporter = TestProgressReporter::default();
        let runner = JobRunner::new(EngineConfig::default());
        let mut settings = manual(40.0, EdgeMode::Hard);
        settings.magic_selection.applied_regions = vec![MagicRegion::new(
            RleMask::encode(&[true; 4]),
            Bounds::new(u32::MAX - 1, 0, 4, 1),
            4,
            ColorSample::WHITE,
            RegionMode::Remove,
        )];

        let err = runner
            .run(
                framed_square(4, 1),
                settings.clone(),
                ProgressTracker::new(Box::new(reporter.clone()), 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BgKeyError::InvalidGeometry(_)));
        assert_eq!(runner.state(), JobState::Error);
        assert_eq!(reporter.errors.lock().unwrap().len(), 1);

        // In range, but past the right edge of a 4x4 image
        settings.magic_selection.applied_regions[0].bounds = Bounds::new(2, 0, 4, 1);
        let err = runner
            .run(framed_square(4, 1), settings, ProgressTracker::no_op())
            .await
            .unwrap_err();
        assert!(matches!(err, BgKeyError::InvalidGeometry(_)));
    }

    #[test]
    fn test_scaled_percent() {
        assert_eq!(scaled_percent(5, 10, 0, 100), 50);
        assert_eq!(scaled_percent(10, 10, 0, 50), 50);
        assert_eq!(scaled_percent(1, 3, 50, 100), 66);
        assert_eq!(scaled_percent(0, 0, 0, 100), 100);
    }
}
