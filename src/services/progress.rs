//! Progress reporting service
//!
//! This module separates progress reporting concerns from business logic,
//! allowing different frontends to implement their own progress handling.

use crate::types::ProcessingTimings;
use instant::Instant;
use std::sync::Arc;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    /// Checking size, signature and dimensions, then decoding
    Validate,
    /// Segmenting and compositing the foreground
    RemoveBackground,
    /// Bounding the longer edge
    Resize,
    /// Encoding to the target container
    Compress,
    /// Redrawing onto a fresh surface without metadata
    StripMetadata,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ProcessingStage::Validate => "Validating image",
            ProcessingStage::RemoveBackground => "Removing background",
            ProcessingStage::Resize => "Resizing image",
            ProcessingStage::Compress => "Compressing image",
            ProcessingStage::StripMetadata => "Stripping metadata",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Stable identifier used in logs and error reports
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ProcessingStage::Validate => "validate",
            ProcessingStage::RemoveBackground => "remove_background",
            ProcessingStage::Resize => "resize",
            ProcessingStage::Compress => "compress",
            ProcessingStage::StripMetadata => "strip_metadata",
            ProcessingStage::Completed => "completed",
        }
    }

    /// Overall progress range (start, end) covered by this stage
    #[must_use]
    pub fn progress_range(self) -> (u8, u8) {
        match self {
            ProcessingStage::Validate => (0, 15),
            ProcessingStage::RemoveBackground => (15, 85),
            ProcessingStage::Resize => (85, 90),
            ProcessingStage::Compress => (90, 95),
            ProcessingStage::StripMetadata => (95, 100),
            ProcessingStage::Completed => (100, 100),
        }
    }

    /// Overall progress for a fraction (0.0-1.0) of this stage
    #[must_use]
    pub fn progress_at(self, fraction: f32) -> u8 {
        let (start, end) = self.progress_range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f32::from(end - start);
        start + (span * fraction).round() as u8
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
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

/// Trait for reporting progress during pipeline runs
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Progress reporter that emits tracing events
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            tracing::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            tracing::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        tracing::info!("✅ Image processed in {}ms", timings.total_ms);

        if self.verbose {
            tracing::info!("  • Validate: {}ms", timings.validate_ms);
            if let Some(ms) = timings.background_removal_ms {
                tracing::info!("  • Background removal: {}ms", ms);
            }
            tracing::info!("  • Resize: {}ms", timings.resize_ms);
            tracing::info!("  • Compress: {}ms", timings.compress_ms);
            tracing::info!("  • Strip metadata: {}ms", timings.strip_metadata_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        tracing::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Progress tracker that keeps reported progress monotonic for one job
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
    last_progress: u8,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
            last_progress: 0,
        }
    }

    /// Create a progress tracker with no-op reporter
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpProgressReporter))
    }

    /// Report the start of a stage
    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.report_within(stage, 0.0);
    }

    /// Report a fraction (0.0-1.0) of a stage as done
    ///
    /// Values lower than a previously reported percentage are raised to it.
    pub fn report_within(&mut self, stage: ProcessingStage, fraction: f32) {
        self.current_stage = Some(stage);
        let progress = stage.progress_at(fraction).max(self.last_progress);
        self.last_progress = progress;
        self.reporter.report_progress(ProgressUpdate {
            stage,
            progress,
            description: stage.description().to_string(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    /// Report completion with final timings
    pub fn report_completion(&mut self, timings: &ProcessingTimings) {
        self.report_stage(ProcessingStage::Completed);
        self.reporter.report_completion(timings);
    }

    /// Report an error during processing
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::Validate);
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Highest progress reported so far
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.last_progress
    }

    /// Get the current processing stage
    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        updates: Mutex<Vec<ProgressUpdate>>,
        errors: Mutex<Vec<(ProcessingStage, String)>>,
        completions: Mutex<usize>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, _timings: &ProcessingTimings) {
            *self.completions.lock().unwrap() += 1;
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_stage_ranges_are_contiguous() {
        let stages = [
            ProcessingStage::Validate,
            ProcessingStage::RemoveBackground,
            ProcessingStage::Resize,
            ProcessingStage::Compress,
            ProcessingStage::StripMetadata,
        ];
        let mut expected_start = 0;
        for stage in stages {
            let (start, end) = stage.progress_range();
            assert_eq!(start, expected_start, "gap before {stage}");
            assert!(end > start);
            expected_start = end;
        }
        assert_eq!(expected_start, 100);
    }

    #[test]
    fn test_progress_at_maps_fraction() {
        assert_eq!(ProcessingStage::RemoveBackground.progress_at(0.0), 15);
        assert_eq!(ProcessingStage::RemoveBackground.progress_at(0.5), 50);
        assert_eq!(ProcessingStage::RemoveBackground.progress_at(1.0), 85);
        assert_eq!(ProcessingStage::RemoveBackground.progress_at(7.0), 85);
        assert_eq!(ProcessingStage::Validate.progress_at(f32::NAN), 0);
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone());

        tracker.report_within(ProcessingStage::RemoveBackground, 0.8);
        tracker.report_within(ProcessingStage::RemoveBackground, 0.4);
        tracker.report_stage(ProcessingStage::Resize);
        tracker.report_completion(&ProcessingTimings::default());

        let progress: Vec<u8> = reporter
            .updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.progress)
            .collect();
        assert_eq!(progress, vec![71, 71, 85, 100]);
        assert_eq!(*reporter.completions.lock().unwrap(), 1);
    }

    #[test]
    fn test_tracker_reports_errors_at_current_stage() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone());
        tracker.report_stage(ProcessingStage::Compress);
        tracker.report_error("encoder rejected parameters");

        let errors = reporter.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ProcessingStage::Compress);
    }
}
