//! Job queue controller
//!
//! Drives a batch of [`ImageJob`]s through a [`PipelineProcessor`] one at a
//! time, with pause, resume, cancel and live progress.
//!
//! The queue is the single writer of [`QueueState`]; readers get snapshots
//! through [`JobQueue::progress`] or a `watch` subscription. Pause and cancel
//! are cooperative: they take effect at the next checkpoint, which is before
//! each job and at every stage boundary inside the running job. The worst-case
//! latency is therefore one uninterruptible sub-step (a single segmentation
//! inference or a single encode).

use crate::{
    config::ProcessingOptions,
    error::{ErrorKind, PipelineError, Result},
    processor::{PipelineOutcome, PipelineProcessor, RunControl},
    services::{ProcessingStage, ProgressReporter, ProgressUpdate},
    types::{ImageJob, JobId, JobStatus, JobSubmission, ProcessedImage, ProcessingTimings},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Counters and flags for the current (or last) run
///
/// `in_flight + queued + completed == total` holds for every published
/// snapshot. `completed` counts jobs that reached a terminal state in this
/// run, whether they succeeded, failed or were cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub in_flight: usize,
    pub queued: usize,
    pub completed: usize,
    pub paused: bool,
    pub cancelled: bool,
    pub total: usize,
    pub current_job: Option<String>,
    pub current_job_progress: u8,
}

impl QueueState {
    /// Share of finished jobs, 0-100
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u8
    }

    /// Whether the counters add up
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.in_flight + self.queued + self.completed == self.total && self.in_flight <= 1
    }
}

/// Snapshot returned by [`JobQueue::progress`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    pub percent: u8,
    pub current_job: Option<String>,
    pub current_job_percent: u8,
    pub state: QueueState,
}

/// Display-oriented view of one job without its buffers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub byte_size: usize,
    pub status: JobStatus,
    pub error_detail: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub processed_size: Option<usize>,
    pub output_dimensions: Option<(u32, u32)>,
    pub compression_ratio: Option<f64>,
}

impl From<&ImageJob> for JobSummary {
    fn from(job: &ImageJob) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            byte_size: job.byte_size,
            status: job.status(),
            error_detail: job.error_detail().map(str::to_string),
            error_kind: job.error_kind(),
            processed_size: job.result().map(ProcessedImage::processed_size),
            output_dimensions: job.result().map(|r| r.dimensions),
            compression_ratio: job.result().map(ProcessedImage::compression_ratio),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Jobs taken into the run
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed jobs whose processing quota ran out
    pub quota_exceeded: usize,
    /// Jobs stopped while in flight
    pub cancelled: usize,
    /// Jobs never started because the run was cancelled
    pub not_started: usize,
    /// Already completed jobs left out of the run
    pub skipped: usize,
    /// Whether `cancel()` ended the run early
    pub was_cancelled: bool,
}

struct Inner {
    processor: PipelineProcessor,
    jobs: Mutex<Vec<ImageJob>>,
    state: watch::Sender<QueueState>,
    pause: watch::Sender<bool>,
    cancel: Mutex<CancellationToken>,
    active: AtomicBool,
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, Vec<ImageJob>> {
        self.jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cancel_slot(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Controller running batches of image jobs sequentially
///
/// Cloning is cheap; clones share the same batch and state, so one clone can
/// run `start` while another pauses or cancels.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("state", &*self.inner.state.borrow())
            .field("active", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    #[must_use]
    pub fn new(processor: PipelineProcessor) -> Self {
        let (state, _) = watch::channel(QueueState::default());
        let (pause, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                processor,
                jobs: Mutex::new(Vec::new()),
                state,
                pause,
                cancel: Mutex::new(CancellationToken::new()),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Add a file to the batch
    ///
    /// # Errors
    /// Rejected while a run is active.
    pub fn submit(&self, submission: JobSubmission) -> Result<JobId> {
        let job = ImageJob::new(submission);
        let id = job.id;
        let mut jobs = self.inner.jobs();
        self.ensure_idle()?;
        jobs.push(job);
        Ok(id)
    }

    /// Reset a finished job to Pending so the next run processes it again
    ///
    /// # Errors
    /// Rejected while a run is active or when the job does not exist.
    pub fn resubmit(&self, id: JobId) -> Result<()> {
        let mut jobs = self.inner.jobs();
        self.ensure_idle()?;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| PipelineError::invalid_options(format!("Unknown job {id}")))?;
        job.resubmit()
    }

    /// Append `jobs` to the batch and process every Pending job in order
    ///
    /// Completed jobs are skipped and not counted in `total`. Failed and
    /// cancelled jobs stay as they are until resubmitted. A failing job never
    /// stops the run; only [`JobQueue::cancel`] does.
    ///
    /// # Errors
    /// - A run is already active
    /// - `options` are invalid
    /// - A job in `jobs` shares its id with another job of the batch
    pub async fn start(&self, jobs: Vec<ImageJob>, options: ProcessingOptions) -> Result<RunReport> {
        options.validate()?;
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::invalid_options("A run is already active"));
        }
        let _run = ActiveRun { inner: &self.inner };

        let (order, skipped) = {
            let mut batch = self.inner.jobs();
            let mut ids: HashSet<JobId> = batch.iter().map(|job| job.id).collect();
            if let Some(duplicate) = jobs.iter().find(|job| !ids.insert(job.id)) {
                return Err(PipelineError::invalid_options(format!(
                    "Job '{}' ({}) is already part of the batch",
                    duplicate.name, duplicate.id
                )));
            }
            batch.extend(jobs);
            let skipped = batch
                .iter()
                .filter(|job| job.status() == JobStatus::Completed)
                .count();
            let order: Vec<JobId> = batch
                .iter()
                .filter(|job| job.status() == JobStatus::Pending)
                .map(|job| job.id)
                .collect();
            (order, skipped)
        };

        let token = CancellationToken::new();
        self.inner.pause.send_replace(false);
        self.inner.state.send_modify(|state| {
            *state = QueueState {
                queued: order.len(),
                total: order.len(),
                ..QueueState::default()
            };
            *self.inner.cancel_slot() = token.clone();
        });

        tracing::info!(jobs = order.len(), skipped, "Starting batch run");

        let mut report = RunReport {
            total: order.len(),
            skipped,
            ..RunReport::default()
        };
        let mut control = RunControl::new(token.clone(), self.inner.pause.subscribe());
        let reporter: Arc<dyn ProgressReporter> = Arc::new(QueueReporter {
            inner: Arc::clone(&self.inner),
            downstream: self.inner.processor.reporter(),
        });

        for id in order {
            if control.checkpoint().await.is_err() {
                break;
            }
            let (bytes, name) = match self.begin_job(id) {
                JobStart::Started { bytes, name } => (bytes, name),
                JobStart::Refused => {
                    report.failed += 1;
                    continue;
                },
                JobStart::Missing => continue,
                JobStart::Cancelled => break,
            };

            let outcome = self
                .inner
                .processor
                .process_with_reporter(bytes, &name, &options, &mut control, reporter.clone())
                .instrument(tracing::info_span!("job", name = %name, id = %id))
                .await;
            match &outcome {
                PipelineOutcome::Completed(_) => report.succeeded += 1,
                PipelineOutcome::Failed(error) => {
                    report.failed += 1;
                    if error.kind() == ErrorKind::QuotaExceeded {
                        report.quota_exceeded += 1;
                    }
                },
                PipelineOutcome::Cancelled => report.cancelled += 1,
            }
            self.finish_job(id, outcome);
        }

        let state = self.inner.state.borrow().clone();
        report.not_started = state.queued;
        report.was_cancelled = state.cancelled;
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.was_cancelled,
            "Batch run finished"
        );
        Ok(report)
    }

    /// Move a job to in-flight unless the run was cancelled
    ///
    /// Runs under the state lock, so a `cancel()` that has returned is always
    /// observed here. A job that cannot start still leaves `queued`, so the
    /// counters keep adding up.
    fn begin_job(&self, id: JobId) -> JobStart {
        let mut started = JobStart::Cancelled;
        self.inner.state.send_if_modified(|state| {
            if state.cancelled {
                return false;
            }
            let mut jobs = self.inner.jobs();
            let Some(job) = jobs.iter_mut().find(|job| job.id == id) else {
                // Removed jobs cannot happen mid-run; account for it anyway
                state.queued = state.queued.saturating_sub(1);
                state.total = state.total.saturating_sub(1);
                started = JobStart::Missing;
                return true;
            };
            if let Err(error) = job.begin() {
                tracing::error!(error = %error, "Could not start job");
                state.queued = state.queued.saturating_sub(1);
                state.completed += 1;
                started = JobStart::Refused;
                return true;
            }
            started = JobStart::Started {
                bytes: job.source_bytes().to_vec(),
                name: job.name.clone(),
            };
            state.queued -= 1;
            state.in_flight = 1;
            state.current_job = Some(job.name.clone());
            state.current_job_progress = 0;
            true
        });
        started
    }

    fn finish_job(&self, id: JobId, outcome: PipelineOutcome) {
        self.inner.state.send_modify(|state| {
            let mut jobs = self.inner.jobs();
            if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
                let transition = match outcome {
                    PipelineOutcome::Completed(image) => job.complete(image),
                    PipelineOutcome::Failed(error) => job.fail(&error),
                    PipelineOutcome::Cancelled => job.cancel(),
                };
                if let Err(error) = transition {
                    tracing::error!(error = %error, "Could not record job outcome");
                }
            }
            state.in_flight = 0;
            state.completed += 1;
            state.current_job = None;
            state.current_job_progress = 0;
        });
    }

    /// Block at the next checkpoint until [`JobQueue::resume`]
    pub fn pause(&self) {
        self.inner.pause.send_replace(true);
        self.inner.state.send_if_modified(|state| {
            let changed = !state.paused;
            state.paused = true;
            changed
        });
        tracing::debug!("Queue paused");
    }

    pub fn resume(&self) {
        self.inner.pause.send_replace(false);
        self.inner.state.send_if_modified(|state| {
            let changed = state.paused;
            state.paused = false;
            changed
        });
        tracing::debug!("Queue resumed");
    }

    /// Stop the run: no job starts after this returns and the active job's
    /// token is cancelled
    ///
    /// The flag stays set until the next `start`.
    pub fn cancel(&self) {
        self.inner.state.send_modify(|state| {
            state.cancelled = true;
            self.inner.cancel_slot().cancel();
        });
        tracing::info!("Queue cancelled");
    }

    /// Batch percentage, current job and its own stage progress
    #[must_use]
    pub fn progress(&self) -> QueueProgress {
        let state = self.inner.state.borrow().clone();
        QueueProgress {
            percent: state.percent(),
            current_job: state.current_job.clone(),
            current_job_percent: state.current_job_progress,
            state,
        }
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> QueueState {
        self.inner.state.borrow().clone()
    }

    /// Receive every published `QueueState`
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Summaries of all jobs in submission order
    #[must_use]
    pub fn jobs(&self) -> Vec<JobSummary> {
        self.inner.jobs().iter().map(JobSummary::from).collect()
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> Option<JobSummary> {
        self.inner
            .jobs()
            .iter()
            .find(|job| job.id == id)
            .map(JobSummary::from)
    }

    /// Move a completed job's output buffer out of the batch
    pub fn take_result(&self, id: JobId) -> Option<ProcessedImage> {
        self.inner
            .jobs()
            .iter_mut()
            .find(|job| job.id == id)
            .and_then(ImageJob::take_result)
    }

    /// Drop a job and its buffers
    ///
    /// # Errors
    /// Rejected while a run is active.
    pub fn remove(&self, id: JobId) -> Result<bool> {
        let mut jobs = self.inner.jobs();
        self.ensure_idle()?;
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        Ok(jobs.len() != before)
    }

    /// Drop every job and its buffers
    ///
    /// # Errors
    /// Rejected while a run is active.
    pub fn clear(&self) -> Result<usize> {
        let mut jobs = self.inner.jobs();
        self.ensure_idle()?;
        let removed = jobs.len();
        jobs.clear();
        jobs.shrink_to_fit();
        Ok(removed)
    }

    /// Checked while holding the jobs lock so it cannot race `start`
    fn ensure_idle(&self) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::invalid_options(
                "The batch cannot be modified while a run is active",
            ));
        }
        Ok(())
    }
}

/// Result of trying to move a job in flight
enum JobStart {
    Started { bytes: Vec<u8>, name: String },
    /// The job was not Pending any more
    Refused,
    /// The job left the batch
    Missing,
    Cancelled,
}

/// Clears the active flag and settles an interrupted job when a run ends
struct ActiveRun<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.inner.state.send_modify(|state| {
            if state.in_flight > 0 {
                let mut jobs = self.inner.jobs();
                for job in jobs.iter_mut().filter(|j| j.status() == JobStatus::Processing) {
                    let _ = job.cancel();
                }
                state.in_flight = 0;
                state.completed += 1;
            }
            state.current_job = None;
            state.current_job_progress = 0;
        });
        self.inner.active.store(false, Ordering::SeqCst);
    }
}

/// Publishes per-job stage progress into the queue state
struct QueueReporter {
    inner: Arc<Inner>,
    downstream: Arc<dyn ProgressReporter>,
}

impl ProgressReporter for QueueReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        let progress = update.progress;
        self.inner.state.send_if_modified(|state| {
            if state.current_job_progress == progress || state.in_flight == 0 {
                return false;
            }
            state.current_job_progress = progress;
            true
        });
        self.downstream.report_progress(update);
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        self.downstream.report_completion(timings);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.downstream.report_error(stage, error);
    }
}
