//! Pause, resume and cancel behaviour of the job queue

mod common;

use common::{jpeg, OnCompletion, RecordingReporter, StuckSegmenter};
use listing_pipeline::{
    ImageJob, JobQueue, JobStatus, JobSubmission, PipelineProcessor, ProcessingOptions,
    QueueState,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

fn submissions(count: usize) -> Vec<ImageJob> {
    (1..=count)
        .map(|i| {
            ImageJob::new(JobSubmission::new(
                format!("photo-{i}.jpg"),
                "image/jpeg",
                jpeg(640, 480),
            ))
        })
        .collect()
}

fn queue_with(reporter: &Arc<RecordingReporter>) -> JobQueue {
    let processor = PipelineProcessor::builder()
        .progress_reporter(reporter.clone())
        .build()
        .unwrap();
    let queue = JobQueue::new(processor);
    assert!(reporter.queue.set(queue.clone()).is_ok());
    queue
}

async fn wait_for(
    states: &mut watch::Receiver<QueueState>,
    mut condition: impl FnMut(&QueueState) -> bool,
) -> QueueState {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            {
                let state = states.borrow_and_update();
                if condition(&*state) {
                    return state.clone();
                }
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("queue never reached the expected state")
}

#[tokio::test]
async fn test_cancel_after_first_job_leaves_rest_unstarted() {
    let reporter = RecordingReporter::new(OnCompletion::Cancel);
    let queue = queue_with(&reporter);
    let jobs = submissions(3);
    let ids: Vec<_> = jobs.iter().map(|job| job.id).collect();

    let report = queue.start(jobs, ProcessingOptions::default()).await.unwrap();

    assert!(report.was_cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.not_started, 2);
    assert_eq!(report.cancelled, 0);

    assert_eq!(queue.job(ids[0]).unwrap().status, JobStatus::Completed);
    assert_eq!(queue.job(ids[1]).unwrap().status, JobStatus::Pending);
    assert_eq!(queue.job(ids[2]).unwrap().status, JobStatus::Pending);

    let state = queue.state();
    assert!(state.cancelled);
    assert!(state.is_consistent());
    assert_eq!(state.completed, 1);
    assert_eq!(state.queued, 2);
    assert_eq!(*reporter.completions.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_next_run_picks_up_jobs_left_by_cancel() {
    let reporter = RecordingReporter::new(OnCompletion::Cancel);
    let queue = queue_with(&reporter);
    queue.start(submissions(3), ProcessingOptions::default()).await.unwrap();

    // Cancels again after one job: the completed job is skipped
    let report = queue.start(Vec::new(), ProcessingOptions::default()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.not_started, 1);

    let completed = queue
        .jobs()
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_pause_freezes_completed_until_resume() {
    let reporter = RecordingReporter::new(OnCompletion::Pause);
    let queue = queue_with(&reporter);
    let mut states = queue.subscribe();

    let runner = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.start(submissions(3), ProcessingOptions::default()).await })
    };

    let paused = wait_for(&mut states, |s| s.paused && s.completed == 1 && s.in_flight == 0).await;
    assert_eq!(paused.queued, 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = queue.state();
    assert_eq!(still.completed, 1);
    assert_eq!(still.in_flight, 0);
    assert!(queue.is_running());

    // Each completion pauses again; keep resuming until the run ends
    let mut resumed = 0;
    while !runner.is_finished() {
        if queue.state().paused {
            queue.resume();
            resumed += 1;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let report = runner.await.unwrap().unwrap();

    assert!(resumed >= 2);
    assert_eq!(report.succeeded, 3);
    assert!(!report.was_cancelled);
    assert_eq!(queue.state().completed, 3);
}

#[tokio::test]
async fn test_published_states_are_always_consistent() {
    let reporter = RecordingReporter::new(OnCompletion::Nothing);
    let queue = queue_with(&reporter);
    let mut states = queue.subscribe();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let done = state.total > 0 && state.completed == state.total;
            seen.push(state);
            if done {
                break;
            }
        }
        seen
    });

    let report = queue.start(submissions(4), ProcessingOptions::default()).await.unwrap();
    assert_eq!(report.succeeded, 4);

    let seen = watcher.await.unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(QueueState::is_consistent), "{seen:#?}");
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert!(seen.iter().all(|s| s.percent() <= 100));
    assert_eq!(queue.progress().percent, 100);
}

#[tokio::test]
async fn test_cancel_interrupts_job_in_flight() {
    let segmenter = Arc::new(StuckSegmenter::default());
    let processor = PipelineProcessor::builder()
        .segmenter(segmenter.clone())
        .build()
        .unwrap();
    let queue = JobQueue::new(processor);
    let jobs = submissions(2);
    let ids: Vec<_> = jobs.iter().map(|job| job.id).collect();
    let options = ProcessingOptions::builder()
        .remove_background(true)
        .build()
        .unwrap();

    let runner = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.start(jobs, options).await })
    };

    tokio::time::timeout(Duration::from_secs(30), segmenter.entered.notified())
        .await
        .unwrap();
    queue.cancel();

    let report = tokio::time::timeout(Duration::from_secs(30), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.was_cancelled);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.not_started, 1);
    assert_eq!(queue.job(ids[0]).unwrap().status, JobStatus::Cancelled);
    assert_eq!(queue.job(ids[1]).unwrap().status, JobStatus::Pending);
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_batch_is_locked_while_running() {
    let segmenter = Arc::new(StuckSegmenter::default());
    let processor = PipelineProcessor::builder()
        .segmenter(segmenter.clone())
        .build()
        .unwrap();
    let queue = JobQueue::new(processor);
    let options = ProcessingOptions::builder()
        .remove_background(true)
        .build()
        .unwrap();

    let runner = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.start(submissions(1), options).await })
    };
    tokio::time::timeout(Duration::from_secs(30), segmenter.entered.notified())
        .await
        .unwrap();

    assert!(queue.is_running());
    assert!(queue
        .submit(JobSubmission::new("late.jpg", "image/jpeg", jpeg(600, 600)))
        .is_err());
    assert!(queue.clear().is_err());
    assert!(queue.start(Vec::new(), options).await.is_err());

    queue.cancel();
    runner.await.unwrap().unwrap();
    assert!(queue.clear().is_ok());
}
