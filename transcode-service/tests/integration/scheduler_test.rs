//! Scheduler dispatch-order and admission-control tests

use crate::support::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transcode_service::error::{AppError, Result};
use transcode_service::models::{Job, JobStatus, TranscodeConfig};
use transcode_service::ports::{JobPublisher, Repository, SystemClock};
use transcode_service::services::scheduler::JobScheduler;
use uuid::Uuid;

struct RecordingPublisher {
    published: Mutex<Vec<Uuid>>,
    fail: Mutex<bool>,
}

impl RecordingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        })
    }

    fn published(&self) -> Vec<Uuid> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, job: &Job) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::TransientIo("worker channel full".to_string()));
        }
        self.published.lock().unwrap().push(job.id);
        Ok(())
    }
}

fn scheduler(
    repo: Arc<InMemoryRepository>,
    publisher: Arc<RecordingPublisher>,
    max_concurrent: usize,
) -> Arc<JobScheduler> {
    JobScheduler::new(
        repo,
        publisher,
        Arc::new(NoopTestMetrics),
        Arc::new(SystemClock),
        max_concurrent,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn priority_dispatch_order_with_single_slot() {
    let repo = InMemoryRepository::new();
    let publisher = RecordingPublisher::new();
    let sched = scheduler(repo.clone(), publisher.clone(), 1);

    let video = make_video("mem://source/clip.mp4");
    repo.create_video(&video).await.unwrap();

    let j1 = make_job(video.id, 5, TranscodeConfig::default());
    let j2 = make_job(video.id, 10, TranscodeConfig::default());
    let j3 = make_job(video.id, 5, TranscodeConfig::default());
    for job in [&j1, &j2, &j3] {
        repo.create_job(job).await.unwrap();
    }

    sched.schedule_job(j1.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;
    sched.schedule_job(j2.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;
    sched.schedule_job(j3.clone());

    // First drain: only the highest priority job fits the single slot.
    sched.drain_once().await;
    assert_eq!(publisher.published(), vec![j2.id]);
    assert_eq!(sched.active_jobs(), 1);
    assert_eq!(sched.queue_depth(), 2);
    assert_eq!(
        repo.job_snapshot(j2.id).unwrap().status,
        JobStatus::Queued
    );

    // Completion frees the slot; the earlier enqueue wins the tie.
    sched.job_completed(j2.id);
    sched.drain_once().await;
    assert_eq!(publisher.published(), vec![j2.id, j1.id]);

    sched.job_completed(j1.id);
    sched.drain_once().await;
    assert_eq!(publisher.published(), vec![j2.id, j1.id, j3.id]);
    assert_eq!(sched.queue_depth(), 0);
}

#[tokio::test]
async fn bounded_concurrency_is_never_exceeded() {
    let repo = InMemoryRepository::new();
    let publisher = RecordingPublisher::new();
    let sched = scheduler(repo.clone(), publisher.clone(), 2);

    let video = make_video("mem://source/clip.mp4");
    repo.create_video(&video).await.unwrap();
    for i in 0..5 {
        let job = make_job(video.id, i, TranscodeConfig::default());
        repo.create_job(&job).await.unwrap();
        sched.schedule_job(job);
    }

    sched.drain_once().await;
    assert_eq!(sched.active_jobs(), 2);
    assert_eq!(sched.queue_depth(), 3);

    // Draining again without completions changes nothing.
    sched.drain_once().await;
    assert_eq!(sched.active_jobs(), 2);
    assert_eq!(publisher.published().len(), 2);
}

#[tokio::test]
async fn publish_failure_requeues_and_retries_next_tick() {
    let repo = InMemoryRepository::new();
    let publisher = RecordingPublisher::new();
    let sched = scheduler(repo.clone(), publisher.clone(), 2);

    let video = make_video("mem://source/clip.mp4");
    repo.create_video(&video).await.unwrap();
    let job = make_job(video.id, 7, TranscodeConfig::default());
    repo.create_job(&job).await.unwrap();

    *publisher.fail.lock().unwrap() = true;
    sched.schedule_job(job.clone());
    sched.drain_once().await;

    assert_eq!(sched.active_jobs(), 0);
    assert_eq!(sched.queue_depth(), 1);
    assert!(publisher.published().is_empty());

    *publisher.fail.lock().unwrap() = false;
    sched.drain_once().await;
    assert_eq!(publisher.published(), vec![job.id]);
}

#[tokio::test]
async fn start_loads_persisted_pending_jobs() {
    let repo = InMemoryRepository::new();
    let publisher = RecordingPublisher::new();
    let sched = scheduler(repo.clone(), publisher.clone(), 10);

    let video = make_video("mem://source/clip.mp4");
    repo.create_video(&video).await.unwrap();
    for i in 0..3 {
        repo.create_job(&make_job(video.id, i, TranscodeConfig::default()))
            .await
            .unwrap();
    }

    let shutdown = tokio_util::sync::CancellationToken::new();
    sched.start(shutdown.clone()).await.unwrap();

    // The drain ticker fires immediately after start.
    assert!(
        wait_until(Duration::from_secs(2), || publisher.published().len() == 3).await,
        "expected all persisted jobs to dispatch"
    );
    shutdown.cancel();
}

#[tokio::test]
async fn completion_of_unknown_job_never_underflows() {
    let repo = InMemoryRepository::new();
    let publisher = RecordingPublisher::new();
    let sched = scheduler(repo, publisher, 1);

    sched.job_completed(Uuid::new_v4());
    assert_eq!(sched.active_jobs(), 0);
}
