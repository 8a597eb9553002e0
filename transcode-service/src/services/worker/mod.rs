//! Transcode worker
//!
//! Consumes dispatched jobs, claims them via the cross-process lock and the
//! repository CAS, drives the media pipeline, and owns every terminal
//! transition including the parent video rollup and webhook emission.

pub mod gpu;
pub mod pipeline;
pub mod progress;

use crate::config::WorkerConfig;
use crate::encoder::Encoder;
use crate::error::{AppError, Result};
use crate::models::webhook::events;
use crate::models::{Job, JobStatus, VideoStatus};
use crate::ports::{BlobStore, Clock, IdGen, JobPublisher, KeyValueStore, Metrics, Repository};
use crate::services::scheduler::JobScheduler;
use crate::services::webhook::Notifier;
use async_trait::async_trait;
use gpu::GpuProvider;
use pipeline::{JobPipeline, TempDirGuard};
use progress::DebouncedRepoSink;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything the pipeline needs from the outside world.
#[derive(Clone)]
pub struct WorkerDeps {
    pub repo: Arc<dyn Repository>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub encoder: Arc<dyn Encoder>,
    pub gpu: Arc<dyn GpuProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<dyn Metrics>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
}

/// In-process `JobPublisher` over a bounded channel to the worker.
pub struct ChannelPublisher {
    tx: mpsc::Sender<Job>,
}

impl ChannelPublisher {
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl JobPublisher for ChannelPublisher {
    async fn publish(&self, job: &Job) -> Result<()> {
        self.tx
            .try_send(job.clone())
            .map_err(|e| AppError::TransientIo(format!("worker channel: {e}")))
    }
}

pub struct TranscodeWorker {
    deps: WorkerDeps,
    scheduler: Arc<JobScheduler>,
    worker_id: String,
    work_dir: PathBuf,
    gpu_enabled: bool,
    lock_ttl_secs: u64,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TranscodeWorker {
    pub fn new(
        deps: WorkerDeps,
        scheduler: Arc<JobScheduler>,
        worker_id: impl Into<String>,
        config: &WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            deps,
            scheduler,
            worker_id: worker_id.into(),
            work_dir: PathBuf::from(&config.work_dir),
            gpu_enabled: config.gpu_enabled,
            lock_ttl_secs: config.job_lock_ttl_secs,
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    /// Consume published jobs until shutdown. Each job runs as its own task
    /// so cancellation and new dispatches interleave freely; the scheduler's
    /// admission control bounds how many run at once.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, "worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    let worker = self.clone();
                    let job_token = shutdown.child_token();
                    tokio::spawn(async move {
                        worker.handle(job, job_token).await;
                    });
                }
            }
        }
        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Out-of-band cancel: CAS the row, then interrupt the pipeline if this
    /// worker is currently processing the job.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        self.deps.repo.cancel_job(job_id).await?;
        if let Some(token) = self
            .cancellations
            .lock()
            .expect("cancellation registry lock")
            .get(&job_id)
        {
            token.cancel();
        }
        Ok(())
    }

    async fn handle(self: Arc<Self>, job: Job, token: CancellationToken) {
        let job_id = job.id;
        let lock_key = format!("job:{job_id}");

        // Cross-replica exclusivity before any state is touched.
        match self
            .deps
            .kv
            .acquire_lock(&lock_key, &self.worker_id, self.lock_ttl_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "job locked by another worker, skipping");
                self.scheduler.job_completed(job_id);
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "lock acquisition failed: {e}");
                self.scheduler.job_completed(job_id);
                return;
            }
        }

        self.cancellations
            .lock()
            .expect("cancellation registry lock")
            .insert(job_id, token.clone());

        let renewal = self.spawn_lock_renewal(lock_key.clone(), token.clone());
        let started = std::time::Instant::now();

        let outcome = self.process_job(&job, &token).await;
        self.finish(&job, outcome, started).await;

        renewal.abort();
        self.cancellations
            .lock()
            .expect("cancellation registry lock")
            .remove(&job_id);
        if let Err(e) = self.deps.kv.release_lock(&lock_key).await {
            warn!(job_id = %job_id, "lock release failed: {e}");
        }
        self.scheduler.job_completed(job_id);
    }

    fn spawn_lock_renewal(
        &self,
        lock_key: String,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let kv = self.deps.kv.clone();
        let owner = self.worker_id.clone();
        let ttl = self.lock_ttl_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs((ttl / 3).max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = kv.acquire_lock(&lock_key, &owner, ttl).await {
                            warn!(lock = %lock_key, "lock renewal failed: {e}");
                        }
                    }
                }
            }
        })
    }

    async fn process_job(&self, job: &Job, token: &CancellationToken) -> Result<()> {
        // CAS into processing; losing the race (cancel, another claim) skips.
        let claimed = self.deps.repo.begin_job(job.id, &self.worker_id).await?;
        info!(job_id = %job.id, priority = claimed.priority, "processing job");

        let video = self.deps.repo.get_video(claimed.video_id).await?;
        if let Err(e) = self
            .deps
            .repo
            .update_video_status(video.id, VideoStatus::Processing)
            .await
        {
            warn!(video_id = %video.id, "video status update failed: {e}");
        }

        let temp_dir = TempDirGuard::create(&self.work_dir, job.id).await?;
        let sink = Arc::new(DebouncedRepoSink::new(
            self.deps.repo.clone(),
            job.id,
            self.worker_id.clone(),
        ));

        let pipeline = JobPipeline {
            deps: &self.deps,
            job: &claimed,
            video: &video,
            temp_dir: temp_dir.path(),
            gpu_enabled: self.gpu_enabled,
            sink,
            cancel: token,
        };

        let result = pipeline.run().await;
        // Cooperative cancellation may surface as an encoder error; the
        // token is the authority.
        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        result
    }

    async fn finish(&self, job: &Job, outcome: Result<()>, started: std::time::Instant) {
        match outcome {
            Ok(()) => {
                if let Err(e) = self.deps.repo.complete_job(job.id, &self.worker_id).await {
                    error!(job_id = %job.id, "completion write failed: {e}");
                }
                self.deps
                    .metrics
                    .counter("jobs_total", &[("status", "completed")], 1);
                self.deps.metrics.histogram(
                    "job_duration_seconds",
                    &[("pipeline", "single")],
                    started.elapsed().as_secs_f64(),
                );
                self.rollup_video(job.video_id).await;
                self.emit_job_event(events::JOB_COMPLETED, job.id).await;
            }
            Err(AppError::Cancelled) => {
                info!(job_id = %job.id, "job cancelled");
                // The cancel API already CAS'd the row; this is a fallback
                // for cancellation observed mid-pipeline (e.g. shutdown).
                if let Err(e) = self.deps.repo.cancel_job(job.id).await {
                    if !matches!(e, AppError::Conflict(_)) {
                        warn!(job_id = %job.id, "cancel write failed: {e}");
                    }
                }
                self.deps
                    .metrics
                    .counter("jobs_total", &[("status", "cancelled")], 1);
                self.rollup_video(job.video_id).await;
            }
            Err(AppError::Conflict(reason)) => {
                // Lost the claim race; another actor owns the job's fate.
                info!(job_id = %job.id, "skipping job: {reason}");
            }
            Err(e) => {
                let message = e.job_message();
                error!(job_id = %job.id, "job failed: {message}");
                if let Err(write_err) = self
                    .deps
                    .repo
                    .fail_job(job.id, &self.worker_id, &message)
                    .await
                {
                    error!(job_id = %job.id, "failure write failed: {write_err}");
                }
                self.deps
                    .metrics
                    .counter("jobs_total", &[("status", "failed")], 1);
                self.rollup_video(job.video_id).await;
                self.emit_job_event(events::JOB_FAILED, job.id).await;
            }
        }
    }

    /// Recompute the parent video's status from its jobs.
    async fn rollup_video(&self, video_id: Uuid) {
        let jobs = match self.deps.repo.get_jobs_for_video(video_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(video_id = %video_id, "rollup fetch failed: {e}");
                return;
            }
        };

        let any_failed = jobs.iter().any(|j| j.status == JobStatus::Failed);
        let all_terminal = jobs.iter().all(|j| j.status.is_terminal());

        let status = if any_failed {
            VideoStatus::Failed
        } else if all_terminal {
            VideoStatus::Completed
        } else {
            VideoStatus::Processing
        };

        if let Err(e) = self.deps.repo.update_video_status(video_id, status).await {
            warn!(video_id = %video_id, "rollup write failed: {e}");
            return;
        }

        if status == VideoStatus::Completed {
            if let Err(e) = self
                .deps
                .notifier
                .notify(
                    events::VIDEO_COMPLETED,
                    serde_json::json!({ "video_id": video_id }),
                )
                .await
            {
                warn!(video_id = %video_id, "video webhook emission failed: {e}");
            }
        }
    }

    /// Webhook payloads carry the full job record including `error_msg`.
    async fn emit_job_event(&self, event: &str, job_id: Uuid) {
        let payload = match self.deps.repo.get_job(job_id).await {
            Ok(job) => serde_json::to_value(&job).unwrap_or_default(),
            Err(e) => {
                warn!(job_id = %job_id, "job reload for webhook failed: {e}");
                serde_json::json!({ "job_id": job_id })
            }
        };

        if let Err(e) = self.deps.notifier.notify(event, payload).await {
            warn!(job_id = %job_id, event = %event, "webhook emission failed: {e}");
        }
    }
}
