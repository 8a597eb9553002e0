//! External collaborator contracts
//!
//! Everything the job substrate needs from the outside world sits behind one
//! of these traits so the scheduler, worker, live controller and webhook
//! engine can be driven by deterministic test doubles.

use crate::error::Result;
use crate::models::live::{
    DvrRecording, DvrRecordingStatus, LiveStream, LiveStreamAnalytics, LiveStreamEvent,
    LiveStreamStatus,
};
use crate::models::webhook::{Webhook, WebhookDelivery};
use crate::models::{
    AudioTrack, Job, JobStats, JobStatus, Output, Subtitle, Thumbnail, Video, VideoStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Transactional persistence for the substrate's entities.
///
/// CAS-style mutations return `Conflict` when the precondition no longer
/// holds and `NotFound` when the target row is absent.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- videos ------------------------------------------------------------
    async fn create_video(&self, video: &Video) -> Result<()>;
    async fn get_video(&self, id: Uuid) -> Result<Video>;
    async fn update_video_status(&self, id: Uuid, status: VideoStatus) -> Result<()>;
    /// Cascading delete over jobs, outputs, thumbnails, subtitles, audio
    /// tracks and analytics, in a single transaction.
    async fn delete_video(&self, id: Uuid) -> Result<()>;

    // -- jobs --------------------------------------------------------------
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Job>;
    async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<Job>>;
    async fn get_jobs_for_video(&self, video_id: Uuid) -> Result<Vec<Job>>;
    async fn get_job_stats(&self) -> Result<JobStats>;
    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()>;
    /// CAS pending -> queued after dispatch; `Conflict` when the worker
    /// already advanced the job.
    async fn mark_job_queued(&self, id: Uuid) -> Result<()>;
    /// CAS {pending,queued} -> processing; stamps `worker_id`, `started_at`,
    /// resets progress.
    async fn begin_job(&self, id: Uuid, worker_id: &str) -> Result<Job>;
    /// Progress write, guarded by `worker_id`; must never decrease.
    async fn update_job_progress(&self, id: Uuid, worker_id: &str, progress: f64) -> Result<()>;
    /// CAS processing -> completed; progress 100, stamps `completed_at`.
    async fn complete_job(&self, id: Uuid, worker_id: &str) -> Result<()>;
    /// CAS processing -> failed with `error_msg`.
    async fn fail_job(&self, id: Uuid, worker_id: &str, error_msg: &str) -> Result<()>;
    /// CAS {pending,queued,processing} -> cancelled.
    async fn cancel_job(&self, id: Uuid) -> Result<()>;
    async fn merge_job_metadata(
        &self,
        id: Uuid,
        entries: &HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    // -- outputs & side artefacts -----------------------------------------
    async fn create_output(&self, output: &Output) -> Result<()>;
    async fn list_outputs(&self, job_id: Uuid) -> Result<Vec<Output>>;
    async fn create_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()>;
    async fn create_subtitle(&self, subtitle: &Subtitle) -> Result<()>;
    async fn create_audio_track(&self, track: &AudioTrack) -> Result<()>;

    // -- live streams ------------------------------------------------------
    async fn get_stream(&self, id: Uuid) -> Result<LiveStream>;
    async fn get_stream_by_key(&self, stream_key: &str) -> Result<LiveStream>;
    /// CAS `from` -> `to`; stamps `started_at`/`ended_at` on the matching
    /// transitions.
    async fn transition_stream(
        &self,
        id: Uuid,
        from: LiveStreamStatus,
        to: LiveStreamStatus,
    ) -> Result<()>;
    async fn set_stream_playlist(&self, id: Uuid, master_playlist: &str) -> Result<()>;
    async fn update_stream_viewers(&self, id: Uuid, viewer_count: i64) -> Result<()>;
    async fn insert_stream_analytics(&self, sample: &LiveStreamAnalytics) -> Result<()>;
    async fn insert_stream_event(&self, event: &LiveStreamEvent) -> Result<()>;

    // -- DVR ---------------------------------------------------------------
    async fn create_dvr_recording(&self, recording: &DvrRecording) -> Result<()>;
    async fn get_dvr_recording(&self, id: Uuid) -> Result<DvrRecording>;
    async fn update_dvr_status(&self, id: Uuid, status: DvrRecordingStatus) -> Result<()>;
    async fn finish_dvr_recording(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration: f64,
    ) -> Result<()>;
    async fn publish_dvr_recording(
        &self,
        id: Uuid,
        playlist_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<()>;
    async fn link_dvr_video(&self, id: Uuid, video_id: Uuid) -> Result<()>;

    // -- webhooks ----------------------------------------------------------
    async fn get_webhook(&self, id: Uuid) -> Result<Webhook>;
    async fn list_active_webhooks(&self, event: &str) -> Result<Vec<Webhook>>;
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> Result<()>;
    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        status_code: i32,
        response_body: &str,
    ) -> Result<()>;
    /// Record a failed attempt; `next_retry_at = None` exhausts the ladder
    /// and flips the delivery to `failed`.
    async fn mark_delivery_retry(
        &self,
        id: Uuid,
        status_code: Option<i32>,
        response_body: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookDelivery>>;
}

/// Content-addressed blob storage (S3 in production).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<()>;
    async fn download(&self, remote_url: &str, local_path: &Path) -> Result<()>;
    fn url(&self, key: &str) -> String;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Volatile key/value store with TTLs, counters and advisory locks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64>;
    /// Set-if-not-exists with TTL; `true` when this owner holds the lock.
    async fn acquire_lock(&self, resource: &str, owner: &str, ttl_secs: u64) -> Result<bool>;
    /// Unconditional delete.
    async fn release_lock(&self, resource: &str) -> Result<()>;
}

/// Non-blocking metric sink.
pub trait Metrics: Send + Sync {
    fn counter(&self, name: &str, labels: &[(&str, &str)], value: u64);
    fn gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Wall clock, injected for deterministic tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Id source, injected for deterministic tests.
pub trait IdGen: Send + Sync {
    fn new_id(&self) -> Uuid;
}

/// Hands dispatched jobs to workers; implementations must be idempotent on
/// the job id within a worker's processing window.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &Job) -> Result<()>;
}

/// System implementations of the trivial ports.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Metrics sink that drops everything; used by tests and as a safe default.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}
    fn gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}
