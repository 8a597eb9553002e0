//! Shared test doubles and fixtures for the integration suite

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use transcode_service::error::{AppError, Result};
use transcode_service::models::live::{
    DvrRecording, DvrRecordingStatus, LiveStream, LiveStreamAnalytics, LiveStreamEvent,
    LiveStreamStatus,
};
use transcode_service::models::webhook::{Webhook, WebhookDelivery, WebhookDeliveryStatus};
use transcode_service::models::{
    AudioTrack, Job, JobStats, JobStatus, Output, Subtitle, Thumbnail, TranscodeConfig, Video,
    VideoStatus,
};
use transcode_service::ports::{
    BlobStore, Clock, IdGen, KeyValueStore, Metrics, Repository,
};
use transcode_service::services::webhook::Notifier;
use uuid::Uuid;

// -- clock / ids -----------------------------------------------------------

/// Clock whose time only moves when the test advances it.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += ChronoDuration::from_std(duration).expect("advance fits chrono");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Deterministic id source.
pub struct SeqIds {
    counter: AtomicU64,
}

impl SeqIds {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicU64::new(1),
        })
    }
}

impl IdGen for SeqIds {
    fn new_id(&self) -> Uuid {
        Uuid::from_u128(self.counter.fetch_add(1, Ordering::SeqCst) as u128)
    }
}

// -- repository ------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRepository {
    pub videos: Mutex<HashMap<Uuid, Video>>,
    pub jobs: Mutex<HashMap<Uuid, Job>>,
    pub outputs: Mutex<Vec<Output>>,
    pub thumbnails: Mutex<Vec<Thumbnail>>,
    pub subtitles: Mutex<Vec<Subtitle>>,
    pub audio_tracks: Mutex<Vec<AudioTrack>>,
    pub streams: Mutex<HashMap<Uuid, LiveStream>>,
    pub analytics: Mutex<Vec<LiveStreamAnalytics>>,
    pub events: Mutex<Vec<LiveStreamEvent>>,
    pub dvr: Mutex<HashMap<Uuid, DvrRecording>>,
    pub webhooks: Mutex<HashMap<Uuid, Webhook>>,
    pub deliveries: Mutex<HashMap<Uuid, WebhookDelivery>>,
}

impl InMemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn job_snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn delivery_snapshot(&self, id: Uuid) -> Option<WebhookDelivery> {
        self.deliveries.lock().unwrap().get(&id).cloned()
    }

    pub fn delivery_ids(&self) -> Vec<Uuid> {
        self.deliveries.lock().unwrap().keys().copied().collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_video(&self, video: &Video) -> Result<()> {
        self.videos.lock().unwrap().insert(video.id, video.clone());
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> Result<Video> {
        self.videos
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("video {id}")))
    }

    async fn update_video_status(&self, id: Uuid, status: VideoStatus) -> Result<()> {
        let mut videos = self.videos.lock().unwrap();
        let video = videos
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("video {id}")))?;
        video.status = status;
        video.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_video(&self, id: Uuid) -> Result<()> {
        if self.videos.lock().unwrap().remove(&id).is_none() {
            return Err(AppError::NotFound(format!("video {id}")));
        }
        self.jobs.lock().unwrap().retain(|_, j| j.video_id != id);
        self.outputs.lock().unwrap().retain(|o| o.video_id != id);
        self.thumbnails.lock().unwrap().retain(|t| t.video_id != id);
        self.subtitles.lock().unwrap().retain(|s| s.video_id != id);
        self.audio_tracks.lock().unwrap().retain(|a| a.video_id != id);
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.job_snapshot(id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))
    }

    async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn get_jobs_for_video(&self, video_id: Uuid) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn get_job_stats(&self) -> Result<JobStats> {
        let jobs = self.jobs.lock().unwrap();
        let mut stats = JobStats {
            total: jobs.len() as i64,
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_job_queued(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Pending {
            return Err(AppError::Conflict(format!(
                "job {id} is {}",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Queued;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn begin_job(&self, id: Uuid, worker_id: &str) -> Result<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Queued) {
            return Err(AppError::Conflict(format!(
                "job {id} is {}",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        job.progress = 0.0;
        job.error_msg = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn update_job_progress(&self, id: Uuid, worker_id: &str, progress: f64) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Processing && job.worker_id.as_deref() == Some(worker_id) {
                job.progress = job.progress.max(progress.min(100.0));
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete_job(&self, id: Uuid, worker_id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Processing || job.worker_id.as_deref() != Some(worker_id) {
            return Err(AppError::Conflict(format!(
                "job {id} is {}",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Completed;
        job.progress = 100.0;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, worker_id: &str, error_msg: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::Processing || job.worker_id.as_deref() != Some(worker_id) {
            return Err(AppError::Conflict(format!(
                "job {id} is {}",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Failed;
        job.error_msg = Some(error_msg.to_string());
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn cancel_job(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if !job.status.is_cancellable() {
            return Err(AppError::Conflict(format!(
                "job {id} is already {}",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_job_metadata(
        &self,
        id: Uuid,
        entries: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        for (key, value) in entries {
            job.metadata.0.insert(key.clone(), value.clone());
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn create_output(&self, output: &Output) -> Result<()> {
        self.outputs.lock().unwrap().push(output.clone());
        Ok(())
    }

    async fn list_outputs(&self, job_id: Uuid) -> Result<Vec<Output>> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn create_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        self.thumbnails.lock().unwrap().push(thumbnail.clone());
        Ok(())
    }

    async fn create_subtitle(&self, subtitle: &Subtitle) -> Result<()> {
        self.subtitles.lock().unwrap().push(subtitle.clone());
        Ok(())
    }

    async fn create_audio_track(&self, track: &AudioTrack) -> Result<()> {
        self.audio_tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn get_stream(&self, id: Uuid) -> Result<LiveStream> {
        self.streams
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("live stream {id}")))
    }

    async fn get_stream_by_key(&self, stream_key: &str) -> Result<LiveStream> {
        self.streams
            .lock()
            .unwrap()
            .values()
            .find(|s| s.stream_key == stream_key)
            .cloned()
            .ok_or_else(|| AppError::NotFound("unknown stream key".to_string()))
    }

    async fn transition_stream(
        &self,
        id: Uuid,
        from: LiveStreamStatus,
        to: LiveStreamStatus,
    ) -> Result<()> {
        let mut streams = self.streams.lock().unwrap();
        let stream = streams
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("live stream {id}")))?;
        if stream.status != from {
            return Err(AppError::Conflict(format!(
                "stream {id} is {}, expected {}",
                stream.status.as_str(),
                from.as_str()
            )));
        }
        stream.status = to;
        if to == LiveStreamStatus::Live {
            stream.started_at = Some(Utc::now());
        }
        if to == LiveStreamStatus::Ended {
            stream.ended_at = Some(Utc::now());
        }
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn set_stream_playlist(&self, id: Uuid, master_playlist: &str) -> Result<()> {
        let mut streams = self.streams.lock().unwrap();
        let stream = streams
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("live stream {id}")))?;
        stream.master_playlist = Some(master_playlist.to_string());
        Ok(())
    }

    async fn update_stream_viewers(&self, id: Uuid, viewer_count: i64) -> Result<()> {
        let mut streams = self.streams.lock().unwrap();
        if let Some(stream) = streams.get_mut(&id) {
            stream.viewer_count = viewer_count;
            stream.peak_viewer_count = stream.peak_viewer_count.max(viewer_count);
        }
        Ok(())
    }

    async fn insert_stream_analytics(&self, sample: &LiveStreamAnalytics) -> Result<()> {
        self.analytics.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn insert_stream_event(&self, event: &LiveStreamEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn create_dvr_recording(&self, recording: &DvrRecording) -> Result<()> {
        self.dvr.lock().unwrap().insert(recording.id, recording.clone());
        Ok(())
    }

    async fn get_dvr_recording(&self, id: Uuid) -> Result<DvrRecording> {
        self.dvr
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))
    }

    async fn update_dvr_status(&self, id: Uuid, status: DvrRecordingStatus) -> Result<()> {
        let mut dvr = self.dvr.lock().unwrap();
        let recording = dvr
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))?;
        recording.status = status;
        recording.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_dvr_recording(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration: f64,
    ) -> Result<()> {
        let mut dvr = self.dvr.lock().unwrap();
        let recording = dvr
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))?;
        if recording.status != DvrRecordingStatus::Recording {
            return Err(AppError::Conflict(format!(
                "dvr recording {id} is {}",
                recording.status.as_str()
            )));
        }
        recording.status = DvrRecordingStatus::Processing;
        recording.end_time = Some(end_time);
        recording.duration = duration;
        Ok(())
    }

    async fn publish_dvr_recording(
        &self,
        id: Uuid,
        playlist_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<()> {
        let mut dvr = self.dvr.lock().unwrap();
        let recording = dvr
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))?;
        recording.status = DvrRecordingStatus::Available;
        recording.playlist_url = Some(playlist_url.to_string());
        recording.thumbnail_url = thumbnail_url.map(String::from);
        Ok(())
    }

    async fn link_dvr_video(&self, id: Uuid, video_id: Uuid) -> Result<()> {
        let mut dvr = self.dvr.lock().unwrap();
        let recording = dvr
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))?;
        recording.video_id = Some(video_id);
        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> Result<Webhook> {
        self.webhooks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("webhook {id}")))
    }

    async fn list_active_webhooks(&self, event: &str) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.is_active && w.subscribes_to(event))
            .cloned()
            .collect())
    }

    async fn create_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.deliveries
            .lock()
            .unwrap()
            .insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        status_code: i32,
        response_body: &str,
    ) -> Result<()> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let delivery = deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))?;
        delivery.status = WebhookDeliveryStatus::Delivered;
        delivery.status_code = Some(status_code);
        delivery.response_body = Some(response_body.to_string());
        delivery.next_retry_at = None;
        delivery.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_delivery_retry(
        &self,
        id: Uuid,
        status_code: Option<i32>,
        response_body: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let delivery = deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))?;
        delivery.retry_count += 1;
        delivery.status_code = status_code;
        delivery.response_body = Some(response_body.to_string());
        delivery.next_retry_at = next_retry_at;
        if next_retry_at.is_none() {
            delivery.status = WebhookDeliveryStatus::Failed;
            delivery.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.lock().unwrap();
        let mut due: Vec<WebhookDelivery> = deliveries
            .values()
            .filter(|d| {
                d.status == WebhookDeliveryStatus::Pending
                    && d.next_retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at);
        due.truncate(limit as usize);
        Ok(due)
    }
}

// -- blob store ------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await?;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, remote_url: &str, local_path: &Path) -> Result<()> {
        let key = remote_url
            .strip_prefix("mem://")
            .ok_or_else(|| AppError::PermanentIo(format!("unsupported url {remote_url}")))?;
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::PermanentIo(format!("missing object {key}")))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, bytes).await?;
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("mem://{key}")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

// -- kv / locks ------------------------------------------------------------

#[derive(Default)]
pub struct MemoryKv {
    pub entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn set(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, _ttl_secs: u64) -> Result<i64> {
        let mut entries = self.entries.lock().unwrap();
        let value = entries
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        entries.insert(key.to_string(), value.to_string());
        Ok(value)
    }

    async fn acquire_lock(&self, resource: &str, owner: &str, _ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(resource) {
            Some(holder) if holder != owner => Ok(false),
            _ => {
                entries.insert(resource.to_string(), owner.to_string());
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, resource: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(resource);
        Ok(())
    }
}

// -- notifier / metrics ----------------------------------------------------

/// Captures emitted events instead of performing HTTP fan-out.
#[derive(Default)]
pub struct CollectingNotifier {
    pub events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, event: &str, data: serde_json::Value) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), data));
        Ok(())
    }
}

pub struct NoopTestMetrics;

impl Metrics for NoopTestMetrics {
    fn counter(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}
    fn gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

// -- fixtures --------------------------------------------------------------

pub fn make_video(url: &str) -> Video {
    let now = Utc::now();
    Video {
        id: Uuid::new_v4(),
        filename: "clip.mp4".to_string(),
        original_url: url.to_string(),
        size: 1_048_576,
        duration: 60.0,
        width: 1920,
        height: 1080,
        codec: "h264".to_string(),
        bitrate: 4_000_000,
        frame_rate: 30.0,
        metadata: Json(HashMap::new()),
        status: VideoStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

pub fn make_job(video_id: Uuid, priority: i32, config: TranscodeConfig) -> Job {
    let now = Utc::now();
    Job {
        id: Uuid::new_v4(),
        video_id,
        status: JobStatus::Pending,
        priority,
        progress: 0.0,
        error_msg: None,
        retry_count: 0,
        worker_id: None,
        started_at: None,
        completed_at: None,
        config: Json(config),
        metadata: Json(HashMap::new()),
        created_at: now,
        updated_at: now,
    }
}

pub fn make_webhook(url: &str, secret: &str, events: Vec<&str>) -> Webhook {
    let now = Utc::now();
    Webhook {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        url: url.to_string(),
        events: events.into_iter().map(String::from).collect(),
        secret: secret.to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// -- scripted http server --------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub headers: HashMap<String, String>,
    pub body: String,
}

pub struct TestHttpServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl TestHttpServer {
    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Serve scripted status codes, one per request; the last code repeats.
pub async fn start_http_server(status_codes: Vec<u16>) -> TestHttpServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let addr = listener.local_addr().expect("test server addr");
    let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::new(Mutex::new(Vec::new()));

    let log = requests.clone();
    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };

            let status = *status_codes
                .get(served)
                .or(status_codes.last())
                .unwrap_or(&200);
            served += 1;

            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];
            let (headers, body) = loop {
                let Ok(n) = socket.read(&mut chunk).await else {
                    break (HashMap::new(), String::new());
                };
                if n == 0 {
                    break (HashMap::new(), String::new());
                }
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(split) = find_header_end(&buffer) {
                    let head = String::from_utf8_lossy(&buffer[..split]).into_owned();
                    let headers = parse_headers(&head);
                    let content_length: usize = headers
                        .get("content-length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    while buffer.len() < split + 4 + content_length {
                        let Ok(n) = socket.read(&mut chunk).await else { break };
                        if n == 0 {
                            break;
                        }
                        buffer.extend_from_slice(&chunk[..n]);
                    }
                    let body = String::from_utf8_lossy(
                        &buffer[split + 4..(split + 4 + content_length).min(buffer.len())],
                    )
                    .into_owned();
                    break (headers, body);
                }
            };

            log.lock().unwrap().push(ReceivedRequest { headers, body });

            let reason = if (200..300).contains(&status) { "OK" } else { "Error" };
            let response =
                format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    TestHttpServer { addr, requests }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .skip(1)
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}
