//! Data access layer
//!
//! Per-entity SQL modules plus the Postgres-backed `Repository` port
//! implementation that the services are wired against.

pub mod job_repo;
pub mod live_repo;
pub mod output_repo;
pub mod video_repo;
pub mod webhook_repo;

use crate::error::Result;
use crate::models::live::{
    DvrRecording, DvrRecordingStatus, LiveStream, LiveStreamAnalytics, LiveStreamEvent,
    LiveStreamStatus,
};
use crate::models::webhook::{Webhook, WebhookDelivery};
use crate::models::{
    AudioTrack, Job, JobStats, JobStatus, Output, Subtitle, Thumbnail, Video, VideoStatus,
};
use crate::ports::Repository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// `Repository` backed by Postgres.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_video(&self, video: &Video) -> Result<()> {
        video_repo::create_video(&self.pool, video).await
    }

    async fn get_video(&self, id: Uuid) -> Result<Video> {
        video_repo::get_video(&self.pool, id).await
    }

    async fn update_video_status(&self, id: Uuid, status: VideoStatus) -> Result<()> {
        video_repo::update_status(&self.pool, id, status).await
    }

    async fn delete_video(&self, id: Uuid) -> Result<()> {
        video_repo::delete_cascade(&self.pool, id).await
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        job_repo::create_job(&self.pool, job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        job_repo::get_job(&self.pool, id).await
    }

    async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        job_repo::get_pending_jobs(&self.pool, limit).await
    }

    async fn get_jobs_for_video(&self, video_id: Uuid) -> Result<Vec<Job>> {
        job_repo::get_jobs_for_video(&self.pool, video_id).await
    }

    async fn get_job_stats(&self) -> Result<JobStats> {
        job_repo::get_job_stats(&self.pool).await
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        job_repo::update_status(&self.pool, id, status).await
    }

    async fn mark_job_queued(&self, id: Uuid) -> Result<()> {
        job_repo::mark_queued(&self.pool, id).await
    }

    async fn begin_job(&self, id: Uuid, worker_id: &str) -> Result<Job> {
        job_repo::begin_job(&self.pool, id, worker_id).await
    }

    async fn update_job_progress(&self, id: Uuid, worker_id: &str, progress: f64) -> Result<()> {
        job_repo::update_progress(&self.pool, id, worker_id, progress).await
    }

    async fn complete_job(&self, id: Uuid, worker_id: &str) -> Result<()> {
        job_repo::complete_job(&self.pool, id, worker_id).await
    }

    async fn fail_job(&self, id: Uuid, worker_id: &str, error_msg: &str) -> Result<()> {
        job_repo::fail_job(&self.pool, id, worker_id, error_msg).await
    }

    async fn cancel_job(&self, id: Uuid) -> Result<()> {
        job_repo::cancel_job(&self.pool, id).await
    }

    async fn merge_job_metadata(
        &self,
        id: Uuid,
        entries: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        job_repo::merge_metadata(&self.pool, id, entries).await
    }

    async fn create_output(&self, output: &Output) -> Result<()> {
        output_repo::create_output(&self.pool, output).await
    }

    async fn list_outputs(&self, job_id: Uuid) -> Result<Vec<Output>> {
        output_repo::list_outputs(&self.pool, job_id).await
    }

    async fn create_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        output_repo::create_thumbnail(&self.pool, thumbnail).await
    }

    async fn create_subtitle(&self, subtitle: &Subtitle) -> Result<()> {
        output_repo::create_subtitle(&self.pool, subtitle).await
    }

    async fn create_audio_track(&self, track: &AudioTrack) -> Result<()> {
        output_repo::create_audio_track(&self.pool, track).await
    }

    async fn get_stream(&self, id: Uuid) -> Result<LiveStream> {
        live_repo::get_stream(&self.pool, id).await
    }

    async fn get_stream_by_key(&self, stream_key: &str) -> Result<LiveStream> {
        live_repo::get_stream_by_key(&self.pool, stream_key).await
    }

    async fn transition_stream(
        &self,
        id: Uuid,
        from: LiveStreamStatus,
        to: LiveStreamStatus,
    ) -> Result<()> {
        live_repo::transition_stream(&self.pool, id, from, to).await
    }

    async fn set_stream_playlist(&self, id: Uuid, master_playlist: &str) -> Result<()> {
        live_repo::set_stream_playlist(&self.pool, id, master_playlist).await
    }

    async fn update_stream_viewers(&self, id: Uuid, viewer_count: i64) -> Result<()> {
        live_repo::update_stream_viewers(&self.pool, id, viewer_count).await
    }

    async fn insert_stream_analytics(&self, sample: &LiveStreamAnalytics) -> Result<()> {
        live_repo::insert_analytics(&self.pool, sample).await
    }

    async fn insert_stream_event(&self, event: &LiveStreamEvent) -> Result<()> {
        live_repo::insert_event(&self.pool, event).await
    }

    async fn create_dvr_recording(&self, recording: &DvrRecording) -> Result<()> {
        live_repo::create_dvr_recording(&self.pool, recording).await
    }

    async fn get_dvr_recording(&self, id: Uuid) -> Result<DvrRecording> {
        live_repo::get_dvr_recording(&self.pool, id).await
    }

    async fn update_dvr_status(&self, id: Uuid, status: DvrRecordingStatus) -> Result<()> {
        live_repo::update_dvr_status(&self.pool, id, status).await
    }

    async fn finish_dvr_recording(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration: f64,
    ) -> Result<()> {
        live_repo::finish_dvr_recording(&self.pool, id, end_time, duration).await
    }

    async fn publish_dvr_recording(
        &self,
        id: Uuid,
        playlist_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<()> {
        live_repo::publish_dvr_recording(&self.pool, id, playlist_url, thumbnail_url).await
    }

    async fn link_dvr_video(&self, id: Uuid, video_id: Uuid) -> Result<()> {
        live_repo::link_dvr_video(&self.pool, id, video_id).await
    }

    async fn get_webhook(&self, id: Uuid) -> Result<Webhook> {
        webhook_repo::get_webhook(&self.pool, id).await
    }

    async fn list_active_webhooks(&self, event: &str) -> Result<Vec<Webhook>> {
        webhook_repo::list_active_webhooks(&self.pool, event).await
    }

    async fn create_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        webhook_repo::create_delivery(&self.pool, delivery).await
    }

    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        status_code: i32,
        response_body: &str,
    ) -> Result<()> {
        webhook_repo::mark_delivered(&self.pool, id, status_code, response_body).await
    }

    async fn mark_delivery_retry(
        &self,
        id: Uuid,
        status_code: Option<i32>,
        response_body: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        webhook_repo::mark_retry(&self.pool, id, status_code, response_body, next_retry_at).await
    }

    async fn due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookDelivery>> {
        webhook_repo::due_deliveries(&self.pool, now, limit).await
    }
}
