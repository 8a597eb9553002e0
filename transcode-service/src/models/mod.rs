//! Core entities of the job substrate

pub mod live;
pub mod quality;
pub mod webhook;

use chrono::{DateTime, Utc};
use media_core::RenditionSpec;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Video status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states freeze every field except `updated_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// States from which an external cancel is allowed.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Processing
        )
    }
}

/// A source video and the rollup of its transcode jobs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: Uuid,
    pub filename: String,
    pub original_url: String,
    pub size: i64,
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub codec: String,
    pub bitrate: i64,
    pub frame_rate: f64,
    pub metadata: Json<HashMap<String, serde_json::Value>>,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transcoding parameters attached to a job.
///
/// `extra` carries the optional pipeline switches; recognized keys are
/// `enable_hls`, `enable_dash`, `generate_thumbnails`, `extract_subtitles`,
/// `normalize_audio` and `resolutions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub output_format: String,
    pub resolution: String,
    pub bitrate: String,
    pub codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl TranscodeConfig {
    fn flag(&self, key: &str) -> bool {
        self.extra.get(key).map(|v| v == "true").unwrap_or(false)
    }

    pub fn hls_enabled(&self) -> bool {
        self.flag("enable_hls")
    }

    pub fn dash_enabled(&self) -> bool {
        // HLS wins when both are requested; the two are mutually exclusive.
        !self.hls_enabled() && self.flag("enable_dash")
    }

    pub fn thumbnails_enabled(&self) -> bool {
        self.flag("generate_thumbnails")
    }

    pub fn subtitles_enabled(&self) -> bool {
        self.flag("extract_subtitles")
    }

    pub fn normalize_audio(&self) -> bool {
        self.flag("normalize_audio")
    }

    pub fn two_pass(&self) -> bool {
        self.flag("two_pass")
    }

    /// Explicit rendition ladder override, when present and parseable.
    pub fn resolutions(&self) -> Option<Vec<RenditionSpec>> {
        let raw = self.extra.get("resolutions")?;
        serde_json::from_str(raw).ok()
    }
}

/// A unit of transcoding work owned by exactly one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub video_id: Uuid,
    pub status: JobStatus,
    pub priority: i32,
    pub progress: f64,
    pub error_msg: Option<String>,
    pub retry_count: i32,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: Json<TranscodeConfig>,
    pub metadata: Json<HashMap<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One rendition (or manifest) produced by a job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Output {
    pub id: Uuid,
    pub job_id: Uuid,
    pub video_id: Uuid,
    pub format: String,
    pub resolution: String,
    pub width: i32,
    pub height: i32,
    pub codec: String,
    pub bitrate: i64,
    pub size: i64,
    pub duration: f64,
    pub url: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate job counters for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub avg_processing_secs: f64,
}

/// Generated preview image record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thumbnail {
    pub id: Uuid,
    pub video_id: Uuid,
    pub kind: String,
    pub index: i32,
    pub width: i32,
    pub height: i32,
    pub url: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// Extracted subtitle track record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subtitle {
    pub id: Uuid,
    pub video_id: Uuid,
    pub language: String,
    pub format: String,
    pub index: i32,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Audio track record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AudioTrack {
    pub id: Uuid,
    pub video_id: Uuid,
    pub language: String,
    pub codec: String,
    pub channels: i32,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
