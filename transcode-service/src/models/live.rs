//! Live streaming entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Live stream lifecycle; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LiveStreamStatus {
    Idle,
    Starting,
    Live,
    Ending,
    Ended,
    Failed,
}

impl LiveStreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveStreamStatus::Idle => "idle",
            LiveStreamStatus::Starting => "starting",
            LiveStreamStatus::Live => "live",
            LiveStreamStatus::Ending => "ending",
            LiveStreamStatus::Ended => "ended",
            LiveStreamStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveStreamStatus::Ended | LiveStreamStatus::Failed)
    }
}

/// Per-stream encode settings, stored as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStreamSettings {
    /// Rendition names from the standard ladder ("720p", "480p", ...)
    pub resolutions: Vec<String>,
    pub video_codec: String,
    pub audio_codec: String,
    pub segment_secs: u32,
    /// LL-HLS partial segment duration; only used when `low_latency` is set
    pub low_latency_part_secs: f64,
}

impl Default for LiveStreamSettings {
    fn default() -> Self {
        Self {
            resolutions: vec!["720p".to_string(), "480p".to_string(), "360p".to_string()],
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            segment_secs: 2,
            low_latency_part_secs: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LiveStream {
    pub id: Uuid,
    pub title: String,
    pub user_id: Uuid,
    /// Publish credential; never exposed through webhook payloads
    pub stream_key: String,
    pub ingest_url: String,
    pub status: LiveStreamStatus,
    pub master_playlist: Option<String>,
    pub viewer_count: i64,
    pub peak_viewer_count: i64,
    pub dvr_enabled: bool,
    pub dvr_window: i32,
    pub low_latency: bool,
    pub settings: Json<LiveStreamSettings>,
    pub metadata: Json<HashMap<String, serde_json::Value>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-resolution rendition of a live stream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LiveStreamVariant {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub bitrate: i64,
    pub playlist_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DvrRecordingStatus {
    Recording,
    Processing,
    Available,
    Archived,
    Failed,
}

impl DvrRecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DvrRecordingStatus::Recording => "recording",
            DvrRecordingStatus::Processing => "processing",
            DvrRecordingStatus::Available => "available",
            DvrRecordingStatus::Archived => "archived",
            DvrRecordingStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DvrRecording {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub status: DvrRecordingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: f64,
    pub window_seconds: i32,
    pub playlist_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Converted VOD, once `convert_to_vod` has run
    pub video_id: Option<Uuid>,
    pub retention_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Periodic telemetry sample for a live stream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LiveStreamAnalytics {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub viewer_count: i64,
    pub frames_encoded: i64,
    pub bitrate_kbps: f64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LiveStreamEvent {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub event_type: String,
    pub severity: EventSeverity,
    pub message: String,
    pub details: Json<HashMap<String, serde_json::Value>>,
    pub timestamp: DateTime<Utc>,
}
