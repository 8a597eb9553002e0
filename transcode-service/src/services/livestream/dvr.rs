//! DVR recording service
//!
//! Recordings track the trailing window of a live stream. Stopping one
//! kicks off post-processing (segment concat, poster frame) in the
//! background; `convert_to_vod` turns a finished recording into a Video.

use crate::encoder::{ConcatMode, Encoder};
use crate::error::{AppError, Result};
use crate::models::live::{DvrRecording, DvrRecordingStatus};
use crate::models::{Video, VideoStatus};
use crate::ports::{BlobStore, Clock, IdGen, Repository};
use chrono::Duration as ChronoDuration;
use media_core::constants::DVR_RETENTION_SECS;
use sqlx::types::Json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct DvrService {
    repo: Arc<dyn Repository>,
    encoder: Arc<dyn Encoder>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGen>,
    /// Where the live encoder writes its segment trees
    live_dir: PathBuf,
}

impl DvrService {
    pub fn new(
        repo: Arc<dyn Repository>,
        encoder: Arc<dyn Encoder>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGen>,
        live_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo,
            encoder,
            blobs,
            clock,
            ids,
            live_dir: live_dir.into(),
        }
    }

    pub async fn start_recording(
        &self,
        stream_id: Uuid,
        window_seconds: i32,
    ) -> Result<DvrRecording> {
        let now = self.clock.now();
        let recording = DvrRecording {
            id: self.ids.new_id(),
            stream_id,
            status: DvrRecordingStatus::Recording,
            start_time: now,
            end_time: None,
            duration: 0.0,
            window_seconds,
            playlist_url: None,
            thumbnail_url: None,
            video_id: None,
            retention_until: now + ChronoDuration::seconds(DVR_RETENTION_SECS),
            created_at: now,
            updated_at: now,
        };
        self.repo.create_dvr_recording(&recording).await?;
        info!(recording_id = %recording.id, stream_id = %stream_id, "DVR recording started");
        Ok(recording)
    }

    /// Close the recording window and post-process it in the background.
    pub async fn stop_recording(&self, recording_id: Uuid) -> Result<()> {
        let recording = self.repo.get_dvr_recording(recording_id).await?;
        if recording.status != DvrRecordingStatus::Recording {
            return Err(AppError::Conflict(format!(
                "recording {recording_id} is {}",
                recording.status.as_str()
            )));
        }

        let end_time = self.clock.now();
        let duration = (end_time - recording.start_time).num_milliseconds() as f64 / 1000.0;
        self.repo
            .finish_dvr_recording(recording_id, end_time, duration)
            .await?;

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.post_process(recording_id, recording.stream_id).await {
                error!(recording_id = %recording_id, "DVR post-processing failed: {e}");
                let _ = service
                    .repo
                    .update_dvr_status(recording_id, DvrRecordingStatus::Failed)
                    .await;
            }
        });

        Ok(())
    }

    /// Concatenate the recorded segments, grab a poster frame, upload both
    /// and flip the recording to available.
    async fn post_process(&self, recording_id: Uuid, stream_id: Uuid) -> Result<()> {
        let cancel = CancellationToken::new();
        let segment_dir = self.live_dir.join(stream_id.to_string());
        let segments = collect_segments(&segment_dir).await?;
        if segments.is_empty() {
            return Err(AppError::PermanentIo(format!(
                "no segments recorded under {}",
                segment_dir.display()
            )));
        }

        let merged = segment_dir.join(format!("recording_{recording_id}.mp4"));
        self.encoder
            .concat(&segments, &merged, &ConcatMode::Demuxer, &cancel)
            .await?;

        let poster = segment_dir.join(format!("recording_{recording_id}.jpg"));
        let thumbnail_key = match self
            .encoder
            .extract_thumbnail(&merged, &poster, 1.0, &cancel)
            .await
        {
            Ok(()) => {
                let key = format!("dvr/{stream_id}/{recording_id}.jpg");
                self.blobs.upload(&key, &poster).await?;
                Some(self.blobs.url(&key))
            }
            Err(e) => {
                warn!(recording_id = %recording_id, "poster extraction failed: {e}");
                None
            }
        };

        let video_key = format!("dvr/{stream_id}/{recording_id}.mp4");
        self.blobs.upload(&video_key, &merged).await?;
        let playlist_url = self.blobs.url(&video_key);

        self.repo
            .publish_dvr_recording(recording_id, &playlist_url, thumbnail_key.as_deref())
            .await?;
        info!(recording_id = %recording_id, "DVR recording available");

        let _ = tokio::fs::remove_file(&merged).await;
        let _ = tokio::fs::remove_file(&poster).await;
        Ok(())
    }

    /// Materialize a finished recording as a Video ready for transcoding.
    pub async fn convert_to_vod(&self, recording_id: Uuid) -> Result<Video> {
        let recording = self.repo.get_dvr_recording(recording_id).await?;
        if recording.status != DvrRecordingStatus::Available {
            return Err(AppError::Conflict(format!(
                "recording {recording_id} is {}, not available",
                recording.status.as_str()
            )));
        }
        let source_url = recording.playlist_url.ok_or_else(|| {
            AppError::Internal(format!("recording {recording_id} has no media url"))
        })?;

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), serde_json::json!("dvr"));
        metadata.insert(
            "live_stream_id".to_string(),
            serde_json::json!(recording.stream_id),
        );
        metadata.insert("recording_id".to_string(), serde_json::json!(recording_id));

        let now = self.clock.now();
        let video = Video {
            id: self.ids.new_id(),
            filename: format!("dvr_{recording_id}.mp4"),
            original_url: source_url,
            size: 0,
            duration: recording.duration,
            width: 0,
            height: 0,
            codec: String::new(),
            bitrate: 0,
            frame_rate: 0.0,
            metadata: Json(metadata),
            status: VideoStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.repo.create_video(&video).await?;
        self.repo.link_dvr_video(recording_id, video.id).await?;
        info!(recording_id = %recording_id, video_id = %video.id, "DVR recording converted to VOD");
        Ok(video)
    }
}

/// Transport-stream segments of a live tree, in playback order.
async fn collect_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "ts").unwrap_or(false) {
            segments.push(path);
        }
    }
    segments.sort();
    Ok(segments)
}
