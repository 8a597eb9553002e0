//! Live stream, DVR and telemetry repositories

use crate::error::{AppError, Result};
use crate::models::live::{
    DvrRecording, DvrRecordingStatus, LiveStream, LiveStreamAnalytics, LiveStreamEvent,
    LiveStreamStatus,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const STREAM_COLUMNS: &str = "id, title, user_id, stream_key, ingest_url, status, master_playlist,
                viewer_count, peak_viewer_count, dvr_enabled, dvr_window, low_latency,
                settings, metadata, started_at, ended_at, created_at, updated_at";

pub async fn get_stream(pool: &PgPool, stream_id: Uuid) -> Result<LiveStream> {
    let stream = sqlx::query_as::<_, LiveStream>(&format!(
        "SELECT {STREAM_COLUMNS} FROM live_streams WHERE id = $1"
    ))
    .bind(stream_id)
    .fetch_optional(pool)
    .await?;

    stream.ok_or_else(|| AppError::NotFound(format!("live stream {stream_id}")))
}

pub async fn get_stream_by_key(pool: &PgPool, stream_key: &str) -> Result<LiveStream> {
    let stream = sqlx::query_as::<_, LiveStream>(&format!(
        "SELECT {STREAM_COLUMNS} FROM live_streams WHERE stream_key = $1"
    ))
    .bind(stream_key)
    .fetch_optional(pool)
    .await?;

    stream.ok_or_else(|| AppError::NotFound("unknown stream key".to_string()))
}

/// CAS `from` -> `to`; `started_at` stamps on the transition into `live`,
/// `ended_at` on the transition into `ended`.
pub async fn transition_stream(
    pool: &PgPool,
    stream_id: Uuid,
    from: LiveStreamStatus,
    to: LiveStreamStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE live_streams
         SET status = $3,
             started_at = CASE WHEN $3 = 'live' THEN NOW() ELSE started_at END,
             ended_at = CASE WHEN $3 = 'ended' THEN NOW() ELSE ended_at END,
             updated_at = NOW()
         WHERE id = $1 AND status = $2",
    )
    .bind(stream_id)
    .bind(from)
    .bind(to)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_stream(pool, stream_id).await?;
        return Err(AppError::Conflict(format!(
            "stream {stream_id} is {}, expected {}",
            current.status.as_str(),
            from.as_str()
        )));
    }
    Ok(())
}

pub async fn set_stream_playlist(
    pool: &PgPool,
    stream_id: Uuid,
    master_playlist: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE live_streams SET master_playlist = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(stream_id)
    .bind(master_playlist)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("live stream {stream_id}")));
    }
    Ok(())
}

/// Write the viewer gauge; the peak only ever ratchets upward.
pub async fn update_stream_viewers(
    pool: &PgPool,
    stream_id: Uuid,
    viewer_count: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE live_streams
         SET viewer_count = $2,
             peak_viewer_count = GREATEST(peak_viewer_count, $2),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(stream_id)
    .bind(viewer_count)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_analytics(pool: &PgPool, sample: &LiveStreamAnalytics) -> Result<()> {
    sqlx::query(
        "INSERT INTO live_stream_analytics
            (id, stream_id, viewer_count, frames_encoded, bitrate_kbps, sampled_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(sample.id)
    .bind(sample.stream_id)
    .bind(sample.viewer_count)
    .bind(sample.frames_encoded)
    .bind(sample.bitrate_kbps)
    .bind(sample.sampled_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_event(pool: &PgPool, event: &LiveStreamEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO live_stream_events
            (id, stream_id, event_type, severity, message, details, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(event.id)
    .bind(event.stream_id)
    .bind(&event.event_type)
    .bind(event.severity)
    .bind(&event.message)
    .bind(&event.details)
    .bind(event.timestamp)
    .execute(pool)
    .await?;

    Ok(())
}

// -- DVR ---------------------------------------------------------------

const DVR_COLUMNS: &str = "id, stream_id, status, start_time, end_time, duration, window_seconds,
                playlist_url, thumbnail_url, video_id, retention_until, created_at, updated_at";

pub async fn create_dvr_recording(pool: &PgPool, recording: &DvrRecording) -> Result<()> {
    sqlx::query(
        "INSERT INTO dvr_recordings (
            id, stream_id, status, start_time, end_time, duration, window_seconds,
            playlist_url, thumbnail_url, video_id, retention_until, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())",
    )
    .bind(recording.id)
    .bind(recording.stream_id)
    .bind(recording.status)
    .bind(recording.start_time)
    .bind(recording.end_time)
    .bind(recording.duration)
    .bind(recording.window_seconds)
    .bind(&recording.playlist_url)
    .bind(&recording.thumbnail_url)
    .bind(recording.video_id)
    .bind(recording.retention_until)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_dvr_recording(pool: &PgPool, id: Uuid) -> Result<DvrRecording> {
    let recording = sqlx::query_as::<_, DvrRecording>(&format!(
        "SELECT {DVR_COLUMNS} FROM dvr_recordings WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    recording.ok_or_else(|| AppError::NotFound(format!("dvr recording {id}")))
}

pub async fn update_dvr_status(pool: &PgPool, id: Uuid, status: DvrRecordingStatus) -> Result<()> {
    let result =
        sqlx::query("UPDATE dvr_recordings SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("dvr recording {id}")));
    }
    Ok(())
}

pub async fn finish_dvr_recording(
    pool: &PgPool,
    id: Uuid,
    end_time: DateTime<Utc>,
    duration: f64,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE dvr_recordings
         SET status = 'processing', end_time = $2, duration = $3, updated_at = NOW()
         WHERE id = $1 AND status = 'recording'",
    )
    .bind(id)
    .bind(end_time)
    .bind(duration)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_dvr_recording(pool, id).await?;
        return Err(AppError::Conflict(format!(
            "dvr recording {id} is {}",
            current.status.as_str()
        )));
    }
    Ok(())
}

pub async fn publish_dvr_recording(
    pool: &PgPool,
    id: Uuid,
    playlist_url: &str,
    thumbnail_url: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE dvr_recordings
         SET status = 'available', playlist_url = $2, thumbnail_url = $3, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(playlist_url)
    .bind(thumbnail_url)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("dvr recording {id}")));
    }
    Ok(())
}

pub async fn link_dvr_video(pool: &PgPool, id: Uuid, video_id: Uuid) -> Result<()> {
    let result =
        sqlx::query("UPDATE dvr_recordings SET video_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(video_id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("dvr recording {id}")));
    }
    Ok(())
}
