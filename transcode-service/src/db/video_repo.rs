//! Video repository - database operations for videos
//!
//! Provides reusable SQL helpers for the `videos` table so the rest of the
//! service can depend on a consistent data-access surface.

use crate::error::{AppError, Result};
use crate::models::{Video, VideoStatus};
use sqlx::PgPool;
use uuid::Uuid;

const VIDEO_COLUMNS: &str = "id, filename, original_url, size, duration, width, height, codec,
                bitrate, frame_rate, metadata, status, created_at, updated_at";

/// Insert a new video row.
pub async fn create_video(pool: &PgPool, video: &Video) -> Result<()> {
    sqlx::query(
        "INSERT INTO videos (
            id, filename, original_url, size, duration, width, height, codec,
            bitrate, frame_rate, metadata, status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())",
    )
    .bind(video.id)
    .bind(&video.filename)
    .bind(&video.original_url)
    .bind(video.size)
    .bind(video.duration)
    .bind(video.width)
    .bind(video.height)
    .bind(&video.codec)
    .bind(video.bitrate)
    .bind(video.frame_rate)
    .bind(&video.metadata)
    .bind(video.status)
    .execute(pool)
    .await?;

    Ok(())
}

/// Retrieve a single video by identifier.
pub async fn get_video(pool: &PgPool, video_id: Uuid) -> Result<Video> {
    let video = sqlx::query_as::<_, Video>(&format!(
        "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1"
    ))
    .bind(video_id)
    .fetch_optional(pool)
    .await?;

    video.ok_or_else(|| AppError::NotFound(format!("video {video_id}")))
}

/// Update only the status column.
pub async fn update_status(pool: &PgPool, video_id: Uuid, status: VideoStatus) -> Result<()> {
    let result = sqlx::query(
        "UPDATE videos SET status = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(video_id)
    .bind(status)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("video {video_id}")));
    }
    Ok(())
}

/// Delete a video and every record referencing it, in one transaction.
///
/// Child tables are mandatory schema; any failure aborts the whole delete.
pub async fn delete_cascade(pool: &PgPool, video_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM video_analytics WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM audio_tracks WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM subtitles WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM thumbnails WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM outputs WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM jobs WHERE video_id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM videos WHERE id = $1")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!("video {video_id}")));
    }

    tx.commit().await?;
    Ok(())
}
