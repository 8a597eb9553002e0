//! Output and side-artefact repositories

use crate::error::Result;
use crate::models::{AudioTrack, Output, Subtitle, Thumbnail};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create_output(pool: &PgPool, output: &Output) -> Result<()> {
    sqlx::query(
        "INSERT INTO outputs (
            id, job_id, video_id, format, resolution, width, height, codec,
            bitrate, size, duration, url, path, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())",
    )
    .bind(output.id)
    .bind(output.job_id)
    .bind(output.video_id)
    .bind(&output.format)
    .bind(&output.resolution)
    .bind(output.width)
    .bind(output.height)
    .bind(&output.codec)
    .bind(output.bitrate)
    .bind(output.size)
    .bind(output.duration)
    .bind(&output.url)
    .bind(&output.path)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_outputs(pool: &PgPool, job_id: Uuid) -> Result<Vec<Output>> {
    let outputs = sqlx::query_as::<_, Output>(
        "SELECT id, job_id, video_id, format, resolution, width, height, codec,
                bitrate, size, duration, url, path, created_at
         FROM outputs
         WHERE job_id = $1
         ORDER BY created_at ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(outputs)
}

pub async fn create_thumbnail(pool: &PgPool, thumbnail: &Thumbnail) -> Result<()> {
    sqlx::query(
        "INSERT INTO thumbnails (id, video_id, kind, index, width, height, url, path, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
    )
    .bind(thumbnail.id)
    .bind(thumbnail.video_id)
    .bind(&thumbnail.kind)
    .bind(thumbnail.index)
    .bind(thumbnail.width)
    .bind(thumbnail.height)
    .bind(&thumbnail.url)
    .bind(&thumbnail.path)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_subtitle(pool: &PgPool, subtitle: &Subtitle) -> Result<()> {
    sqlx::query(
        "INSERT INTO subtitles (id, video_id, language, format, index, url, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW())",
    )
    .bind(subtitle.id)
    .bind(subtitle.video_id)
    .bind(&subtitle.language)
    .bind(&subtitle.format)
    .bind(subtitle.index)
    .bind(&subtitle.url)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_audio_track(pool: &PgPool, track: &AudioTrack) -> Result<()> {
    sqlx::query(
        "INSERT INTO audio_tracks (id, video_id, language, codec, channels, url, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW())",
    )
    .bind(track.id)
    .bind(track.video_id)
    .bind(&track.language)
    .bind(&track.codec)
    .bind(track.channels)
    .bind(&track.url)
    .execute(pool)
    .await?;

    Ok(())
}
