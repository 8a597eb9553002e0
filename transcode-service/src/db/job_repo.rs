//! Job repository - database operations for transcode jobs
//!
//! Status transitions are expressed as compare-and-swap updates; a guarded
//! UPDATE that matches zero rows distinguishes `Conflict` (row exists, wrong
//! state) from `NotFound`.

use crate::error::{AppError, Result};
use crate::models::{Job, JobStats, JobStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, video_id, status, priority, progress, error_msg, retry_count,
                worker_id, started_at, completed_at, config, metadata, created_at, updated_at";

pub async fn create_job(pool: &PgPool, job: &Job) -> Result<()> {
    sqlx::query(
        "INSERT INTO jobs (
            id, video_id, status, priority, progress, error_msg, retry_count,
            worker_id, started_at, completed_at, config, metadata, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())",
    )
    .bind(job.id)
    .bind(job.video_id)
    .bind(job.status)
    .bind(job.priority)
    .bind(job.progress)
    .bind(&job.error_msg)
    .bind(job.retry_count)
    .bind(&job.worker_id)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(&job.config)
    .bind(&job.metadata)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Job> {
    let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    job.ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
}

/// Pending jobs in dispatch order, bounded by `limit`.
pub async fn get_pending_jobs(pool: &PgPool, limit: i64) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE status = 'pending'
         ORDER BY priority DESC, created_at ASC
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

pub async fn get_jobs_for_video(pool: &PgPool, video_id: Uuid) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE video_id = $1 ORDER BY created_at ASC"
    ))
    .bind(video_id)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

pub async fn get_job_stats(pool: &PgPool) -> Result<JobStats> {
    let row: (i64, i64, i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'cancelled'),
                AVG(EXTRACT(EPOCH FROM (completed_at - started_at)))
                    FILTER (WHERE status = 'completed')
         FROM jobs",
    )
    .fetch_one(pool)
    .await?;

    Ok(JobStats {
        total: row.0,
        pending: row.1,
        queued: row.2,
        processing: row.3,
        completed: row.4,
        failed: row.5,
        cancelled: row.6,
        avg_processing_secs: row.7.unwrap_or(0.0),
    })
}

pub async fn update_status(pool: &PgPool, job_id: Uuid, status: JobStatus) -> Result<()> {
    let result = sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(job_id)
        .bind(status)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("job {job_id}")));
    }
    Ok(())
}

/// CAS pending -> queued, written after a successful dispatch. A zero-row
/// match means the worker already advanced the job; that is not an error
/// worth surfacing beyond `Conflict`.
pub async fn mark_queued(pool: &PgPool, job_id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'queued', updated_at = NOW()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_job(pool, job_id).await?;
        return Err(AppError::Conflict(format!(
            "job {job_id} is {}",
            current.status.as_str()
        )));
    }
    Ok(())
}

/// CAS {pending,queued} -> processing, claiming the job for `worker_id`.
pub async fn begin_job(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<Job> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "UPDATE jobs
         SET status = 'processing', worker_id = $2, started_at = NOW(),
             progress = 0, error_msg = NULL, updated_at = NOW()
         WHERE id = $1 AND status IN ('pending', 'queued')
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    match job {
        Some(job) => Ok(job),
        None => {
            // Distinguish a vanished row from a lost race.
            let current = get_job(pool, job_id).await?;
            Err(AppError::Conflict(format!(
                "job {job_id} is {}, cannot begin processing",
                current.status.as_str()
            )))
        }
    }
}

/// Progress write, guarded by worker ownership and pinned monotonic.
pub async fn update_progress(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    progress: f64,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs
         SET progress = GREATEST(progress, LEAST($3, 100.0)), updated_at = NOW()
         WHERE id = $1 AND worker_id = $2 AND status = 'processing'",
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(progress)
    .execute(pool)
    .await?;

    // A zero-row match here means the job was cancelled or reassigned out
    // from under us; the worker notices via its cancellation watch instead.
    Ok(())
}

pub async fn complete_job(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<()> {
    terminal_transition(
        pool,
        job_id,
        worker_id,
        "UPDATE jobs
         SET status = 'completed', progress = 100, completed_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND worker_id = $2 AND status = 'processing'",
        None,
    )
    .await
}

pub async fn fail_job(pool: &PgPool, job_id: Uuid, worker_id: &str, error_msg: &str) -> Result<()> {
    terminal_transition(
        pool,
        job_id,
        worker_id,
        "UPDATE jobs
         SET status = 'failed', error_msg = $3, completed_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND worker_id = $2 AND status = 'processing'",
        Some(error_msg),
    )
    .await
}

async fn terminal_transition(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    sql: &str,
    error_msg: Option<&str>,
) -> Result<()> {
    let mut query = sqlx::query(sql).bind(job_id).bind(worker_id);
    if let Some(msg) = error_msg {
        query = query.bind(msg);
    }
    let result = query.execute(pool).await?;

    if result.rows_affected() == 0 {
        let current = get_job(pool, job_id).await?;
        return Err(AppError::Conflict(format!(
            "job {job_id} is {} under worker {:?}",
            current.status.as_str(),
            current.worker_id
        )));
    }
    Ok(())
}

/// CAS {pending,queued,processing} -> cancelled.
pub async fn cancel_job(pool: &PgPool, job_id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE jobs
         SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status IN ('pending', 'queued', 'processing')",
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_job(pool, job_id).await?;
        return Err(AppError::Conflict(format!(
            "job {job_id} is already {}",
            current.status.as_str()
        )));
    }
    Ok(())
}

/// Merge entries into the job's metadata JSONB.
pub async fn merge_metadata(
    pool: &PgPool,
    job_id: Uuid,
    entries: &HashMap<String, serde_json::Value>,
) -> Result<()> {
    let patch = serde_json::to_value(entries)?;
    let result = sqlx::query(
        "UPDATE jobs SET metadata = metadata || $2::jsonb, updated_at = NOW() WHERE id = $1",
    )
    .bind(job_id)
    .bind(patch)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("job {job_id}")));
    }
    Ok(())
}
