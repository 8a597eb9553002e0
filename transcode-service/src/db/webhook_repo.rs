//! Webhook subscription and delivery repositories

use crate::error::{AppError, Result};
use crate::models::webhook::{Webhook, WebhookDelivery};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const WEBHOOK_COLUMNS: &str =
    "id, user_id, url, events, secret, is_active, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, event, payload, status, status_code, response_body,
                retry_count, next_retry_at, created_at, completed_at";

pub async fn get_webhook(pool: &PgPool, id: Uuid) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    webhook.ok_or_else(|| AppError::NotFound(format!("webhook {id}")))
}

/// Active webhooks subscribed to `event`; an empty mask subscribes to all.
pub async fn list_active_webhooks(pool: &PgPool, event: &str) -> Result<Vec<Webhook>> {
    let webhooks = sqlx::query_as::<_, Webhook>(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks
         WHERE is_active AND (cardinality(events) = 0 OR $1 = ANY(events))"
    ))
    .bind(event)
    .fetch_all(pool)
    .await?;

    Ok(webhooks)
}

pub async fn create_delivery(pool: &PgPool, delivery: &WebhookDelivery) -> Result<()> {
    sqlx::query(
        "INSERT INTO webhook_deliveries (
            id, webhook_id, event, payload, status, status_code, response_body,
            retry_count, next_retry_at, created_at, completed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(delivery.id)
    .bind(delivery.webhook_id)
    .bind(&delivery.event)
    .bind(&delivery.payload)
    .bind(delivery.status)
    .bind(delivery.status_code)
    .bind(&delivery.response_body)
    .bind(delivery.retry_count)
    .bind(delivery.next_retry_at)
    .bind(delivery.created_at)
    .bind(delivery.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_delivered(
    pool: &PgPool,
    id: Uuid,
    status_code: i32,
    response_body: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE webhook_deliveries
         SET status = 'delivered', status_code = $2, response_body = $3,
             next_retry_at = NULL, completed_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(status_code)
    .bind(response_body)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("webhook delivery {id}")));
    }
    Ok(())
}

/// Record a failed attempt. With `next_retry_at` the delivery stays pending;
/// without it the ladder is exhausted and the delivery flips to failed.
pub async fn mark_retry(
    pool: &PgPool,
    id: Uuid,
    status_code: Option<i32>,
    response_body: &str,
    next_retry_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let result = match next_retry_at {
        Some(at) => {
            sqlx::query(
                "UPDATE webhook_deliveries
                 SET retry_count = retry_count + 1, status_code = $2,
                     response_body = $3, next_retry_at = $4
                 WHERE id = $1",
            )
            .bind(id)
            .bind(status_code)
            .bind(response_body)
            .bind(at)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE webhook_deliveries
                 SET status = 'failed', retry_count = retry_count + 1, status_code = $2,
                     response_body = $3, next_retry_at = NULL, completed_at = NOW()
                 WHERE id = $1",
            )
            .bind(id)
            .bind(status_code)
            .bind(response_body)
            .execute(pool)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("webhook delivery {id}")));
    }
    Ok(())
}

/// Pending deliveries whose retry time has arrived, oldest first.
pub async fn due_deliveries(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WebhookDelivery>> {
    let deliveries = sqlx::query_as::<_, WebhookDelivery>(&format!(
        "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
         WHERE status = 'pending' AND next_retry_at IS NOT NULL AND next_retry_at <= $1
         ORDER BY next_retry_at ASC
         LIMIT $2"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(deliveries)
}
