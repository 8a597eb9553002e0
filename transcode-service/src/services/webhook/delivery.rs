//! Single delivery attempts and the retry ladder

use crate::models::webhook::{Webhook, WebhookDelivery};
use crate::ports::{Clock, Metrics, Repository};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use media_core::constants::WEBHOOK_RETRY_DELAYS_SECS;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Response bodies stored on the delivery record are truncated to this.
const RESPONSE_BODY_LIMIT: usize = 1024;

/// `sha256=<lowercase hex hmac>` over the exact request body.
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// The ladder position for an attempt that just failed. `None` once the
/// ladder is exhausted.
pub fn next_retry_at(now: DateTime<Utc>, retry_count: i32) -> Option<DateTime<Utc>> {
    WEBHOOK_RETRY_DELAYS_SECS
        .get(retry_count as usize)
        .map(|secs| now + ChronoDuration::seconds(*secs))
}

fn truncate_body(body: &str) -> String {
    if body.len() <= RESPONSE_BODY_LIMIT {
        body.to_string()
    } else {
        body.chars().take(RESPONSE_BODY_LIMIT).collect()
    }
}

/// One POST to the subscriber; records the outcome on the delivery row.
pub async fn attempt(
    repo: Arc<dyn Repository>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    user_agent: &str,
    webhook: Webhook,
    delivery: WebhookDelivery,
) {
    let mut request = client
        .post(&webhook.url)
        .header("Content-Type", "application/json")
        .header("User-Agent", user_agent)
        .header("X-Webhook-Event", &delivery.event)
        .header("X-Webhook-Delivery", delivery.id.to_string())
        .body(delivery.payload.clone());

    if !webhook.secret.is_empty() {
        request = request.header(
            "X-Webhook-Signature",
            sign_payload(&webhook.secret, &delivery.payload),
        );
    }

    let outcome = request.send().await;

    match outcome {
        Ok(response) if response.status().is_success() => {
            let status_code = response.status().as_u16() as i32;
            let body = truncate_body(&response.text().await.unwrap_or_default());
            if let Err(e) = repo
                .mark_delivery_delivered(delivery.id, status_code, &body)
                .await
            {
                warn!(delivery_id = %delivery.id, "delivered write failed: {e}");
            }
            metrics.counter("webhook_deliveries_total", &[("outcome", "delivered")], 1);
            info!(
                delivery_id = %delivery.id,
                webhook_id = %webhook.id,
                retry_count = delivery.retry_count,
                "webhook delivered"
            );
        }
        Ok(response) => {
            let status_code = response.status().as_u16() as i32;
            let body = truncate_body(&response.text().await.unwrap_or_default());
            record_failure(&repo, &clock, &metrics, &delivery, Some(status_code), &body).await;
        }
        Err(e) => {
            record_failure(&repo, &clock, &metrics, &delivery, None, &e.to_string()).await;
        }
    }
}

async fn record_failure(
    repo: &Arc<dyn Repository>,
    clock: &Arc<dyn Clock>,
    metrics: &Arc<dyn Metrics>,
    delivery: &WebhookDelivery,
    status_code: Option<i32>,
    body: &str,
) {
    let next = next_retry_at(clock.now(), delivery.retry_count);
    let outcome = if next.is_some() { "retrying" } else { "failed" };
    metrics.counter("webhook_deliveries_total", &[("outcome", outcome)], 1);

    warn!(
        delivery_id = %delivery.id,
        status_code = ?status_code,
        retry_count = delivery.retry_count,
        outcome = outcome,
        "webhook attempt failed"
    );

    if let Err(e) = repo
        .mark_delivery_retry(delivery.id, status_code, &truncate_body(body), next)
        .await
    {
        warn!(delivery_id = %delivery.id, "retry write failed: {e}");
    }
}
