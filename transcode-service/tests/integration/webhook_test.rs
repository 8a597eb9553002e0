//! Webhook delivery, signing, and retry-ladder tests

use crate::support::*;
use std::sync::Arc;
use std::time::Duration;
use transcode_service::models::webhook::WebhookDeliveryStatus;
use transcode_service::ports::Clock;
use transcode_service::services::webhook::delivery::sign_payload;
use transcode_service::services::webhook::{Notifier, RetryWorker, WebhookNotifier};

fn notifier(
    repo: Arc<InMemoryRepository>,
    clock: Arc<ManualClock>,
) -> Arc<WebhookNotifier> {
    WebhookNotifier::new(
        repo,
        clock,
        SeqIds::new(),
        Arc::new(NoopTestMetrics),
        "Transcode-Webhook/1.0".to_string(),
        5,
    )
}

fn retry_worker(repo: Arc<InMemoryRepository>, clock: Arc<ManualClock>) -> Arc<RetryWorker> {
    RetryWorker::new(
        repo,
        clock,
        Arc::new(NoopTestMetrics),
        "Transcode-Webhook/1.0".to_string(),
        5,
    )
}

#[tokio::test]
async fn delivery_is_signed_and_recorded() {
    let server = start_http_server(vec![200]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let webhook = make_webhook(&server.url(), "super-secret", vec!["job.completed"]);
    repo.webhooks.lock().unwrap().insert(webhook.id, webhook);

    let notifier = notifier(repo.clone(), clock);
    notifier
        .notify("job.completed", serde_json::json!({"job_id": "j-1"}))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || server.request_count() == 1).await);

    let request = server.requests.lock().unwrap()[0].clone();
    assert_eq!(
        request.headers.get("x-webhook-event").map(String::as_str),
        Some("job.completed")
    );
    assert!(request.headers.contains_key("x-webhook-delivery"));
    assert_eq!(
        request.headers.get("user-agent").map(String::as_str),
        Some("Transcode-Webhook/1.0")
    );

    // The signature must verify against the exact received body.
    let signature = request
        .headers
        .get("x-webhook-signature")
        .expect("signature header present");
    assert_eq!(signature, &sign_payload("super-secret", &request.body));

    // Payload envelope carries event + timestamp + data.
    let envelope: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(envelope["event"], "job.completed");
    assert!(envelope["timestamp"].is_string());
    assert_eq!(envelope["data"]["job_id"], "j-1");

    // Durable record flipped to delivered.
    let delivery_id = repo.delivery_ids()[0];
    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.status == WebhookDeliveryStatus::Delivered)
                .unwrap_or(false)
        })
        .await
    );
    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.status_code, Some(200));
    assert!(delivery.completed_at.is_some());
}

#[tokio::test]
async fn unsigned_when_secret_empty() {
    let server = start_http_server(vec![200]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let webhook = make_webhook(&server.url(), "", vec![]);
    repo.webhooks.lock().unwrap().insert(webhook.id, webhook);

    notifier(repo.clone(), clock)
        .notify("stream.started", serde_json::json!({}))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || server.request_count() == 1).await);
    let request = server.requests.lock().unwrap()[0].clone();
    assert!(!request.headers.contains_key("x-webhook-signature"));
}

#[tokio::test]
async fn retry_ladder_walks_to_success() {
    // Two failures, then success.
    let server = start_http_server(vec![500, 500, 200]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let webhook = make_webhook(&server.url(), "s", vec!["job.failed"]);
    repo.webhooks.lock().unwrap().insert(webhook.id, webhook);

    notifier(repo.clone(), clock.clone())
        .notify("job.failed", serde_json::json!({"attempt": 1}))
        .await
        .unwrap();

    let delivery_id = {
        assert!(wait_until(Duration::from_secs(2), || !repo.delivery_ids().is_empty()).await);
        repo.delivery_ids()[0]
    };

    // First attempt fails: pending with the 1m ladder slot.
    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.retry_count == 1)
                .unwrap_or(false)
        })
        .await
    );
    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.status, WebhookDeliveryStatus::Pending);
    assert_eq!(delivery.status_code, Some(500));
    let first_gap = delivery.next_retry_at.unwrap() - clock.now();
    assert_eq!(first_gap.num_seconds(), 60);

    // Second attempt after the first backoff: still failing, 5m slot.
    let retry = retry_worker(repo.clone(), clock.clone());
    clock.advance(Duration::from_secs(61));
    retry.tick().await;
    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.retry_count == 2)
                .unwrap_or(false)
        })
        .await
    );
    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.status, WebhookDeliveryStatus::Pending);
    let second_gap = delivery.next_retry_at.unwrap() - clock.now();
    assert_eq!(second_gap.num_seconds(), 300);

    // Third attempt succeeds.
    clock.advance(Duration::from_secs(301));
    retry.tick().await;
    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.status == WebhookDeliveryStatus::Delivered)
                .unwrap_or(false)
        })
        .await
    );
    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.retry_count, 2);
    assert_eq!(delivery.status_code, Some(200));
    assert!(delivery.completed_at.is_some());
    assert_eq!(server.request_count(), 3);
}

#[tokio::test]
async fn ladder_exhaustion_marks_failed() {
    let server = start_http_server(vec![500]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let webhook = make_webhook(&server.url(), "", vec![]);
    repo.webhooks.lock().unwrap().insert(webhook.id, webhook);

    notifier(repo.clone(), clock.clone())
        .notify("job.completed", serde_json::json!({}))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || !repo.delivery_ids().is_empty()).await);
    let delivery_id = repo.delivery_ids()[0];

    let retry = retry_worker(repo.clone(), clock.clone());
    // Walk all six ladder slots.
    for expected_retry in 1..=6 {
        assert!(
            wait_until(Duration::from_secs(2), || {
                repo.delivery_snapshot(delivery_id)
                    .map(|d| d.retry_count == expected_retry)
                    .unwrap_or(false)
            })
            .await,
            "attempt {expected_retry} never recorded"
        );
        clock.advance(Duration::from_secs(13 * 60 * 60));
        retry.tick().await;
    }

    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.status == WebhookDeliveryStatus::Failed)
                .unwrap_or(false)
        })
        .await
    );
    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.retry_count, 7);
    assert!(delivery.completed_at.is_some());
    assert!(delivery.next_retry_at.is_none());
}

#[tokio::test]
async fn deactivated_webhook_drops_pending_deliveries() {
    let server = start_http_server(vec![500]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let webhook = make_webhook(&server.url(), "", vec![]);
    let webhook_id = webhook.id;
    repo.webhooks.lock().unwrap().insert(webhook_id, webhook);

    notifier(repo.clone(), clock.clone())
        .notify("job.completed", serde_json::json!({}))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || !repo.delivery_ids().is_empty()).await);
    let delivery_id = repo.delivery_ids()[0];
    assert!(
        wait_until(Duration::from_secs(2), || {
            repo.delivery_snapshot(delivery_id)
                .map(|d| d.retry_count == 1)
                .unwrap_or(false)
        })
        .await
    );

    // Deactivate before the retry slot arrives.
    repo.webhooks
        .lock()
        .unwrap()
        .get_mut(&webhook_id)
        .unwrap()
        .is_active = false;

    clock.advance(Duration::from_secs(61));
    retry_worker(repo.clone(), clock).tick().await;

    let delivery = repo.delivery_snapshot(delivery_id).unwrap();
    assert_eq!(delivery.status, WebhookDeliveryStatus::Failed);
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn events_only_reach_subscribed_webhooks() {
    let server = start_http_server(vec![200]).await;
    let repo = InMemoryRepository::new();
    let clock = ManualClock::new();

    let subscribed = make_webhook(&server.url(), "", vec!["job.completed"]);
    let other = make_webhook(&server.url(), "", vec!["stream.started"]);
    repo.webhooks
        .lock()
        .unwrap()
        .insert(subscribed.id, subscribed);
    repo.webhooks.lock().unwrap().insert(other.id, other);

    notifier(repo.clone(), clock)
        .notify("job.completed", serde_json::json!({}))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || server.request_count() == 1).await);
    assert_eq!(repo.delivery_ids().len(), 1);
}
