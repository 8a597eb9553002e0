//! Webhook event fan-out
//!
//! `notify` creates one durable delivery record per active subscriber and
//! fires the first attempt in its own task. Failures walk the retry ladder
//! driven by the `RetryWorker`.

pub mod delivery;
pub mod retry;

use crate::error::Result;
use crate::models::webhook::{WebhookDelivery, WebhookDeliveryStatus};
use crate::ports::{Clock, IdGen, Metrics, Repository};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use retry::RetryWorker;

/// Event emission contract the rest of the substrate depends on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &str, data: serde_json::Value) -> Result<()>;
}

pub struct WebhookNotifier {
    repo: Arc<dyn Repository>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGen>,
    metrics: Arc<dyn Metrics>,
    user_agent: String,
}

impl WebhookNotifier {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGen>,
        metrics: Arc<dyn Metrics>,
        user_agent: String,
        timeout_secs: u64,
    ) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to construct webhook http client");

        Arc::new(Self {
            repo,
            client,
            clock,
            ids,
            metrics,
            user_agent,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &str, data: serde_json::Value) -> Result<()> {
        let subscribers = self.repo.list_active_webhooks(event).await?;
        if subscribers.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_string(&serde_json::json!({
            "event": event,
            "timestamp": self.clock.now().to_rfc3339(),
            "data": data,
        }))?;

        info!(event = %event, subscribers = subscribers.len(), "fanning out webhook event");

        for webhook in subscribers {
            let record = WebhookDelivery {
                id: self.ids.new_id(),
                webhook_id: webhook.id,
                event: event.to_string(),
                payload: payload.clone(),
                status: WebhookDeliveryStatus::Pending,
                status_code: None,
                response_body: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: self.clock.now(),
                completed_at: None,
            };

            if let Err(e) = self.repo.create_delivery(&record).await {
                warn!(webhook_id = %webhook.id, "delivery record creation failed: {e}");
                continue;
            }

            let repo = self.repo.clone();
            let client = self.client.clone();
            let clock = self.clock.clone();
            let metrics = self.metrics.clone();
            let user_agent = self.user_agent.clone();
            tokio::spawn(async move {
                delivery::attempt(repo, client, clock, metrics, &user_agent, webhook, record)
                    .await;
            });
        }

        Ok(())
    }
}
