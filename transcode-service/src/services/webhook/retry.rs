//! Pending-delivery retry loop

use super::delivery;
use crate::models::webhook::WebhookDeliveryStatus;
use crate::ports::{Clock, Metrics, Repository};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RETRY_TICK: Duration = Duration::from_secs(60);
const RETRY_BATCH: i64 = 100;

pub struct RetryWorker {
    repo: Arc<dyn Repository>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    user_agent: String,
}

impl RetryWorker {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
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
            metrics,
            user_agent,
        })
    }

    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let worker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETRY_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("webhook retry worker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("webhook retry worker stopped");
                        break;
                    }
                    _ = ticker.tick() => worker.tick().await,
                }
            }
        });
    }

    /// One pass over the due deliveries; each attempt runs independently.
    pub async fn tick(&self) {
        let due = match self.repo.due_deliveries(self.clock.now(), RETRY_BATCH).await {
            Ok(due) => due,
            Err(e) => {
                warn!("due delivery query failed: {e}");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "retrying webhook deliveries");

        for record in due {
            if record.status != WebhookDeliveryStatus::Pending {
                continue;
            }

            // Subscriber state is re-read every attempt: deactivated or
            // deleted webhooks drop their queued deliveries.
            let webhook = match self.repo.get_webhook(record.webhook_id).await {
                Ok(webhook) => webhook,
                Err(e) => {
                    warn!(delivery_id = %record.id, "webhook lookup failed: {e}");
                    if let Err(e) = self
                        .repo
                        .mark_delivery_retry(record.id, None, "webhook deleted", None)
                        .await
                    {
                        warn!(delivery_id = %record.id, "failure write failed: {e}");
                    }
                    continue;
                }
            };

            if !webhook.is_active {
                if let Err(e) = self
                    .repo
                    .mark_delivery_retry(record.id, None, "webhook deactivated", None)
                    .await
                {
                    warn!(delivery_id = %record.id, "failure write failed: {e}");
                }
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
    }
}
