//! Priority-aware job scheduler
//!
//! Bounds concurrent active jobs to `max_concurrent` and releases the
//! oldest highest-priority work first. The drain loop runs on a fixed
//! ticker and on wakeups from `schedule_job`/`job_completed`.

pub mod queue;

use crate::error::Result;
use crate::models::Job;
use crate::ports::{Clock, JobPublisher, Metrics, Repository};
use media_core::constants::SCHEDULER_LOAD_LIMIT;
use queue::JobQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct JobScheduler {
    repo: Arc<dyn Repository>,
    publisher: Arc<dyn JobPublisher>,
    metrics: Arc<dyn Metrics>,
    clock: Arc<dyn Clock>,
    queue: Mutex<JobQueue>,
    active: AtomicUsize,
    max_concurrent: usize,
    drain_interval: Duration,
    wakeup: Notify,
}

impl JobScheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        publisher: Arc<dyn JobPublisher>,
        metrics: Arc<dyn Metrics>,
        clock: Arc<dyn Clock>,
        max_concurrent: usize,
        drain_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            publisher,
            metrics,
            clock,
            queue: Mutex::new(JobQueue::new()),
            active: AtomicUsize::new(0),
            max_concurrent: max_concurrent.max(1),
            drain_interval,
            wakeup: Notify::new(),
        })
    }

    /// Load persisted pending work and start the drain loop.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let pending = self.repo.get_pending_jobs(SCHEDULER_LOAD_LIMIT).await?;
        let count = pending.len();
        {
            let mut queue = self.queue.lock().expect("scheduler queue lock");
            for job in pending {
                let enqueued_at = job.created_at;
                queue.push(job, enqueued_at);
            }
        }
        info!(loaded = count, "scheduler started");

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                    _ = scheduler.wakeup.notified() => {}
                }
                scheduler.drain_once().await;
            }
        });

        Ok(())
    }

    /// Enqueue one job; non-blocking, the drain happens on the wakeup.
    pub fn schedule_job(&self, job: Job) {
        let now = self.clock.now();
        {
            let mut queue = self.queue.lock().expect("scheduler queue lock");
            queue.push(job, now);
        }
        self.wakeup.notify_one();
    }

    /// Release the slot held by a finished job. Never goes negative.
    pub fn job_completed(&self, job_id: Uuid) {
        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .ok();
        if previous.is_none() {
            warn!(job_id = %job_id, "job_completed with no active slots");
        }
        self.wakeup.notify_one();
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().expect("scheduler queue lock").len()
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// One drain cycle: dispatch until the concurrency budget or the queue
    /// is exhausted. Driven by the ticker and the wakeup notifications.
    pub async fn drain_once(&self) {
        loop {
            if self.active.load(Ordering::SeqCst) >= self.max_concurrent {
                break;
            }

            let entry = {
                let mut queue = self.queue.lock().expect("scheduler queue lock");
                queue.pop()
            };
            let Some(entry) = entry else { break };

            match self.publisher.publish(&entry.job).await {
                Ok(()) => {
                    self.active.fetch_add(1, Ordering::SeqCst);
                    // The worker owns the job from here on; a lost CAS means
                    // it already advanced, and a write failure is logged,
                    // not unwound.
                    match self.repo.mark_job_queued(entry.job.id).await {
                        Ok(()) | Err(crate::error::AppError::Conflict(_)) => {}
                        Err(e) => {
                            error!(job_id = %entry.job.id, "failed to mark job queued: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!(job_id = %entry.job.id, "publish failed, requeueing: {e}");
                    let mut queue = self.queue.lock().expect("scheduler queue lock");
                    queue.push_back(entry);
                    break;
                }
            }
        }

        self.metrics
            .gauge("scheduler_queue_depth", &[], self.queue_depth() as f64);
        self.metrics
            .gauge("scheduler_active_jobs", &[], self.active_jobs() as f64);
    }
}

// Dispatch-order and bounded-concurrency behavior is exercised end to end
// in tests/integration/scheduler_test.rs against the in-memory repository.
