//! Progress sinks for the worker pipeline

use crate::encoder::ProgressSink;
use crate::ports::Repository;
use media_core::constants::PROGRESS_DEBOUNCE_MS;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

struct DebounceState {
    last_write: Option<Instant>,
    last_percent: f64,
}

/// Writes job progress through the repository, debounced so encode-speed
/// progress lines do not turn into a write storm.
pub struct DebouncedRepoSink {
    repo: Arc<dyn Repository>,
    job_id: Uuid,
    worker_id: String,
    min_interval: Duration,
    state: Mutex<DebounceState>,
}

impl DebouncedRepoSink {
    pub fn new(repo: Arc<dyn Repository>, job_id: Uuid, worker_id: String) -> Self {
        Self::with_interval(
            repo,
            job_id,
            worker_id,
            Duration::from_millis(PROGRESS_DEBOUNCE_MS),
        )
    }

    pub fn with_interval(
        repo: Arc<dyn Repository>,
        job_id: Uuid,
        worker_id: String,
        min_interval: Duration,
    ) -> Self {
        Self {
            repo,
            job_id,
            worker_id,
            min_interval,
            state: Mutex::new(DebounceState {
                last_write: None,
                last_percent: 0.0,
            }),
        }
    }
}

impl ProgressSink for DebouncedRepoSink {
    fn report(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        {
            let mut state = self.state.lock().expect("progress debounce lock");
            if percent <= state.last_percent {
                return;
            }
            // Always let the terminal write through; otherwise rate limit.
            if percent < 100.0 {
                if let Some(last) = state.last_write {
                    if last.elapsed() < self.min_interval {
                        return;
                    }
                }
            }
            state.last_write = Some(Instant::now());
            state.last_percent = percent;
        }

        let repo = self.repo.clone();
        let job_id = self.job_id;
        let worker_id = self.worker_id.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.update_job_progress(job_id, &worker_id, percent).await {
                debug!(job_id = %job_id, "progress write failed: {e}");
            }
        });
    }
}

/// Maps a stage-local 0..100 onto a slice of the job's overall progress.
pub struct StageSink {
    inner: Arc<dyn ProgressSink>,
    base: f64,
    span: f64,
}

impl StageSink {
    pub fn new(inner: Arc<dyn ProgressSink>, base: f64, span: f64) -> Self {
        Self { inner, base, span }
    }
}

impl ProgressSink for StageSink {
    fn report(&self, percent: f64) {
        let overall = self.base + self.span * percent.clamp(0.0, 100.0) / 100.0;
        self.inner.report(overall);
    }
}
