//! Live-stream ingest/transcode controller
//!
//! One controller per process. Stream handlers live in a map keyed by
//! stream key; transcode requests flow through a bounded channel into a
//! fixed worker pool, each worker owning one live encode subprocess.

pub mod dvr;

use crate::config::LiveStreamConfig;
use crate::encoder::{Encoder, LiveEncodeOptions};
use crate::error::{AppError, Result};
use crate::models::live::{
    EventSeverity, LiveStream, LiveStreamAnalytics, LiveStreamEvent, LiveStreamStatus,
};
use crate::ports::{Clock, IdGen, KeyValueStore, Metrics, Repository};
use media_core::ResolutionProfile;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Delay between spawning the encode and flipping the stream live; gives
/// the encoder time to produce the first segments.
const GO_LIVE_DELAY: Duration = Duration::from_secs(2);

/// Telemetry persistence cadence.
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(10);

static FRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame regex"));

static BITRATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bitrate=\s*([\d.]+)\s*kbits/s").expect("valid bitrate regex"));

/// Live counters shared between the stderr scraper and the monitors.
#[derive(Default)]
pub struct StreamStats {
    frames: AtomicI64,
    bitrate_millikbps: AtomicI64,
}

impl StreamStats {
    fn record_line(&self, line: &str) {
        if let Some(caps) = FRAME_RE.captures(line) {
            if let Ok(frames) = caps[1].parse::<i64>() {
                self.frames.store(frames, Ordering::Relaxed);
            }
        }
        if let Some(caps) = BITRATE_RE.captures(line) {
            if let Ok(bitrate) = caps[1].parse::<f64>() {
                self.bitrate_millikbps
                    .store((bitrate * 1000.0) as i64, Ordering::Relaxed);
            }
        }
    }

    pub fn frames(&self) -> i64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bitrate_kbps(&self) -> f64 {
        self.bitrate_millikbps.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

struct StreamHandler {
    stream_id: Uuid,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
}

struct StreamTranscodeRequest {
    stream: LiveStream,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
}

#[derive(Clone)]
pub struct LiveDeps {
    pub repo: Arc<dyn Repository>,
    pub encoder: Arc<dyn Encoder>,
    pub kv: Arc<dyn KeyValueStore>,
    pub metrics: Arc<dyn Metrics>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
}

pub struct LiveStreamController {
    deps: LiveDeps,
    config: LiveStreamConfig,
    handlers: RwLock<HashMap<String, StreamHandler>>,
    tx: mpsc::Sender<StreamTranscodeRequest>,
    rx: Mutex<Option<mpsc::Receiver<StreamTranscodeRequest>>>,
    root: CancellationToken,
}

impl LiveStreamController {
    pub fn new(deps: LiveDeps, config: LiveStreamConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Arc::new(Self {
            deps,
            config,
            handlers: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            root: CancellationToken::new(),
        })
    }

    /// Spawn the transcode worker pool and the stream monitor.
    pub fn start(self: &Arc<Self>) {
        let rx = self
            .rx
            .lock()
            .expect("controller receiver lock")
            .take()
            .expect("controller started twice");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_index in 0..self.config.worker_count.max(1) {
            let controller = self.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                controller.transcode_worker(worker_index, rx).await;
            });
        }

        let controller = self.clone();
        tokio::spawn(async move {
            controller.monitor_streams().await;
        });

        info!(workers = self.config.worker_count, "live stream controller started");
    }

    /// Register an incoming publisher and queue its transcode.
    pub async fn start_stream(&self, stream_key: &str) -> Result<()> {
        let stream = self.deps.repo.get_stream_by_key(stream_key).await?;

        {
            let handlers = self.handlers.read().expect("handlers lock");
            if handlers.contains_key(stream_key) {
                return Err(AppError::Conflict(format!(
                    "stream {} is already active",
                    stream.id
                )));
            }
        }

        self.deps
            .repo
            .transition_stream(stream.id, LiveStreamStatus::Idle, LiveStreamStatus::Starting)
            .await?;

        let cancel = self.root.child_token();
        let stats = Arc::new(StreamStats::default());
        {
            let mut handlers = self.handlers.write().expect("handlers lock");
            handlers.insert(
                stream_key.to_string(),
                StreamHandler {
                    stream_id: stream.id,
                    cancel: cancel.clone(),
                    stats: stats.clone(),
                },
            );
        }

        let request = StreamTranscodeRequest {
            stream,
            cancel,
            stats,
        };
        if let Err(e) = self.tx.try_send(request) {
            let mut handlers = self.handlers.write().expect("handlers lock");
            handlers.remove(stream_key);
            return Err(AppError::QuotaExceeded(format!(
                "live transcode queue full: {e}"
            )));
        }

        Ok(())
    }

    /// Tear down a stream: cancel its encode and walk the status to ended.
    pub async fn stop_stream(&self, stream_key: &str) -> Result<()> {
        let handler = {
            let mut handlers = self.handlers.write().expect("handlers lock");
            handlers.remove(stream_key)
        };
        let Some(handler) = handler else {
            return Err(AppError::NotFound(format!(
                "no active stream for key {stream_key}"
            )));
        };

        handler.cancel.cancel();

        // A stream stopped before it went live walks starting -> ending.
        let repo = &self.deps.repo;
        if repo
            .transition_stream(
                handler.stream_id,
                LiveStreamStatus::Live,
                LiveStreamStatus::Ending,
            )
            .await
            .is_err()
        {
            repo.transition_stream(
                handler.stream_id,
                LiveStreamStatus::Starting,
                LiveStreamStatus::Ending,
            )
            .await?;
        }
        repo.transition_stream(
            handler.stream_id,
            LiveStreamStatus::Ending,
            LiveStreamStatus::Ended,
        )
        .await?;

        if let Err(e) = self
            .deps
            .kv
            .del(&format!("stream:{}:viewers", handler.stream_id))
            .await
        {
            warn!(stream_id = %handler.stream_id, "viewer counter cleanup failed: {e}");
        }

        info!(stream_id = %handler.stream_id, "stream stopped");
        Ok(())
    }

    pub fn active_streams(&self) -> usize {
        self.handlers.read().expect("handlers lock").len()
    }

    /// Cancel everything and drain the handler map.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let mut handlers = self.handlers.write().expect("handlers lock");
        for (_, handler) in handlers.drain() {
            handler.cancel.cancel();
        }
        info!("live stream controller shut down");
    }

    async fn transcode_worker(
        self: Arc<Self>,
        worker_index: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<StreamTranscodeRequest>>>,
    ) {
        loop {
            let request = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = self.root.cancelled() => break,
                    request = rx.recv() => request,
                }
            };
            let Some(request) = request else { break };

            let stream_id = request.stream.id;
            if let Err(e) = self.run_stream_encode(request).await {
                error!(stream_id = %stream_id, worker = worker_index, "stream encode failed: {e}");
                let _ = self
                    .deps
                    .repo
                    .transition_stream(stream_id, LiveStreamStatus::Starting, LiveStreamStatus::Failed)
                    .await;
                self.insert_event(
                    stream_id,
                    "encode_failed",
                    EventSeverity::Critical,
                    &e.to_string(),
                )
                .await;
            }
        }
    }

    fn encode_options(&self, stream: &LiveStream) -> LiveEncodeOptions {
        let settings = &stream.settings.0;
        let renditions = settings
            .resolutions
            .iter()
            .filter_map(|name| ResolutionProfile::by_name(name))
            .map(Into::into)
            .collect();

        let dvr_list_size = if stream.dvr_enabled && stream.dvr_window > 0 {
            Some((stream.dvr_window as u32 / settings.segment_secs.max(1)).max(1))
        } else {
            None
        };

        LiveEncodeOptions {
            input_url: format!("{}/{}", self.config.rtmp_base_url, stream.stream_key),
            output_dir: PathBuf::from(&self.config.hls_output_dir).join(stream.id.to_string()),
            renditions,
            video_codec: settings.video_codec.clone(),
            audio_codec: settings.audio_codec.clone(),
            segment_secs: settings.segment_secs,
            low_latency_part_secs: stream
                .low_latency
                .then_some(settings.low_latency_part_secs),
            dvr_list_size,
        }
    }

    async fn run_stream_encode(&self, request: StreamTranscodeRequest) -> Result<()> {
        let stream = &request.stream;
        let opts = self.encode_options(stream);
        let mut session = self
            .deps
            .encoder
            .start_live_encode(&opts, &request.cancel)
            .await?;

        // Let the first segments land before announcing the stream live.
        tokio::time::sleep(GO_LIVE_DELAY).await;
        self.deps
            .repo
            .transition_stream(stream.id, LiveStreamStatus::Starting, LiveStreamStatus::Live)
            .await?;
        self.deps
            .repo
            .set_stream_playlist(stream.id, &session.master_playlist.to_string_lossy())
            .await?;
        self.insert_event(stream.id, "stream_live", EventSeverity::Info, "stream went live")
            .await;

        let mut telemetry = tokio::time::interval(TELEMETRY_INTERVAL);
        telemetry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        telemetry.tick().await;

        loop {
            tokio::select! {
                _ = request.cancel.cancelled() => break,
                line = session.stderr_lines.recv() => {
                    match line {
                        Some(line) => {
                            request.stats.record_line(&line);
                            if line.to_ascii_lowercase().contains("error") {
                                self.insert_event(
                                    stream.id,
                                    "encoder_error",
                                    EventSeverity::Error,
                                    &line,
                                )
                                .await;
                            }
                        }
                        None => break,
                    }
                }
                _ = telemetry.tick() => {
                    self.persist_sample(stream.id, &request.stats).await;
                }
            }
        }

        // Publisher disconnects end the encode without an explicit stop.
        if !request.cancel.is_cancelled() {
            let exited = (&mut session.exit).await;
            if let Ok(Err(e)) = exited {
                self.insert_event(stream.id, "encoder_exit", EventSeverity::Error, &e.to_string())
                    .await;
            }
            if self
                .deps
                .repo
                .transition_stream(stream.id, LiveStreamStatus::Live, LiveStreamStatus::Ending)
                .await
                .is_ok()
            {
                let _ = self
                    .deps
                    .repo
                    .transition_stream(stream.id, LiveStreamStatus::Ending, LiveStreamStatus::Ended)
                    .await;
            }
        }

        Ok(())
    }

    async fn persist_sample(&self, stream_id: Uuid, stats: &StreamStats) {
        let viewer_count = self
            .deps
            .kv
            .get(&format!("stream:{stream_id}:viewers"))
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let sample = LiveStreamAnalytics {
            id: self.deps.ids.new_id(),
            stream_id,
            viewer_count,
            frames_encoded: stats.frames(),
            bitrate_kbps: stats.bitrate_kbps(),
            sampled_at: self.deps.clock.now(),
        };
        if let Err(e) = self.deps.repo.insert_stream_analytics(&sample).await {
            warn!(stream_id = %stream_id, "analytics write failed: {e}");
        }
    }

    async fn insert_event(
        &self,
        stream_id: Uuid,
        event_type: &str,
        severity: EventSeverity,
        message: &str,
    ) {
        let event = LiveStreamEvent {
            id: self.deps.ids.new_id(),
            stream_id,
            event_type: event_type.to_string(),
            severity,
            message: message.to_string(),
            details: sqlx::types::Json(HashMap::new()),
            timestamp: self.deps.clock.now(),
        };
        if let Err(e) = self.deps.repo.insert_stream_event(&event).await {
            warn!(stream_id = %stream_id, "event write failed: {e}");
        }
    }

    /// 10s sweep over active handlers: refresh viewer gauges.
    async fn monitor_streams(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TELEMETRY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.root.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot: Vec<Uuid> = {
                let handlers = self.handlers.read().expect("handlers lock");
                handlers.values().map(|h| h.stream_id).collect()
            };
            self.deps
                .metrics
                .gauge("live_streams_active", &[("kind", "stream")], snapshot.len() as f64);

            for stream_id in snapshot {
                let viewer_count = self
                    .deps
                    .kv
                    .get(&format!("stream:{stream_id}:viewers"))
                    .await
                    .ok()
                    .flatten()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                if let Err(e) = self
                    .deps
                    .repo
                    .update_stream_viewers(stream_id, viewer_count)
                    .await
                {
                    warn!(stream_id = %stream_id, "viewer update failed: {e}");
                }
            }
        }
    }
}
