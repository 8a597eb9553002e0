//! Transcode Service - job execution daemon
//!
//! Boots the ports against their production backends and supervises the
//! scheduler, worker, live-stream controller, and webhook retry loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use transcode_service::cache::RedisStore;
use transcode_service::db::PgRepository;
use transcode_service::encoder::FfmpegEncoder;
use transcode_service::metrics::PrometheusMetrics;
use transcode_service::ports::{SystemClock, UuidGen};
use transcode_service::services::livestream::{LiveDeps, LiveStreamController};
use transcode_service::services::scheduler::JobScheduler;
use transcode_service::services::webhook::{RetryWorker, WebhookNotifier};
use transcode_service::services::worker::gpu::{NoGpu, NvmlProvider};
use transcode_service::services::worker::{ChannelPublisher, TranscodeWorker, WorkerDeps};
use transcode_service::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("Failed to load configuration");
    info!(env = %config.app.env, "transcode-service starting");

    // Ports.
    let db_config = db_pool::DbConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    };
    let pool = db_pool::create_pool(&db_config).await?;
    let repo = Arc::new(PgRepository::new(pool));

    let redis = redis_utils::RedisPool::connect(&config.cache.redis_url).await?;
    let kv = Arc::new(RedisStore::new(redis));

    let blobs = Arc::new(
        transcode_service::storage::S3BlobStore::from_env(config.storage.clone()).await,
    );

    let encoder = Arc::new(FfmpegEncoder::new(
        config.worker.ffmpeg_path.clone(),
        config.worker.ffprobe_path.clone(),
    ));

    let metrics = Arc::new(PrometheusMetrics);
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UuidGen);

    let gpu: Arc<dyn transcode_service::services::worker::gpu::GpuProvider> =
        if config.worker.gpu_enabled {
            Arc::new(NvmlProvider::new())
        } else {
            Arc::new(NoGpu)
        };

    // Webhook engine.
    let notifier = WebhookNotifier::new(
        repo.clone(),
        clock.clone(),
        ids.clone(),
        metrics.clone(),
        config.webhook.user_agent.clone(),
        config.webhook.timeout_secs,
    );
    let retry_worker = RetryWorker::new(
        repo.clone(),
        clock.clone(),
        metrics.clone(),
        config.webhook.user_agent.clone(),
        config.webhook.timeout_secs,
    );

    // Scheduler and worker, joined by the in-process publisher channel.
    let (publisher, job_rx) =
        ChannelPublisher::channel(config.scheduler.max_concurrent.max(1) * 2);
    let scheduler = JobScheduler::new(
        repo.clone(),
        publisher,
        metrics.clone(),
        clock.clone(),
        config.scheduler.max_concurrent,
        Duration::from_secs(config.scheduler.drain_interval_secs),
    );

    let worker_deps = WorkerDeps {
        repo: repo.clone(),
        blobs: blobs.clone(),
        kv: kv.clone(),
        encoder: encoder.clone(),
        gpu,
        notifier: notifier.clone(),
        metrics: metrics.clone(),
        clock: clock.clone(),
        ids: ids.clone(),
    };
    let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
    let worker = TranscodeWorker::new(worker_deps, scheduler.clone(), worker_id, &config.worker);

    // Live streaming.
    let live_controller = LiveStreamController::new(
        LiveDeps {
            repo: repo.clone(),
            encoder: encoder.clone(),
            kv: kv.clone(),
            metrics: metrics.clone(),
            clock: clock.clone(),
            ids: ids.clone(),
        },
        config.livestream.clone(),
    );

    // Supervision.
    let shutdown = CancellationToken::new();

    scheduler.start(shutdown.clone()).await?;
    retry_worker.start(shutdown.clone());
    live_controller.start();

    let worker_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            worker.run(job_rx, shutdown).await;
        })
    };

    info!("transcode-service running");

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    shutdown.cancel();
    live_controller.shutdown().await;
    let _ = worker_task.await;

    info!("transcode-service stopped");
    Ok(())
}
