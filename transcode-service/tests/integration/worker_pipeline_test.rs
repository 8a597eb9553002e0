//! End-to-end worker pipeline tests against the mock encoder

use crate::mock_encoder::MockEncoder;
use crate::support::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use transcode_service::config::WorkerConfig;
use transcode_service::models::webhook::events;
use transcode_service::models::{JobStatus, Output, Thumbnail, TranscodeConfig, VideoStatus};
use transcode_service::ports::{Repository, SystemClock, UuidGen};
use transcode_service::services::scheduler::JobScheduler;
use transcode_service::services::worker::gpu::{GpuDevice, GpuProvider, NoGpu};
use transcode_service::services::worker::{ChannelPublisher, TranscodeWorker, WorkerDeps};
use uuid::Uuid;

struct StubGpu;

impl GpuProvider for StubGpu {
    fn devices(&self) -> Vec<GpuDevice> {
        vec![GpuDevice {
            index: 0,
            free_memory_mb: 4000,
            utilization: 10,
        }]
    }
}

struct Harness {
    repo: Arc<InMemoryRepository>,
    blobs: Arc<MemoryBlobStore>,
    notifier: Arc<CollectingNotifier>,
    scheduler: Arc<JobScheduler>,
    worker: Arc<TranscodeWorker>,
    work_dir: tempfile::TempDir,
    shutdown: CancellationToken,
}

impl Harness {
    async fn start(encoder: Arc<MockEncoder>, gpu: Arc<dyn GpuProvider>, gpu_enabled: bool) -> Self {
        let repo = InMemoryRepository::new();
        let blobs = MemoryBlobStore::new();
        let kv = MemoryKv::new();
        let notifier = CollectingNotifier::new();
        let work_dir = tempfile::tempdir().expect("temp work dir");

        let (publisher, rx) = ChannelPublisher::channel(8);
        let scheduler = JobScheduler::new(
            repo.clone(),
            publisher,
            Arc::new(NoopTestMetrics),
            Arc::new(SystemClock),
            4,
            Duration::from_secs(5),
        );

        let deps = WorkerDeps {
            repo: repo.clone(),
            blobs: blobs.clone(),
            kv,
            encoder,
            gpu,
            notifier: notifier.clone(),
            metrics: Arc::new(NoopTestMetrics),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGen),
        };
        let config = WorkerConfig {
            work_dir: work_dir.path().to_string_lossy().into_owned(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            gpu_enabled,
            job_lock_ttl_secs: 60,
        };

        let worker = TranscodeWorker::new(deps, scheduler.clone(), "worker-test", &config);
        let shutdown = CancellationToken::new();
        {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                worker.run(rx, shutdown).await;
            });
        }

        Self {
            repo,
            blobs,
            notifier,
            scheduler,
            worker,
            work_dir,
            shutdown,
        }
    }

    /// Seed a video plus one job and dispatch it through the scheduler.
    async fn submit(&self, config: TranscodeConfig, priority: i32) -> Uuid {
        let video = make_video("mem://source/clip.mp4");
        self.blobs.put("source/clip.mp4", b"source-bytes");
        self.repo.create_video(&video).await.unwrap();

        let job = make_job(video.id, priority, config);
        let job_id = job.id;
        self.repo.create_job(&job).await.unwrap();
        self.scheduler.schedule_job(job);
        self.scheduler.drain_once().await;
        job_id
    }

    async fn wait_terminal(&self, job_id: Uuid) -> JobStatus {
        assert!(
            wait_until(Duration::from_secs(5), || {
                self.repo
                    .job_snapshot(job_id)
                    .map(|j| j.status.is_terminal())
                    .unwrap_or(false)
            })
            .await,
            "job never reached a terminal state"
        );
        self.repo.job_snapshot(job_id).unwrap().status
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn single_rendition_job_completes() {
    let encoder = Arc::new(MockEncoder::default());
    let harness = Harness::start(encoder.clone(), Arc::new(NoGpu), false).await;

    let config = TranscodeConfig {
        output_format: "mp4".to_string(),
        resolution: "720p".to_string(),
        bitrate: "2800".to_string(),
        codec: "libx264".to_string(),
        preset: "medium".to_string(),
        audio_codec: "aac".to_string(),
        audio_bitrate: "128".to_string(),
        ..Default::default()
    };
    let job_id = harness.submit(config, 5).await;

    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Completed);

    let job = harness.repo.job_snapshot(job_id).unwrap();
    assert_eq!(job.progress, 100.0);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(job.worker_id.as_deref(), Some("worker-test"));

    // Output recorded and uploaded under the canonical key.
    let outputs: Vec<Output> = harness.repo.list_outputs(job_id).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].resolution, "720p");
    assert!(outputs[0]
        .path
        .ends_with("/outputs/output_720p.mp4"));
    assert!(harness
        .blobs
        .keys()
        .iter()
        .any(|k| k.ends_with("/outputs/output_720p.mp4")));

    // Parent video rolled up and the completion events fanned out.
    let video = harness.repo.get_video(job.video_id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Completed);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let names = harness.notifier.event_names();
            names.contains(&events::JOB_COMPLETED.to_string())
                && names.contains(&events::VIDEO_COMPLETED.to_string())
        })
        .await
    );

    // Scheduler slot released, temp dir removed.
    assert!(wait_until(Duration::from_secs(2), || {
        harness.scheduler.active_jobs() == 0
    })
    .await);
    let leftovers: Vec<_> = std::fs::read_dir(harness.work_dir.path())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "temp dir not cleaned: {leftovers:?}");
}

#[tokio::test]
async fn gpu_failure_falls_back_to_cpu_once() {
    let encoder = Arc::new(MockEncoder {
        fail_nvenc: true,
        ..Default::default()
    });
    let harness = Harness::start(encoder.clone(), Arc::new(StubGpu), true).await;

    let config = TranscodeConfig {
        resolution: "720p".to_string(),
        codec: "libx264".to_string(),
        preset: "medium".to_string(),
        ..Default::default()
    };
    let job_id = harness.submit(config, 1).await;

    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Completed);

    let job = harness.repo.job_snapshot(job_id).unwrap();
    assert_eq!(job.metadata.0.get("gpu_fallback"), Some(&serde_json::json!(true)));
    assert_eq!(
        job.metadata.0.get("cpu_codec"),
        Some(&serde_json::json!("libx264"))
    );

    // Exactly one NVENC attempt followed by one CPU attempt.
    let transcodes: Vec<String> = encoder
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("transcode:"))
        .collect();
    assert_eq!(transcodes, vec!["transcode:h264_nvenc", "transcode:libx264"]);

    assert_eq!(
        harness.repo.list_outputs(job_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn gpu_disabled_runs_cpu_only() {
    let encoder = Arc::new(MockEncoder::default());
    let harness = Harness::start(encoder.clone(), Arc::new(NoGpu), false).await;

    let config = TranscodeConfig {
        resolution: "480p".to_string(),
        codec: "libx264".to_string(),
        ..Default::default()
    };
    let job_id = harness.submit(config, 1).await;
    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Completed);

    let job = harness.repo.job_snapshot(job_id).unwrap();
    assert!(job.metadata.0.get("gpu_enabled").is_none());
    assert!(job.metadata.0.get("gpu_fallback").is_none());
    assert!(encoder.calls().contains(&"transcode:libx264".to_string()));
}

#[tokio::test]
async fn cancel_during_processing_cleans_up() {
    let encoder = Arc::new(MockEncoder {
        encode_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let harness = Harness::start(encoder.clone(), Arc::new(NoGpu), false).await;

    let job_id = harness
        .submit(
            TranscodeConfig {
                resolution: "720p".to_string(),
                ..Default::default()
            },
            5,
        )
        .await;

    // Wait until the encode is actually running, then cancel out-of-band.
    assert!(
        wait_until(Duration::from_secs(2), || {
            encoder
                .encoding_started
                .load(std::sync::atomic::Ordering::SeqCst)
        })
        .await
    );
    harness.worker.cancel_job(job_id).await.unwrap();

    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Cancelled);
    let job = harness.repo.job_snapshot(job_id).unwrap();
    assert!(job.completed_at.is_some());

    assert!(wait_until(Duration::from_secs(2), || {
        harness.scheduler.active_jobs() == 0
    })
    .await);
    assert!(wait_until(Duration::from_secs(2), || {
        std::fs::read_dir(harness.work_dir.path())
            .map(|entries| entries.count() == 0)
            .unwrap_or(false)
    })
    .await);
}

#[tokio::test]
async fn encode_failure_records_error_and_fails_video() {
    let encoder = Arc::new(MockEncoder {
        fail_all: true,
        ..Default::default()
    });
    let harness = Harness::start(encoder, Arc::new(NoGpu), false).await;

    let job_id = harness.submit(TranscodeConfig::default(), 1).await;
    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Failed);

    let job = harness.repo.job_snapshot(job_id).unwrap();
    let error = job.error_msg.expect("error message persisted");
    assert!(error.contains("simulated failure"));

    let video = harness.repo.get_video(job.video_id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert!(
        wait_until(Duration::from_secs(2), || {
            harness
                .notifier
                .event_names()
                .contains(&events::JOB_FAILED.to_string())
        })
        .await
    );
}

#[tokio::test]
async fn hls_pipeline_uploads_manifest_tree() {
    let encoder = Arc::new(MockEncoder::default());
    let harness = Harness::start(encoder, Arc::new(NoGpu), false).await;

    let mut config = TranscodeConfig {
        codec: "libx264".to_string(),
        ..Default::default()
    };
    config.extra.insert("enable_hls".to_string(), "true".to_string());
    config.extra.insert(
        "resolutions".to_string(),
        r#"[{"name":"720p","width":1280,"height":720,"video_bitrate":2800,"audio_bitrate":128},
            {"name":"360p","width":640,"height":360,"video_bitrate":800,"audio_bitrate":96}]"#
            .to_string(),
    );
    let job_id = harness.submit(config, 1).await;

    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Completed);

    let keys = harness.blobs.keys();
    assert!(keys.iter().any(|k| k.ends_with("/hls/master.m3u8")));
    assert!(keys.iter().any(|k| k.ends_with("/hls/stream_720p.m3u8")));
    assert!(keys.iter().any(|k| k.ends_with("/hls/stream_360p_000.ts")));

    let outputs = harness.repo.list_outputs(job_id).await.unwrap();
    assert!(outputs.iter().any(|o| o.resolution == "adaptive"));
    assert!(outputs.iter().any(|o| o.resolution == "720p"));
}

#[tokio::test]
async fn thumbnails_and_subtitles_are_side_artefacts() {
    let encoder = Arc::new(MockEncoder::default());
    let harness = Harness::start(encoder, Arc::new(NoGpu), false).await;

    let mut config = TranscodeConfig {
        resolution: "720p".to_string(),
        ..Default::default()
    };
    config
        .extra
        .insert("generate_thumbnails".to_string(), "true".to_string());
    config
        .extra
        .insert("extract_subtitles".to_string(), "true".to_string());
    let job_id = harness.submit(config, 1).await;

    assert_eq!(harness.wait_terminal(job_id).await, JobStatus::Completed);

    let thumbnails: Vec<Thumbnail> = harness.repo.thumbnails.lock().unwrap().clone();
    assert_eq!(thumbnails.iter().filter(|t| t.kind == "interval").count(), 10);
    assert_eq!(thumbnails.iter().filter(|t| t.kind == "sprite").count(), 1);

    let subtitles = harness.repo.subtitles.lock().unwrap().clone();
    assert_eq!(subtitles.len(), 1);
    assert_eq!(subtitles[0].language, "eng");
    assert!(harness
        .blobs
        .keys()
        .iter()
        .any(|k| k.contains("/subtitles/subtitle_eng_0.vtt")));
}

#[tokio::test]
async fn cascade_delete_removes_every_child_record() {
    let repo = InMemoryRepository::new();
    let video = make_video("mem://source/clip.mp4");
    repo.create_video(&video).await.unwrap();

    for i in 0..2 {
        repo.create_job(&make_job(video.id, i, TranscodeConfig::default()))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        let output = Output {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            video_id: video.id,
            format: "mp4".to_string(),
            resolution: "720p".to_string(),
            width: 1280,
            height: 720,
            codec: "h264".to_string(),
            bitrate: 0,
            size: 0,
            duration: 0.0,
            url: String::new(),
            path: String::new(),
            created_at: chrono::Utc::now(),
        };
        repo.create_output(&output).await.unwrap();
    }
    for i in 0..5 {
        let thumb = Thumbnail {
            id: Uuid::new_v4(),
            video_id: video.id,
            kind: "interval".to_string(),
            index: i,
            width: 0,
            height: 0,
            url: String::new(),
            path: String::new(),
            created_at: chrono::Utc::now(),
        };
        repo.create_thumbnail(&thumb).await.unwrap();
    }

    repo.delete_video(video.id).await.unwrap();

    assert!(repo.get_video(video.id).await.is_err());
    assert!(repo.jobs.lock().unwrap().is_empty());
    assert!(repo.outputs.lock().unwrap().is_empty());
    assert!(repo.thumbnails.lock().unwrap().is_empty());
}
