//! Live-stream controller and DVR lifecycle tests

use crate::mock_encoder::MockEncoder;
use crate::support::*;
use chrono::Utc;
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use transcode_service::config::LiveStreamConfig;
use transcode_service::error::AppError;
use transcode_service::models::live::{
    DvrRecordingStatus, LiveStream, LiveStreamSettings, LiveStreamStatus,
};
use transcode_service::ports::Repository;
use transcode_service::services::livestream::dvr::DvrService;
use transcode_service::services::livestream::{LiveDeps, LiveStreamController};
use uuid::Uuid;

fn make_stream(stream_key: &str) -> LiveStream {
    let now = Utc::now();
    LiveStream {
        id: Uuid::new_v4(),
        title: "launch party".to_string(),
        user_id: Uuid::new_v4(),
        stream_key: stream_key.to_string(),
        ingest_url: format!("rtmp://localhost:1935/live/{stream_key}"),
        status: LiveStreamStatus::Idle,
        master_playlist: None,
        viewer_count: 0,
        peak_viewer_count: 0,
        dvr_enabled: false,
        dvr_window: 0,
        low_latency: false,
        settings: Json(LiveStreamSettings::default()),
        metadata: Json(HashMap::new()),
        started_at: None,
        ended_at: None,
        created_at: now,
        updated_at: now,
    }
}

struct LiveHarness {
    repo: Arc<InMemoryRepository>,
    controller: Arc<LiveStreamController>,
    _hls_dir: tempfile::TempDir,
}

async fn live_harness(encoder: Arc<MockEncoder>) -> LiveHarness {
    let repo = InMemoryRepository::new();
    let hls_dir = tempfile::tempdir().expect("live hls dir");
    let controller = LiveStreamController::new(
        LiveDeps {
            repo: repo.clone(),
            encoder,
            kv: MemoryKv::new(),
            metrics: Arc::new(NoopTestMetrics),
            clock: ManualClock::new(),
            ids: SeqIds::new(),
        },
        LiveStreamConfig {
            rtmp_base_url: "rtmp://localhost:1935/live".to_string(),
            hls_output_dir: hls_dir.path().to_string_lossy().into_owned(),
            worker_count: 2,
            queue_capacity: 4,
        },
    );
    controller.start();
    LiveHarness {
        repo,
        controller,
        _hls_dir: hls_dir,
    }
}

#[tokio::test]
async fn stream_goes_live_and_ends() {
    let encoder = Arc::new(MockEncoder::default());
    let harness = live_harness(encoder.clone()).await;

    let stream = make_stream("key-alpha");
    let stream_id = stream.id;
    harness.repo.streams.lock().unwrap().insert(stream_id, stream);

    harness.controller.start_stream("key-alpha").await.unwrap();
    assert_eq!(harness.controller.active_streams(), 1);

    // The controller waits for first segments before flipping live.
    assert!(
        wait_until(Duration::from_secs(5), || {
            harness
                .repo
                .streams
                .lock()
                .unwrap()
                .get(&stream_id)
                .map(|s| s.status == LiveStreamStatus::Live)
                .unwrap_or(false)
        })
        .await,
        "stream never went live"
    );
    {
        let streams = harness.repo.streams.lock().unwrap();
        let stream = streams.get(&stream_id).unwrap();
        assert!(stream.started_at.is_some());
        assert!(stream
            .master_playlist
            .as_deref()
            .map(|p| p.ends_with("master.m3u8"))
            .unwrap_or(false));
    }
    assert!(encoder
        .calls()
        .iter()
        .any(|c| c == "live:rtmp://localhost:1935/live/key-alpha"));

    harness.controller.stop_stream("key-alpha").await.unwrap();
    assert_eq!(harness.controller.active_streams(), 0);
    {
        let streams = harness.repo.streams.lock().unwrap();
        let stream = streams.get(&stream_id).unwrap();
        assert_eq!(stream.status, LiveStreamStatus::Ended);
        assert!(stream.ended_at.is_some());
    }
}

#[tokio::test]
async fn duplicate_stream_key_is_rejected() {
    let harness = live_harness(Arc::new(MockEncoder::default())).await;

    let stream = make_stream("key-beta");
    harness.repo.streams.lock().unwrap().insert(stream.id, stream);

    harness.controller.start_stream("key-beta").await.unwrap();
    let err = harness.controller.start_stream("key-beta").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    harness.controller.stop_stream("key-beta").await.unwrap();
}

#[tokio::test]
async fn unknown_stream_key_is_not_found() {
    let harness = live_harness(Arc::new(MockEncoder::default())).await;
    let err = harness.controller.start_stream("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn dvr_recording_lifecycle_to_vod() {
    let repo = InMemoryRepository::new();
    let blobs = MemoryBlobStore::new();
    let encoder = Arc::new(MockEncoder::default());
    let clock = ManualClock::new();
    let live_dir = tempfile::tempdir().expect("live dir");

    let stream = make_stream("key-dvr");
    let stream_id = stream.id;
    repo.streams.lock().unwrap().insert(stream_id, stream);

    // Recorded segments as the live encoder would have left them.
    let segment_dir = live_dir.path().join(stream_id.to_string());
    std::fs::create_dir_all(&segment_dir).unwrap();
    std::fs::write(segment_dir.join("stream_720p_000.ts"), b"seg0").unwrap();
    std::fs::write(segment_dir.join("stream_720p_001.ts"), b"seg1").unwrap();

    let service = DvrService::new(
        repo.clone(),
        encoder.clone(),
        blobs.clone(),
        clock.clone(),
        SeqIds::new(),
        live_dir.path(),
    );

    let recording = service.start_recording(stream_id, 3600).await.unwrap();
    assert_eq!(recording.status, DvrRecordingStatus::Recording);
    // Retention holds the recording for seven days.
    assert_eq!(
        (recording.retention_until - recording.created_at).num_days(),
        7
    );

    clock.advance(Duration::from_secs(90));
    service.stop_recording(recording.id).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            repo.dvr
                .lock()
                .unwrap()
                .get(&recording.id)
                .map(|r| r.status == DvrRecordingStatus::Available)
                .unwrap_or(false)
        })
        .await,
        "recording never became available"
    );
    {
        let dvr = repo.dvr.lock().unwrap();
        let record = dvr.get(&recording.id).unwrap();
        assert!((record.duration - 90.0).abs() < 1.0);
        assert!(record.playlist_url.is_some());
    }
    assert!(encoder.calls().iter().any(|c| c.starts_with("concat:2")));
    assert!(blobs
        .keys()
        .iter()
        .any(|k| k == &format!("dvr/{stream_id}/{}.mp4", recording.id)));

    let video = service.convert_to_vod(recording.id).await.unwrap();
    assert_eq!(
        video.metadata.0.get("source"),
        Some(&serde_json::json!("dvr"))
    );
    assert_eq!(
        video.metadata.0.get("live_stream_id"),
        Some(&serde_json::json!(stream_id))
    );
    let linked = repo.get_dvr_recording(recording.id).await.unwrap();
    assert_eq!(linked.video_id, Some(video.id));
}

#[tokio::test]
async fn stopping_unfinished_recording_twice_conflicts() {
    let repo = InMemoryRepository::new();
    let service = DvrService::new(
        repo.clone(),
        Arc::new(MockEncoder::default()),
        MemoryBlobStore::new(),
        ManualClock::new(),
        SeqIds::new(),
        tempfile::tempdir().unwrap().path(),
    );

    let stream = make_stream("key-x");
    let stream_id = stream.id;
    repo.streams.lock().unwrap().insert(stream_id, stream);

    let recording = service.start_recording(stream_id, 600).await.unwrap();
    service.stop_recording(recording.id).await.unwrap();
    let err = service.stop_recording(recording.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
