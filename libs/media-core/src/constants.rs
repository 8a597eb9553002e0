//! Transcoding constants

use crate::models::ResolutionProfile;

/// Maximum source file size (4 GB)
pub const MAX_SOURCE_SIZE: i64 = 4 * 1024 * 1024 * 1024;

/// FFmpeg timeout (4 hours)
pub const FFMPEG_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Default maximum concurrent transcode jobs per scheduler
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;

/// Scheduler drain interval
pub const SCHEDULER_DRAIN_INTERVAL_SECS: u64 = 5;

/// Maximum pending jobs loaded at scheduler start
pub const SCHEDULER_LOAD_LIMIT: i64 = 1000;

/// Minimum interval between persisted progress updates
pub const PROGRESS_DEBOUNCE_MS: u64 = 500;

/// Default HLS segment duration
pub const HLS_SEGMENT_SECS: u32 = 6;

/// Bounded capacity of the live transcode request queue
pub const LIVE_QUEUE_CAPACITY: usize = 100;

/// Live transcode worker pool size
pub const LIVE_WORKER_COUNT: usize = 5;

/// DVR recording retention window (7 days)
pub const DVR_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Webhook delivery HTTP timeout
pub const WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// Webhook retry backoff ladder, indexed by retry_count - 1
pub const WEBHOOK_RETRY_DELAYS_SECS: &[i64] = &[
    60,         // 1m
    5 * 60,     // 5m
    15 * 60,    // 15m
    60 * 60,    // 1h
    4 * 60 * 60,  // 4h
    12 * 60 * 60, // 12h
];

/// The fixed rendition ladder offered for adaptive streaming.
///
/// Filtered against the source height before use; see
/// `EncodingOptimizer::standard_ladder`.
pub const STANDARD_LADDER: &[ResolutionProfile] = &[
    ResolutionProfile::new("144p", 256, 144, 150, 64),
    ResolutionProfile::new("240p", 426, 240, 400, 64),
    ResolutionProfile::new("360p", 640, 360, 800, 96),
    ResolutionProfile::new("480p", 854, 480, 1400, 128),
    ResolutionProfile::new("720p", 1280, 720, 2800, 128),
    ResolutionProfile::new("1080p", 1920, 1080, 5000, 192),
    ResolutionProfile::new("2160p", 3840, 2160, 16000, 192),
];
