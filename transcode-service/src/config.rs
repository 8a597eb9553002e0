//! Configuration management for transcode-service
//!
//! Loads configuration from environment variables with sensible defaults.

use media_core::constants;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub livestream: LiveStreamConfig,
    pub webhook: WebhookConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub env: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO in development)
    pub endpoint: Option<String>,
    pub cdn_base_url: String,
}

impl StorageConfig {
    pub fn cdn_url(&self, key: &str) -> String {
        format!("{}/{}", self.cdn_base_url.trim_end_matches('/'), key)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub drain_interval_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    /// Scratch space for per-job temp directories
    pub work_dir: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub gpu_enabled: bool,
    /// TTL of the cross-process job lock; renewed while processing
    pub job_lock_ttl_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LiveStreamConfig {
    pub rtmp_base_url: String,
    pub hls_output_dir: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/transcode".to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            },
            cache: CacheConfig {
                redis_url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost".to_string()),
            },
            storage: StorageConfig {
                bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "transcode-media".to_string()),
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
                cdn_base_url: std::env::var("CDN_BASE_URL")
                    .unwrap_or_else(|_| "https://cdn.transcode.local".to_string()),
            },
            scheduler: SchedulerConfig {
                max_concurrent: env_parse(
                    "SCHEDULER_MAX_CONCURRENT",
                    constants::DEFAULT_MAX_CONCURRENT_JOBS,
                ),
                drain_interval_secs: env_parse(
                    "SCHEDULER_DRAIN_INTERVAL_SECS",
                    constants::SCHEDULER_DRAIN_INTERVAL_SECS,
                ),
            },
            worker: WorkerConfig {
                work_dir: std::env::var("WORKER_WORK_DIR")
                    .unwrap_or_else(|_| "/tmp/transcode".to_string()),
                ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
                ffprobe_path: std::env::var("FFPROBE_PATH")
                    .unwrap_or_else(|_| "ffprobe".to_string()),
                gpu_enabled: env_bool("WORKER_GPU_ENABLED", false),
                job_lock_ttl_secs: env_parse("WORKER_JOB_LOCK_TTL_SECS", 2 * 60 * 60),
            },
            livestream: LiveStreamConfig {
                rtmp_base_url: std::env::var("RTMP_BASE_URL")
                    .unwrap_or_else(|_| "rtmp://localhost:1935/live".to_string()),
                hls_output_dir: std::env::var("LIVE_HLS_OUTPUT_DIR")
                    .unwrap_or_else(|_| "/var/lib/transcode/live".to_string()),
                worker_count: env_parse("LIVE_WORKER_COUNT", constants::LIVE_WORKER_COUNT),
                queue_capacity: env_parse("LIVE_QUEUE_CAPACITY", constants::LIVE_QUEUE_CAPACITY),
            },
            webhook: WebhookConfig {
                user_agent: std::env::var("WEBHOOK_USER_AGENT")
                    .unwrap_or_else(|_| "Transcode-Webhook/1.0".to_string()),
                timeout_secs: env_parse("WEBHOOK_TIMEOUT_SECS", constants::WEBHOOK_TIMEOUT_SECS),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
