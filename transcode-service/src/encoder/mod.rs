//! Encoder adapter
//!
//! The sole caller of the external ffmpeg/ffprobe binaries. Every operation
//! runs under a cancellable token; cancellation kills the subprocess group
//! so no encoder children outlive their job.

pub mod analysis;
pub mod audio;
pub mod command;
pub mod concat;
pub mod live;
pub mod packaging;
pub mod probe;
pub mod progress;
pub mod quality;
pub mod subtitles;
pub mod thumbnails;
pub mod transcode;
pub mod watermark;

use crate::error::Result;
use async_trait::async_trait;
use media_core::{RenditionSpec, VideoMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use command::CommandRunner;
pub use live::LiveEncodeSession;
pub use progress::ProgressSink;

/// Options for a single-rendition transcode.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Args placed before `-i` (hardware acceleration selection)
    pub input_args: Vec<String>,
    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    /// Bitrate strings carry their unit suffix ("2800k")
    pub video_bitrate: String,
    pub max_bitrate: Option<String>,
    pub min_bitrate: Option<String>,
    pub audio_bitrate: String,
    pub preset: String,
    /// Source duration, when already known from a probe
    pub duration_hint: Option<f64>,
    /// Raw args appended verbatim before the output path
    pub extra_args: Vec<String>,
}

/// Options for the bounded multi-rendition fan-out.
#[derive(Debug, Clone)]
pub struct MultiResolutionOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub base_name: String,
    pub renditions: Vec<RenditionSpec>,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub duration_hint: Option<f64>,
    pub max_concurrent: usize,
}

/// Per-variant outcome of a multi-rendition transcode. The whole operation
/// only fails when every variant fails.
#[derive(Debug)]
pub struct MultiResolutionResult {
    pub outputs: Vec<(RenditionSpec, PathBuf)>,
    pub failures: Vec<(String, crate::error::AppError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsPlaylistType {
    Vod,
    Event,
}

#[derive(Debug, Clone)]
pub struct HlsOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub renditions: Vec<RenditionSpec>,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub segment_secs: u32,
    pub playlist_type: HlsPlaylistType,
    pub duration_hint: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HlsVariant {
    pub name: String,
    pub playlist_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HlsResult {
    pub master_path: PathBuf,
    pub variants: Vec<HlsVariant>,
}

#[derive(Debug, Clone)]
pub struct DashOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub renditions: Vec<RenditionSpec>,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub segment_secs: u32,
    pub duration_hint: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DashResult {
    pub manifest_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone)]
pub enum WatermarkKind {
    Image { path: PathBuf },
    Text { text: String, font_size: u32, color: String },
}

#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: WatermarkKind,
    pub position: WatermarkPosition,
    /// 0.0 (invisible) ..= 1.0 (opaque)
    pub opacity: f64,
    /// Overlay width as a fraction of the video width; ignored for text
    pub scale: f64,
    pub padding: u32,
}

#[derive(Debug, Clone)]
pub enum ConcatMode {
    /// Stream copy through the concat demuxer; inputs must share format
    Demuxer,
    /// Re-encode through the concat/xfade filter graph
    Filter { transition: Option<XfadeTransition> },
}

#[derive(Debug, Clone)]
pub struct XfadeTransition {
    /// xfade transition name ("fade", "dissolve", ...)
    pub kind: String,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleStream {
    pub index: u32,
    pub language: String,
    pub codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStream {
    pub index: u32,
    pub language: String,
    pub codec: String,
    pub channels: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone)]
pub struct LoudnormOptions {
    /// Integrated loudness target in LUFS
    pub target_lufs: f64,
    /// Maximum true peak in dBTP
    pub true_peak: f64,
    /// Loudness range target
    pub lra: f64,
    pub two_pass: bool,
}

impl Default for LoudnormOptions {
    fn default() -> Self {
        Self {
            target_lufs: -16.0,
            true_peak: -1.5,
            lra: 11.0,
            two_pass: true,
        }
    }
}

/// Raw content statistics scraped from the analysis filters; the quality
/// service turns these into a `ContentComplexity` record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSignals {
    pub spatial_information: f64,
    pub temporal_information: f64,
    pub motion_intensity: f64,
    pub motion_variance: f64,
    pub scene_change_count: u32,
    pub color_variance: f64,
    pub edge_density: f64,
    pub contrast: f64,
}

#[derive(Debug, Clone)]
pub struct LiveEncodeOptions {
    /// Ingest source (rtmp://.../live/<key>)
    pub input_url: String,
    pub output_dir: PathBuf,
    pub renditions: Vec<RenditionSpec>,
    pub video_codec: String,
    pub audio_codec: String,
    pub segment_secs: u32,
    /// LL-HLS: fmp4 segments with this partial-segment duration
    pub low_latency_part_secs: Option<f64>,
    /// Trailing playlist window in segments; `None` keeps everything
    pub dvr_list_size: Option<u32>,
}

/// Typed operations against the external encoder.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Parse container and stream metadata out of the encoder's probe JSON.
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> Result<VideoMetadata>;

    async fn transcode(
        &self,
        opts: &TranscodeOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Two-pass encode; CPU codecs only. Pass log files are removed on every
    /// exit path.
    async fn transcode_two_pass(
        &self,
        opts: &TranscodeOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn transcode_multi_resolution(
        &self,
        opts: &MultiResolutionOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<MultiResolutionResult>;

    async fn generate_hls(
        &self,
        opts: &HlsOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<HlsResult>;

    async fn generate_dash(
        &self,
        opts: &DashOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<DashResult>;

    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// `count` equally spaced frames across the source.
    async fn generate_thumbnails(
        &self,
        input: &Path,
        output_dir: &Path,
        count: u32,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>>;

    async fn generate_sprite_sheet(
        &self,
        input: &Path,
        output: &Path,
        columns: u32,
        rows: u32,
        interval_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn generate_animated_preview(
        &self,
        input: &Path,
        output: &Path,
        start_secs: f64,
        duration_secs: f64,
        fps: u32,
        width: u32,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn apply_watermark(
        &self,
        opts: &WatermarkOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mode: &ConcatMode,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn probe_subtitle_streams(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleStream>>;

    async fn extract_subtitle(
        &self,
        input: &Path,
        output: &Path,
        stream_index: u32,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn burn_subtitle(
        &self,
        input: &Path,
        subtitle: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn probe_audio_streams(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioStream>>;

    async fn normalize_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: &LoudnormOptions,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn measure_vmaf(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64>;

    async fn measure_ssim(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64>;

    async fn measure_psnr(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64>;

    /// Measure the content signals the encoding optimizer scores.
    async fn analyze_content(
        &self,
        input: &Path,
        duration: f64,
        sample_points: u32,
        cancel: &CancellationToken,
    ) -> Result<ContentSignals>;

    /// Spawn the long-running live encode for a stream; the session exposes
    /// the child's stderr line stream for telemetry scraping.
    async fn start_live_encode(
        &self,
        opts: &LiveEncodeOptions,
        cancel: &CancellationToken,
    ) -> Result<LiveEncodeSession>;
}

/// ffmpeg/ffprobe-backed `Encoder`.
pub struct FfmpegEncoder {
    runner: CommandRunner,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            runner: CommandRunner::new(ffmpeg_path, ffprobe_path),
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> Result<VideoMetadata> {
        probe::probe(&self.runner, path, cancel).await
    }

    async fn transcode(
        &self,
        opts: &TranscodeOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        transcode::transcode(&self.runner, opts, sink, cancel).await
    }

    async fn transcode_two_pass(
        &self,
        opts: &TranscodeOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        transcode::transcode_two_pass(&self.runner, opts, sink, cancel).await
    }

    async fn transcode_multi_resolution(
        &self,
        opts: &MultiResolutionOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<MultiResolutionResult> {
        transcode::transcode_multi_resolution(&self.runner, opts, sink, cancel).await
    }

    async fn generate_hls(
        &self,
        opts: &HlsOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<HlsResult> {
        packaging::generate_hls(&self.runner, opts, sink, cancel).await
    }

    async fn generate_dash(
        &self,
        opts: &DashOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<DashResult> {
        packaging::generate_dash(&self.runner, opts, sink, cancel).await
    }

    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        thumbnails::extract_single(&self.runner, input, output, at_seconds, cancel).await
    }

    async fn generate_thumbnails(
        &self,
        input: &Path,
        output_dir: &Path,
        count: u32,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        thumbnails::generate_interval(&self.runner, input, output_dir, count, duration, cancel)
            .await
    }

    async fn generate_sprite_sheet(
        &self,
        input: &Path,
        output: &Path,
        columns: u32,
        rows: u32,
        interval_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        thumbnails::generate_sprite(&self.runner, input, output, columns, rows, interval_secs, cancel)
            .await
    }

    async fn generate_animated_preview(
        &self,
        input: &Path,
        output: &Path,
        start_secs: f64,
        duration_secs: f64,
        fps: u32,
        width: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        thumbnails::generate_animated(
            &self.runner,
            input,
            output,
            start_secs,
            duration_secs,
            fps,
            width,
            cancel,
        )
        .await
    }

    async fn apply_watermark(
        &self,
        opts: &WatermarkOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        watermark::apply(&self.runner, opts, sink, cancel).await
    }

    async fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mode: &ConcatMode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        concat::concat(&self.runner, inputs, output, mode, cancel).await
    }

    async fn probe_subtitle_streams(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleStream>> {
        subtitles::probe_streams(&self.runner, input, cancel).await
    }

    async fn extract_subtitle(
        &self,
        input: &Path,
        output: &Path,
        stream_index: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        subtitles::extract(&self.runner, input, output, stream_index, cancel).await
    }

    async fn burn_subtitle(
        &self,
        input: &Path,
        subtitle: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        subtitles::burn(&self.runner, input, subtitle, output, cancel).await
    }

    async fn probe_audio_streams(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioStream>> {
        audio::probe_streams(&self.runner, input, cancel).await
    }

    async fn normalize_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: &LoudnormOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        audio::normalize(&self.runner, input, output, opts, cancel).await
    }

    async fn measure_vmaf(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        quality::measure_vmaf(&self.runner, reference, distorted, cancel).await
    }

    async fn measure_ssim(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        quality::measure_ssim(&self.runner, reference, distorted, cancel).await
    }

    async fn measure_psnr(
        &self,
        reference: &Path,
        distorted: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        quality::measure_psnr(&self.runner, reference, distorted, cancel).await
    }

    async fn analyze_content(
        &self,
        input: &Path,
        duration: f64,
        sample_points: u32,
        cancel: &CancellationToken,
    ) -> Result<ContentSignals> {
        analysis::analyze_content(&self.runner, input, duration, sample_points, cancel).await
    }

    async fn start_live_encode(
        &self,
        opts: &LiveEncodeOptions,
        cancel: &CancellationToken,
    ) -> Result<LiveEncodeSession> {
        live::start(&self.runner, opts, cancel).await
    }
}
