//! Per-job media pipeline
//!
//! Download -> probe -> encode (single / two-pass / fan-out / packaging) ->
//! upload -> record outputs. Side artefacts (thumbnails, subtitles) never
//! fail the job; encode failures do.

use super::gpu;
use super::progress::StageSink;
use super::WorkerDeps;
use crate::encoder::{
    HlsOptions, HlsPlaylistType, LoudnormOptions, MultiResolutionOptions, ProgressSink,
    TranscodeOptions,
};
use crate::error::{AppError, Result};
use crate::models::{Job, Output, Subtitle, Thumbnail, TranscodeConfig, Video};
use crate::services::quality::{ComplexityAnalyzer, EncodingOptimizer, OptimizerOptions};
use media_core::constants::HLS_SEGMENT_SECS;
use media_core::{RenditionSpec, ResolutionProfile, VideoMetadata};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress bands of the pipeline stages.
const DOWNLOAD_DONE: f64 = 5.0;
const PROBE_DONE: f64 = 10.0;
const ENCODE_SPAN: f64 = 70.0; // 10 -> 80
const UPLOAD_DONE: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Single,
    MultiRes,
    Hls,
    Dash,
}

fn pipeline_kind(config: &TranscodeConfig) -> PipelineKind {
    if config.hls_enabled() {
        PipelineKind::Hls
    } else if config.dash_enabled() {
        PipelineKind::Dash
    } else if config.resolutions().is_some() {
        PipelineKind::MultiRes
    } else {
        PipelineKind::Single
    }
}

/// Scratch directory for one job, removed on every exit path.
pub struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    pub async fn create(base: &Path, job_id: Uuid) -> Result<Self> {
        let path = base.join(format!("job-{job_id}"));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to remove job temp dir: {e}");
            }
        }
    }
}

fn bitrate_arg(raw: &str, fallback_kbps: u32) -> String {
    if raw.is_empty() {
        return format!("{fallback_kbps}k");
    }
    if raw.ends_with('k') || raw.ends_with('K') || raw.ends_with('M') {
        raw.to_string()
    } else {
        format!("{raw}k")
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

pub struct JobPipeline<'a> {
    pub deps: &'a WorkerDeps,
    pub job: &'a Job,
    pub video: &'a Video,
    pub temp_dir: &'a Path,
    pub gpu_enabled: bool,
    pub sink: Arc<dyn ProgressSink>,
    pub cancel: &'a CancellationToken,
}

impl<'a> JobPipeline<'a> {
    /// Run the whole pipeline; returns when outputs are recorded.
    pub async fn run(&self) -> Result<()> {
        let config = &self.job.config.0;
        let kind = pipeline_kind(config);

        // Source download.
        let source_path = self.temp_dir.join("source");
        self.deps
            .blobs
            .download(&self.video.original_url, &source_path)
            .await?;
        self.sink.report(DOWNLOAD_DONE);
        self.check_cancelled()?;

        // Probe drives progress totals and output metadata.
        let source_meta = self.deps.encoder.probe(&source_path, self.cancel).await?;
        self.sink.report(PROBE_DONE);

        match kind {
            PipelineKind::Single => {
                self.run_single(config, &source_path, &source_meta).await?
            }
            PipelineKind::MultiRes => {
                self.run_multi_res(config, &source_path, &source_meta).await?
            }
            PipelineKind::Hls => {
                self.run_packaged(config, &source_path, &source_meta, PipelineKind::Hls)
                    .await?
            }
            PipelineKind::Dash => {
                self.run_packaged(config, &source_path, &source_meta, PipelineKind::Dash)
                    .await?
            }
        }
        self.sink.report(UPLOAD_DONE);

        // Side artefacts are logged-not-fatal by contract.
        if let Err(e) = self.record_audio_tracks(&source_path).await {
            warn!(job_id = %self.job.id, "audio track probe failed: {e}");
        }
        if config.thumbnails_enabled() {
            if let Err(e) = self.generate_thumbnails(&source_path, &source_meta).await {
                warn!(job_id = %self.job.id, "thumbnail generation failed: {e}");
            }
        }
        if config.subtitles_enabled() {
            if let Err(e) = self.extract_subtitles(&source_path).await {
                warn!(job_id = %self.job.id, "subtitle extraction failed: {e}");
            }
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    fn encode_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::new(StageSink::new(self.sink.clone(), PROBE_DONE, ENCODE_SPAN))
    }

    // -- single rendition --------------------------------------------------

    async fn run_single(
        &self,
        config: &TranscodeConfig,
        source: &Path,
        source_meta: &VideoMetadata,
    ) -> Result<()> {
        let resolution = non_empty_or(&config.resolution, "720p");
        let format = non_empty_or(&config.output_format, "mp4");
        let (width, height) = ResolutionProfile::dimensions(&resolution);
        let profile = ResolutionProfile::by_name(&resolution)
            .unwrap_or_else(|| ResolutionProfile::by_name("720p").expect("720p rung"));

        let local_output = self.temp_dir.join(format!("output_{resolution}.{format}"));
        let opts = TranscodeOptions {
            input: source.to_path_buf(),
            output: local_output.clone(),
            input_args: Vec::new(),
            video_codec: non_empty_or(&config.codec, "libx264"),
            audio_codec: non_empty_or(&config.audio_codec, "aac"),
            width,
            height,
            video_bitrate: bitrate_arg(&config.bitrate, profile.video_bitrate),
            max_bitrate: Some(format!("{}k", profile.max_bitrate)),
            min_bitrate: None,
            audio_bitrate: bitrate_arg(&config.audio_bitrate, profile.audio_bitrate),
            preset: non_empty_or(&config.preset, "medium"),
            duration_hint: Some(source_meta.duration_seconds),
            extra_args: Vec::new(),
        };

        self.encode_single(config, opts).await?;

        if config.normalize_audio() {
            let normalized = self.temp_dir.join(format!("normalized_{resolution}.{format}"));
            self.deps
                .encoder
                .normalize_audio(&local_output, &normalized, &LoudnormOptions::default(), self.cancel)
                .await?;
            tokio::fs::rename(&normalized, &local_output).await?;
        }

        let key = format!(
            "videos/{}/outputs/output_{resolution}.{format}",
            self.video.id
        );
        self.record_output(&local_output, &key, &format, &resolution)
            .await?;
        Ok(())
    }

    /// Encode one rendition, preferring the GPU when eligible and falling
    /// back to the CPU codec exactly once.
    async fn encode_single(&self, config: &TranscodeConfig, opts: TranscodeOptions) -> Result<()> {
        if config.two_pass() {
            return self
                .deps
                .encoder
                .transcode_two_pass(&opts, self.encode_sink(), self.cancel)
                .await;
        }

        let device = if gpu::gpu_eligible(self.gpu_enabled, config) {
            gpu::select_device(&self.deps.gpu.devices())
        } else {
            None
        };

        let Some(device) = device else {
            return self
                .deps
                .encoder
                .transcode(&opts, self.encode_sink(), self.cancel)
                .await;
        };

        let nvenc_codec = match gpu::nvenc_codec(&opts.video_codec) {
            Some(codec) => codec,
            None => {
                return self
                    .deps
                    .encoder
                    .transcode(&opts, self.encode_sink(), self.cancel)
                    .await
            }
        };

        let mut gpu_opts = opts.clone();
        gpu_opts.video_codec = nvenc_codec.to_string();
        gpu_opts.preset = gpu::nvenc_preset(&opts.preset).to_string();
        gpu_opts.input_args = gpu::gpu_input_args(device.index);
        gpu_opts.extra_args = gpu::gpu_codec_args();

        match self
            .deps
            .encoder
            .transcode(&gpu_opts, self.encode_sink(), self.cancel)
            .await
        {
            Ok(()) => {
                self.merge_metadata(&[
                    ("gpu_enabled", serde_json::json!(true)),
                    ("gpu_device", serde_json::json!(device.index)),
                ])
                .await;
                Ok(())
            }
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => {
                warn!(job_id = %self.job.id, "GPU encode failed, retrying on CPU: {e}");
                self.merge_metadata(&[
                    ("gpu_fallback", serde_json::json!(true)),
                    ("cpu_codec", serde_json::json!(opts.video_codec.clone())),
                ])
                .await;
                self.deps
                    .encoder
                    .transcode(&opts, self.encode_sink(), self.cancel)
                    .await
            }
        }
    }

    async fn merge_metadata(&self, entries: &[(&str, serde_json::Value)]) {
        let map: HashMap<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if let Err(e) = self.deps.repo.merge_job_metadata(self.job.id, &map).await {
            warn!(job_id = %self.job.id, "failed to merge job metadata: {e}");
        }
    }

    // -- multi rendition ---------------------------------------------------

    async fn ladder(
        &self,
        config: &TranscodeConfig,
        source: &Path,
        source_meta: &VideoMetadata,
    ) -> Vec<RenditionSpec> {
        if let Some(ladder) = config.resolutions() {
            if !ladder.is_empty() {
                return ladder;
            }
        }

        // Per-title ladder when the caller did not pin one; analysis failure
        // degrades to the standard ladder.
        let analyzer = ComplexityAnalyzer::new(self.deps.encoder.clone());
        match analyzer
            .analyze(source, source_meta.duration_seconds, self.cancel)
            .await
        {
            Ok(complexity) => EncodingOptimizer::build_ladder(
                &complexity,
                source_meta.height,
                &OptimizerOptions::default(),
            ),
            Err(e) => {
                warn!(job_id = %self.job.id, "content analysis failed, using standard ladder: {e}");
                EncodingOptimizer::standard_ladder(source_meta.height, None)
                    .into_iter()
                    .map(RenditionSpec::from)
                    .collect()
            }
        }
    }

    fn base_name(&self) -> String {
        Path::new(&self.video.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }

    async fn run_multi_res(
        &self,
        config: &TranscodeConfig,
        source: &Path,
        source_meta: &VideoMetadata,
    ) -> Result<()> {
        let renditions = self.ladder(config, source, source_meta).await;
        let opts = MultiResolutionOptions {
            input: source.to_path_buf(),
            output_dir: self.temp_dir.to_path_buf(),
            base_name: self.base_name(),
            renditions,
            video_codec: non_empty_or(&config.codec, "libx264"),
            audio_codec: non_empty_or(&config.audio_codec, "aac"),
            preset: non_empty_or(&config.preset, "medium"),
            duration_hint: Some(source_meta.duration_seconds),
            max_concurrent: 2,
        };

        let result = self
            .deps
            .encoder
            .transcode_multi_resolution(&opts, self.encode_sink(), self.cancel)
            .await?;

        for (name, error) in &result.failures {
            warn!(job_id = %self.job.id, rendition = %name, "variant failed: {error}");
        }

        for (rendition, local_path) in &result.outputs {
            if config.normalize_audio() {
                let normalized = local_path.with_extension("normalized.mp4");
                match self
                    .deps
                    .encoder
                    .normalize_audio(local_path, &normalized, &LoudnormOptions::default(), self.cancel)
                    .await
                {
                    Ok(()) => tokio::fs::rename(&normalized, local_path).await?,
                    Err(e) => {
                        warn!(rendition = %rendition.name, "loudnorm failed, keeping original: {e}")
                    }
                }
            }

            let file_name = local_path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.mp4", rendition.name));
            let key = format!("videos/{}/outputs/{file_name}", self.video.id);
            self.record_output(local_path, &key, "mp4", &rendition.name)
                .await?;
        }

        Ok(())
    }

    // -- packaged (HLS/DASH) ----------------------------------------------

    async fn run_packaged(
        &self,
        config: &TranscodeConfig,
        source: &Path,
        source_meta: &VideoMetadata,
        kind: PipelineKind,
    ) -> Result<()> {
        let renditions = self.ladder(config, source, source_meta).await;
        let video_codec = non_empty_or(&config.codec, "libx264");
        let audio_codec = non_empty_or(&config.audio_codec, "aac");
        let preset = non_empty_or(&config.preset, "veryfast");

        let (local_dir, remote_prefix, manifest_rel, format) = match kind {
            PipelineKind::Hls => {
                let dir = self.temp_dir.join("hls");
                let result = self
                    .deps
                    .encoder
                    .generate_hls(
                        &HlsOptions {
                            input: source.to_path_buf(),
                            output_dir: dir.clone(),
                            renditions: renditions.clone(),
                            video_codec,
                            audio_codec,
                            preset,
                            segment_secs: HLS_SEGMENT_SECS,
                            playlist_type: HlsPlaylistType::Vod,
                            duration_hint: Some(source_meta.duration_seconds),
                        },
                        self.encode_sink(),
                        self.cancel,
                    )
                    .await?;
                (
                    dir,
                    format!("videos/{}/hls", self.video.id),
                    result
                        .master_path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "master.m3u8".to_string()),
                    "hls",
                )
            }
            _ => {
                let dir = self.temp_dir.join("dash");
                let result = self
                    .deps
                    .encoder
                    .generate_dash(
                        &crate::encoder::DashOptions {
                            input: source.to_path_buf(),
                            output_dir: dir.clone(),
                            renditions: renditions.clone(),
                            video_codec,
                            audio_codec,
                            preset,
                            segment_secs: HLS_SEGMENT_SECS,
                            duration_hint: Some(source_meta.duration_seconds),
                        },
                        self.encode_sink(),
                        self.cancel,
                    )
                    .await?;
                (
                    dir,
                    format!("videos/{}/dash", self.video.id),
                    result
                        .manifest_path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "manifest.mpd".to_string()),
                    "dash",
                )
            }
        };

        self.upload_tree(&local_dir, &remote_prefix).await?;

        let manifest_key = format!("{remote_prefix}/{manifest_rel}");
        let manifest_url = self.deps.blobs.url(&manifest_key);
        let output = Output {
            id: self.deps.ids.new_id(),
            job_id: self.job.id,
            video_id: self.video.id,
            format: format.to_string(),
            resolution: "adaptive".to_string(),
            width: source_meta.width as i32,
            height: source_meta.height as i32,
            codec: non_empty_or(&config.codec, "libx264"),
            bitrate: 0,
            size: 0,
            duration: source_meta.duration_seconds,
            url: manifest_url,
            path: manifest_key,
            created_at: self.deps.clock.now(),
        };
        self.deps.repo.create_output(&output).await?;

        // Variant playlists get their own records so players can deep link.
        for rendition in &renditions {
            let playlist_rel = format!("stream_{}.m3u8", rendition.name);
            if format == "hls" && local_dir.join(&playlist_rel).exists() {
                let key = format!("{remote_prefix}/{playlist_rel}");
                let output = Output {
                    id: self.deps.ids.new_id(),
                    job_id: self.job.id,
                    video_id: self.video.id,
                    format: format.to_string(),
                    resolution: rendition.name.clone(),
                    width: rendition.width as i32,
                    height: rendition.height as i32,
                    codec: non_empty_or(&config.codec, "libx264"),
                    bitrate: rendition.video_bitrate as i64 * 1000,
                    size: 0,
                    duration: source_meta.duration_seconds,
                    url: self.deps.blobs.url(&key),
                    path: key,
                    created_at: self.deps.clock.now(),
                };
                self.deps.repo.create_output(&output).await?;
            }
        }

        Ok(())
    }

    /// Walk a packaging output tree and upload every file under `prefix`.
    fn upload_tree<'b>(
        &'b self,
        dir: &'b Path,
        prefix: &'b str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if path.is_dir() {
                    self.upload_tree(&path, &format!("{prefix}/{name}")).await?;
                } else {
                    self.deps
                        .blobs
                        .upload(&format!("{prefix}/{name}"), &path)
                        .await?;
                }
                self.check_cancelled()?;
            }
            Ok(())
        })
    }

    // -- shared output recording ------------------------------------------

    async fn record_output(
        &self,
        local_path: &Path,
        key: &str,
        format: &str,
        resolution: &str,
    ) -> Result<()> {
        let meta = self.deps.encoder.probe(local_path, self.cancel).await?;
        self.deps.blobs.upload(key, local_path).await?;
        let url = self.deps.blobs.url(key);

        let output = Output {
            id: self.deps.ids.new_id(),
            job_id: self.job.id,
            video_id: self.video.id,
            format: format.to_string(),
            resolution: resolution.to_string(),
            width: meta.width as i32,
            height: meta.height as i32,
            codec: meta.codec.clone(),
            bitrate: meta.bitrate,
            size: meta.size_bytes,
            duration: meta.duration_seconds,
            url,
            path: key.to_string(),
            created_at: self.deps.clock.now(),
        };
        self.deps.repo.create_output(&output).await?;
        info!(job_id = %self.job.id, key = %key, "output recorded");
        Ok(())
    }

    // -- side artefacts ----------------------------------------------------

    async fn generate_thumbnails(&self, source: &Path, meta: &VideoMetadata) -> Result<()> {
        let thumb_dir = self.temp_dir.join("thumbnails");
        let thumbs = self
            .deps
            .encoder
            .generate_thumbnails(source, &thumb_dir, 10, meta.duration_seconds, self.cancel)
            .await?;

        for (i, local) in thumbs.iter().enumerate() {
            let name = local
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("thumb_{:04}.jpg", i + 1));
            let key = format!("videos/{}/thumbnails/{name}", self.video.id);
            self.deps.blobs.upload(&key, local).await?;
            let record = Thumbnail {
                id: self.deps.ids.new_id(),
                video_id: self.video.id,
                kind: "interval".to_string(),
                index: i as i32 + 1,
                width: 0,
                height: 0,
                url: self.deps.blobs.url(&key),
                path: key,
                created_at: self.deps.clock.now(),
            };
            self.deps.repo.create_thumbnail(&record).await?;
        }

        // Sprite sheet over the same sampling interval.
        let sprite_local = thumb_dir.join("sprite.jpg");
        let interval = (meta.duration_seconds / 100.0).max(1.0);
        self.deps
            .encoder
            .generate_sprite_sheet(source, &sprite_local, 10, 10, interval, self.cancel)
            .await?;
        let sprite_key = format!("videos/{}/thumbnails/sprite.jpg", self.video.id);
        self.deps.blobs.upload(&sprite_key, &sprite_local).await?;
        let record = Thumbnail {
            id: self.deps.ids.new_id(),
            video_id: self.video.id,
            kind: "sprite".to_string(),
            index: 0,
            width: 1600,
            height: 900,
            url: self.deps.blobs.url(&sprite_key),
            path: sprite_key,
            created_at: self.deps.clock.now(),
        };
        self.deps.repo.create_thumbnail(&record).await?;
        Ok(())
    }

    /// Catalogue the source's audio streams; playback surfaces use these
    /// for track selection.
    async fn record_audio_tracks(&self, source: &Path) -> Result<()> {
        let streams = self
            .deps
            .encoder
            .probe_audio_streams(source, self.cancel)
            .await?;

        for stream in streams {
            let record = crate::models::AudioTrack {
                id: self.deps.ids.new_id(),
                video_id: self.video.id,
                language: stream.language,
                codec: stream.codec,
                channels: stream.channels as i32,
                url: String::new(),
                created_at: self.deps.clock.now(),
            };
            self.deps.repo.create_audio_track(&record).await?;
        }
        Ok(())
    }

    async fn extract_subtitles(&self, source: &Path) -> Result<()> {
        let streams = self
            .deps
            .encoder
            .probe_subtitle_streams(source, self.cancel)
            .await?;
        if streams.is_empty() {
            return Ok(());
        }

        let subtitle_dir = self.temp_dir.join("subtitles");
        tokio::fs::create_dir_all(&subtitle_dir).await?;

        for (i, stream) in streams.iter().enumerate() {
            let file_name = format!("subtitle_{}_{}.vtt", stream.language, i);
            let local = subtitle_dir.join(&file_name);
            if let Err(e) = self
                .deps
                .encoder
                .extract_subtitle(source, &local, stream.index, self.cancel)
                .await
            {
                warn!(stream = stream.index, "subtitle extract failed: {e}");
                continue;
            }

            let key = format!("videos/{}/subtitles/{file_name}", self.video.id);
            self.deps.blobs.upload(&key, &local).await?;
            let record = Subtitle {
                id: self.deps.ids.new_id(),
                video_id: self.video.id,
                language: stream.language.clone(),
                format: "vtt".to_string(),
                index: i as i32,
                url: self.deps.blobs.url(&key),
                created_at: self.deps.clock.now(),
            };
            self.deps.repo.create_subtitle(&record).await?;
        }

        Ok(())
    }
}
