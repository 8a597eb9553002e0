//! Single, two-pass, and fan-out transcodes

use super::command::{path_arg, CommandRunner};
use super::progress::ProgressSink;
use super::{MultiResolutionOptions, MultiResolutionResult, TranscodeOptions};
use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Codecs that only exist as software encoders; the GPU path and two-pass
/// rate control treat them specially.
pub const CPU_ONLY_CODECS: &[&str] = &["libvpx-vp9", "libaom-av1"];

fn build_args(opts: &TranscodeOptions, pass: Option<(u8, &str)>) -> Vec<String> {
    let mut args = opts.input_args.clone();
    args.push("-i".to_string());
    args.push(path_arg(&opts.input));

    args.push("-c:v".to_string());
    args.push(opts.video_codec.clone());

    if opts.width > 0 && opts.height > 0 {
        args.push("-vf".to_string());
        args.push(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            opts.width, opts.height
        ));
    }

    args.push("-b:v".to_string());
    args.push(opts.video_bitrate.clone());
    if let Some(max) = &opts.max_bitrate {
        args.push("-maxrate".to_string());
        args.push(max.clone());
    }
    if let Some(min) = &opts.min_bitrate {
        args.push("-minrate".to_string());
        args.push(min.clone());
    }

    if !opts.preset.is_empty() {
        args.push("-preset".to_string());
        args.push(opts.preset.clone());
    }

    if let Some((pass_number, log_prefix)) = pass {
        args.push("-pass".to_string());
        args.push(pass_number.to_string());
        args.push("-passlogfile".to_string());
        args.push(log_prefix.to_string());
    }

    match pass {
        // Pass 1 analyses video only and writes to the null muxer.
        Some((1, _)) => {
            args.push("-an".to_string());
            args.push("-f".to_string());
            args.push("null".to_string());
            args.extend(opts.extra_args.iter().cloned());
            args.push(null_output());
        }
        _ => {
            args.push("-c:a".to_string());
            args.push(opts.audio_codec.clone());
            args.push("-b:a".to_string());
            args.push(opts.audio_bitrate.clone());
            args.extend(opts.extra_args.iter().cloned());
            args.push(path_arg(&opts.output));
        }
    }

    args
}

fn null_output() -> String {
    if cfg!(windows) { "NUL" } else { "/dev/null" }.to_string()
}

pub async fn transcode(
    runner: &CommandRunner,
    opts: &TranscodeOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<()> {
    let args = build_args(opts, None);
    runner
        .run_ffmpeg_with_progress(&args, opts.duration_hint, sink, |p| p, cancel)
        .await
}

/// Two-pass encode. Progress is scaled 0-50% for the analysis pass and
/// 50-100% for the encode pass; pass log files are removed on every exit.
pub async fn transcode_two_pass(
    runner: &CommandRunner,
    opts: &TranscodeOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<()> {
    if CPU_ONLY_CODECS.contains(&opts.video_codec.as_str())
        || opts.video_codec.contains("nvenc")
    {
        return Err(AppError::Internal(format!(
            "two-pass encoding requires a CPU x264/x265 codec, got {}",
            opts.video_codec
        )));
    }

    let log_prefix = format!("{}.passlog", path_arg(&opts.output));
    let result = run_two_pass(runner, opts, &log_prefix, sink, cancel).await;
    cleanup_pass_logs(&log_prefix).await;
    result
}

async fn run_two_pass(
    runner: &CommandRunner,
    opts: &TranscodeOptions,
    log_prefix: &str,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pass1 = build_args(opts, Some((1, log_prefix)));
    runner
        .run_ffmpeg_with_progress(
            &pass1,
            opts.duration_hint,
            sink.clone(),
            |p| p / 2.0,
            cancel,
        )
        .await?;

    let pass2 = build_args(opts, Some((2, log_prefix)));
    runner
        .run_ffmpeg_with_progress(
            &pass2,
            opts.duration_hint,
            sink,
            |p| 50.0 + p / 2.0,
            cancel,
        )
        .await
}

async fn cleanup_pass_logs(log_prefix: &str) {
    for suffix in ["-0.log", "-0.log.mbtree"] {
        let path = format!("{log_prefix}{suffix}");
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path, "failed to remove pass log: {e}");
            }
        }
    }
}

/// Sink for one variant of a fan-out; folds its own percentage into the
/// shared average reported upstream.
struct VariantSink {
    index: usize,
    slots: Arc<Mutex<Vec<f64>>>,
    overall: Arc<dyn ProgressSink>,
}

impl ProgressSink for VariantSink {
    fn report(&self, percent: f64) {
        let average = {
            let mut slots = self.slots.lock().expect("variant progress lock");
            if percent > slots[self.index] {
                slots[self.index] = percent;
            }
            slots.iter().sum::<f64>() / slots.len() as f64
        };
        self.overall.report(average);
    }
}

/// Encode every requested rendition with bounded concurrency. Individual
/// variant failures are collected; the call errors only when nothing
/// succeeded.
pub async fn transcode_multi_resolution(
    runner: &CommandRunner,
    opts: &MultiResolutionOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<MultiResolutionResult> {
    if opts.renditions.is_empty() {
        return Err(AppError::Internal("no renditions requested".to_string()));
    }

    let limit = opts.max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let slots = Arc::new(Mutex::new(vec![0.0f64; opts.renditions.len()]));
    let mut handles = Vec::with_capacity(opts.renditions.len());

    for (index, rendition) in opts.renditions.iter().enumerate() {
        let output = opts.output_dir.join(format!(
            "{}_{}_{}.mp4",
            opts.base_name,
            rendition.name,
            codec_suffix(&opts.video_codec)
        ));
        let variant_opts = TranscodeOptions {
            input: opts.input.clone(),
            output: output.clone(),
            input_args: Vec::new(),
            video_codec: opts.video_codec.clone(),
            audio_codec: opts.audio_codec.clone(),
            width: rendition.width,
            height: rendition.height,
            video_bitrate: format!("{}k", rendition.video_bitrate),
            max_bitrate: Some(format!("{}k", rendition.max_bitrate.max(rendition.video_bitrate))),
            min_bitrate: None,
            audio_bitrate: format!("{}k", rendition.audio_bitrate),
            preset: opts.preset.clone(),
            duration_hint: opts.duration_hint,
            extra_args: Vec::new(),
        };

        let runner = runner.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let variant_sink: Arc<dyn ProgressSink> = Arc::new(VariantSink {
            index,
            slots: slots.clone(),
            overall: sink.clone(),
        });
        let rendition = rendition.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("semaphore closed mid fan-out");
            debug!(rendition = %rendition.name, "starting variant encode");
            let result = transcode(&runner, &variant_opts, variant_sink, &cancel).await;
            (rendition, output, result)
        }));
    }

    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        let (rendition, output, result) = handle
            .await
            .map_err(|e| AppError::Internal(format!("variant task panicked: {e}")))?;
        match result {
            Ok(()) => outputs.push((rendition, output)),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                warn!(rendition = %rendition.name, "variant encode failed: {e}");
                failures.push((rendition.name.clone(), e));
            }
        }
    }

    if outputs.is_empty() {
        return Err(failures
            .into_iter()
            .next()
            .map(|(_, e)| e)
            .unwrap_or_else(|| AppError::Internal("fan-out produced nothing".to_string())));
    }

    Ok(MultiResolutionResult { outputs, failures })
}

fn codec_suffix(codec: &str) -> &str {
    match codec {
        "libx264" | "h264_nvenc" => "h264",
        "libx265" | "hevc_nvenc" => "h265",
        "libvpx-vp9" => "vp9",
        "libaom-av1" | "av1_nvenc" => "av1",
        other => other,
    }
}
