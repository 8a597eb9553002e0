//! Long-running live encode sessions
//!
//! Unlike the batch operations, a live encode is handed back to the caller
//! as a session: the stream controller scrapes telemetry off the stderr
//! line channel and decides when to tear the process down via its token.

use super::command::{path_arg, CommandRunner};
use super::LiveEncodeOptions;
use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stderr lines buffered before the scraper falls behind and lines drop.
const STDERR_CHANNEL_CAPACITY: usize = 256;

/// A running live encode.
pub struct LiveEncodeSession {
    /// Path of the master playlist the encode writes
    pub master_playlist: PathBuf,
    /// Raw stderr lines (progress stats and errors interleaved)
    pub stderr_lines: mpsc::Receiver<String>,
    /// Resolves when the subprocess exits
    pub exit: tokio::task::JoinHandle<Result<()>>,
}

fn build_args(opts: &LiveEncodeOptions) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        opts.input_url.clone(),
    ];

    for _ in &opts.renditions {
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("0:a:0".to_string());
    }

    args.push("-c:v".to_string());
    args.push(opts.video_codec.clone());
    args.push("-c:a".to_string());
    args.push(opts.audio_codec.clone());
    // Live encodes trade quality for latency.
    args.push("-preset".to_string());
    args.push("veryfast".to_string());
    args.push("-tune".to_string());
    args.push("zerolatency".to_string());

    for (i, rendition) in opts.renditions.iter().enumerate() {
        args.push(format!("-filter:v:{i}"));
        args.push(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            rendition.width, rendition.height
        ));
        args.push(format!("-b:v:{i}"));
        args.push(format!("{}k", rendition.video_bitrate));
        args.push(format!("-b:a:{i}"));
        args.push(format!("{}k", rendition.audio_bitrate));
    }

    args.push("-f".to_string());
    args.push("hls".to_string());
    args.push("-hls_time".to_string());
    args.push(opts.segment_secs.to_string());
    args.push("-hls_flags".to_string());
    args.push("delete_segments+independent_segments".to_string());

    if let Some(part_secs) = opts.low_latency_part_secs {
        args.push("-hls_segment_type".to_string());
        args.push("fmp4".to_string());
        args.push("-hls_fmp4_init_filename".to_string());
        args.push("init_%v.mp4".to_string());
        args.push("-hls_init_time".to_string());
        args.push(format!("{part_secs}"));
    }

    // The playlist window doubles as the DVR seek-back buffer.
    args.push("-hls_list_size".to_string());
    args.push(opts.dvr_list_size.unwrap_or(0).to_string());

    args.push("-master_pl_name".to_string());
    args.push("master.m3u8".to_string());
    args.push("-var_stream_map".to_string());
    args.push(
        opts.renditions
            .iter()
            .enumerate()
            .map(|(i, r)| format!("v:{i},a:{i},name:{}", r.name))
            .collect::<Vec<_>>()
            .join(" "),
    );
    args.push("-hls_segment_filename".to_string());
    args.push(path_arg(&opts.output_dir.join("stream_%v_%03d.ts")));
    args.push(path_arg(&opts.output_dir.join("stream_%v.m3u8")));

    args
}

pub async fn start(
    runner: &CommandRunner,
    opts: &LiveEncodeOptions,
    cancel: &CancellationToken,
) -> Result<LiveEncodeSession> {
    tokio::fs::create_dir_all(&opts.output_dir).await?;

    let args = build_args(opts);
    let mut child = runner
        .spawn_ffmpeg_raw(&args, Stdio::null(), Stdio::piped())
        .map_err(|e| AppError::TransientIo(format!("failed to spawn live encoder: {e}")))?;
    debug!(input = %opts.input_url, "live encode started");

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Internal("live encoder stderr not piped".to_string()))?;

    let (tx, rx) = mpsc::channel(STDERR_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            // Drop lines instead of stalling the encoder if nobody reads.
            if tx.try_send(line).is_err() {
                continue;
            }
        }
    });

    let cancel = cancel.clone();
    let exit = tokio::spawn(async move {
        let pid = child.id();
        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| AppError::TransientIo(format!("live encoder wait failed: {e}")))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(AppError::encoder(
                        format!("live encoder exited with {status}"),
                        String::new(),
                    ))
                }
            }
            _ = cancel.cancelled() => {
                super::command::terminate_child(pid, &mut child).await;
                Ok(())
            }
        }
    });

    Ok(LiveEncodeSession {
        master_playlist: opts.output_dir.join("master.m3u8"),
        stderr_lines: rx,
        exit,
    })
}
