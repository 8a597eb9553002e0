//! Source inspection via ffprobe

use super::command::{path_arg, CommandRunner};
use crate::error::{AppError, Result};
use media_core::VideoMetadata;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

/// Probe a local media file into `VideoMetadata`.
pub async fn probe(
    runner: &CommandRunner,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<VideoMetadata> {
    let raw = run_probe_json(runner, path, cancel).await?;
    let parsed: FfprobeOutput = serde_json::from_str(&raw)
        .map_err(|e| AppError::InvalidMedia(format!("unparseable probe output: {e}")))?;

    let format = parsed
        .format
        .ok_or_else(|| AppError::InvalidMedia("probe output missing format".to_string()))?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| AppError::InvalidMedia("no video stream".to_string()))?;

    let audio_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoMetadata {
        duration_seconds: parse_numeric(&format.duration),
        size_bytes: parse_numeric(&format.size) as i64,
        bitrate: parse_numeric(&format.bit_rate) as i64,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        frame_rate: video_stream
            .avg_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        audio_channels: audio_stream.and_then(|s| s.channels),
        audio_sample_rate: audio_stream
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|v| v.parse().ok()),
    })
}

/// Enumerate streams of one codec type, keeping index/language/codec and
/// channel info.
pub(super) async fn probe_streams_of_type(
    runner: &CommandRunner,
    path: &Path,
    codec_type: &str,
    cancel: &CancellationToken,
) -> Result<Vec<(u32, String, String, u32, u32)>> {
    let raw = run_probe_json(runner, path, cancel).await?;
    let parsed: FfprobeOutput = serde_json::from_str(&raw)
        .map_err(|e| AppError::InvalidMedia(format!("unparseable probe output: {e}")))?;

    Ok(parsed
        .streams
        .into_iter()
        .filter(|s| s.codec_type.as_deref() == Some(codec_type))
        .map(|s| {
            (
                s.index,
                s.tags.language.unwrap_or_else(|| "und".to_string()),
                s.codec_name.unwrap_or_default(),
                s.channels.unwrap_or(0),
                s.sample_rate.and_then(|v| v.parse().ok()).unwrap_or(0),
            )
        })
        .collect())
}

async fn run_probe_json(
    runner: &CommandRunner,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<String> {
    let args = vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        path_arg(path),
    ];
    runner.run_ffprobe(&args, cancel).await
}

fn parse_numeric(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// "30000/1001" -> 29.97
fn parse_frame_rate(raw: &str) -> f64 {
    let mut parts = raw.splitn(2, '/');
    let num: f64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let den: f64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(1.0);
    if den == 0.0 {
        return 0.0;
    }
    num / den
}
