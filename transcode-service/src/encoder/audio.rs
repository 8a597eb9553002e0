//! Audio track probing and loudness normalization

use super::command::{path_arg, CommandRunner};
use super::{probe, AudioStream, LoudnormOptions};
use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn probe_streams(
    runner: &CommandRunner,
    input: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<AudioStream>> {
    let streams = probe::probe_streams_of_type(runner, input, "audio", cancel).await?;
    Ok(streams
        .into_iter()
        .map(|(index, language, codec, channels, sample_rate)| AudioStream {
            index,
            language,
            codec,
            channels,
            sample_rate,
        })
        .collect())
}

/// First-pass loudnorm measurements, printed as JSON on stderr.
#[derive(Debug, Deserialize)]
struct LoudnormMeasurement {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

fn loudnorm_filter(opts: &LoudnormOptions, measured: Option<&LoudnormMeasurement>) -> String {
    let base = format!(
        "loudnorm=I={}:TP={}:LRA={}",
        opts.target_lufs, opts.true_peak, opts.lra
    );
    match measured {
        None => format!("{base}:print_format=json"),
        Some(m) => format!(
            "{base}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true",
            m.input_i, m.input_tp, m.input_lra, m.input_thresh, m.target_offset
        ),
    }
}

/// Extract the trailing JSON object that loudnorm prints on stderr.
fn parse_measurement(stderr: &str) -> Result<LoudnormMeasurement> {
    let start = stderr
        .rfind('{')
        .ok_or_else(|| AppError::InvalidMedia("no loudnorm JSON in encoder output".to_string()))?;
    let end = stderr[start..]
        .find('}')
        .map(|i| start + i + 1)
        .ok_or_else(|| AppError::InvalidMedia("truncated loudnorm JSON".to_string()))?;

    serde_json::from_str(&stderr[start..end])
        .map_err(|e| AppError::InvalidMedia(format!("unparseable loudnorm JSON: {e}")))
}

/// Loudness-normalize the audio track. Two-pass mode measures first and
/// applies a linear correction; single pass applies dynamic normalization.
pub async fn normalize(
    runner: &CommandRunner,
    input: &Path,
    output: &Path,
    opts: &LoudnormOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let measured = if opts.two_pass {
        let args = vec![
            "-i".to_string(),
            path_arg(input),
            "-af".to_string(),
            loudnorm_filter(opts, None),
            "-f".to_string(),
            "null".to_string(),
            null_sink(),
        ];
        let stderr = runner.run_ffmpeg_capture_stderr(&args, cancel).await?;
        let measurement = parse_measurement(&stderr)?;
        debug!(?measurement, "loudnorm first pass measured");
        Some(measurement)
    } else {
        None
    };

    let args = vec![
        "-i".to_string(),
        path_arg(input),
        "-af".to_string(),
        loudnorm_filter(opts, measured.as_ref()),
        "-c:v".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}

fn null_sink() -> String {
    if cfg!(windows) { "NUL" } else { "/dev/null" }.to_string()
}
