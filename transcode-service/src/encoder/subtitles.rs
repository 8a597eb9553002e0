//! Subtitle stream probing, extraction, and burn-in

use super::command::{path_arg, CommandRunner};
use super::{probe, SubtitleStream};
use crate::error::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn probe_streams(
    runner: &CommandRunner,
    input: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<SubtitleStream>> {
    let streams = probe::probe_streams_of_type(runner, input, "subtitle", cancel).await?;
    Ok(streams
        .into_iter()
        .map(|(index, language, codec, _, _)| SubtitleStream {
            index,
            language,
            codec,
        })
        .collect())
}

/// Extract one subtitle stream; the target format follows the output
/// extension (vtt, srt, ass).
pub async fn extract(
    runner: &CommandRunner,
    input: &Path,
    output: &Path,
    stream_index: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let args = vec![
        "-i".to_string(),
        path_arg(input),
        "-map".to_string(),
        format!("0:{stream_index}"),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}

/// Hardcode a subtitle file into the video track.
pub async fn burn(
    runner: &CommandRunner,
    input: &Path,
    subtitle: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    // The subtitles filter parses its argument, so quotes in the path are
    // escaped rather than shell-quoted.
    let subtitle_arg = path_arg(subtitle).replace('\'', "\\'").replace(':', "\\:");
    let args = vec![
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        format!("subtitles='{subtitle_arg}'"),
        "-c:a".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}
