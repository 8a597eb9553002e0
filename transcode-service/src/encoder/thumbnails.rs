//! Thumbnail, sprite sheet, and animated preview extraction

use super::command::{path_arg, CommandRunner};
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Grab one frame at `at_seconds`.
pub async fn extract_single(
    runner: &CommandRunner,
    input: &Path,
    output: &Path,
    at_seconds: f64,
    cancel: &CancellationToken,
) -> Result<()> {
    let args = vec![
        "-ss".to_string(),
        format!("{at_seconds:.3}"),
        "-i".to_string(),
        path_arg(input),
        "-vframes".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}

/// `count` equally spaced frames named `thumb_0001.jpg` onward.
pub async fn generate_interval(
    runner: &CommandRunner,
    input: &Path,
    output_dir: &Path,
    count: u32,
    duration: f64,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let count = count.max(1);
    let interval = duration / (count as f64 + 1.0);
    let mut produced = Vec::with_capacity(count as usize);

    for i in 0..count {
        let at = interval * (i as f64 + 1.0);
        let output = output_dir.join(format!("thumb_{:04}.jpg", i + 1));
        extract_single(runner, input, &output, at, cancel).await?;
        produced.push(output);
    }

    Ok(produced)
}

/// Tile frames sampled every `interval_secs` into a `columns` x `rows`
/// sprite sheet for scrubber previews.
pub async fn generate_sprite(
    runner: &CommandRunner,
    input: &Path,
    output: &Path,
    columns: u32,
    rows: u32,
    interval_secs: f64,
    cancel: &CancellationToken,
) -> Result<()> {
    let args = vec![
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        format!(
            "fps=1/{interval_secs},scale=160:90,tile={columns}x{rows}"
        ),
        "-vframes".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}

/// Short animated preview clip (gif/webp by output extension).
#[allow(clippy::too_many_arguments)]
pub async fn generate_animated(
    runner: &CommandRunner,
    input: &Path,
    output: &Path,
    start_secs: f64,
    duration_secs: f64,
    fps: u32,
    width: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let args = vec![
        "-ss".to_string(),
        format!("{start_secs:.3}"),
        "-t".to_string(),
        format!("{duration_secs:.3}"),
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        format!("fps={fps},scale={width}:-1:flags=lanczos"),
        "-loop".to_string(),
        "0".to_string(),
        path_arg(output),
    ];
    runner.run_ffmpeg(&args, cancel).await
}
