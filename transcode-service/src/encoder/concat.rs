//! Clip concatenation

use super::command::{path_arg, CommandRunner};
use super::probe;
use super::ConcatMode;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub async fn concat(
    runner: &CommandRunner,
    inputs: &[PathBuf],
    output: &Path,
    mode: &ConcatMode,
    cancel: &CancellationToken,
) -> Result<()> {
    if inputs.len() < 2 {
        return Err(AppError::Internal(
            "concat requires at least two inputs".to_string(),
        ));
    }

    match mode {
        ConcatMode::Demuxer => concat_demuxer(runner, inputs, output, cancel).await,
        ConcatMode::Filter { transition } => {
            concat_filter(runner, inputs, output, transition.as_ref(), cancel).await
        }
    }
}

/// Fast path: stream copy through the concat demuxer. Inputs must share
/// codec and container parameters.
async fn concat_demuxer(
    runner: &CommandRunner,
    inputs: &[PathBuf],
    output: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let list_path = output.with_extension("concat.txt");
    let mut list = String::new();
    for input in inputs {
        // Single quotes inside paths follow the concat demuxer's quoting rule.
        let escaped = path_arg(input).replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    tokio::fs::write(&list_path, list).await?;

    let args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_arg(&list_path),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(output),
    ];

    let result = runner.run_ffmpeg(&args, cancel).await;
    let _ = tokio::fs::remove_file(&list_path).await;
    result
}

/// Re-encoding path through the concat (or xfade) filter graph; tolerates
/// mismatched formats and supports crossfade transitions.
async fn concat_filter(
    runner: &CommandRunner,
    inputs: &[PathBuf],
    output: &Path,
    transition: Option<&super::XfadeTransition>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut args = Vec::new();
    for input in inputs {
        args.push("-i".to_string());
        args.push(path_arg(input));
    }

    let filter = match transition {
        None => {
            let mut graph = String::new();
            for i in 0..inputs.len() {
                graph.push_str(&format!("[{i}:v][{i}:a]"));
            }
            graph.push_str(&format!(
                "concat=n={}:v=1:a=1[outv][outa]",
                inputs.len()
            ));
            graph
        }
        Some(transition) => {
            // xfade needs each clip's duration to place the crossfade offset.
            let mut durations = Vec::with_capacity(inputs.len());
            for input in inputs {
                let meta = probe::probe(runner, input, cancel).await?;
                durations.push(meta.duration_seconds);
            }
            build_xfade_graph(inputs.len(), &durations, &transition.kind, transition.duration)
        }
    };

    args.push("-filter_complex".to_string());
    args.push(filter);
    args.push("-map".to_string());
    args.push("[outv]".to_string());
    args.push("-map".to_string());
    args.push("[outa]".to_string());
    args.push(path_arg(output));

    runner.run_ffmpeg(&args, cancel).await
}

/// Chain `xfade`/`acrossfade` pairs over consecutive clips. Each transition
/// eats `fade` seconds off the running offset.
fn build_xfade_graph(count: usize, durations: &[f64], kind: &str, fade: f64) -> String {
    let mut graph = String::new();
    let mut offset = durations[0] - fade;
    let mut prev_v = "0:v".to_string();
    let mut prev_a = "0:a".to_string();

    for i in 1..count {
        let out_v = if i == count - 1 {
            "outv".to_string()
        } else {
            format!("v{i}")
        };
        let out_a = if i == count - 1 {
            "outa".to_string()
        } else {
            format!("a{i}")
        };

        graph.push_str(&format!(
            "[{prev_v}][{i}:v]xfade=transition={kind}:duration={fade}:offset={offset:.3}[{out_v}];"
        ));
        graph.push_str(&format!(
            "[{prev_a}][{i}:a]acrossfade=d={fade}[{out_a}];"
        ));

        offset += durations[i] - fade;
        prev_v = out_v;
        prev_a = out_a;
    }

    graph.trim_end_matches(';').to_string()
}
