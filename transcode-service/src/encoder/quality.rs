//! Objective quality metrics: VMAF, SSIM, PSNR

use super::command::{path_arg, CommandRunner};
use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Filter graph preamble shared by all comparisons: align timelines, match
/// the distorted stream to the reference size and normalize pixel format.
fn comparison_graph(tail: &str) -> String {
    [
        "[0:v]setpts=PTS-STARTPTS[ref0]",
        "[1:v]setpts=PTS-STARTPTS[dist0]",
        "[dist0][ref0]scale2ref[dist1][ref1]",
        "[dist1]format=yuv420p[dist]",
        "[ref1]format=yuv420p[ref]",
        tail,
    ]
    .join(";")
}

fn comparison_args(reference: &Path, distorted: &Path, graph: String) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(reference),
        "-i".to_string(),
        path_arg(distorted),
        "-an".to_string(),
        "-sn".to_string(),
        "-lavfi".to_string(),
        graph,
        "-f".to_string(),
        "null".to_string(),
        null_sink(),
    ]
}

fn null_sink() -> String {
    if cfg!(windows) { "NUL" } else { "/dev/null" }.to_string()
}

static VMAF_SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"VMAF score:\s*([0-9.]+)").expect("valid vmaf regex"));

static SSIM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SSIM.*All:\s*([0-9.]+)").expect("valid ssim regex"));

static PSNR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PSNR.*average:\s*([0-9.]+|inf)").expect("valid psnr regex"));

/// VMAF in [0, 100], higher is better. libvmaf expects [dist][ref] order.
pub async fn measure_vmaf(
    runner: &CommandRunner,
    reference: &Path,
    distorted: &Path,
    cancel: &CancellationToken,
) -> Result<f64> {
    let graph = comparison_graph("[dist][ref]libvmaf=log_fmt=json");
    let stderr = runner
        .run_ffmpeg_capture_stderr(&comparison_args(reference, distorted, graph), cancel)
        .await?;

    // The pooled mean is echoed on the last matching stderr line.
    for line in stderr.lines().rev() {
        if let Some(caps) = VMAF_SCORE_RE.captures(line) {
            if let Ok(score) = caps[1].parse::<f64>() {
                if score.is_finite() {
                    return Ok(score);
                }
            }
        }
    }

    Err(AppError::InvalidMedia(
        "no VMAF score in encoder output".to_string(),
    ))
}

pub async fn measure_ssim(
    runner: &CommandRunner,
    reference: &Path,
    distorted: &Path,
    cancel: &CancellationToken,
) -> Result<f64> {
    let graph = comparison_graph("[dist][ref]ssim");
    let stderr = runner
        .run_ffmpeg_capture_stderr(&comparison_args(reference, distorted, graph), cancel)
        .await?;

    scrape_last(&stderr, &SSIM_RE)
        .ok_or_else(|| AppError::InvalidMedia("no SSIM score in encoder output".to_string()))
}

pub async fn measure_psnr(
    runner: &CommandRunner,
    reference: &Path,
    distorted: &Path,
    cancel: &CancellationToken,
) -> Result<f64> {
    let graph = comparison_graph("[dist][ref]psnr");
    let stderr = runner
        .run_ffmpeg_capture_stderr(&comparison_args(reference, distorted, graph), cancel)
        .await?;

    scrape_last(&stderr, &PSNR_RE)
        .ok_or_else(|| AppError::InvalidMedia("no PSNR score in encoder output".to_string()))
}

fn scrape_last(stderr: &str, re: &Regex) -> Option<f64> {
    for line in stderr.lines().rev() {
        if let Some(caps) = re.captures(line) {
            let raw = &caps[1];
            if raw == "inf" {
                // Identical streams; report the conventional ceiling.
                return Some(100.0);
            }
            if let Ok(value) = raw.parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}
