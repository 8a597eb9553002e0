//! Raw content-signal measurement for the encoding optimizer
//!
//! Runs the analysis filters over a sampled subset of frames and scrapes
//! their metadata prints off stderr. The scoring model on top of these
//! numbers lives in the quality service.

use super::command::{path_arg, CommandRunner};
use super::ContentSignals;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static SITI_SI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Spatial Information:[\s\S]*?Average:\s*([0-9.]+)").expect("valid SI regex")
});

static SITI_TI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Temporal Information:[\s\S]*?Average:\s*([0-9.]+)").expect("valid TI regex")
});

static YDIF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.YDIF=([0-9.]+)").expect("valid YDIF regex"));

static SATAVG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.SATAVG=([0-9.]+)").expect("valid SATAVG regex"));

static YLOW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.YLOW=([0-9.]+)").expect("valid YLOW regex"));

static YHIGH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.YHIGH=([0-9.]+)").expect("valid YHIGH regex"));

static YAVG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.YAVG=([0-9.]+)").expect("valid YAVG regex"));

static SCENE_SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.scene_score=([0-9.]+)").expect("valid scene regex"));

static BLACKFRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"blackframe.*pblack:(\d+)").expect("valid blackframe regex"));

fn null_sink() -> String {
    if cfg!(windows) { "NUL" } else { "/dev/null" }.to_string()
}

fn analysis_args(input: &Path, filter: String) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(input),
        "-an".to_string(),
        "-sn".to_string(),
        "-vf".to_string(),
        filter,
        "-f".to_string(),
        "null".to_string(),
        null_sink(),
    ]
}

fn collect_values(stderr: &str, re: &Regex) -> Vec<f64> {
    re.captures_iter(stderr)
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Measure SI/TI, motion, scene changes, color and edge statistics over
/// `sample_points` samples spread across the source.
pub async fn analyze_content(
    runner: &CommandRunner,
    input: &Path,
    duration: f64,
    sample_points: u32,
    cancel: &CancellationToken,
) -> Result<ContentSignals> {
    let sample_points = sample_points.max(1);
    let interval = (duration / sample_points as f64).max(0.1);
    let sample_filter = format!("fps=1/{interval:.3}");

    // SI/TI over the sampled frames; blackframe edge statistics stand in
    // when the siti filter is unavailable in the local build.
    let (si, ti) = match run_siti(runner, input, &sample_filter, cancel).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!("siti filter unavailable, falling back to blackframe: {e}");
            run_blackframe_fallback(runner, input, &sample_filter, cancel).await?
        }
    };

    // Per-frame luma statistics: YDIF drives the motion estimate, saturation
    // and luma spread give color variance and contrast.
    let stats_stderr = runner
        .run_ffmpeg_capture_stderr(
            &analysis_args(
                input,
                format!("{sample_filter},signalstats,metadata=print:file=-"),
            ),
            cancel,
        )
        .await?;

    let ydif = collect_values(&stats_stderr, &YDIF_RE);
    let satavg = collect_values(&stats_stderr, &SATAVG_RE);
    let ylow = collect_values(&stats_stderr, &YLOW_RE);
    let yhigh = collect_values(&stats_stderr, &YHIGH_RE);

    // YDIF is luma change per frame pair, roughly 0..32 for natural content.
    let motion_intensity = (mean(&ydif) / 16.0).clamp(0.0, 1.0);
    let motion_variance = (variance(&ydif) / 64.0).clamp(0.0, 1.0);
    let color_variance = (mean(&satavg) / 128.0).clamp(0.0, 1.0);
    let contrast = ((mean(&yhigh) - mean(&ylow)) / 255.0).clamp(0.0, 1.0);

    // Scene cut count across the full source.
    let scene_stderr = runner
        .run_ffmpeg_capture_stderr(
            &analysis_args(
                input,
                "select='gt(scene,0.3)',metadata=print:file=-".to_string(),
            ),
            cancel,
        )
        .await?;
    let scene_change_count = SCENE_SCORE_RE.captures_iter(&scene_stderr).count() as u32;

    // Edge density: average luma of the edge-detected frames.
    let edge_stderr = runner
        .run_ffmpeg_capture_stderr(
            &analysis_args(
                input,
                format!("{sample_filter},edgedetect=low=0.1:high=0.4,signalstats,metadata=print:file=-"),
            ),
            cancel,
        )
        .await?;
    let edge_density = (mean(&collect_values(&edge_stderr, &YAVG_RE)) / 255.0 * 4.0).clamp(0.0, 1.0);

    Ok(ContentSignals {
        spatial_information: si,
        temporal_information: ti,
        motion_intensity,
        motion_variance,
        scene_change_count,
        color_variance,
        edge_density,
        contrast,
    })
}

async fn run_siti(
    runner: &CommandRunner,
    input: &Path,
    sample_filter: &str,
    cancel: &CancellationToken,
) -> Result<(f64, f64)> {
    let stderr = runner
        .run_ffmpeg_capture_stderr(
            &analysis_args(input, format!("{sample_filter},siti=print_summary=1")),
            cancel,
        )
        .await?;

    let si = SITI_SI_RE
        .captures(&stderr)
        .and_then(|caps| caps[1].parse::<f64>().ok());
    let ti = SITI_TI_RE
        .captures(&stderr)
        .and_then(|caps| caps[1].parse::<f64>().ok());

    match (si, ti) {
        (Some(si), Some(ti)) => Ok((si, ti)),
        _ => Err(crate::error::AppError::InvalidMedia(
            "siti summary missing from encoder output".to_string(),
        )),
    }
}

/// Rough SI/TI stand-in: the share of near-black frames after edge
/// detection approximates how little spatial detail the content carries.
async fn run_blackframe_fallback(
    runner: &CommandRunner,
    input: &Path,
    sample_filter: &str,
    cancel: &CancellationToken,
) -> Result<(f64, f64)> {
    let stderr = runner
        .run_ffmpeg_capture_stderr(
            &analysis_args(
                input,
                format!("{sample_filter},edgedetect,blackframe=amount=90"),
            ),
            cancel,
        )
        .await?;

    let blackness = collect_values(&stderr, &BLACKFRAME_RE);
    let black_share = mean(&blackness) / 100.0;
    let si = ((1.0 - black_share) * 100.0).clamp(0.0, 100.0);
    // No temporal signal in this path; assume moderate motion.
    Ok((si, 25.0))
}
