//! HLS and DASH packaging

use super::command::{path_arg, CommandRunner};
use super::progress::ProgressSink;
use super::{DashOptions, DashResult, HlsOptions, HlsPlaylistType, HlsResult, HlsVariant};
use crate::error::{AppError, Result};
use media_core::RenditionSpec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared head of a multi-rendition packaging command: one `-map` pair per
/// rendition plus its scale filter and rate window.
fn variant_args(renditions: &[RenditionSpec], video_codec: &str, audio_codec: &str) -> Vec<String> {
    let mut args = Vec::new();

    for _ in renditions {
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("0:a:0".to_string());
    }

    args.push("-c:v".to_string());
    args.push(video_codec.to_string());
    args.push("-c:a".to_string());
    args.push(audio_codec.to_string());

    for (i, rendition) in renditions.iter().enumerate() {
        args.push(format!("-filter:v:{i}"));
        args.push(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            rendition.width, rendition.height
        ));
        args.push(format!("-b:v:{i}"));
        args.push(format!("{}k", rendition.video_bitrate));
        args.push(format!("-maxrate:v:{i}"));
        args.push(format!("{}k", rendition.max_bitrate.max(rendition.video_bitrate)));
        args.push(format!("-bufsize:v:{i}"));
        args.push(format!("{}k", rendition.max_bitrate.max(rendition.video_bitrate) * 3 / 2));
        args.push(format!("-b:a:{i}"));
        args.push(format!("{}k", rendition.audio_bitrate));
    }

    args
}

fn var_stream_map(renditions: &[RenditionSpec]) -> String {
    renditions
        .iter()
        .enumerate()
        .map(|(i, r)| format!("v:{i},a:{i},name:{}", r.name))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Produce a master playlist plus per-variant media playlists and segments
/// under `output_dir`.
pub async fn generate_hls(
    runner: &CommandRunner,
    opts: &HlsOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<HlsResult> {
    if opts.renditions.is_empty() {
        return Err(AppError::Internal("hls requires at least one rendition".to_string()));
    }
    tokio::fs::create_dir_all(&opts.output_dir).await?;

    let mut args = vec!["-i".to_string(), path_arg(&opts.input)];
    args.extend(variant_args(&opts.renditions, &opts.video_codec, &opts.audio_codec));
    if !opts.preset.is_empty() {
        args.push("-preset".to_string());
        args.push(opts.preset.clone());
    }

    args.push("-f".to_string());
    args.push("hls".to_string());
    args.push("-hls_time".to_string());
    args.push(opts.segment_secs.to_string());
    args.push("-hls_playlist_type".to_string());
    args.push(
        match opts.playlist_type {
            HlsPlaylistType::Vod => "vod",
            HlsPlaylistType::Event => "event",
        }
        .to_string(),
    );
    args.push("-hls_list_size".to_string());
    args.push("0".to_string());
    args.push("-master_pl_name".to_string());
    args.push("master.m3u8".to_string());
    args.push("-var_stream_map".to_string());
    args.push(var_stream_map(&opts.renditions));
    args.push("-hls_segment_filename".to_string());
    args.push(path_arg(&opts.output_dir.join("stream_%v_%03d.ts")));
    args.push(path_arg(&opts.output_dir.join("stream_%v.m3u8")));

    runner
        .run_ffmpeg_with_progress(&args, opts.duration_hint, sink, |p| p, cancel)
        .await?;

    Ok(HlsResult {
        master_path: opts.output_dir.join("master.m3u8"),
        variants: opts
            .renditions
            .iter()
            .map(|r| HlsVariant {
                name: r.name.clone(),
                playlist_path: opts.output_dir.join(format!("stream_{}.m3u8", r.name)),
            })
            .collect(),
    })
}

/// Produce an MPD manifest with split video/audio adaptation sets, init
/// segments and chunk templates under `output_dir`.
pub async fn generate_dash(
    runner: &CommandRunner,
    opts: &DashOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<DashResult> {
    if opts.renditions.is_empty() {
        return Err(AppError::Internal("dash requires at least one rendition".to_string()));
    }
    tokio::fs::create_dir_all(&opts.output_dir).await?;

    let mut args = vec!["-i".to_string(), path_arg(&opts.input)];
    args.extend(variant_args(&opts.renditions, &opts.video_codec, &opts.audio_codec));
    if !opts.preset.is_empty() {
        args.push("-preset".to_string());
        args.push(opts.preset.clone());
    }

    args.push("-f".to_string());
    args.push("dash".to_string());
    args.push("-seg_duration".to_string());
    args.push(opts.segment_secs.to_string());
    args.push("-use_template".to_string());
    args.push("1".to_string());
    args.push("-use_timeline".to_string());
    args.push("1".to_string());
    args.push("-init_seg_name".to_string());
    args.push("init-stream$RepresentationID$.m4s".to_string());
    args.push("-media_seg_name".to_string());
    args.push("chunk-stream$RepresentationID$-$Number%05d$.m4s".to_string());
    args.push("-adaptation_sets".to_string());
    args.push("id=0,streams=v id=1,streams=a".to_string());
    args.push(path_arg(&opts.output_dir.join("manifest.mpd")));

    runner
        .run_ffmpeg_with_progress(&args, opts.duration_hint, sink, |p| p, cancel)
        .await?;

    Ok(DashResult {
        manifest_path: opts.output_dir.join("manifest.mpd"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_core::ResolutionProfile;

    fn renditions() -> Vec<RenditionSpec> {
        vec![
            ResolutionProfile::by_name("720p").unwrap().into(),
            ResolutionProfile::by_name("360p").unwrap().into(),
        ]
    }

    #[test]
    fn test_var_stream_map_names_variants() {
        let map = var_stream_map(&renditions());
        assert_eq!(map, "v:0,a:0,name:720p v:1,a:1,name:360p");
    }

    #[test]
    fn test_variant_args_scale_per_stream() {
        let args = variant_args(&renditions(), "libx264", "aac").join(" ");
        assert!(args.contains("-filter:v:0 scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(args.contains("-filter:v:1 scale=640:360:force_original_aspect_ratio=decrease"));
        assert!(args.contains("-b:v:0 2800k"));
        assert!(args.contains("-b:v:1 800k"));
    }
}
