//! Watermark overlays (image and text)

use super::command::{path_arg, CommandRunner};
use super::progress::ProgressSink;
use super::{WatermarkKind, WatermarkOptions, WatermarkPosition};
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Overlay x/y expressions per corner; `main_w`/`w` are the video and
/// overlay widths inside the overlay filter.
fn overlay_position(position: WatermarkPosition, padding: u32) -> String {
    match position {
        WatermarkPosition::TopLeft => format!("{padding}:{padding}"),
        WatermarkPosition::TopRight => format!("main_w-overlay_w-{padding}:{padding}"),
        WatermarkPosition::BottomLeft => format!("{padding}:main_h-overlay_h-{padding}"),
        WatermarkPosition::BottomRight => {
            format!("main_w-overlay_w-{padding}:main_h-overlay_h-{padding}")
        }
        WatermarkPosition::Center => {
            "(main_w-overlay_w)/2:(main_h-overlay_h)/2".to_string()
        }
    }
}

fn drawtext_position(position: WatermarkPosition, padding: u32) -> String {
    match position {
        WatermarkPosition::TopLeft => format!("x={padding}:y={padding}"),
        WatermarkPosition::TopRight => format!("x=w-text_w-{padding}:y={padding}"),
        WatermarkPosition::BottomLeft => format!("x={padding}:y=h-text_h-{padding}"),
        WatermarkPosition::BottomRight => {
            format!("x=w-text_w-{padding}:y=h-text_h-{padding}")
        }
        WatermarkPosition::Center => "x=(w-text_w)/2:y=(h-text_h)/2".to_string(),
    }
}

/// Escape the characters that break out of a drawtext value.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

pub async fn apply(
    runner: &CommandRunner,
    opts: &WatermarkOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<()> {
    if !(0.0..=1.0).contains(&opts.opacity) {
        return Err(AppError::Internal(format!(
            "watermark opacity {} outside [0,1]",
            opts.opacity
        )));
    }

    let mut args = vec!["-i".to_string(), path_arg(&opts.input)];

    match &opts.kind {
        WatermarkKind::Image { path } => {
            args.push("-i".to_string());
            args.push(path_arg(path));
            args.push("-filter_complex".to_string());
            args.push(format!(
                "[1:v]scale=iw*{scale}:-1,format=rgba,colorchannelmixer=aa={opacity}[wm];\
                 [0:v][wm]overlay={pos}",
                scale = opts.scale,
                opacity = opts.opacity,
                pos = overlay_position(opts.position, opts.padding),
            ));
        }
        WatermarkKind::Text {
            text,
            font_size,
            color,
        } => {
            args.push("-vf".to_string());
            args.push(format!(
                "drawtext=text='{text}':fontsize={font_size}:fontcolor={color}@{opacity}:{pos}",
                text = escape_drawtext(text),
                opacity = opts.opacity,
                pos = drawtext_position(opts.position, opts.padding),
            ));
        }
    }

    args.push("-c:a".to_string());
    args.push("copy".to_string());
    args.push(path_arg(&opts.output));

    runner
        .run_ffmpeg_with_progress(&args, None, sink, |p| p, cancel)
        .await
}
