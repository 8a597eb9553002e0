//! Shared value types for the transcode platform

use serde::{Deserialize, Serialize};

/// One rung of an adaptive bitrate ladder.
///
/// Bitrates are in kbps. `max_bitrate`/`min_bitrate` bound the encoder's
/// rate control window around `video_bitrate`. Serde-facing ladder entries
/// use [`RenditionSpec`]; this table type stays borrowed and const.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolutionProfile {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub max_bitrate: u32,
    pub min_bitrate: u32,
}

impl ResolutionProfile {
    pub const fn new(
        name: &'static str,
        width: u32,
        height: u32,
        video_bitrate: u32,
        audio_bitrate: u32,
    ) -> Self {
        Self {
            name,
            width,
            height,
            video_bitrate,
            audio_bitrate,
            max_bitrate: video_bitrate + video_bitrate / 14,
            min_bitrate: video_bitrate / 2,
        }
    }

    /// Look up a ladder rung by its display name ("720p", "1080p", ...).
    pub fn by_name(name: &str) -> Option<Self> {
        crate::constants::STANDARD_LADDER
            .iter()
            .find(|p| p.name == name)
            .copied()
    }

    /// Map a resolution label to pixel dimensions.
    ///
    /// Unknown labels fall back to 720p, the platform default rendition.
    pub fn dimensions(name: &str) -> (u32, u32) {
        Self::by_name(name)
            .map(|p| (p.width, p.height))
            .unwrap_or((1280, 720))
    }
}

/// An owned ladder rung, used when profiles come from job configuration
/// rather than the fixed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    #[serde(default)]
    pub max_bitrate: u32,
    #[serde(default)]
    pub min_bitrate: u32,
}

impl From<ResolutionProfile> for RenditionSpec {
    fn from(p: ResolutionProfile) -> Self {
        Self {
            name: p.name.to_string(),
            width: p.width,
            height: p.height,
            video_bitrate: p.video_bitrate,
            audio_bitrate: p.audio_bitrate,
            max_bitrate: p.max_bitrate,
            min_bitrate: p.min_bitrate,
        }
    }
}

/// Media metadata returned by probing a source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub size_bytes: i64,
    pub bitrate: i64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub frame_rate: f64,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<u32>,
    pub audio_sample_rate: Option<u32>,
}
