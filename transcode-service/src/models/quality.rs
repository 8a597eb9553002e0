//! Quality analysis and encoding-optimization value objects

use media_core::RenditionSpec;
use serde::{Deserialize, Serialize};

/// Coarse content classification used to bias the encoding ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Movie,
    Sports,
    Gaming,
    Presentation,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Movie => "movie",
            ContentCategory::Sports => "sports",
            ContentCategory::Gaming => "gaming",
            ContentCategory::Presentation => "presentation",
        }
    }
}

/// Complexity band derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ComplexityBand {
    /// Band thresholds: very_high ≥ 0.75 > high ≥ 0.6 > medium ≥ 0.4 > low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            ComplexityBand::VeryHigh
        } else if score >= 0.6 {
            ComplexityBand::High
        } else if score >= 0.4 {
            ComplexityBand::Medium
        } else {
            ComplexityBand::Low
        }
    }
}

/// Measured content complexity of a source video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentComplexity {
    pub spatial_information: f64,
    pub temporal_information: f64,
    pub motion_intensity: f64,
    pub motion_variance: f64,
    pub scene_change_count: u32,
    pub scene_change_rate: f64,
    pub color_variance: f64,
    pub edge_density: f64,
    pub contrast: f64,
    /// Weighted composite in [0, 1]
    pub complexity_score: f64,
    pub band: ComplexityBand,
    pub category: ContentCategory,
    pub has_text_overlay: bool,
    pub has_fast_motion: bool,
    pub sample_points: u32,
}

/// Recommended encoding parameters for a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub codec: String,
    pub preset: String,
    pub ladder: Vec<RenditionSpec>,
    pub two_pass: bool,
}

/// Quality metrics between a reference and a distorted encode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityAnalysis {
    pub vmaf: Option<f64>,
    pub ssim: Option<f64>,
    pub psnr: Option<f64>,
}

/// One probe of the VMAF-guided bitrate search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitrateExperiment {
    pub bitrate: u64,
    pub vmaf: f64,
}
