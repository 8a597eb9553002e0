//! Content complexity analysis

use crate::encoder::{ContentSignals, Encoder};
use crate::error::Result;
use crate::models::quality::{ComplexityBand, ContentCategory, ContentComplexity};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Weights of the composite complexity score.
const WEIGHT_SI: f64 = 0.25;
const WEIGHT_TI: f64 = 0.25;
const WEIGHT_MOTION: f64 = 0.25;
const WEIGHT_COLOR: f64 = 0.15;
const WEIGHT_EDGES: f64 = 0.10;

pub struct ComplexityAnalyzer {
    encoder: Arc<dyn Encoder>,
}

impl ComplexityAnalyzer {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self { encoder }
    }

    /// One sample per ten seconds of content, clamped to [5, 50].
    pub fn sample_points(duration: f64) -> u32 {
        ((duration / 10.0) as u32).clamp(5, 50)
    }

    pub async fn analyze(
        &self,
        input: &Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<ContentComplexity> {
        let sample_points = Self::sample_points(duration);
        let signals = self
            .encoder
            .analyze_content(input, duration, sample_points, cancel)
            .await?;

        let complexity = score(&signals, duration, sample_points);
        info!(
            score = complexity.complexity_score,
            band = ?complexity.band,
            category = complexity.category.as_str(),
            "content analysis complete"
        );
        Ok(complexity)
    }
}

/// Fold raw signals into the scored record. Pure so the scoring rules are
/// testable without an encoder.
pub fn score(signals: &ContentSignals, duration: f64, sample_points: u32) -> ContentComplexity {
    let complexity_score = (WEIGHT_SI * (signals.spatial_information / 100.0)
        + WEIGHT_TI * (signals.temporal_information / 50.0)
        + WEIGHT_MOTION * signals.motion_intensity
        + WEIGHT_COLOR * signals.color_variance
        + WEIGHT_EDGES * signals.edge_density)
        .clamp(0.0, 1.0);

    let scene_change_rate = if duration > 0.0 {
        signals.scene_change_count as f64 / duration
    } else {
        0.0
    };

    let category = categorize(signals, scene_change_rate);

    ContentComplexity {
        spatial_information: signals.spatial_information,
        temporal_information: signals.temporal_information,
        motion_intensity: signals.motion_intensity,
        motion_variance: signals.motion_variance,
        scene_change_count: signals.scene_change_count,
        scene_change_rate,
        color_variance: signals.color_variance,
        edge_density: signals.edge_density,
        contrast: signals.contrast,
        complexity_score,
        band: ComplexityBand::from_score(complexity_score),
        category,
        has_text_overlay: signals.edge_density > 0.7,
        has_fast_motion: signals.motion_intensity > 0.7,
        sample_points,
    }
}

fn categorize(signals: &ContentSignals, scene_change_rate: f64) -> ContentCategory {
    if signals.motion_intensity > 0.7 && scene_change_rate > 0.2 {
        ContentCategory::Sports
    } else if signals.spatial_information < 30.0 && signals.temporal_information < 15.0 {
        ContentCategory::Presentation
    } else if signals.motion_variance > 0.3 {
        ContentCategory::Gaming
    } else {
        ContentCategory::Movie
    }
}
