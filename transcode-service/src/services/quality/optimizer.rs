//! Per-title encoding ladder generation and VMAF-guided bitrate search

use crate::error::Result;
use crate::models::quality::{
    BitrateExperiment, ComplexityBand, ContentCategory, ContentComplexity, EncodingProfile,
};
use media_core::constants::STANDARD_LADDER;
use media_core::{RenditionSpec, ResolutionProfile};
use std::future::Future;
use tracing::debug;

/// Search stops when the measured VMAF lands inside target ± this.
const VMAF_TOLERANCE: f64 = 2.0;

/// Search stops when the bitrate interval shrinks below 100 kbps.
const MIN_BITRATE_INTERVAL: u64 = 100_000;

const MAX_SEARCH_ITERATIONS: u32 = 5;

/// Per-rung multiplier window around the standard ladder bitrate.
const MULTIPLIER_FLOOR: f64 = 0.5;
const MULTIPLIER_CEIL: f64 = 1.8;

#[derive(Debug, Clone, Default)]
pub struct OptimizerOptions {
    pub prefer_quality: bool,
    /// Cap the ladder at this rung height, when set
    pub max_resolution: Option<u32>,
}

pub struct EncodingOptimizer;

impl EncodingOptimizer {
    /// The fixed ladder filtered to rungs the source can fill. Upscaling is
    /// never offered; the smallest rung survives even tiny sources.
    pub fn standard_ladder(source_height: u32, max_resolution: Option<u32>) -> Vec<ResolutionProfile> {
        let cap = max_resolution
            .map(|max| max.min(source_height))
            .unwrap_or(source_height);

        let rungs: Vec<ResolutionProfile> = STANDARD_LADDER
            .iter()
            .filter(|p| p.height <= cap)
            .copied()
            .collect();

        if rungs.is_empty() {
            vec![STANDARD_LADDER[0]]
        } else {
            rungs
        }
    }

    /// Complexity-driven bitrate multiplier, clamped to the per-rung window.
    pub fn bitrate_multiplier(complexity: &ContentComplexity, prefer_quality: bool) -> f64 {
        let base = match complexity.band {
            ComplexityBand::VeryHigh => 1.4,
            ComplexityBand::High => 1.2,
            ComplexityBand::Medium => 1.0,
            ComplexityBand::Low => 0.7,
        };

        let motion_adj = (1.0 + 0.3 * (complexity.motion_intensity - 0.5)).clamp(0.85, 1.15);
        let spatial_adj =
            (1.0 + 0.2 * (complexity.spatial_information / 100.0 - 0.5)).clamp(0.9, 1.1);
        let quality_adj = if prefer_quality { 1.1 } else { 1.0 };
        let category_adj = match complexity.category {
            ContentCategory::Sports => 1.15,
            ContentCategory::Gaming => 1.1,
            ContentCategory::Presentation => 0.8,
            ContentCategory::Movie => 1.0,
        };

        (base * motion_adj * spatial_adj * quality_adj * category_adj)
            .clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEIL)
    }

    /// Build the per-title rendition ladder for a source.
    pub fn build_ladder(
        complexity: &ContentComplexity,
        source_height: u32,
        opts: &OptimizerOptions,
    ) -> Vec<RenditionSpec> {
        let multiplier = Self::bitrate_multiplier(complexity, opts.prefer_quality);

        Self::standard_ladder(source_height, opts.max_resolution)
            .into_iter()
            .map(|rung| {
                let bitrate = (rung.video_bitrate as f64 * multiplier) as u32;
                let mut spec = RenditionSpec::from(rung);
                spec.video_bitrate = bitrate;
                spec.max_bitrate = (bitrate as f64 * 1.07) as u32;
                spec.min_bitrate = bitrate / 2;
                spec
            })
            .collect()
    }

    /// h265 pays off on busy content; simple content stays on h264 where
    /// decoder support is universal.
    pub fn recommend_codec(complexity: &ContentComplexity, prefer_quality: bool) -> &'static str {
        if complexity.band == ComplexityBand::Low {
            return "libx264";
        }
        if complexity.complexity_score > 0.7 || prefer_quality {
            return "libx265";
        }
        "libx264"
    }

    pub fn recommend_preset(complexity: &ContentComplexity, prefer_quality: bool) -> &'static str {
        if prefer_quality {
            return "slow";
        }
        match complexity.band {
            ComplexityBand::High | ComplexityBand::VeryHigh => "medium",
            ComplexityBand::Low => "slow",
            ComplexityBand::Medium => "medium",
        }
    }

    /// The full recommendation for one source.
    pub fn profile(
        complexity: &ContentComplexity,
        source_height: u32,
        opts: &OptimizerOptions,
    ) -> EncodingProfile {
        EncodingProfile {
            codec: Self::recommend_codec(complexity, opts.prefer_quality).to_string(),
            preset: Self::recommend_preset(complexity, opts.prefer_quality).to_string(),
            ladder: Self::build_ladder(complexity, source_height, opts),
            two_pass: opts.prefer_quality,
        }
    }

    /// Binary-search the bitrate (bps) whose measured VMAF lands on
    /// `target_vmaf`. `measure` encodes a probe at the given bitrate and
    /// scores it; at most five probes run. When the search stops the upper
    /// bound is returned, favoring quality over savings.
    pub async fn find_optimal_bitrate<F, Fut>(
        target_vmaf: f64,
        bounds: (u64, u64),
        measure: F,
    ) -> Result<(u64, Vec<BitrateExperiment>)>
    where
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<f64>>,
    {
        let (mut low, mut high) = bounds;
        let mut experiments = Vec::new();

        for iteration in 0..MAX_SEARCH_ITERATIONS {
            if high.saturating_sub(low) < MIN_BITRATE_INTERVAL {
                break;
            }

            let mid = low + (high - low) / 2;
            let vmaf = measure(mid).await?;
            debug!(iteration, bitrate = mid, vmaf, "bitrate probe");
            experiments.push(BitrateExperiment { bitrate: mid, vmaf });

            if (vmaf - target_vmaf).abs() <= VMAF_TOLERANCE {
                high = mid;
                break;
            }

            if vmaf < target_vmaf {
                low = mid;
            } else {
                high = mid;
            }
        }

        Ok((high, experiments))
    }
}
