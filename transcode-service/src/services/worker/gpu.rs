//! NVENC device selection and argument mapping

use crate::encoder::transcode::CPU_ONLY_CODECS;
use crate::models::TranscodeConfig;
use nvml_wrapper::Nvml;
use tracing::{debug, warn};

/// Minimum free device memory for an encode session.
pub const MIN_FREE_MEMORY_MB: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDevice {
    pub index: u32,
    pub free_memory_mb: u64,
    /// Utilization percentage 0..100
    pub utilization: u32,
}

impl GpuDevice {
    /// Selection score: plenty of memory on an idle device wins.
    fn score(&self) -> u64 {
        self.free_memory_mb * (100u64.saturating_sub(self.utilization as u64))
    }
}

/// Source of GPU inventory; swapped for a stub in tests.
pub trait GpuProvider: Send + Sync {
    fn devices(&self) -> Vec<GpuDevice>;
}

/// NVML-backed inventory. Initialization failure (no driver, no device)
/// degrades to an empty inventory rather than an error.
pub struct NvmlProvider {
    nvml: Option<Nvml>,
}

impl NvmlProvider {
    pub fn new() -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => Some(nvml),
            Err(e) => {
                debug!("NVML unavailable, GPU encoding disabled: {e}");
                None
            }
        };
        Self { nvml }
    }
}

impl Default for NvmlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProvider for NvmlProvider {
    fn devices(&self) -> Vec<GpuDevice> {
        let Some(nvml) = &self.nvml else {
            return Vec::new();
        };

        let count = match nvml.device_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("failed to enumerate GPUs: {e}");
                return Vec::new();
            }
        };

        (0..count)
            .filter_map(|index| {
                let device = nvml.device_by_index(index).ok()?;
                let memory = device.memory_info().ok()?;
                let utilization = device.utilization_rates().ok()?.gpu;
                Some(GpuDevice {
                    index,
                    free_memory_mb: memory.free / (1024 * 1024),
                    utilization,
                })
            })
            .collect()
    }
}

/// Provider with no devices; used when GPU encoding is configured off.
pub struct NoGpu;

impl GpuProvider for NoGpu {
    fn devices(&self) -> Vec<GpuDevice> {
        Vec::new()
    }
}

/// Whether this job may try the GPU path at all.
pub fn gpu_eligible(gpu_enabled: bool, config: &TranscodeConfig) -> bool {
    gpu_enabled
        && config.preset != "cpu"
        && !CPU_ONLY_CODECS.contains(&config.codec.as_str())
}

/// Pick the device with the best free-memory x idleness score, skipping
/// anything below the memory floor.
pub fn select_device(devices: &[GpuDevice]) -> Option<GpuDevice> {
    devices
        .iter()
        .filter(|d| d.free_memory_mb >= MIN_FREE_MEMORY_MB)
        .max_by_key(|d| d.score())
        .copied()
}

/// Map a software codec onto its NVENC counterpart.
pub fn nvenc_codec(codec: &str) -> Option<&'static str> {
    match codec {
        "libx264" | "h264" => Some("h264_nvenc"),
        "libx265" | "hevc" | "h265" => Some("hevc_nvenc"),
        _ => None,
    }
}

/// x264 preset names mapped onto the NVENC p1..p7 scale.
pub fn nvenc_preset(preset: &str) -> &'static str {
    match preset {
        "ultrafast" => "p1",
        "superfast" => "p2",
        "veryfast" => "p3",
        "faster" | "fast" => "p4",
        "medium" => "p5",
        "slow" | "slower" => "p6",
        "veryslow" => "p7",
        _ => "p5",
    }
}

/// Input-side acceleration args.
pub fn gpu_input_args(device_index: u32) -> Vec<String> {
    vec![
        "-hwaccel".to_string(),
        "cuda".to_string(),
        "-hwaccel_device".to_string(),
        device_index.to_string(),
    ]
}

/// Codec-side rate control args.
pub fn gpu_codec_args() -> Vec<String> {
    vec![
        "-rc".to_string(),
        "vbr".to_string(),
        "-cq".to_string(),
        "23".to_string(),
    ]
}
