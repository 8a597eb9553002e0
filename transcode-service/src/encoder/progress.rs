//! Progress reporting from encoder output
//!
//! ffmpeg's `-progress pipe:1` emits key=value lines; `out_time_ms` carries
//! the transcoded position in microseconds (the name is historical).

use once_cell::sync::Lazy;
use regex::Regex;

/// Receives percentage updates from a running encode. Implementations must
/// be cheap; the debouncing sink in the worker throttles repository writes.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: f64);
}

/// Sink that drops everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _percent: f64) {}
}

static OUT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^out_time_ms=(\d+)").expect("valid out_time regex"));

static OUT_TIME_CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^out_time=(\d+):(\d{2}):(\d{2})\.(\d+)").expect("valid out_time clock regex")
});

/// Parse one `-progress` line into elapsed output seconds.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    if let Some(caps) = OUT_TIME_RE.captures(line) {
        let micros: u64 = caps.get(1)?.as_str().parse().ok()?;
        return Some(micros as f64 / 1_000_000.0);
    }

    if let Some(caps) = OUT_TIME_CLOCK_RE.captures(line) {
        let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
        let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
        let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
        let frac_str = caps.get(4)?.as_str();
        let frac: f64 =
            frac_str.parse::<f64>().ok()? / 10f64.powi(frac_str.len() as i32);
        return Some(hours * 3600.0 + minutes * 60.0 + seconds + frac);
    }

    None
}
