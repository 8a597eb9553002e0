//! Prometheus metrics for the job substrate

use once_cell::sync::Lazy;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts};

use crate::ports::Metrics;

static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "transcode_jobs_total",
            "Jobs reaching a terminal state, by outcome",
        ),
        &["status"],
    )
    .expect("failed to create transcode_jobs_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register transcode_jobs_total");
    counter
});

static JOB_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "transcode_job_duration_seconds",
            "Wall-clock processing time per job",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
        ]),
        &["pipeline"],
    )
    .expect("failed to create transcode_job_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register transcode_job_duration_seconds");
    histogram
});

static SCHEDULER_GAUGES: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "transcode_scheduler_state",
            "Scheduler queue depth and active job count",
        ),
        &["kind"],
    )
    .expect("failed to create transcode_scheduler_state");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register transcode_scheduler_state");
    gauge
});

static WEBHOOK_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "transcode_webhook_deliveries_total",
            "Webhook delivery attempts, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create transcode_webhook_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register transcode_webhook_deliveries_total");
    counter
});

static ENCODER_INVOCATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "transcode_encoder_invocations_total",
            "Encoder subprocess invocations, by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("failed to create transcode_encoder_invocations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register transcode_encoder_invocations_total");
    counter
});

static LIVE_STREAMS_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("transcode_live_streams_active", "Currently active streams"),
        &["kind"],
    )
    .expect("failed to create transcode_live_streams_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register transcode_live_streams_active");
    gauge
});

fn label_value<'a>(labels: &'a [(&'a str, &'a str)], key: &str, default: &'a str) -> &'a str {
    labels
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

/// Prometheus-backed implementation of the `Metrics` port.
///
/// Registry writes are lock-free counter bumps, so the port stays
/// non-blocking as required.
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        match name {
            "jobs_total" => JOBS_TOTAL
                .with_label_values(&[label_value(labels, "status", "unknown")])
                .inc_by(value),
            "webhook_deliveries_total" => WEBHOOK_DELIVERIES_TOTAL
                .with_label_values(&[label_value(labels, "outcome", "unknown")])
                .inc_by(value),
            "encoder_invocations_total" => ENCODER_INVOCATIONS_TOTAL
                .with_label_values(&[
                    label_value(labels, "operation", "unknown"),
                    label_value(labels, "outcome", "unknown"),
                ])
                .inc_by(value),
            _ => {}
        }
    }

    fn gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        match name {
            "scheduler_queue_depth" => SCHEDULER_GAUGES
                .with_label_values(&["queue_depth"])
                .set(value),
            "scheduler_active_jobs" => SCHEDULER_GAUGES
                .with_label_values(&["active_jobs"])
                .set(value),
            "live_streams_active" => LIVE_STREAMS_ACTIVE
                .with_label_values(&[label_value(labels, "kind", "stream")])
                .set(value),
            _ => {}
        }
    }

    fn histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        if name == "job_duration_seconds" {
            JOB_DURATION_SECONDS
                .with_label_values(&[label_value(labels, "pipeline", "single")])
                .observe(value);
        }
    }
}
