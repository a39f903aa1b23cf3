//! Prometheus metrics registry and metric definitions.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("usage_analytics_collector".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Total gather runs started
pub static GATHER_RUNS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("gather_runs_total", "Total number of gather runs started");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Collector failures, labelled by collector key
pub static COLLECTOR_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "collector_errors_total",
        "Total number of collector failures",
    );
    let c = IntCounterVec::new(opts, &["collector"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of whole-run gather durations
pub static GATHER_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "gather_duration_seconds",
        "Duration of one full gather run in seconds",
    );
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}
