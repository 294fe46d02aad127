use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SYNTHESIS_OPS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_synthesis_ops_total",
        "Configuration mutations applied to the shared blob."
    ))
    .unwrap();
    pub static ref SYNTHESIS_CONFLICTS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_synthesis_conflicts_total",
        "Optimistic-concurrency write conflicts retried."
    ))
    .unwrap();
    pub static ref RELOAD_ATTEMPTS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_reload_attempts_total",
        "Alertmanager reload calls attempted."
    ))
    .unwrap();
    pub static ref RELOAD_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_reload_failures_total",
        "Deferred reloads abandoned after exhausting retries."
    ))
    .unwrap();
    pub static ref SYNC_TICKS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_sync_ticks_total",
        "Synchronizer ticks completed."
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "alertoperator_alerts_raised_total",
        "Alerts raised into the engine by target watchers."
    ))
    .unwrap();
}

pub fn register_metrics() {
    for metric in [
        &*SYNTHESIS_OPS_TOTAL,
        &*SYNTHESIS_CONFLICTS_TOTAL,
        &*RELOAD_ATTEMPTS_TOTAL,
        &*RELOAD_FAILURES_TOTAL,
        &*SYNC_TICKS_TOTAL,
        &*ALERTS_RAISED_TOTAL,
    ] {
        REGISTRY
            .register(Box::new(metric.clone()))
            .expect("metric registered twice");
    }
}

pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}
