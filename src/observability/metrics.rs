//! # Metrics
//!
//! Prometheus metrics for monitoring the router and its backoff layer.
//!
//! ## Metrics Exposed
//!
//! - `shard_router_requests_total` - Requests handled, labelled by `result` (ok, error)
//! - `shard_router_backoff_delay_seconds` - Artificial delay added to failed requests
//! - `shard_router_backoff_faults_total` - Internal backoff faults by `kind`
//! - `shard_router_backoff_active_classes` - Error classes with a live window

use anyhow::Result;
use prometheus::{Histogram, IntCounterVec, IntGauge, Registry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static REGISTERED: AtomicBool = AtomicBool::new(false);

static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "shard_router_requests_total",
            "Total number of write requests handled by the router",
        ),
        &["result"],
    )
    .expect("Failed to create REQUESTS_TOTAL metric - this should never happen")
});

static BACKOFF_DELAY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "shard_router_backoff_delay_seconds",
            "Artificial delay added before returning an error, in seconds",
        )
        .buckets(vec![0.0, 0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56]),
    )
    .expect("Failed to create BACKOFF_DELAY metric - this should never happen")
});

static BACKOFF_FAULTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "shard_router_backoff_faults_total",
            "Internal backoff faults absorbed without delaying the error",
        ),
        &["kind"],
    )
    .expect("Failed to create BACKOFF_FAULTS_TOTAL metric - this should never happen")
});

static BACKOFF_ACTIVE_CLASSES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "shard_router_backoff_active_classes",
        "Number of error classes seen within the reset window",
    )
    .expect("Failed to create BACKOFF_ACTIVE_CLASSES metric - this should never happen")
});

/// Register all metrics with the shared registry
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() -> Result<()> {
    if REGISTERED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKOFF_DELAY.clone()))?;
    REGISTRY.register(Box::new(BACKOFF_FAULTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKOFF_ACTIVE_CLASSES.clone()))?;

    Ok(())
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_requests(success: bool) {
    let result = if success { "ok" } else { "error" };
    REQUESTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn observe_backoff_delay(seconds: f64) {
    BACKOFF_DELAY.observe(seconds);
}

pub fn increment_backoff_faults(kind: &str) {
    BACKOFF_FAULTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Current value of the faults counter for `kind`
#[cfg(test)]
pub(crate) fn backoff_faults(kind: &str) -> u64 {
    BACKOFF_FAULTS_TOTAL.with_label_values(&[kind]).get()
}

pub fn set_active_classes(count: usize) {
    BACKOFF_ACTIVE_CLASSES.set(i64::try_from(count).unwrap_or(i64::MAX));
}
