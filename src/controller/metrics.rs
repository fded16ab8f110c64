//! Prometheus metrics for the gitkube controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `gitkube_reconcile_duration_seconds` (histogram): sync handler duration labeled by controller.
//! - `gitkube_reconcile_errors_total` (counter): failed syncs labeled by controller and kind.
//! - `gitkube_queue_retries_total` (counter): keys re-queued with backoff, labeled by queue.
//! - `gitkube_artifact_writes_total` (counter): `remotes.json` rewrites.
//! - `gitkube_gateway_restarts_total` (counter): restart annotation bumps on the gateway.
//! - `gitkube_remote_status_updates_total` (counter): Remote status writes labeled by namespace/name.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::Error;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "remote"
    pub controller: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "missing_resource", "invalid_key"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabels {
    pub queue: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RemoteLabels {
    pub namespace: String,
    pub name: String,
}

/// Histogram tracking sync handler duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static QUEUE_RETRIES_TOTAL: Lazy<Family<QueueLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ARTIFACT_WRITES_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static GATEWAY_RESTARTS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static REMOTE_STATUS_UPDATES_TOTAL: Lazy<Family<RemoteLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "gitkube_reconcile_duration_seconds",
        "Duration of sync handler runs in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "gitkube_reconcile_errors_total",
        "Total number of failed syncs",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "gitkube_queue_retries_total",
        "Total number of keys re-queued with backoff",
        QUEUE_RETRIES_TOTAL.clone(),
    );
    registry.register(
        "gitkube_artifact_writes_total",
        "Total number of remotes.json rewrites",
        ARTIFACT_WRITES_TOTAL.clone(),
    );
    registry.register(
        "gitkube_gateway_restarts_total",
        "Total number of gateway rollouts triggered",
        GATEWAY_RESTARTS_TOTAL.clone(),
    );
    registry.register(
        "gitkube_remote_status_updates_total",
        "Total number of Remote status writes",
        REMOTE_STATUS_UPDATES_TOTAL.clone(),
    );

    registry
});

pub fn observe_reconcile_duration(controller: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&ReconcileLabels {
            controller: controller.to_string(),
        })
        .observe(seconds);
}

pub fn inc_reconcile_error(controller: &str, error: &Error) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&ErrorLabels {
            controller: controller.to_string(),
            kind: error_kind(error).to_string(),
        })
        .inc();
}

pub fn inc_queue_retry(queue: &str) {
    QUEUE_RETRIES_TOTAL
        .get_or_create(&QueueLabels {
            queue: queue.to_string(),
        })
        .inc();
}

pub fn inc_artifact_write() {
    ARTIFACT_WRITES_TOTAL.inc();
}

pub fn inc_gateway_restart() {
    GATEWAY_RESTARTS_TOTAL.inc();
}

pub fn inc_remote_status_update(namespace: &str, name: &str) {
    REMOTE_STATUS_UPDATES_TOTAL
        .get_or_create(&RemoteLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
        .inc();
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::KubeError(_) => "kube",
        Error::SerializationError(_) => "serialization",
        Error::InvalidKey(_) => "invalid_key",
        Error::MissingResource { .. } => "missing_resource",
        Error::CacheSyncTimeout(_) => "cache_sync",
        Error::ConfigError(_) => "config",
    }
}
