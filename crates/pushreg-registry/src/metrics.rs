//! Prometheus-compatible counters for the device registry and its batch jobs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// The type of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryMetric {
    /// The metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// The kind of metric.
    pub kind: MetricKind,
    /// The metric value.
    pub value: u64,
}

/// Thread-safe counters shared by the registry, backfill and dedupe.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    devices_registered: AtomicU64,
    devices_deduplicated: AtomicU64,
    token_hashes_backfilled: AtomicU64,
    token_decrypt_failures: AtomicU64,
}

impl RegistryMetrics {
    /// Create a new set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful registration (insert or refresh).
    #[inline]
    pub fn record_registered(&self) {
        self.devices_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rows removed as duplicates.
    #[inline]
    pub fn record_deduplicated(&self, rows: u64) {
        self.devices_deduplicated.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record one legacy row that received its token hash.
    #[inline]
    pub fn record_backfilled(&self) {
        self.token_hashes_backfilled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a token dropped from fan-out because it failed to decrypt.
    #[inline]
    pub fn record_decrypt_failure(&self) {
        self.token_decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            devices_registered: self.devices_registered.load(Ordering::Relaxed),
            devices_deduplicated: self.devices_deduplicated.load(Ordering::Relaxed),
            token_hashes_backfilled: self.token_hashes_backfilled.load(Ordering::Relaxed),
            token_decrypt_failures: self.token_decrypt_failures.load(Ordering::Relaxed),
        }
    }

    /// Collect all counters with Prometheus names and help text.
    pub fn collect(&self) -> Vec<RegistryMetric> {
        let snap = self.snapshot();
        vec![
            RegistryMetric {
                name: "pushreg_devices_registered_total".to_string(),
                help: "Total device registrations (new or refreshed)".to_string(),
                kind: MetricKind::Counter,
                value: snap.devices_registered,
            },
            RegistryMetric {
                name: "pushreg_devices_deduplicated_total".to_string(),
                help: "Total duplicate device rows removed by dedupe".to_string(),
                kind: MetricKind::Counter,
                value: snap.devices_deduplicated,
            },
            RegistryMetric {
                name: "pushreg_token_hashes_backfilled_total".to_string(),
                help: "Total legacy device rows that received a token hash".to_string(),
                kind: MetricKind::Counter,
                value: snap.token_hashes_backfilled,
            },
            RegistryMetric {
                name: "pushreg_token_decrypt_failures_total".to_string(),
                help: "Total stored tokens that failed to decrypt during fan-out".to_string(),
                kind: MetricKind::Counter,
                value: snap.token_decrypt_failures,
            },
        ]
    }

    /// Render the counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        for metric in self.collect() {
            let kind = match metric.kind {
                MetricKind::Counter => "counter",
            };
            out.push_str(&format!("# HELP {} {}\n", metric.name, metric.help));
            out.push_str(&format!("# TYPE {} {}\n", metric.name, kind));
            out.push_str(&format!("{} {}\n", metric.name, metric.value));
        }
        out
    }
}

/// A point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Registrations.
    pub devices_registered: u64,
    /// Duplicate rows removed.
    pub devices_deduplicated: u64,
    /// Hashes written by backfill.
    pub token_hashes_backfilled: u64,
    /// Fan-out decryption drops.
    pub token_decrypt_failures: u64,
}
