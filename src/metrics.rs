// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for product-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `product_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `outcome`: synced, invalid, upsert_failed, delete_failed (records);
//!   completed, aborted (cycles)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one record
pub fn record_outcome(outcome: &str) {
    counter!(
        "product_sync_records_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished cycle
pub fn record_cycle(outcome: &str, duration: Duration) {
    counter!(
        "product_sync_cycles_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("product_sync_cycle_seconds").record(duration.as_secs_f64());
}

/// Record one staging fetch and its size
pub fn record_batch(fetched: usize) {
    counter!("product_sync_batches_total").increment(1);
    histogram!("product_sync_batch_size").record(fetched as f64);
}

/// Record a tick skipped because the previous cycle was still running
pub fn record_skipped_tick() {
    counter!("product_sync_skipped_ticks_total").increment(1);
}

/// Record a failed write to a persistent audit sink
pub fn record_audit_failure() {
    counter!("product_sync_audit_failures_total").increment(1);
}

/// Whether a cycle is currently running (0 or 1)
pub fn set_cycle_in_flight(in_flight: bool) {
    gauge!("product_sync_cycle_in_flight").set(if in_flight { 1.0 } else { 0.0 });
}

/// Record per-store operation latency
pub fn record_latency(store: &str, operation: &str, duration: Duration) {
    histogram!(
        "product_sync_store_operation_seconds",
        "store" => store.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Timer guard that records latency on drop
pub struct LatencyTimer {
    store: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    #[must_use]
    pub fn new(store: &'static str, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.store, self.operation, self.start.elapsed());
    }
}
