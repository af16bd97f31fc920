use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide worker counters, shared by every tile worker.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    layout_passes_total: AtomicU64,
    placement_passes_total: AtomicU64,
    deferred_placements_total: AtomicU64,
    cancelled_passes_total: AtomicU64,
    dropped_labels_total: AtomicU64,
    failed_passes_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCountersSnapshot {
    pub layout_passes_total: u64,
    pub placement_passes_total: u64,
    pub deferred_placements_total: u64,
    pub cancelled_passes_total: u64,
    pub dropped_labels_total: u64,
    pub failed_passes_total: u64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            layout_passes_total: self.layout_passes_total.load(Ordering::Relaxed),
            placement_passes_total: self.placement_passes_total.load(Ordering::Relaxed),
            deferred_placements_total: self.deferred_placements_total.load(Ordering::Relaxed),
            cancelled_passes_total: self.cancelled_passes_total.load(Ordering::Relaxed),
            dropped_labels_total: self.dropped_labels_total.load(Ordering::Relaxed),
            failed_passes_total: self.failed_passes_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_layout_pass(&self) {
        self.layout_passes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placement_pass(&self) {
        self.placement_passes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_placement(&self) {
        self.deferred_placements_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled_pass(&self) {
        self.cancelled_passes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_labels(&self, count: u64) {
        self.dropped_labels_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed_pass(&self) {
        self.failed_passes_total.fetch_add(1, Ordering::Relaxed);
    }
}
