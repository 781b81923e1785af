//! Operator counters. Relaxed atomics; read through [`OperatorMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct OperatorMetrics {
    records_ingested: AtomicU64,
    records_late: AtomicU64,
    buffers_dropped: AtomicU64,
    merge_tasks: AtomicU64,
    windows_emitted: AtomicU64,
    windows_expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_ingested: u64,
    pub records_late: u64,
    pub buffers_dropped: u64,
    pub merge_tasks: u64,
    pub windows_emitted: u64,
    pub windows_expired: u64,
}

impl OperatorMetrics {
    pub fn add_ingested(&self, n: u64) {
        self.records_ingested.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_late(&self, n: u64) {
        self.records_late.fetch_add(n, Ordering::Relaxed);
    }

    pub fn buffer_dropped(&self) {
        self.buffers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_merge_tasks(&self, n: u64) {
        self.merge_tasks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn window_emitted(&self) {
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn window_expired(&self) {
        self.windows_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            records_late: self.records_late.load(Ordering::Relaxed),
            buffers_dropped: self.buffers_dropped.load(Ordering::Relaxed),
            merge_tasks: self.merge_tasks.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            windows_expired: self.windows_expired.load(Ordering::Relaxed),
        }
    }
}
