//! Process-wide evaluation counters.
//!
//! Incremented at the call site; [`Metrics::flush`] emits them as a single
//! `info!` event at the end of a run or merge.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    questions_dispatched: AtomicU64,
    calls_failed: AtomicU64,
    records_written: AtomicU64,
    shards_merged: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            questions_dispatched: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            shards_merged: AtomicU64::new(0),
        }
    }

    pub fn inc_questions_dispatched(&self) {
        self.questions_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_calls_failed(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "calls_failed", "counter incremented");
    }

    pub fn inc_records_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_shards_merged(&self, n: u64) {
        self.shards_merged.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "shards_merged", n, "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            questions_dispatched = self.questions_dispatched(),
            calls_failed = self.calls_failed(),
            records_written = self.records_written(),
            shards_merged = self.shards_merged(),
        );
    }

    pub fn questions_dispatched(&self) -> u64 {
        self.questions_dispatched.load(Ordering::Relaxed)
    }

    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn shards_merged(&self) -> u64 {
        self.shards_merged.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        self.questions_dispatched.store(0, Ordering::Relaxed);
        self.calls_failed.store(0, Ordering::Relaxed);
        self.records_written.store(0, Ordering::Relaxed);
        self.shards_merged.store(0, Ordering::Relaxed);
    }
}
