use std::sync::atomic::{AtomicU64, Ordering};

/// Live allocation/reuse counters tracked by a queue's segment pool.
///
/// These are informational only — nothing in the queue's correctness
/// depends on them. They exist so pool-reuse behavior (the whole point of
/// chaining segments instead of just growing a `Vec`) is observable.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    segments_allocated: AtomicU64,
    segments_reused: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_allocation(&self) {
        self.segments_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reuse(&self) {
        self.segments_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_allocated: self.segments_allocated.load(Ordering::Relaxed),
            segments_reused: self.segments_reused.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of a queue's segment pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Number of segments allocated from the global allocator over the queue's lifetime.
    pub segments_allocated: u64,
    /// Number of segments pulled from the pool and reused over the queue's lifetime.
    pub segments_reused: u64,
}
