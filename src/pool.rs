use crate::config::Config;
use crate::metrics::Metrics;
use crate::segment::Segment;

/// LIFO stack of retired, reusable segments, plus the allocation/reuse
/// counters in `Metrics`.
///
/// Every access to a `SegmentPool` happens while the queue's cross-segment
/// lock is held; the pool itself does no synchronization of its own.
pub(crate) struct SegmentPool<T> {
    segments: Vec<Box<Segment<T>>>,
    metrics: Metrics,
}

impl<T> SegmentPool<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    /// Pops a segment from the pool and reinitializes it, or allocates a
    /// fresh one if the pool is empty.
    pub(crate) fn acquire_or_allocate(&mut self, config: Config) -> Box<Segment<T>> {
        match self.segments.pop() {
            Some(mut segment) => {
                segment.reinitialize();
                self.metrics.record_reuse();
                segment
            }
            None => {
                self.metrics.record_allocation();
                Box::new(Segment::new(config))
            }
        }
    }

    /// Retires a drained (or forcibly cleared) segment back into the pool.
    ///
    /// Any values the segment still holds (only possible when it is retired
    /// via `clear`, since the dequeue-drain path only retires fully-drained
    /// segments) are dropped in place first, which also advances the
    /// segment's `head` to match its drained tail — so the segment satisfies
    /// `debug_assert_pool_segment_clean!` the moment it is next popped off
    /// the pool, and the pool never carries live data between uses.
    pub(crate) fn retire(&mut self, mut segment: Box<Segment<T>>) {
        segment.drop_remaining_values();
        self.segments.push(segment);
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
