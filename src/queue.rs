use crate::config::Config;
use crate::metrics::MetricsSnapshot;
use crate::pool::SegmentPool;
use crate::segment::{slot_count, Segment};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

/// An unbounded, multi-producer / multi-consumer, FIFO-per-producer queue.
///
/// Internally the queue is a chain of fixed-capacity ring-buffer
/// [`Segment`]s; when the current tail segment fills, a producer links a
/// fresh (or pooled) segment in under a lock taken only for that
/// structural transition. Steady-state `enqueue`/`try_dequeue` never touch
/// the lock.
///
/// ```
/// use segring::Queue;
///
/// let queue = Queue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.try_dequeue(), Some(1));
/// assert_eq!(queue.try_dequeue(), Some(2));
/// assert_eq!(queue.try_dequeue(), None);
/// ```
pub struct Queue<T> {
    head_segment: CachePadded<AtomicPtr<Segment<T>>>,
    tail_segment: CachePadded<AtomicPtr<Segment<T>>>,
    cross_segment_lock: Mutex<SegmentPool<T>>,
    config: Config,
}

// SAFETY: all mutable state behind the raw `head_segment`/`tail_segment`
// pointers is reached only through the sequence-number protocol or while
// holding `cross_segment_lock`; sound to share across threads when `T: Send`.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates an empty queue with 1024-slot segments.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty queue whose segments are sized by `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let initial = Box::into_raw(Box::new(Segment::new(config)));
        Self {
            head_segment: CachePadded::new(AtomicPtr::new(initial)),
            tail_segment: CachePadded::new(AtomicPtr::new(initial)),
            cross_segment_lock: Mutex::new(SegmentPool::new()),
            config,
        }
    }

    /// Appends `item`. Never fails, never blocks on another thread except
    /// for the rare structural transition where a new segment must be
    /// linked in.
    pub fn enqueue(&self, item: T) {
        let mut item = item;
        loop {
            let tail_ptr = self.tail_segment.load(Ordering::Acquire);
            // SAFETY: `tail_ptr` always points at a live segment: either the
            // one installed in `with_config`, or one published by a prior
            // `link_new_tail` call, both of which outlive the pointer being
            // read here because segments are only freed after being swung
            // out of both `head_segment` and `tail_segment`.
            let segment = unsafe { &*tail_ptr };
            match segment.try_enqueue(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }

            // Slow path: reload once before taking the lock, in case
            // another producer already linked a new tail.
            let reloaded_ptr = self.tail_segment.load(Ordering::Acquire);
            if reloaded_ptr != tail_ptr {
                continue;
            }
            let segment = unsafe { &*reloaded_ptr };
            match segment.try_enqueue(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }

            self.link_new_tail(reloaded_ptr);
        }
    }

    /// Freezes `expected_tail` and links a fresh or pooled segment as the
    /// new tail, unless another producer already did so.
    fn link_new_tail(&self, expected_tail: *mut Segment<T>) {
        let mut pool = self.cross_segment_lock.lock().unwrap();
        let current_tail = self.tail_segment.load(Ordering::Acquire);
        if current_tail == expected_tail {
            // SAFETY: still the published tail, still alive.
            let segment = unsafe { &*current_tail };
            segment.ensure_frozen();

            let new_segment = pool.acquire_or_allocate(self.config);
            let new_ptr = Box::into_raw(new_segment);
            segment.set_next(new_ptr);
            self.tail_segment.store(new_ptr, Ordering::Release);
        }
    }

    /// Returns the next item in FIFO-per-producer order, or `None` if the
    /// queue is currently empty.
    pub fn try_dequeue(&self) -> Option<T> {
        loop {
            let head_ptr = self.head_segment.load(Ordering::Acquire);
            // SAFETY: see `enqueue`; the head pointer always refers to a
            // live segment until it is retired under the lock below, at
            // which point this function has already stopped reading it.
            let segment = unsafe { &*head_ptr };
            if let Some(value) = segment.try_dequeue() {
                return Some(value);
            }
            if segment.next_ptr().is_null() {
                return None;
            }

            // Slow path: re-read head, retry, re-check for a successor.
            let head_ptr = self.head_segment.load(Ordering::Acquire);
            let segment = unsafe { &*head_ptr };
            if let Some(value) = segment.try_dequeue() {
                return Some(value);
            }
            if segment.next_ptr().is_null() {
                return None;
            }
            // Third attempt: covers an enqueue that landed in this segment
            // between the two observations above.
            if let Some(value) = segment.try_dequeue() {
                return Some(value);
            }

            self.advance_head(head_ptr);
        }
    }

    /// Swings `head_segment` to its successor and retires the old head into
    /// the pool, unless another consumer already did so.
    fn advance_head(&self, expected_head: *mut Segment<T>) {
        let mut pool = self.cross_segment_lock.lock().unwrap();
        let current_head = self.head_segment.load(Ordering::Acquire);
        if current_head == expected_head {
            // SAFETY: still the published head, still alive.
            let next = unsafe { &*current_head }.next_ptr();
            if !next.is_null() {
                self.head_segment.store(next, Ordering::Release);
                // SAFETY: `current_head` was just swung out of
                // `head_segment` and no reader can reach it as the chain's
                // head again; this is the one place that reclaims it.
                let retired = unsafe { Box::from_raw(current_head) };
                pool.retire(retired);
            }
        }
    }

    /// Returns a consistent snapshot of the number of items currently in
    /// the queue.
    ///
    /// This is a point-in-time snapshot taken during the call, not a value
    /// linearized against the call's invocation or return; concurrently
    /// racing enqueues/dequeues may make the true count different by the
    /// time the caller observes the return value.
    #[must_use]
    pub fn count(&self) -> usize {
        loop {
            let head_ptr = self.head_segment.load(Ordering::Acquire);
            let tail_ptr = self.tail_segment.load(Ordering::Acquire);

            if head_ptr == tail_ptr {
                // SAFETY: pointer is live for the duration of this call.
                let segment = unsafe { &*head_ptr };
                let (head1, tail1) = segment.head_tail();
                let head_ptr2 = self.head_segment.load(Ordering::Acquire);
                let tail_ptr2 = self.tail_segment.load(Ordering::Acquire);
                let (head2, tail2) = segment.head_tail();
                if head_ptr2 == head_ptr && tail_ptr2 == tail_ptr && head1 == head2 && tail1 == tail2 {
                    return slot_count(head1, tail1, self.config.segment_capacity(), segment.freeze_offset());
                }
                continue;
            }

            // SAFETY: both pointers are live for the duration of this call.
            let head_segment = unsafe { &*head_ptr };
            if head_segment.next_ptr() == tail_ptr {
                let (hh1, ht1) = head_segment.head_tail();
                let tail_segment = unsafe { &*tail_ptr };
                let (th1, tt1) = tail_segment.head_tail();

                let head_ptr2 = self.head_segment.load(Ordering::Acquire);
                let tail_ptr2 = self.tail_segment.load(Ordering::Acquire);
                let (hh2, ht2) = head_segment.head_tail();
                let (th2, tt2) = tail_segment.head_tail();

                if head_ptr2 == head_ptr
                    && tail_ptr2 == tail_ptr
                    && hh1 == hh2
                    && ht1 == ht2
                    && th1 == th2
                    && tt1 == tt2
                {
                    let capacity = self.config.segment_capacity();
                    let freeze_offset = head_segment.freeze_offset();
                    return slot_count(hh1, ht1, capacity, freeze_offset)
                        + slot_count(th1, tt1, capacity, freeze_offset);
                }
                continue;
            }

            // Longer chain: fall back to the cross-segment lock.
            let pool_guard = self.cross_segment_lock.lock().unwrap();
            let head_ptr_locked = self.head_segment.load(Ordering::Acquire);
            let tail_ptr_locked = self.tail_segment.load(Ordering::Acquire);
            if head_ptr_locked != head_ptr || tail_ptr_locked != tail_ptr {
                drop(pool_guard);
                continue;
            }

            let capacity = self.config.segment_capacity();
            let freeze_offset = head_segment.freeze_offset();
            let (hh, ht) = head_segment.head_tail();
            let mut total = slot_count(hh, ht, capacity, freeze_offset);

            // Every interior segment strictly between the current head and
            // tail has already been frozen full: the consumer side hasn't
            // reached it yet (it is still working through `head_segment`),
            // so it always holds exactly `capacity` items.
            let mut cursor = head_segment.next_ptr();
            while cursor != tail_ptr {
                // SAFETY: every interior segment between a stable head and
                // tail is reachable and alive for the duration of the lock.
                let interior = unsafe { &*cursor };
                total += capacity;
                cursor = interior.next_ptr();
            }

            let tail_segment = unsafe { &*tail_ptr };
            let (th, tt) = tail_segment.head_tail();
            total += slot_count(th, tt, capacity, freeze_offset);

            drop(pool_guard);
            return total;
        }
    }

    /// Returns `true` if the queue holds no items at the moment of the
    /// check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let mut current = self.head_segment.load(Ordering::Acquire);
        loop {
            // SAFETY: every segment reached by walking `next` from a live
            // head pointer is itself alive for the duration of this call.
            let segment = unsafe { &*current };
            if segment.has_available() {
                return false;
            }
            let next = segment.next_ptr();
            if next.is_null() {
                // Close the race where a producer links a new tail between
                // the emptiness check above and this null check.
                let recheck = segment.next_ptr();
                if recheck.is_null() {
                    return true;
                }
                current = recheck;
                continue;
            }
            current = next;
        }
    }

    /// Discards all contents. The segments that held them are pushed to the
    /// pool; one segment (fresh or pooled) remains as both head and tail.
    pub fn clear(&self) {
        let mut pool = self.cross_segment_lock.lock().unwrap();

        let tail_ptr = self.tail_segment.load(Ordering::Acquire);
        // SAFETY: still reachable and alive while the lock is held.
        unsafe { &*tail_ptr }.ensure_frozen();

        let mut current = self.head_segment.load(Ordering::Acquire);
        loop {
            // SAFETY: `current` is reachable from the (now frozen, so
            // immutable) chain between the old head and tail, which is
            // stable while the lock is held.
            let next = unsafe { &*current }.next_ptr();
            let boxed = unsafe { Box::from_raw(current) };
            let reached_tail = current == tail_ptr;
            pool.retire(boxed);
            if reached_tail {
                break;
            }
            current = next;
        }

        let fresh = pool.acquire_or_allocate(self.config);
        let fresh_ptr = Box::into_raw(fresh);
        self.head_segment.store(fresh_ptr, Ordering::Release);
        self.tail_segment.store(fresh_ptr, Ordering::Release);
    }

    /// Returns a snapshot of this queue's segment-pool allocation/reuse
    /// counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.cross_segment_lock.lock().unwrap().metrics().snapshot()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // No other thread can be observing this queue by the time `drop`
        // runs, so plain loads via `get_mut` are sufficient here.
        let mut current = *self.head_segment.get_mut();
        while !current.is_null() {
            // SAFETY: every segment from the old head through the old tail
            // is uniquely owned by this queue; reclaiming the whole chain
            // here is the only place that does so.
            let segment = unsafe { Box::from_raw(current) };
            current = segment.next_ptr();
            drop(segment);
        }
        // The pool's `Vec<Box<Segment<T>>>` drops its own segments (each
        // running `Segment`'s `Drop` impl) when `cross_segment_lock` drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_thread_fifo() {
        let queue = Queue::<u32>::new();
        for i in 1..=5u32 {
            queue.enqueue(i);
        }
        for i in 1..=5u32 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn dequeue_empty_queue_returns_none_without_locking() {
        let queue = Queue::<u32>::new();
        assert_eq!(queue.try_dequeue(), None);
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn fills_across_segment_boundary() {
        let queue = Queue::<u32>::with_config(Config::new(4)); // 16-slot segments
        for i in 0..17u32 {
            queue.enqueue(i);
        }
        assert_eq!(queue.count(), 17);
        for i in 0..17u32 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
        assert!(queue.metrics().segments_allocated >= 2);
    }

    #[test]
    fn pool_is_reused_on_refill() {
        let queue = Queue::<u32>::with_config(Config::new(4)); // 16-slot segments
        for i in 0..40u32 {
            queue.enqueue(i);
        }
        for _ in 0..40 {
            queue.try_dequeue().unwrap();
        }
        let allocated_before = queue.metrics().segments_allocated;

        for i in 0..40u32 {
            queue.enqueue(i);
        }
        for _ in 0..40 {
            queue.try_dequeue().unwrap();
        }

        let after = queue.metrics();
        assert_eq!(after.segments_allocated, allocated_before);
        assert!(after.segments_reused > 0);
    }

    #[test]
    fn clear_discards_contents_and_is_idempotent() {
        let queue = Queue::<u32>::new();
        for i in 0..100u32 {
            queue.enqueue(i);
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);

        queue.enqueue(7);
        assert_eq!(queue.try_dequeue(), Some(7));
    }

    #[test]
    fn clear_drops_undequeued_values() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        use std::sync::Arc;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let queue = Queue::<DropCounter>::new();
        for _ in 0..10 {
            queue.enqueue(DropCounter(Arc::clone(&count)));
        }
        queue.clear();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 10);
    }

    #[test]
    fn drop_queue_drops_remaining_values() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        use std::sync::Arc;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        {
            let queue = Queue::<DropCounter>::new();
            for _ in 0..5 {
                queue.enqueue(DropCounter(Arc::clone(&count)));
            }
            let _ = queue.try_dequeue();
            drop(queue);
        }
        assert_eq!(count.load(AtomicOrdering::SeqCst), 5);
    }

    #[test]
    fn four_producers_four_consumers_preserve_per_producer_order() {
        use std::collections::HashMap;
        use std::sync::Arc;
        use std::thread;

        const PER_PRODUCER: u32 = 20_000;
        let queue = Arc::new(Queue::<(u32, u32)>::with_config(Config::new(6))); // 64-slot segments

        let producers: Vec<_> = (0..4u32)
            .map(|id| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue((id, i));
                    }
                })
            })
            .collect();

        let (tx, rx) = std::sync::mpsc::channel();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut collected = Vec::new();
                    loop {
                        match queue.try_dequeue() {
                            Some(item) => collected.push(item),
                            None => {
                                if collected.len() >= (PER_PRODUCER as usize) && queue.is_empty() {
                                    break;
                                }
                                std::thread::yield_now();
                            }
                        }
                        if collected.len() == 4 * PER_PRODUCER as usize {
                            break;
                        }
                    }
                    tx.send(collected).unwrap();
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        drop(tx);

        let mut all = Vec::new();
        for _ in 0..4 {
            all.extend(rx.recv().unwrap());
        }
        // Drain stragglers any consumer thread may have left behind.
        while let Some(item) = queue.try_dequeue() {
            all.push(item);
        }
        for consumer in consumers {
            let _ = consumer.join();
        }

        assert_eq!(all.len(), 4 * PER_PRODUCER as usize);

        let mut per_producer: HashMap<u32, Vec<u32>> = HashMap::new();
        for (producer, value) in all {
            per_producer.entry(producer).or_default().push(value);
        }
        assert_eq!(per_producer.len(), 4);
        for (_, values) in per_producer {
            assert_eq!(values.len(), PER_PRODUCER as usize);
            for window in values.windows(2) {
                assert!(window[0] < window[1], "per-producer order violated");
            }
        }
    }
}
