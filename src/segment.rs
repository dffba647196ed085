use crate::backoff::Backoff;
use crate::config::Config;
use crate::invariants::{
    debug_assert_head_not_past_tail, debug_assert_monotonic, debug_assert_pool_segment_clean,
    debug_assert_sequence_generation,
};
use crate::slot::Slot;
use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};

/// A fixed-capacity ring of [`Slot`]s: the Vyukov bounded MPMC queue that is
/// the unit of this crate's segment chain.
///
/// A `Segment` is exclusively owned by whichever structure currently holds a
/// pointer to it — the queue's live chain or its pool — except for the
/// lock-free CAS traffic on `head`/`tail`/slot `sequence` fields, which many
/// producer/consumer threads perform concurrently while the segment is the
/// chain's active head or tail.
#[repr(C)]
pub(crate) struct Segment<T> {
    /// Enqueue-side cursor. Lives on its own cache line so producer traffic
    /// never shares a line with the consumer-side `head`.
    tail: CachePadded<AtomicI32>,
    /// Dequeue-side cursor.
    head: CachePadded<AtomicI32>,
    /// Single-writer flag (written only under the queue's cross-segment
    /// lock) marking that no further enqueue can ever succeed here.
    frozen: AtomicBool,
    /// Link to the successor segment, null until this segment fills and a
    /// new tail is published.
    next: AtomicPtr<Segment<T>>,
    /// The backing ring storage, sized by `config.segment_capacity()`.
    slots: Box<[Slot<T>]>,
    config: Config,
}

// SAFETY: `Segment<T>` only exposes `T` through the sequence-number
// protocol, which hands exclusive, synchronized access to exactly one
// thread at a time; sound to share across threads whenever `T: Send`.
unsafe impl<T: Send> Send for Segment<T> {}
unsafe impl<T: Send> Sync for Segment<T> {}

impl<T> Segment<T> {
    pub(crate) fn new(config: Config) -> Self {
        let capacity = config.segment_capacity();
        let slots = (0..capacity)
            .map(|i| Slot::new(i as i32))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            tail: CachePadded::new(AtomicI32::new(0)),
            head: CachePadded::new(AtomicI32::new(0)),
            frozen: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
            slots,
            config,
        }
    }

    #[inline]
    pub(crate) fn next_ptr(&self) -> *mut Segment<T> {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut Segment<T>) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    pub(crate) fn head_tail(&self) -> (i32, i32) {
        (self.head.load(Ordering::Acquire), self.tail.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn freeze_offset(&self) -> i32 {
        self.config.freeze_offset()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.config.segment_capacity()
    }

    // -------------------------------------------------------------------
    // Producer side
    // -------------------------------------------------------------------

    /// Attempts to enqueue `value`. On success returns `Ok(())`; on failure
    /// (segment full, or frozen) hands `value` back to the caller so the
    /// queue's linking protocol can retry it on a successor segment.
    pub(crate) fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mask = self.config.slot_mask();
        let mut backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[(tail & mask) as usize];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(tail);

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning this CAS grants exclusive ownership of
                        // this slot's value cell until the release store below.
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        debug_assert_monotonic!("tail", tail, tail.wrapping_add(1));
                        slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => {
                        tail = actual;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                // Segment full, or frozen (freeze pushed tail far ahead of
                // every slot's stamped sequence).
                return Err(value);
            } else {
                // Another producer already claimed this generation.
                tail = self.tail.load(Ordering::Acquire);
                backoff.spin();
            }
        }
    }

    /// Idempotently freezes the segment against further enqueues.
    ///
    /// Must only be called while holding the queue's cross-segment lock.
    pub(crate) fn ensure_frozen(&self) {
        // The CAS below only succeeds on the false -> true transition, so
        // FREEZE_OFFSET is applied to `tail` at most once per segment
        // (INV-FRZ-01).
        if self
            .frozen
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.tail.fetch_add(self.config.freeze_offset(), Ordering::AcqRel);
        }
    }

    // -------------------------------------------------------------------
    // Consumer side
    // -------------------------------------------------------------------

    /// Attempts to dequeue the next item. Returns `None` exactly when the
    /// segment is observably empty for the current head value; spins while
    /// a producer is mid-publish on the slot this consumer needs.
    pub(crate) fn try_dequeue(&self) -> Option<T> {
        let mask = self.config.slot_mask();
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[(head & mask) as usize];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(head.wrapping_add(1));

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_head_not_past_tail!(
                            head.wrapping_add(1),
                            self.tail.load(Ordering::Relaxed)
                        );
                        // SAFETY: winning this CAS grants exclusive ownership of
                        // this slot's value cell; it was published by the
                        // enqueuer's release store on `sequence` above.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(head.wrapping_add(self.capacity() as i32), Ordering::Release);
                        return Some(value);
                    }
                    Err(_) => {
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                if !self.wait_for_publish_or_conclude_empty(head, &mut backoff) {
                    return None;
                }
                // A producer finished publishing into this slot; retry.
            } else {
                // Another consumer already claimed this generation.
                backoff.spin();
            }
        }
    }

    /// Read-only emptiness test used by `IsEmpty`: does the segment have an
    /// item available for its *current* head value, without consuming it?
    ///
    /// Applies the same mid-publish wait as `try_dequeue`, since a consumer
    /// walking the chain for `IsEmpty` must not report "empty" while a
    /// producer is actively publishing into the slot it just checked.
    pub(crate) fn has_available(&self) -> bool {
        let mask = self.config.slot_mask();
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[(head & mask) as usize];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(head.wrapping_add(1));

            if diff >= 0 {
                // diff == 0: ready. diff > 0: our head snapshot was already
                // stale (another consumer moved it) — either way there was
                // something to look at; the caller does not need a
                // stronger guarantee than "not conclusively empty".
                return true;
            }
            if !self.wait_for_publish_or_conclude_empty(head, &mut backoff) {
                return false;
            }
        }
    }

    /// Shared emptiness test: given that the slot for `head` has
    /// not been published yet, decide whether the segment is conclusively
    /// empty or whether a producer is mid-publish and the caller should
    /// retry.
    ///
    /// Returns `true` if the caller should retry (a publish is in flight),
    /// `false` if the segment is conclusively empty for this head value.
    fn wait_for_publish_or_conclude_empty(&self, head: i32, backoff: &mut Backoff) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let frozen = self.frozen.load(Ordering::Acquire);
            let effective_tail = if frozen {
                tail.wrapping_sub(self.config.freeze_offset())
            } else {
                tail
            };

            if effective_tail.wrapping_sub(head) <= 0 {
                return false;
            }

            // A producer is mid-publish on this exact slot; bounded spin.
            backoff.snooze();
            if backoff.is_completed() {
                // Re-check once more after giving up patience, then report
                // the caller should retry from its own loop (the mid-publish
                // producer must complete eventually).
                return true;
            }
        }
    }

    // -------------------------------------------------------------------
    // Pool lifecycle
    // -------------------------------------------------------------------

    /// Resets this segment to its just-allocated state. Only valid to call
    /// on a segment with no live values remaining (enforced in debug builds).
    pub(crate) fn reinitialize(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let frozen = *self.frozen.get_mut();
        debug_assert_pool_segment_clean!(head, tail, frozen, self.config.freeze_offset());

        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot.sequence.get_mut() = i as i32;
            debug_assert_sequence_generation!(*slot.sequence.get_mut(), i, self.capacity());
        }
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.frozen.get_mut() = false;
        *self.next.get_mut() = ptr::null_mut();
    }

    /// Drops any values left in `[head, effective_tail)` in place, without
    /// going through the dequeue protocol, then advances `head` to
    /// `effective_tail` so the range is marked empty. Used by `clear()`,
    /// which discards un-dequeued items rather than handing them to a
    /// caller.
    ///
    /// Leaving `head`/`tail` pointing at an already-dropped range would
    /// cause those values to be dropped a second time by `Drop` (or
    /// reported as live by `debug_assert_pool_segment_clean!`), so this
    /// always leaves the segment's bookkeeping in a drained state.
    pub(crate) fn drop_remaining_values(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let frozen = *self.frozen.get_mut();
        let effective_tail = if frozen {
            tail.wrapping_sub(self.config.freeze_offset())
        } else {
            tail
        };

        let mask = self.config.slot_mask();
        let mut pos = head;
        while pos != effective_tail {
            let idx = (pos & mask) as usize;
            // SAFETY: every slot in [head, effective_tail) was published by
            // an enqueuer and never dequeued, so it holds a live, unread `T`.
            unsafe {
                ptr::drop_in_place(self.slots[idx].value.get().cast::<T>());
            }
            pos = pos.wrapping_add(1);
        }
        *self.head.get_mut() = effective_tail;
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        self.drop_remaining_values();
    }
}

/// Number of items held in a segment given a raw `(head, tail)` pair,
/// accounting for the frozen-offset encoding. Shared by `Queue::count`'s
/// single/two/longer-chain cases.
pub(crate) fn slot_count(head: i32, tail: i32, capacity: usize, freeze_offset: i32) -> usize {
    if head == tail || head == tail.wrapping_sub(freeze_offset) {
        return 0;
    }
    let mask = (capacity - 1) as i32;
    let masked_head = head & mask;
    let masked_tail = tail & mask;
    if masked_head < masked_tail {
        (masked_tail - masked_head) as usize
    } else {
        capacity - masked_head as usize + masked_tail as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_round_trip() {
        let segment = Segment::<u64>::new(Config::new(4)); // 16 slots
        for i in 0..16u64 {
            assert!(segment.try_enqueue(i).is_ok());
        }
        assert!(segment.try_enqueue(99).is_err());

        for i in 0..16u64 {
            assert_eq!(segment.try_dequeue(), Some(i));
        }
        assert_eq!(segment.try_dequeue(), None);
    }

    #[test]
    fn freeze_blocks_further_enqueues() {
        let segment = Segment::<u64>::new(Config::new(4));
        segment.ensure_frozen();
        assert!(segment.try_enqueue(1).is_err());
        // Idempotent: calling again does not change behavior or panic.
        segment.ensure_frozen();
        assert!(segment.try_enqueue(1).is_err());
    }

    #[test]
    fn has_available_reflects_emptiness() {
        let segment = Segment::<u64>::new(Config::new(4));
        assert!(!segment.has_available());
        segment.try_enqueue(1).unwrap();
        assert!(segment.has_available());
        segment.try_dequeue().unwrap();
        assert!(!segment.has_available());
    }

    #[test]
    fn reinitialize_restores_fresh_state() {
        let mut segment = Segment::<u64>::new(Config::new(4));
        for i in 0..16u64 {
            segment.try_enqueue(i).unwrap();
        }
        for _ in 0..16 {
            segment.try_dequeue().unwrap();
        }
        segment.reinitialize();
        let (head, tail) = segment.head_tail();
        assert_eq!((head, tail), (0, 0));
        for i in 0..16u64 {
            assert!(segment.try_enqueue(i).is_ok());
        }
    }

    #[test]
    fn slot_count_matches_simple_cases() {
        assert_eq!(slot_count(0, 0, 1024, 2048), 0);
        assert_eq!(slot_count(0, 5, 1024, 2048), 5);
        assert_eq!(slot_count(1020, 1026, 1024, 2048), 6); // wraps
        assert_eq!(slot_count(0, 2048, 1024, 2048), 0); // frozen-empty
    }
}
