use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicI32;

/// A single ring cell: a value and the sequence number that coordinates
/// access to it.
///
/// `sequence` is the only field ever touched via atomic operations; `value`
/// is read and written directly (through the `UnsafeCell`) by whichever
/// thread just won the head/tail CAS that grants it ownership of this slot
/// for one generation. See `Segment`'s enqueue/dequeue for the protocol.
pub(crate) struct Slot<T> {
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,
    pub(crate) sequence: AtomicI32,
}

impl<T> Slot<T> {
    pub(crate) fn new(sequence: i32) -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            sequence: AtomicI32::new(sequence),
        }
    }
}

// SAFETY: a `Slot<T>`'s `value` is only ever accessed by the single thread
// that holds exclusive ownership of it via the sequence-number protocol, so
// sharing slots across threads is sound as long as `T` itself is `Send`.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}
