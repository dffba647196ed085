//! Debug assertion macros for the segment sequence protocol.
//!
//! These macros provide runtime checks for the invariants documented in
//! `SPEC_FULL.md`. They are only active in debug builds
//! (`#[cfg(debug_assertions)]` via `debug_assert!`), so there is zero
//! overhead in release builds.

// =============================================================================
// INV-SEQ-01: Sequence/generation consistency
// =============================================================================

/// Assert that a slot's sequence number encodes the slot's own index.
///
/// **Invariant**: `sequence mod SEGMENT_CAPACITY == index`
///
/// Used in: `Segment::reinitialize`, quiescent-state test helpers.
macro_rules! debug_assert_sequence_generation {
    ($sequence:expr, $index:expr, $capacity:expr) => {
        debug_assert!(
            $sequence.rem_euclid($capacity as i32) == $index as i32,
            "INV-SEQ-01 violated: sequence {} at index {} is not congruent mod capacity {}",
            $sequence,
            $index,
            $capacity
        )
    };
}

// =============================================================================
// INV-SEQ-02: Bounded count / head never past tail
// =============================================================================

/// Assert that a segment's head does not advance past its tail.
///
/// **Invariant**: `head ≤ tail`
///
/// Used in: `Segment::try_dequeue` after winning the head CAS.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head.wrapping_sub($tail) <= 0,
            "INV-SEQ-02 violated: advancing head {} beyond tail {}",
            $new_head,
            $tail
        )
    };
}

// =============================================================================
// INV-SEQ-03: Monotonic progress
// =============================================================================

/// Assert that `head`/`tail` only ever increase.
///
/// **Invariant**: `new_value >= old_value` (wrapping-aware)
///
/// Used in: `Segment::try_enqueue`/`try_dequeue` after a winning CAS.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new.wrapping_sub($old) >= 0,
            "INV-SEQ-03 violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-POOL-01: Segments are clean before being handed back out
// =============================================================================

/// Assert that a segment popped off the pool has no residual live values.
///
/// **Invariant**: `head == tail` (accounting for a stale `frozen` flag not
/// yet reset) at the moment a pooled segment is reinitialized.
///
/// Used in: `Segment::reinitialize`.
macro_rules! debug_assert_pool_segment_clean {
    ($head:expr, $tail:expr, $frozen:expr, $freeze_offset:expr) => {
        debug_assert!(
            $head == $tail || ($frozen && $head == $tail.wrapping_sub($freeze_offset)),
            "INV-POOL-01 violated: pooled segment still has live values (head {}, tail {}, frozen {})",
            $head,
            $tail,
            $frozen
        )
    };
}

pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_pool_segment_clean;
pub(crate) use debug_assert_sequence_generation;
