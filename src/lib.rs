//! An unbounded, lock-free, multi-producer/multi-consumer FIFO queue built
//! from a chain of fixed-capacity Vyukov ring-buffer segments.
//!
//! Steady-state `enqueue`/`try_dequeue` never take a lock: each operates on
//! the current tail or head segment using only atomic compare-and-swap on
//! that segment's cursors and per-slot sequence numbers. A short-lived
//! mutex is taken only for the rare structural transitions — linking a new
//! segment onto the chain, retiring a drained one back to the pool, and the
//! `count`/`clear` operations that must see a consistent multi-segment
//! view.
//!
//! ```
//! use segring::Queue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(Queue::new());
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..1000 {
//!             queue.enqueue(i);
//!         }
//!     })
//! };
//! producer.join().unwrap();
//!
//! let mut drained = 0;
//! while queue.try_dequeue().is_some() {
//!     drained += 1;
//! }
//! assert_eq!(drained, 1000);
//! ```

mod backoff;
mod config;
mod invariants;
mod metrics;
mod pool;
mod queue;
mod segment;
mod slot;

pub use config::{Config, LARGE_SEGMENTS, SMALL_SEGMENTS};
pub use metrics::MetricsSnapshot;
pub use queue::Queue;
