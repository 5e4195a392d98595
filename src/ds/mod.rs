//! Internal data structures shared by the cache subsystems.
//!
//! - [`ring`]: bounded lock-free MPSC queue backing the write coalescer.
//! - [`deadline_heap`]: lazy min-heap driving the expiration worker.
//! - [`radix`]: compressed prefix tree for string-key scans.

pub mod deadline_heap;
pub mod radix;
pub mod ring;

pub use deadline_heap::DeadlineHeap;
pub use radix::RadixTree;
pub use ring::MpscRing;
