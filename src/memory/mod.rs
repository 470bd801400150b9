//! The primitives the lock-free structures are built on.
//!
//! This module holds the double-width counted-pointer CAS used to avoid the
//! [ABA problem](https://en.wikipedia.org/wiki/ABA_problem), and the
//! toggle-and-test flag that drives the queue's deferred node release.

pub use self::counted_ptr::{AtomicCountedPtr, CountedPtr};
pub use self::release::ReleaseFlag;
mod counted_ptr;
mod release;
