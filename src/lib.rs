//! Lock-free concurrent collections for Rust.
//!
//! This crate provides a non-blocking FIFO queue and LIFO stack that can be
//! shared by any number of threads without mutual exclusion. Both are built
//! on a double-width compare-and-swap over a (pointer, counter) pair, which
//! defeats the [ABA problem](https://en.wikipedia.org/wiki/ABA_problem) by
//! bumping a monotonic counter on every successful swap. The queue adds a
//! deferred-release protocol so that a dequeued node can be handed back to
//! its owner exactly once, even while concurrent operations may still be
//! reading its link field.
//!
//! Nodes are caller-owned: the containers link and unlink them but never
//! allocate or free. This makes the structures usable where the elements
//! live in a shared-memory region or a preallocated pool.

pub mod memory;
pub mod structures;
