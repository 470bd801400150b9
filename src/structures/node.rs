use crate::memory::{AtomicCountedPtr, CountedPtr, ReleaseFlag};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

/// The intrusive element both containers link together.
///
/// A node owns its payload and one counted next-link; the link belongs
/// exclusively to whichever container the node is currently inserted into.
/// The caller allocates nodes (heap, pool, shared-memory slab) and keeps
/// them alive until the container hands them back: immediately on `pop` for
/// the stack, through the release callback for the queue. The payload sits
/// inside the node, so a returned node handle gives typed access to the
/// value with no offset arithmetic.
#[derive(Debug)]
pub struct Node<T> {
    pub(crate) next: AtomicCountedPtr<Node<T>>,
    pub(crate) release: ReleaseFlag,
    value: Option<T>,
}

impl<T> Node<T> {
    pub fn new(value: T) -> Self {
        Node {
            next: AtomicCountedPtr::new(CountedPtr::null()),
            release: ReleaseFlag::new(),
            value: Some(value),
        }
    }

    /// A node with no payload, for use as a queue's initial dummy.
    pub fn empty() -> Self {
        Node {
            next: AtomicCountedPtr::new(CountedPtr::null()),
            release: ReleaseFlag::new(),
            value: None,
        }
    }

    /// Re-initialize a node for reuse after its release callback has fired.
    ///
    /// Re-initializing a node that is still linked in, or still awaiting its
    /// second release toggle, is a programming error and aborts here rather
    /// than corrupting the structure later.
    pub fn reinit(&mut self) {
        assert!(!self.release.is_pending());
        self.next.store(CountedPtr::null(), Ordering::Relaxed);
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    pub fn set_value(&mut self, value: T) -> Option<T> {
        self.value.replace(value)
    }

    pub fn take_value(&mut self) -> Option<T> {
        self.value.take()
    }

    /// Link this node to `next`, for building a chain to pass to
    /// `Queue::enqueue_chain`. Only valid while the node is not inserted.
    pub fn set_next(&mut self, next: Option<NonNull<Node<T>>>) {
        let ptr = next.map_or(ptr::null_mut(), NonNull::as_ptr);
        self.next.store(CountedPtr::new(ptr, 0), Ordering::Relaxed);
    }
}
