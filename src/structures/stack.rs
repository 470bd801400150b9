use crate::memory::{AtomicCountedPtr, CountedPtr};
use crate::structures::Node;
use crossbeam_utils::CachePadded;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// A lock-free LIFO stack over caller-owned nodes.
///
/// A single counted head pointer is the only shared state; every mutation
/// goes through the double-width CAS, whose counter half defeats the ABA
/// race between reading the head and swapping it. A popped node is
/// immediately and exclusively owned by the caller again — the stack has
/// only one entry point to race on, so no release protocol is needed.
pub struct Stack<T: Send> {
    head: CachePadded<AtomicCountedPtr<Node<T>>>,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T: Send> Stack<T> {
    pub fn new() -> Self {
        Stack {
            head: CachePadded::new(AtomicCountedPtr::new(CountedPtr::null())),
        }
    }

    /// Push a node onto the stack.
    ///
    /// # Safety
    ///
    /// `node` must be initialized, not currently inserted into any
    /// container, and must stay allocated until the stack can no longer
    /// observe it: `pop` reads the next-link of a node that may have just
    /// been popped by another thread, so nodes must be recycled through a
    /// pool rather than freed while concurrent operations are possible.
    pub unsafe fn push(&self, node: NonNull<Node<T>>) {
        loop {
            let head = self.head.load(Ordering::Acquire);
            debug_assert!(head.ptr() != node.as_ptr());
            (*node.as_ptr())
                .next
                .store(CountedPtr::new(head.ptr(), 0), Ordering::Relaxed);
            if self.head.compare_and_swap(head, node.as_ptr(), 1) {
                return;
            }
        }
    }

    /// Pop the most recently pushed node, or `None` if the stack is empty.
    /// The returned node is exclusively the caller's again.
    pub fn pop(&self) -> Option<NonNull<Node<T>>> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let ptr = head.ptr();
            if ptr.is_null() {
                return None;
            }
            let next = unsafe { (*ptr).next.load(Ordering::Acquire) };
            if self.head.compare_and_swap(head, next.ptr(), 1) {
                return NonNull::new(ptr);
            }
        }
    }

    /// Point-in-time emptiness; stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T: Send> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T: Send> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Stack {{ head: {:?} }}", *self.head)
    }
}
