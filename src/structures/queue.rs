use crate::memory::{AtomicCountedPtr, CountedPtr};
use crate::structures::Node;
use crossbeam_utils::CachePadded;
use rand::Rng;
use std::cmp;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

const MAX_BACKOFF: u32 = 2048;

type ReleaseFn<T> = Box<dyn Fn(NonNull<Node<T>>) + Send + Sync>;

/// A lock-free Michael-Scott FIFO queue over caller-owned nodes.
///
/// This is the two-pointer algorithm from [Simple, Fast, and Practical
/// Non-Blocking and Blocking Concurrent Queue
/// Algorithms](https://www.cs.rochester.edu/~scott/papers/1996_PODC_queues.pdf),
/// with every shared pointer widened to a counted pair so the double-width
/// CAS rules out ABA races.
///
/// The queue always holds one dummy node at its head. Each dequeue promotes
/// the dequeued node to be the new dummy and runs the release protocol on
/// the dummy it displaced, so a returned node stays readable by concurrent
/// operations until both the structure and the consumer are done with it.
/// The release callback then fires exactly once per node; consumers hand
/// nodes back through [`Queue::release`], never by calling the callback
/// themselves.
///
/// The counters on head and tail double as dequeue/enqueue sequence
/// numbers, which is where the [`Queue::queued`] estimate comes from.
pub struct Queue<T: Send> {
    on_release: ReleaseFn<T>,
    head: CachePadded<AtomicCountedPtr<Node<T>>>,
    tail: CachePadded<AtomicCountedPtr<Node<T>>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T: Send> Queue<T> {
    /// Create a queue around the caller's initial dummy node.
    ///
    /// The dummy is never returned from a dequeue; it reaches `on_release`
    /// when the first dequeued node displaces it (or at teardown). The
    /// callback receives every node the queue is finished with, exactly
    /// once each, and typically recycles it into a pool.
    ///
    /// # Safety
    ///
    /// `dummy` must be initialized and not inserted anywhere else, and must
    /// stay allocated until `on_release` hands it back. `on_release` must
    /// not free nodes to the allocator while concurrent operations may
    /// still be in flight on the queue: retry loops prefetch next-links of
    /// nodes that can already have been released, which is harmless for
    /// recycled memory but not for unmapped memory.
    pub unsafe fn new<F>(dummy: NonNull<Node<T>>, on_release: F) -> Queue<T>
    where
        F: Fn(NonNull<Node<T>>) + Send + Sync + 'static,
    {
        let d = dummy.as_ptr();
        (*d).next.store(CountedPtr::null(), Ordering::Relaxed);
        // The dummy only ever sees the structural toggle, so preset the
        // flag to make that single toggle fire.
        (*d).release.set_pending();
        Queue {
            on_release: Box::new(on_release),
            head: CachePadded::new(AtomicCountedPtr::new(CountedPtr::new(d, 0))),
            tail: CachePadded::new(AtomicCountedPtr::new(CountedPtr::new(d, 0))),
        }
    }

    fn backoff(&self, current: u32) -> u32 {
        let pause = rand::thread_rng().gen_range(0..=current);
        thread::sleep(Duration::new(0, pause * 10));
        cmp::min(current * 2, MAX_BACKOFF)
    }

    /// Add one node to the back of the queue. Returns the post-insert
    /// [`Queue::queued`] estimate.
    ///
    /// # Safety
    ///
    /// Same contract as [`Queue::new`]: `node` is initialized (or
    /// re-initialized since its last release), not inserted anywhere else,
    /// and allocated for as long as the queue can observe it.
    pub unsafe fn enqueue(&self, node: NonNull<Node<T>>) -> i64 {
        (*node.as_ptr()).next.store(CountedPtr::null(), Ordering::Relaxed);
        self.enqueue_chain(node)
    }

    /// Add a pre-linked, null-terminated chain of nodes in one insertion.
    /// The whole chain becomes visible atomically at the winning CAS.
    ///
    /// # Safety
    ///
    /// As for [`Queue::enqueue`], for every node in the chain.
    pub unsafe fn enqueue_chain(&self, first: NonNull<Node<T>>) -> i64 {
        assert!(!(*first.as_ptr()).release.is_pending());

        // Walk to the chain's last node and count as we go; the tail swing
        // below needs both.
        let mut last = first.as_ptr();
        let mut count: u64 = 1;
        loop {
            let next = (*last).next.load(Ordering::Relaxed).ptr();
            if next.is_null() {
                break;
            }
            debug_assert!(next != last);
            count += 1;
            last = next;
        }

        let mut backoff = 1;
        loop {
            match self.try_link(first.as_ptr(), last, count) {
                Ok(queued) => return queued,
                Err(()) => backoff = self.backoff(backoff),
            }
        }
    }

    unsafe fn try_link(&self, first: *mut Node<T>, last: *mut Node<T>, count: u64) -> Result<i64, ()> {
        let tail = self.tail.load(Ordering::Acquire);
        debug_assert!(tail.ptr() != first);
        let next = (*tail.ptr()).next.load(Ordering::Acquire);

        // If the tail moved between the two reads, next belongs to a stale
        // node; start over.
        if tail != self.tail.load(Ordering::Acquire) {
            return Err(());
        }

        if !next.is_null() {
            // The global tail lags behind a linked-but-unswung insert; help
            // it along and retry.
            if !self.tail.compare_and_swap(tail, next.ptr(), 1) {
                // A failed help can only mean someone advanced it already;
                // the monotonic counter rules out "changed back".
                debug_assert!(self.tail.load(Ordering::Acquire) != tail);
            }
            return Err(());
        }

        // The snapshot tail really is the last node. Seed the chain's null
        // terminator with the observed counter first: a caller that
        // zero-initializes both halves would leave (null, 0) here, a value
        // far too likely to recur later and slip past the counter.
        (*last)
            .next
            .store(CountedPtr::new(ptr::null_mut(), tail.ctr()), Ordering::Relaxed);

        if !(*tail.ptr()).next.compare_and_swap(next, first, 1) {
            return Err(());
        }

        // Best-effort swing of the tail to the chain's last node, bumping
        // its counter by the chain length so queued() accounts for every
        // element. Failure means a helper got there first.
        let _ = self.tail.compare_and_swap(tail, last, count);

        Ok(self.queued())
    }

    /// Take the node at the front of the queue, or `None` if it is empty.
    ///
    /// The returned node carries the dequeued value; the caller must hand
    /// it back through [`Queue::release`] once done reading it.
    pub fn dequeue(&self) -> Option<NonNull<Node<T>>> {
        let mut backoff = 1;
        loop {
            match self.try_dequeue() {
                Ok(res) => return res,
                Err(()) => backoff = self.backoff(backoff),
            }
        }
    }

    fn try_dequeue(&self) -> Result<Option<NonNull<Node<T>>>, ()> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        let next = unsafe { (*head.ptr()).next.load(Ordering::Acquire) };

        // Head moved between the reads: next may belong to a displaced
        // dummy; start over.
        if head != self.head.load(Ordering::Acquire) {
            return Err(());
        }

        if next.is_null() {
            // Genuinely empty. The permanent dummy means a null next can
            // never be a lagging-tail artifact.
            return Ok(None);
        }

        if head.ptr() == tail.ptr() {
            // A node is linked in but the tail hasn't been swung yet.
            // Reporting empty here would drop a linearized insert; help the
            // tail along and retry instead.
            if !self.tail.compare_and_swap(tail, next.ptr(), 1) {
                debug_assert!(self.tail.load(Ordering::Acquire) != tail);
            }
            return Err(());
        }

        if self.head.compare_and_swap(head, next.ptr(), 1) {
            // The old dummy is displaced: run the release protocol on it.
            // The node at next is the new dummy and carries the dequeued
            // value out to the caller.
            unsafe {
                self.release(NonNull::new_unchecked(head.ptr()));
                Ok(Some(NonNull::new_unchecked(next.ptr())))
            }
        } else {
            Err(())
        }
    }

    /// Hand a dequeued node back to the queue's release protocol.
    ///
    /// This is the only way application code may trigger the release
    /// callback: it fires at the second of the two relinquishments
    /// (structural displacement and this call), exactly once. Invoking the
    /// callback directly instead would double-release or leak.
    ///
    /// # Safety
    ///
    /// `node` must be one this queue returned from [`Queue::dequeue`] and
    /// not already handed back.
    pub unsafe fn release(&self, node: NonNull<Node<T>>) {
        if (*node.as_ptr()).release.toggle() {
            (self.on_release)(node);
        }
    }

    /// Point-in-time emptiness; stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        unsafe { (*head.ptr()).next.load(Ordering::Acquire).is_null() }
    }

    /// Advisory element count: enqueue sequence minus dequeue sequence. An
    /// upper bound under concurrent activity, exact when quiescent.
    pub fn queued(&self) -> i64 {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.ctr().wrapping_sub(head.ctr()) as i64
    }
}

impl<T: Send> Drop for Queue<T> {
    fn drop(&mut self) {
        // `&mut self` witnesses that no operation is in flight, which is
        // the teardown contract. Walk the remaining nodes, the current
        // dummy included, firing the callback on each directly; the toggle
        // protocol only matters under concurrency.
        let mut current = self.head.load(Ordering::Relaxed).ptr();
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::Relaxed).ptr() };
            (self.on_release)(unsafe { NonNull::new_unchecked(current) });
            current = next;
        }
        self.head.store(CountedPtr::null(), Ordering::Relaxed);
        self.tail.store(CountedPtr::null(), Ordering::Relaxed);
    }
}

impl<T: Send> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Queue {{ head: {:?}, tail: {:?} }}", *self.head, *self.tail)
    }
}
