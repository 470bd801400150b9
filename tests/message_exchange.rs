//! End-to-end producer/consumer exchange over one queue.
//!
//! Four senders race four receivers through 200 000 tagged messages drawn
//! from a 512-slot recycled node slab. A bitmap records each slot as "in
//! flight" when a sender claims it and is cleared by the release callback,
//! so a double send, double release, or lost message shows up as a bitmap
//! inconsistency. Senders observe a soft in-flight cap by polling the
//! queue's size estimate.

use atomicq::structures::{Node, Queue};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const NMSG: i64 = 200_000;
const MAX_BIT: usize = 512;
const CAPACITY: i64 = 64;
const NUM_SENDERS: usize = 4;
const NUM_RECEIVERS: usize = 4;
const SHUTDOWN: i64 = 9_999_999_999;

struct Msg {
    slot: usize,
    tag: i64,
}

/// All harness state lives here; each run builds a fresh one.
struct ExchangeState {
    map: [AtomicU64; MAX_BIT / 64],
    slab: Vec<*mut Node<Msg>>,
    next_slot: AtomicUsize,
    sent: AtomicI64,
    received: AtomicI64,
    releases: AtomicI64,
}

unsafe impl Send for ExchangeState {}
unsafe impl Sync for ExchangeState {}

impl ExchangeState {
    fn new() -> Self {
        ExchangeState {
            map: std::array::from_fn(|_| AtomicU64::new(0)),
            slab: (0..MAX_BIT)
                .map(|_| Box::into_raw(Box::new(Node::empty())))
                .collect(),
            next_slot: AtomicUsize::new(0),
            sent: AtomicI64::new(0),
            received: AtomicI64::new(0),
            releases: AtomicI64::new(0),
        }
    }

    /// Mark a slot in flight; true if it already was.
    fn set_bit(&self, bit: usize) -> bool {
        let mask = 1u64 << (bit % 64);
        self.map[bit / 64].fetch_or(mask, Ordering::AcqRel) & mask != 0
    }

    /// Clear a slot; true if it was set.
    fn clear_bit(&self, bit: usize) -> bool {
        let mask = 1u64 << (bit % 64);
        self.map[bit / 64].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    fn any_bit_set(&self) -> bool {
        self.map.iter().any(|word| word.load(Ordering::Acquire) != 0)
    }

    /// Claim a free slab slot and hand out its re-initialized node.
    fn get_msg(&self) -> NonNull<Node<Msg>> {
        loop {
            let slot = self.next_slot.fetch_add(1, Ordering::AcqRel) % MAX_BIT;
            if !self.set_bit(slot) {
                let node = self.slab[slot];
                unsafe {
                    (*node).reinit();
                    (*node).set_value(Msg {
                        slot,
                        tag: slot as i64,
                    });
                }
                return unsafe { NonNull::new_unchecked(node) };
            }
        }
    }
}

impl Drop for ExchangeState {
    fn drop(&mut self) {
        for &node in &self.slab {
            unsafe { drop(Box::from_raw(node)) };
        }
    }
}

fn sender(state: &ExchangeState, queue: &Queue<Msg>) {
    loop {
        if state.sent.fetch_add(1, Ordering::AcqRel) >= NMSG {
            state.sent.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        // Soft backpressure: the size estimate is advisory, so this is a
        // cap on average, not a hard bound.
        while queue.queued() > CAPACITY {
            thread::yield_now();
        }

        let msg = state.get_msg();
        unsafe { queue.enqueue(msg) };
    }
}

fn receiver(state: &ExchangeState, queue: &Queue<Msg>) {
    loop {
        let node = loop {
            match queue.dequeue() {
                Some(node) => break node,
                None => thread::yield_now(),
            }
        };

        let tag = unsafe { node.as_ref().value().unwrap().tag };
        if tag == SHUTDOWN {
            unsafe { queue.release(node) };
            return;
        }

        state.received.fetch_add(1, Ordering::AcqRel);
        unsafe { queue.release(node) };
    }
}

#[test]
fn test_four_by_four_exchange() {
    assert!(MAX_BIT as i64 > CAPACITY);

    let state = Arc::new(ExchangeState::new());

    let dummy = state.get_msg();
    let cb_state = Arc::clone(&state);
    let on_release = move |node: NonNull<Node<Msg>>| {
        cb_state.releases.fetch_add(1, Ordering::AcqRel);
        let slot = unsafe { node.as_ref() }.value().unwrap().slot;
        // A clear bit here means a message was released that was never
        // sent, or released twice.
        assert!(cb_state.clear_bit(slot));
    };
    let queue: Arc<Queue<Msg>> = Arc::new(unsafe { Queue::new(dummy, on_release) });

    let mut senders = Vec::new();
    for _ in 0..NUM_SENDERS {
        let state = Arc::clone(&state);
        let queue = Arc::clone(&queue);
        senders.push(thread::spawn(move || sender(&state, &queue)));
    }

    let mut receivers = Vec::new();
    for _ in 0..NUM_RECEIVERS {
        let state = Arc::clone(&state);
        let queue = Arc::clone(&queue);
        receivers.push(thread::spawn(move || receiver(&state, &queue)));
    }

    for handle in senders {
        handle.join().unwrap();
    }

    // One shutdown sentinel per receiver drains them.
    for _ in 0..NUM_RECEIVERS {
        let mut msg = state.get_msg();
        unsafe {
            msg.as_mut().value_mut().unwrap().tag = SHUTDOWN;
            queue.enqueue(msg);
        }
    }

    for handle in receivers {
        handle.join().unwrap();
    }

    assert_eq!(state.sent.load(Ordering::Acquire), NMSG);
    assert_eq!(state.received.load(Ordering::Acquire), NMSG);
    assert!(queue.is_empty());
    assert_eq!(queue.queued(), 0);

    // Teardown releases the one node still held as the dummy.
    drop(Arc::into_inner(queue).unwrap());

    // Every claimed slot came back: messages, initial dummy, sentinels.
    assert!(!state.any_bit_set());
    assert_eq!(
        state.releases.load(Ordering::Acquire),
        NMSG + 1 + NUM_RECEIVERS as i64
    );
}
