use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// The per-node flag behind the queue's deferred-release protocol.
///
/// A dequeued node has two parties interested in it: the queue, which keeps
/// it linked in as the dummy head until a later dequeue displaces it, and
/// the consumer the node was returned to, which may still be reading the
/// payload. Each party toggles the flag exactly once when it is done. The
/// toggle that finds the flag already set is the second one, and reports
/// that the node's release callback must fire now — exactly once, at the
/// later of the two relinquishments, whichever order they happen in.
pub struct ReleaseFlag {
    pending: AtomicBool,
}

impl ReleaseFlag {
    pub fn new() -> Self {
        ReleaseFlag {
            pending: AtomicBool::new(false),
        }
    }

    /// Record that one of the two parties is done with the node. Returns
    /// true when this was the second toggle and the callback must fire.
    pub fn toggle(&self) -> bool {
        self.pending.fetch_xor(true, Ordering::AcqRel)
    }

    /// Preset the flag so that a single toggle fires. Used for the queue's
    /// initial dummy node, which is never returned from a dequeue and so
    /// only ever sees the structural toggle.
    pub fn set_pending(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for ReleaseFlag {
    fn default() -> Self {
        ReleaseFlag::new()
    }
}

impl fmt::Debug for ReleaseFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ReleaseFlag({})", self.is_pending())
    }
}

#[cfg(test)]
mod tests {
    use super::ReleaseFlag;

    #[test]
    fn test_second_toggle_fires() {
        let flag = ReleaseFlag::new();
        assert!(!flag.toggle());
        assert!(flag.is_pending());
        assert!(flag.toggle());
        assert!(!flag.is_pending());
    }

    #[test]
    fn test_preset_fires_on_first_toggle() {
        let flag = ReleaseFlag::new();
        flag.set_pending();
        assert!(flag.toggle());
    }

    #[test]
    fn test_reusable_after_release() {
        // A recycled node goes around again with the same flag.
        let flag = ReleaseFlag::new();
        for _ in 0..3 {
            assert!(!flag.toggle());
            assert!(flag.toggle());
        }
    }
}
