use portable_atomic::AtomicU128;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::Ordering;

/// A (pointer, counter) pair, the unit the double-width CAS operates on.
///
/// The counter is bumped on every successful swap of the location holding
/// the pair, so two observations of the same pointer value separated by any
/// intervening modification compare unequal. Equality compares the pointer
/// AND the counter; this is what snapshot re-validation relies on.
pub struct CountedPtr<T> {
    ptr: *mut T,
    ctr: u64,
}

impl<T> CountedPtr<T> {
    pub fn new(ptr: *mut T, ctr: u64) -> Self {
        CountedPtr { ptr, ctr }
    }

    pub fn null() -> Self {
        CountedPtr {
            ptr: ptr::null_mut(),
            ctr: 0,
        }
    }

    pub fn ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn ctr(&self) -> u64 {
        self.ctr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Pointer in the low 64 bits, counter in the high 64.
    fn pack(self) -> u128 {
        (self.ptr as usize as u64 as u128) | ((self.ctr as u128) << 64)
    }

    fn unpack(value: u128) -> Self {
        CountedPtr {
            ptr: value as u64 as usize as *mut T,
            ctr: (value >> 64) as u64,
        }
    }
}

// Derives would demand T: Clone etc. for a field that is only a pointer.
impl<T> Clone for CountedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CountedPtr<T> {}

impl<T> PartialEq for CountedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.ctr == other.ctr
    }
}

impl<T> Eq for CountedPtr<T> {}

impl<T> fmt::Debug for CountedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CountedPtr({:p}, {})", self.ptr, self.ctr)
    }
}

/// A memory location holding a `CountedPtr`, updated only through
/// double-width atomic operations.
///
/// Both halves live in one `AtomicU128`, so a compare-exchange of the packed
/// value is exactly the one-instruction double-width CAS the algorithms
/// need. The atomic type is aligned to twice the pointer width, which is the
/// alignment the hardware instruction requires; locations of this type can
/// sit in memory shared between processes.
pub struct AtomicCountedPtr<T> {
    cell: AtomicU128,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T> Send for AtomicCountedPtr<T> {}
unsafe impl<T> Sync for AtomicCountedPtr<T> {}

impl<T> AtomicCountedPtr<T> {
    pub fn new(p: CountedPtr<T>) -> Self {
        AtomicCountedPtr {
            cell: AtomicU128::new(p.pack()),
            _marker: PhantomData,
        }
    }

    pub fn load(&self, order: Ordering) -> CountedPtr<T> {
        CountedPtr::unpack(self.cell.load(order))
    }

    /// Plain store. Only correct while no other thread can race on the
    /// location (node initialization, teardown under `&mut`).
    pub fn store(&self, p: CountedPtr<T>, order: Ordering) {
        self.cell.store(p.pack(), order);
    }

    /// The double-width CAS: if the location still holds `old` (pointer and
    /// counter both), replace it with `(new_ptr, old.ctr + inc)` and return
    /// true; otherwise leave it alone and return false.
    ///
    /// `inc` must be strictly positive, or the counter would stop
    /// disambiguating re-observations of the same pointer.
    pub fn compare_and_swap(&self, old: CountedPtr<T>, new_ptr: *mut T, inc: u64) -> bool {
        assert!(inc > 0);
        let new = CountedPtr::new(new_ptr, old.ctr.wrapping_add(inc));
        self.cell
            .compare_exchange(old.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T> fmt::Debug for AtomicCountedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Atomic{:?}", self.load(Ordering::Relaxed))
    }
}
