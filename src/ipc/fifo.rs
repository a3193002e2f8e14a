/*
 * Global Word FIFO
 *
 * Bounded ring of u32 samples from interrupt producers to a foreground
 * consumer. The ring is heap-owned and holds size + 1 words so a full
 * ring is distinguishable from an empty one. `fifo_put` never blocks and
 * reports overflow to the caller; `fifo_get` suspends on a counting
 * semaphore until data arrives.
 */

use core::ptr::null_mut;

use crate::arch::IrqCell;
use crate::heap;
use crate::sched::semaphore::Semaphore;

struct Ring {
    buf: *mut u32,
    /// Ring capacity plus the one distinguishing slot.
    slots: usize,
    put: usize,
    get: usize,
}

unsafe impl Send for Ring {}

impl Ring {
    const fn unallocated() -> Self {
        Self {
            buf: null_mut(),
            slots: 0,
            put: 0,
            get: 0,
        }
    }

    fn len(&self) -> usize {
        (self.slots + self.put - self.get) % self.slots
    }
}

static RING: IrqCell<Ring> = IrqCell::new(Ring::unallocated());
static DATA_AVAILABLE: Semaphore = Semaphore::new(0);

/// Forget the ring without freeing: the heap it lived in has just been
/// reset underneath it.
pub(crate) fn reset() {
    RING.with(|r| *r = Ring::unallocated());
    DATA_AVAILABLE.init(0);
}

/// Allocate (or replace) the FIFO with room for `size` words. `size`
/// must be a power of two; false on a bad size or OOM.
pub fn fifo_init(size: u32) -> bool {
    if size == 0 || !size.is_power_of_two() {
        log::warn!("fifo_init: size {} is not a power of two", size);
        return false;
    }
    let slots = size as usize + 1;
    let buf = heap::malloc(slots * core::mem::size_of::<u32>()) as *mut u32;
    RING.with(|r| {
        if !r.buf.is_null() {
            heap::free(r.buf as *mut u8);
        }
        *r = Ring {
            buf,
            slots,
            put: 0,
            get: 0,
        };
    });
    DATA_AVAILABLE.init(0);
    !buf.is_null()
}

/// Enter one sample. Never blocks: false when the ring is full (the
/// caller counts the loss) or unallocated. Safe from interrupt handlers.
pub fn fifo_put(data: u32) -> bool {
    let stored = RING.with(|r| {
        if r.buf.is_null() || r.len() == r.slots - 1 {
            return false;
        }
        unsafe { r.buf.add(r.put).write(data) };
        r.put = (r.put + 1) % r.slots;
        true
    });
    if stored {
        DATA_AVAILABLE.signal();
    }
    stored
}

/// Remove the oldest sample, suspending until one is available.
/// Foreground threads only.
pub fn fifo_get() -> u32 {
    DATA_AVAILABLE.wait();
    RING.with(|r| {
        let data = unsafe { r.buf.add(r.get).read() };
        r.get = (r.get + 1) % r.slots;
        data
    })
}

/// Current occupancy; positive means `fifo_get` returns immediately.
pub fn fifo_size() -> u32 {
    RING.with(|r| if r.buf.is_null() { 0 } else { r.len() as u32 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn rejects_non_power_of_two_sizes() {
        let _guard = test_support::fresh_kernel();
        assert!(!fifo_init(0));
        assert!(!fifo_init(3));
        assert!(!fifo_init(24));
        assert!(fifo_init(16));
    }

    #[test]
    fn put_get_preserves_order_and_occupancy() {
        let _guard = test_support::fresh_kernel();
        assert!(fifo_init(8));
        for v in 0..5u32 {
            assert!(fifo_put(v));
        }
        assert_eq!(fifo_size(), 5);
        for v in 0..5u32 {
            assert_eq!(fifo_get(), v);
        }
        assert_eq!(fifo_size(), 0);
    }

    #[test]
    fn overflow_is_reported_not_silent() {
        let _guard = test_support::fresh_kernel();
        assert!(fifo_init(4));
        for v in 0..4u32 {
            assert!(fifo_put(v));
        }
        assert!(!fifo_put(99), "fifth put into a 4-deep ring must fail");
        assert_eq!(fifo_size(), 4);
        assert_eq!(fifo_get(), 0);
        assert!(fifo_put(4));
        // sequence continues without the lost sample
        for v in 1..=4u32 {
            assert_eq!(fifo_get(), v);
        }
    }

    #[test]
    fn occupancy_tracks_puts_minus_gets_across_wrap() {
        let _guard = test_support::fresh_kernel();
        assert!(fifo_init(4));
        let mut seq = 0u32;
        let mut expect = 0u32;
        // drive the indices around the ring several times
        for _ in 0..10 {
            assert!(fifo_put(seq));
            seq += 1;
            assert!(fifo_put(seq));
            seq += 1;
            assert_eq!(fifo_get(), expect);
            expect += 1;
            assert_eq!(fifo_get(), expect);
            expect += 1;
            assert_eq!(fifo_size(), 0);
        }
        assert_eq!(seq, 20);
    }

    #[test]
    fn reinit_replaces_the_ring() {
        let _guard = test_support::fresh_kernel();
        let before = heap::space();
        assert!(fifo_init(8));
        assert!(fifo_put(1));
        assert!(fifo_init(8));
        // old contents and old semaphore count are gone
        assert_eq!(fifo_size(), 0);
        assert!(fifo_put(2));
        assert_eq!(fifo_get(), 2);
        // exactly one ring remains allocated
        let one_ring = before - heap::space();
        assert!(fifo_init(8));
        assert_eq!(before - heap::space(), one_ring);
    }
}
