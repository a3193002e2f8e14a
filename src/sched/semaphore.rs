/*
 * Counting Semaphores
 *
 * The counter follows the textbook convention: positive means free units,
 * and when negative its magnitude equals the number of blocked threads.
 * Waiters queue by priority (head = highest, FIFO among equals) through
 * the TCB's `next_blocked` link; the semaphore does not own them, the
 * pool does.
 *
 * `signal` and `bsignal` are interrupt-safe. `wait` suspends and must
 * only be called from thread context.
 */

use core::cell::UnsafeCell;

use super::{Kernel, KERNEL};

pub(crate) struct SemState {
    pub(crate) value: i32,
    pub(crate) head: Option<usize>,
}

/// Counting semaphore with a priority-ordered blocked queue.
pub struct Semaphore {
    inner: UnsafeCell<SemState>,
}

// Accessed only inside kernel critical sections on a single core.
unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(value: i32) -> Self {
        Self {
            inner: UnsafeCell::new(SemState { value, head: None }),
        }
    }

    /// Reset the counter and empty the blocked queue.
    pub fn init(&self, value: i32) {
        KERNEL.with(|_| {
            let s = unsafe { &mut *self.inner.get() };
            s.value = value;
            s.head = None;
        });
    }

    /// Take a unit, suspending until one is available.
    pub fn wait(&self) {
        KERNEL.with(|k| wait_inner(k, unsafe { &mut *self.inner.get() }));
    }

    /// Release a unit, waking the head waiter if any thread is blocked.
    pub fn signal(&self) {
        KERNEL.with(|k| signal_inner(k, unsafe { &mut *self.inner.get() }));
    }

    /// Binary wait; identical suspension behavior to `wait`.
    pub fn bwait(&self) {
        self.wait();
    }

    /// Binary signal: as `signal`, saturating the counter at 1.
    pub fn bsignal(&self) {
        KERNEL.with(|k| {
            let s = unsafe { &mut *self.inner.get() };
            let was = s.value;
            s.value = (s.value + 1).min(1);
            if was < 0 {
                wake_head(k, s);
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn value(&self) -> i32 {
        KERNEL.with(|_| unsafe { (*self.inner.get()).value })
    }
}

pub(crate) fn wait_inner(k: &mut Kernel, s: &mut SemState) {
    let cur = k.current;
    k.threads[cur].next_blocked = None;
    s.value -= 1;
    if s.value >= 0 {
        return;
    }
    k.threads[cur].blocked = true;
    let prio = k.threads[cur].priority;
    match s.head {
        None => s.head = Some(cur),
        Some(h) if k.threads[h].priority > prio => {
            k.threads[cur].next_blocked = Some(h);
            s.head = Some(cur);
        }
        Some(h) => {
            // walk past every waiter at better-or-equal priority
            let mut tail = h;
            while let Some(n) = k.threads[tail].next_blocked {
                if k.threads[n].priority > prio {
                    break;
                }
                tail = n;
            }
            k.threads[cur].next_blocked = k.threads[tail].next_blocked;
            k.threads[tail].next_blocked = Some(cur);
        }
    }
    k.remove_current();
}

pub(crate) fn signal_inner(k: &mut Kernel, s: &mut SemState) {
    let was = s.value;
    s.value += 1;
    if was < 0 {
        wake_head(k, s);
    }
}

fn wake_head(k: &mut Kernel, s: &mut SemState) {
    if let Some(h) = s.head {
        k.threads[h].blocked = false;
        s.head = k.threads[h].next_blocked.take();
        k.insert_thread(h);
    }
}
