/*
 * Architecture Layer
 *
 * Everything the portable kernel needs from the machine: PRIMASK-style
 * critical sections, a way to pend the context-switch exception, and the
 * idle wait. The Cortex-M implementation also carries the PendSV/SVCall/
 * SysTick handlers and the exception-priority setup performed at launch.
 *
 * On the host (tests) a simulated implementation latches switch requests
 * instead of raising interrupts, so the scheduler's decisions can be
 * observed synchronously.
 */

use core::cell::UnsafeCell;

#[cfg(target_arch = "arm")]
mod arm_m;
#[cfg(target_arch = "arm")]
pub use arm_m::*;

#[cfg(not(target_arch = "arm"))]
mod hosted;
#[cfg(not(target_arch = "arm"))]
pub use hosted::*;

/// Run `f` with interrupts masked.
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    let crit = start_critical();
    let r = f();
    end_critical(crit);
    r
}

/// Interrupt-masked cell.
///
/// Single-core equivalent of a lock: entering the cell masks interrupts,
/// which excludes every other accessor. All kernel singletons live in one
/// of these. The closure must not re-enter the same cell.
pub(crate) struct IrqCell<T> {
    inner: UnsafeCell<T>,
}

unsafe impl<T> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let crit = start_critical();
        // Interrupts are off and the core is single-threaded, so the
        // closure holds the only live reference.
        let r = f(unsafe { &mut *self.inner.get() });
        end_critical(crit);
        r
    }
}
