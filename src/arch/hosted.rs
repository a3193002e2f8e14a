/*
 * Hosted Port
 *
 * Stand-in architecture layer for running the portable core on the
 * development machine. PRIMASK is an atomic flag and "pending" a context
 * switch latches a second flag that tests read back instead of taking an
 * exception. Tests drive the same scheduler entry points the real
 * handlers call.
 */

use core::sync::atomic::{AtomicBool, Ordering};

static MASKED: AtomicBool = AtomicBool::new(false);
static SWITCH_PENDED: AtomicBool = AtomicBool::new(false);
static PREEMPTION_ON: AtomicBool = AtomicBool::new(false);

pub(crate) const EXC_RETURN_THREAD: u32 = 0xFFFF_FFF9;

pub fn start_critical() -> u32 {
    let was_enabled = !MASKED.swap(true, Ordering::SeqCst);
    was_enabled as u32
}

pub fn end_critical(token: u32) {
    if token != 0 {
        MASKED.store(false, Ordering::SeqCst);
    }
}

pub fn disable_interrupts() {
    MASKED.store(true, Ordering::SeqCst);
}

pub fn enable_interrupts() {
    MASKED.store(false, Ordering::SeqCst);
}

pub fn pend_switch() {
    SWITCH_PENDED.store(true, Ordering::SeqCst);
}

pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

pub(crate) fn start_preemption(_slice_ticks: u32) {
    PREEMPTION_ON.store(true, Ordering::SeqCst);
}

/// Consume a latched switch request. Test-side analogue of PendSV firing.
pub fn take_switch_request() -> bool {
    SWITCH_PENDED.swap(false, Ordering::SeqCst)
}

/// Whether a switch request is latched.
pub fn switch_requested() -> bool {
    SWITCH_PENDED.load(Ordering::SeqCst)
}
