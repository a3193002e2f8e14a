/*
 * Cortex-M Port
 *
 * Critical sections save and restore PRIMASK on the caller's stack frame
 * (the token), so they nest. The context switch is the classic Cortex-M
 * arrangement: anything that wants a switch pends PendSV, configured at
 * the lowest exception priority, and the PendSV handler performs the
 * register swap once every other handler has unwound.
 *
 * Threads run privileged in thread mode on MSP; the handlers therefore
 * save and restore frames on the outgoing thread's own stack. The
 * software-saved part of the frame is R4-R11 plus the EXC_RETURN value,
 * whose bit 4 records whether the hardware stacked an extended (FP) frame;
 * S16-S31 are saved only in that case.
 *
 * Stack layout at a switch, descending from the pre-exception SP:
 *
 *   xPSR, PC, LR, R12, R3, R2, R1, R0     hardware-saved
 *   [S31 .. S16]                          only when EXC_RETURN bit 4 == 0
 *   EXC_RETURN, R11 .. R4                 software-saved; SP ends at R4
 *
 * The EXC_RETURN slot sits at the bottom of the fixed-size slice so the
 * restore path can pop it and decide whether an FP block follows.
 */

use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::primask;

/// EXC_RETURN for a fresh thread: thread mode, MSP, standard frame.
pub(crate) const EXC_RETURN_THREAD: u32 = 0xFFFF_FFF9;

/// Mask interrupts, returning the previous enable state as the token.
pub fn start_critical() -> u32 {
    let was_enabled = primask::read().is_active();
    cortex_m::interrupt::disable();
    was_enabled as u32
}

/// Restore the interrupt enable state saved by `start_critical`.
pub fn end_critical(token: u32) {
    if token != 0 {
        unsafe { cortex_m::interrupt::enable() };
    }
}

pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

pub fn enable_interrupts() {
    unsafe { cortex_m::interrupt::enable() };
}

/// Request a context switch. Fires once interrupts allow and every
/// higher-priority handler has completed.
pub fn pend_switch() {
    SCB::set_pendsv();
}

pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Exception-priority setup and time-slice timer, performed by `launch`.
///
/// PendSV drops to the lowest priority so the register swap never
/// interrupts another handler; SysTick sits in the middle of the range so
/// board interrupts can be placed on either side of the slice tick.
pub(crate) fn start_preemption(slice_ticks: u32) {
    unsafe {
        let scb = &*SCB::ptr();
        scb.shpr[10].write(0xFF); // PendSV: lowest
        scb.shpr[11].write(0xC0); // SysTick: priority 6 of 8

        let syst = &*SYST::ptr();
        syst.rvr.write(slice_ticks.saturating_sub(1).max(1) & 0x00FF_FFFF);
        syst.cvr.write(0);
        // CLKSOURCE | TICKINT | ENABLE
        syst.csr.modify(|v| v | 0b111);
    }
}

/// Context-switch exception.
///
/// Saves the outgoing thread's remaining registers on its own stack, asks
/// the scheduler for the next stack pointer, and unwinds into the incoming
/// thread. Interrupts are masked across the swap so the ready ring cannot
/// change underneath it.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(
        "cpsid i",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq sp!, {{s16-s31}}",
        "push {{r4-r11, lr}}",
        "mov r0, sp",
        "bl {switch}",
        "mov sp, r0",
        "pop {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq sp!, {{s16-s31}}",
        "cpsie i",
        "bx lr",
        switch = sym crate::sched::switch_from_isr,
    )
}

/// Supervisor-call trap. Hands the hardware-saved frame to the dispatcher;
/// results come back in the frame's R0 slot.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SVCall() {
    core::arch::naked_asm!(
        "mov r0, sp",
        "push {{r4, lr}}",
        "bl {entry}",
        "pop {{r4, pc}}",
        entry = sym crate::syscall::svc_entry,
    )
}

/// Time-slice tick: its sole action is to pend the switch.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    crate::sched::on_slice_tick();
}
