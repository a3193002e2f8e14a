/*
 * Supervisor Call Dispatch
 *
 * `svc_entry` is the Rust half of the SVCall exception: it recovers the
 * service number from the instruction that trapped (the stacked PC points
 * just past the 2-byte `svc`, whose low byte is the immediate) and routes
 * through `dispatch`. The frame layout is the hardware-stacked one, so
 * argument registers are read and the result written in place.
 */

use super::numbers::*;
use crate::sched;
use crate::time;

/// Hardware-saved exception frame, in stacking order from the saved SP.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// SVCall handler body. Called from the naked handler with the frame
/// pointer; unsafe to call with anything else.
pub extern "C" fn svc_entry(frame: *mut TrapFrame) {
    unsafe {
        let pc = (*frame).pc as *const u16;
        let instruction = pc.sub(1).read();
        dispatch((instruction & 0xFF) as u8, &mut *frame);
    }
}

/// Route service call `number` against the caller's saved frame.
pub fn dispatch(number: u8, frame: &mut TrapFrame) {
    match number {
        SVC_ID => frame.r0 = sched::id(),
        SVC_KILL => sched::kill(),
        SVC_SLEEP => sched::sleep(frame.r0),
        SVC_TIME => frame.r0 = time::now(),
        SVC_ADD_THREAD => {
            let task: fn() = unsafe { core::mem::transmute(frame.r0 as usize) };
            let name = unsafe { name_from_user(frame.r1 as usize as *const u8) };
            frame.r0 = sched::add_thread(task, name, frame.r2 as usize, frame.r3 as u8) as u32;
        }
        n => panic!("undefined supervisor call {}", n),
    }
}

/// Borrow a NUL-terminated name out of the caller's image, capped at 32
/// bytes. The bytes outlive the thread: the image is freed only after the
/// process's last thread dies.
unsafe fn name_from_user(p: *const u8) -> &'static str {
    if p.is_null() {
        return "user thread";
    }
    let mut len = 0;
    while len < 32 && unsafe { p.add(len).read() } != 0 {
        len += 1;
    }
    let bytes = unsafe { core::slice::from_raw_parts(p, len) };
    core::str::from_utf8(bytes).unwrap_or("user thread")
}
