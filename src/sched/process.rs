/*
 * Process Management
 *
 * A process is a container for two heap-owned images (code and writable
 * data) and a count of the threads running inside it. The loader creates
 * one per successfully installed ELF; `add_thread` from inside a process
 * inherits the parent reference. When the last thread dies the images are
 * freed and the slot is released.
 */

use core::ptr::null_mut;

use crate::heap;

use super::{Kernel, KERNEL};

/// Maximum number of concurrently loaded processes.
pub const MAX_PROCESSES: usize = 4;

/// Stack size for a loaded process's entry thread.
pub const PROCESS_STACK_BYTES: usize = 1024;

/// Process control block: owner of the text and data images.
pub(crate) struct Pcb {
    pub(crate) text: *mut u8,
    pub(crate) data: *mut u8,
    /// Live threads holding a reference to this process.
    pub(crate) threads: u32,
    pub(crate) alive: bool,
}

impl Pcb {
    pub(crate) const fn unused() -> Self {
        Self {
            text: null_mut(),
            data: null_mut(),
            threads: 0,
            alive: false,
        }
    }
}

impl Kernel {
    /// Install a process around `entry` and spawn its first thread.
    pub(crate) fn add_process(
        &mut self,
        entry: fn(),
        text: *mut u8,
        data: *mut u8,
        stack_bytes: usize,
        priority: u8,
    ) -> bool {
        if self.process_count >= MAX_PROCESSES {
            log::warn!("add_process: process table full");
            return false;
        }
        let slot = match (0..MAX_PROCESSES).find(|&i| !self.processes[i].alive) {
            Some(i) => i,
            None => return false,
        };
        self.processes[slot] = Pcb {
            text,
            data,
            threads: 0,
            alive: true,
        };
        self.process_count += 1;

        // The entry thread inherits its parent from the creator; adopt the
        // new process for the duration of the spawn.
        let cur = self.current;
        let saved = self.threads[cur].parent;
        self.threads[cur].parent = Some(slot);
        let ok = self.add_thread(entry, "process entry", stack_bytes, priority);
        self.threads[cur].parent = saved;

        if !ok {
            self.processes[slot].alive = false;
            self.process_count -= 1;
        }
        ok
    }

    /// Drop one thread reference; the last one out frees the images.
    pub(crate) fn release_process_ref(&mut self, slot: usize) {
        let pcb = &mut self.processes[slot];
        pcb.threads -= 1;
        if pcb.threads > 0 {
            return;
        }
        log::info!("process in slot {} exited, releasing images", slot);
        pcb.alive = false;
        heap::free(pcb.data);
        heap::free(pcb.text);
        pcb.data = null_mut();
        pcb.text = null_mut();
        self.process_count -= 1;
    }
}

/// Add a process whose images are already resident, spawning its entry
/// thread at `priority`. False when no PCB or TCB slot is free.
pub fn add_process(
    entry: fn(),
    text: *mut u8,
    data: *mut u8,
    stack_bytes: usize,
    priority: u8,
) -> bool {
    KERNEL.with(|k| k.add_process(entry, text, data, stack_bytes, priority))
}

/// Number of live processes.
pub fn process_count() -> usize {
    KERNEL.with(|k| k.process_count)
}
