/*
 * Preemptive Priority Scheduler
 *
 * Fixed-priority, round-robin among equals, on a single core. The kernel
 * state (TCB arena, ready ring, process table) lives in one interrupt-
 * masked cell; every mutation happens inside a critical section whose
 * length is bounded by a walk over the fixed-size pool.
 *
 * SCHEDULING MODEL:
 *
 * - The ready ring holds only the highest-priority band with runnable
 *   members. `current` is the running thread; the context switch always
 *   advances to `current.next`.
 * - A thread becoming ready at a better priority than `current` is linked
 *   ahead of it and a switch is pended, preempting before the slice ends.
 * - Equal-priority threads are inserted behind their peers, which yields
 *   FIFO wake-up fairness and round-robin under the slice tick.
 * - Lower-priority arrivals are left out of the ring entirely; when the
 *   live band drains, a rebuild scan over the pool promotes the next
 *   non-empty band (or collapses the ring to the idle thread).
 *
 * The actual register swap is the PendSV handler in `arch`; everything
 * that wants a switch - slice expiry, blocking, sleeping, dying, or a
 * preempting wake-up - just pends it. `switch_from_isr` is the Rust half
 * of the handler: it saves the outgoing stack pointer, advances
 * `current`, and hands back the incoming one.
 */

pub mod periodic;
pub mod process;
pub mod semaphore;
pub mod sleep;
pub(crate) mod tcb;

pub use periodic::{add_periodic, add_sw1_task, add_sw2_task, on_oneshot, on_sw1, on_sw2};
pub use process::{add_process, process_count, MAX_PROCESSES};
pub use sleep::{on_sleep_tick, sleep};
pub use tcb::{ThreadState, MAX_THREADS};

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch::{self, IrqCell};
use crate::heap;
use crate::time::{self, Timebase};
use process::Pcb;
use tcb::{Tcb, IDLE, NUM_SLOTS};

pub(crate) static KERNEL: IrqCell<Kernel> = IrqCell::new(Kernel::new());

/// Set once `launch` has handed control to the idle loop.
static OS_RUNNING: AtomicBool = AtomicBool::new(false);

/// When nonzero the slice tick stops pending switches; interrupts and
/// voluntary suspension stay live.
static SCHED_LOCKED: AtomicU32 = AtomicU32::new(0);

pub(crate) struct Kernel {
    pub(crate) threads: [Tcb; NUM_SLOTS],
    /// Slot index of the running thread.
    pub(crate) current: usize,
    pub(crate) thread_count: usize,
    next_id: u32,
    pub(crate) processes: [Pcb; MAX_PROCESSES],
    pub(crate) process_count: usize,
    /// Timestamp of the most recent 1 ms sleep tick.
    pub(crate) last_sleep_tick: u32,
}

impl Kernel {
    pub(crate) const fn new() -> Self {
        let mut threads = [const { Tcb::unused() }; NUM_SLOTS];
        threads[IDLE] = Tcb::idle();
        Self {
            threads,
            current: IDLE,
            thread_count: 0,
            next_id: 1,
            processes: [const { Pcb::unused() }; MAX_PROCESSES],
            process_count: 0,
            last_sleep_tick: 0,
        }
    }

    /// Link `a` into the ring just before `b` (tail of `b`'s band).
    fn insert_behind(&mut self, a: usize, b: usize) {
        let p = self.threads[b].prev;
        self.threads[a].next = b;
        self.threads[a].prev = p;
        self.threads[p].next = a;
        self.threads[b].prev = a;
    }

    /// Make a runnable thread eligible to execute.
    ///
    /// A better priority than `current` starts (or joins) a preempting
    /// band reachable as `current.next` and requests a switch. An equal
    /// priority joins the live band at its tail. A worse priority is left
    /// out of the ring; the rebuild in `remove_current` finds it once the
    /// live band drains.
    pub(crate) fn insert_thread(&mut self, adding: usize) {
        let cur = self.current;
        let prio = self.threads[adding].priority;
        if prio < self.threads[cur].priority {
            let next = self.threads[cur].next;
            if prio < self.threads[next].priority {
                self.threads[adding].next = adding;
                self.threads[adding].prev = adding;
                self.threads[cur].next = adding;
                arch::pend_switch();
            } else if self.threads[next].priority == prio {
                self.insert_behind(adding, next);
            }
        } else if prio == self.threads[cur].priority {
            // A blocked or sleeping `current` is on its way out of the
            // ring; anchor on its successor instead.
            let anchor = if self.threads[cur].blocked || self.threads[cur].asleep {
                self.threads[cur].next
            } else {
                cur
            };
            self.insert_behind(adding, anchor);
        }
    }

    /// Unlink the running thread and request the switch away from it.
    ///
    /// The caller has already marked `current` asleep, blocked, or dead.
    /// If it was the last of its band, the pool is rescanned to build the
    /// ring from the next non-empty priority band, falling back to idle.
    pub(crate) fn remove_current(&mut self) {
        let cur = self.current;
        if self.threads[cur].next == cur {
            let mut new_cur = IDLE;
            self.threads[IDLE].next = IDLE;
            self.threads[IDLE].prev = IDLE;
            for i in 0..MAX_THREADS {
                if !self.threads[i].runnable() {
                    continue;
                }
                let prio = self.threads[i].priority;
                if prio < self.threads[new_cur].priority {
                    new_cur = i;
                    self.threads[i].next = i;
                    self.threads[i].prev = i;
                } else if prio == self.threads[new_cur].priority {
                    self.insert_behind(i, new_cur);
                }
            }
            self.threads[cur].next = new_cur;
        } else {
            let (p, n) = (self.threads[cur].prev, self.threads[cur].next);
            self.threads[p].next = n;
            self.threads[n].prev = p;
        }
        arch::pend_switch();
    }

    /// Advance `current` around the ring. Called with interrupts masked
    /// from the context-switch handler.
    pub(crate) fn pick_next(&mut self) -> usize {
        self.current = self.threads[self.current].next;
        self.current
    }

    pub(crate) fn add_thread(
        &mut self,
        task: fn(),
        name: &'static str,
        stack_bytes: usize,
        priority: u8,
    ) -> bool {
        if self.thread_count >= MAX_THREADS {
            log::warn!("add_thread '{}': thread table full", name);
            return false;
        }
        let slot = match (0..MAX_THREADS).find(|&i| !self.threads[i].alive) {
            Some(i) => i,
            None => return false,
        };

        let stack = heap::calloc(stack_bytes);
        if stack.is_null() {
            log::warn!("add_thread '{}': no memory for {} byte stack", name, stack_bytes);
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;
        let parent = self.threads[self.current].parent;
        if let Some(p) = parent {
            self.processes[p].threads += 1;
        }

        let t = &mut self.threads[slot];
        *t = Tcb {
            sp: build_initial_frame(task, stack, stack_bytes),
            stack,
            stack_bytes,
            id,
            name,
            priority,
            alive: true,
            asleep: false,
            blocked: false,
            sleep_left: 0,
            next: IDLE,
            prev: IDLE,
            next_blocked: None,
            parent,
        };
        self.thread_count += 1;
        self.insert_thread(slot);
        log::info!("thread {} '{}' created at priority {}", id, name, priority);
        true
    }

    pub(crate) fn kill_current(&mut self) {
        let cur = self.current;
        if cur == IDLE {
            panic!("kill called from the idle thread");
        }
        log::info!(
            "thread {} '{}' exiting",
            self.threads[cur].id,
            self.threads[cur].name
        );
        self.thread_count -= 1;
        self.threads[cur].alive = false;
        heap::free(self.threads[cur].stack);
        self.threads[cur].stack = core::ptr::null_mut();
        if let Some(p) = self.threads[cur].parent.take() {
            self.release_process_ref(p);
        }
        self.remove_current();
    }
}

/// Lay out the synthetic exception frame a new thread starts from.
///
/// The first return-from-exception pops it: thumb-state xPSR, PC at the
/// entry point, and LR aimed at `thread_exit` so a returning entry
/// function terminates cleanly. The software-saved slice below carries a
/// standard-frame EXC_RETURN, so no FP state is restored.
fn build_initial_frame(task: fn(), stack: *mut u8, stack_bytes: usize) -> *mut u32 {
    unsafe {
        let top = stack.add(stack_bytes);
        let top = (top as usize & !7) as *mut u32;
        let mut sp = top;
        sp = sp.sub(1);
        sp.write(0x0100_0000); // xPSR: thumb
        sp = sp.sub(1);
        sp.write(task as usize as u32); // PC
        sp = sp.sub(1);
        sp.write(thread_exit as usize as u32); // LR
        sp = sp.sub(5); // R12, R3..R0 (stack arrives zeroed)
        sp = sp.sub(1);
        sp.write(arch::EXC_RETURN_THREAD);
        sp = sp.sub(8); // R4..R11
        sp
    }
}

/// Landing pad for entry functions that return.
fn thread_exit() {
    kill();
    // the pended switch fires as soon as interrupts allow
    loop {
        arch::wait_for_interrupt();
    }
}

/// Initialize the kernel: interrupts masked, heap mapped, timebase
/// registered, idle thread in place. Call once before anything else.
pub fn init(timebase: &'static dyn Timebase) {
    arch::disable_interrupts();
    OS_RUNNING.store(false, Ordering::SeqCst);
    time::set_timebase(timebase);
    heap::init();
    KERNEL.with(|k| *k = Kernel::new());
    periodic::reset();
    crate::ipc::reset_fifo();
    log::info!(
        "kernel initialized: {} thread slots, {} process slots, {} KiB heap",
        MAX_THREADS,
        MAX_PROCESSES,
        heap::HEAP_BYTES / 1024
    );
}

/// Start scheduling and become the idle thread. Never returns.
///
/// `slice_ticks` is the SysTick period between forced round-robin
/// switches among equal-priority threads.
pub fn launch(slice_ticks: u32) -> ! {
    log::info!("launch: {} tick time slice", slice_ticks);
    arch::start_preemption(slice_ticks);
    if let Some(tb) = time::timebase() {
        tb.start_sleep_tick();
    }
    periodic::start();
    time::clear();
    OS_RUNNING.store(true, Ordering::SeqCst);
    arch::enable_interrupts();
    loop {
        arch::wait_for_interrupt();
    }
}

pub(crate) fn is_running() -> bool {
    OS_RUNNING.load(Ordering::SeqCst)
}

/// Add a foreground thread. False when the table is full or the stack
/// cannot be allocated. Callable from threads and interrupt handlers.
pub fn add_thread(task: fn(), name: &'static str, stack_bytes: usize, priority: u8) -> bool {
    KERNEL.with(|k| k.add_thread(task, name, stack_bytes, priority))
}

/// Identifier of the running thread. The idle thread is 0.
pub fn id() -> u32 {
    KERNEL.with(|k| k.threads[k.current].id)
}

/// Terminate the running thread, releasing its TCB, stack, and process
/// reference. Kill is self-only.
pub fn kill() {
    KERNEL.with(|k| k.kill_current());
}

/// Yield the rest of the time slice.
pub fn suspend() {
    arch::pend_switch();
}

/// Suppress time-slice preemption, returning the previous state for
/// `unlock_scheduler`. Background interrupts keep running; only the
/// round-robin rotation pauses.
pub fn lock_scheduler() -> u32 {
    SCHED_LOCKED.swap(1, Ordering::SeqCst)
}

/// Restore the preemption state saved by `lock_scheduler`.
pub fn unlock_scheduler(previous: u32) {
    SCHED_LOCKED.store(previous, Ordering::SeqCst);
}

/// Slice tick entry point (SysTick on the target).
pub fn on_slice_tick() {
    if SCHED_LOCKED.load(Ordering::SeqCst) == 0 {
        arch::pend_switch();
    }
}

/// Rust half of the context switch: record the outgoing stack pointer,
/// advance around the ring, return the incoming one. Runs with interrupts
/// masked inside the PendSV handler.
#[cfg(target_arch = "arm")]
pub(crate) extern "C" fn switch_from_isr(sp: *mut u32) -> *mut u32 {
    KERNEL.with(|k| {
        let cur = k.current;
        k.threads[cur].sp = sp;
        let next = k.pick_next();
        k.threads[next].sp
    })
}
