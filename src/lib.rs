/*
 * Kestrel RTOS Core
 *
 * A preemptive, fixed-priority round-robin kernel for single-core
 * Cortex-M4-class microcontrollers. The core owns the thread and process
 * tables, the ready ring, blocking counting semaphores, the sleep and
 * periodic-task services, the mailbox and word FIFO, a first-fit heap, and
 * a minimal ELF32 loader for flash-resident user programs.
 *
 * Everything board-specific stays outside: the board supplies a `Timebase`
 * (free-running 10 MHz counter plus two timer services) at `sched::init`,
 * routes its timer/GPIO interrupts to the exported `on_*` entry points, and
 * feeds the loader through the `BlockFile` trait. The Cortex-M context
 * switch itself (PendSV), the supervisor-call trap (SVCall) and the time
 * slice tick (SysTick) are provided here.
 *
 * The crate is `no_std` on the target. On the host the architecture layer
 * is replaced by a simulated one so the portable core runs under the
 * ordinary test harness.
 */

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod heap;
pub mod ipc;
pub mod loaders;
#[cfg(target_arch = "arm")]
pub mod logger;
pub mod sched;
pub mod syscall;
pub mod time;

pub use sched::{add_thread, id, init, kill, launch, sleep, suspend};
pub use sched::{lock_scheduler, unlock_scheduler};
pub use sched::semaphore::Semaphore;
pub use time::Timebase;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub(crate) mod test_support;
