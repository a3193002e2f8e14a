/*
 * Thread Control Blocks and the Ready Ring
 *
 * The TCB pool is a fixed array; ring and queue membership is expressed
 * with slot indices instead of pointers. The ready ring is circular and
 * doubly linked through `next`/`prev`, and only ever contains the
 * highest-priority band with runnable members: lower-priority ready
 * threads sit outside the ring until a rebuild scan (in
 * `Kernel::remove_current`) promotes their band. The idle thread occupies
 * the last slot, is always alive at priority 255, and guarantees the ring
 * is never empty.
 */

use core::fmt;
use core::ptr::null_mut;

/// Maximum number of user threads.
pub const MAX_THREADS: usize = 8;

/// Arena slot reserved for the idle thread.
pub(crate) const IDLE: usize = MAX_THREADS;

/// Arena size: user slots plus idle.
pub(crate) const NUM_SLOTS: usize = MAX_THREADS + 1;

/// Derived lifecycle state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Asleep,
    Blocked,
    Dead,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Ready => "ready",
            ThreadState::Asleep => "asleep",
            ThreadState::Blocked => "blocked",
            ThreadState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Per-thread kernel record.
///
/// Exactly one of the lifecycle states holds at any time: dead
/// (`!alive`), asleep, blocked, or ready/running. A blocked thread sits
/// in exactly one semaphore queue (through `next_blocked`) and never in
/// the ready ring; an asleep thread has `sleep_left > 0`.
pub(crate) struct Tcb {
    /// Saved stack pointer. Valid only while the thread is switched out.
    pub(crate) sp: *mut u32,
    /// Owned stack region from the kernel heap.
    pub(crate) stack: *mut u8,
    pub(crate) stack_bytes: usize,
    /// Stable identifier, assigned monotonically at creation.
    pub(crate) id: u32,
    pub(crate) name: &'static str,
    /// 0 is the highest priority, 255 (idle) the lowest.
    pub(crate) priority: u8,
    pub(crate) alive: bool,
    pub(crate) asleep: bool,
    pub(crate) blocked: bool,
    /// Remaining sleep time in clock ticks.
    pub(crate) sleep_left: u32,
    /// Ready-ring links (slot indices).
    pub(crate) next: usize,
    pub(crate) prev: usize,
    /// Semaphore blocked-queue link.
    pub(crate) next_blocked: Option<usize>,
    /// Owning process slot, if the thread belongs to a loaded process.
    pub(crate) parent: Option<usize>,
}

impl Tcb {
    pub(crate) const fn unused() -> Self {
        Self {
            sp: null_mut(),
            stack: null_mut(),
            stack_bytes: 0,
            id: 0,
            name: "",
            priority: 255,
            alive: false,
            asleep: false,
            blocked: false,
            sleep_left: 0,
            next: IDLE,
            prev: IDLE,
            next_blocked: None,
            parent: None,
        }
    }

    pub(crate) const fn idle() -> Self {
        let mut t = Self::unused();
        t.alive = true;
        t.name = "idle";
        t
    }

    pub(crate) fn state(&self) -> ThreadState {
        if !self.alive {
            ThreadState::Dead
        } else if self.asleep {
            ThreadState::Asleep
        } else if self.blocked {
            ThreadState::Blocked
        } else {
            ThreadState::Ready
        }
    }

    /// Runnable means eligible for the ready ring.
    pub(crate) fn runnable(&self) -> bool {
        self.alive && !self.asleep && !self.blocked
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("stack_bytes", &self.stack_bytes)
            .finish()
    }
}
