/*
 * Shared Test Fixtures
 *
 * The kernel singletons (heap, TCB pool, periodic table, FIFO) are
 * process-wide, so every test that touches them serializes on one lock
 * and starts from a freshly reset state. Instance-level tests construct
 * their own `Kernel` but still share the global heap for stacks.
 */

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::loaders::{BlockFile, FileError};
use crate::time::{self, Timebase};
use crate::{heap, ipc, sched};

static GLOBAL_STATE: OnceLock<Mutex<()>> = OnceLock::new();

/// Serialize access to the kernel singletons.
pub fn lock() -> MutexGuard<'static, ()> {
    GLOBAL_STATE
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialize and reset every kernel singleton: fresh heap, empty thread
/// and process tables, no periodic tasks, no FIFO, zeroed test clock.
pub fn fresh_kernel() -> MutexGuard<'static, ()> {
    let guard = lock();
    install_timebase();
    heap::init();
    sched::KERNEL.with(|k| *k = sched::Kernel::new());
    sched::periodic::reset();
    ipc::reset_fifo();
    crate::arch::take_switch_request();
    guard
}

/// Manually advanced stand-in for the board timer hardware.
pub struct TestTimebase {
    now: AtomicU32,
    armed: AtomicU32,
    sleep_tick_started: AtomicBool,
}

impl TestTimebase {
    const fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
            armed: AtomicU32::new(0),
            sleep_tick_started: AtomicBool::new(false),
        }
    }

    pub fn advance(&self, ticks: u32) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Most recent one-shot delay, in ticks.
    pub fn armed(&self) -> u32 {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn sleep_tick_started(&self) -> bool {
        self.sleep_tick_started.load(Ordering::SeqCst)
    }
}

impl Timebase for TestTimebase {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.now.store(0, Ordering::SeqCst);
    }

    fn arm_oneshot(&self, ticks: u32) {
        self.armed.store(ticks, Ordering::SeqCst);
    }

    fn start_sleep_tick(&self) {
        self.sleep_tick_started.store(true, Ordering::SeqCst);
    }
}

/// Register a fresh test timebase and hand it back for manual control.
pub fn install_timebase() -> &'static TestTimebase {
    let tb: &'static TestTimebase = Box::leak(Box::new(TestTimebase::new()));
    time::set_timebase(tb);
    tb
}

/// Stand in for the entry thread of the most recently loaded process and
/// run its exit path, as if the loaded `main` returned.
pub fn run_as_entry_thread_and_kill() {
    sched::KERNEL.with(|k| {
        let t = (0..sched::MAX_THREADS)
            .find(|&i| k.threads[i].alive && k.threads[i].parent.is_some())
            .expect("no process entry thread is alive");
        k.current = t;
        k.kill_current();
        k.current = sched::tcb::IDLE;
    });
}

/// In-memory `BlockFile` over a byte vector.
pub struct MemFile {
    bytes: Vec<u8>,
    at: usize,
}

impl MemFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, at: 0 }
    }

    /// Overwrite one byte, for malformed-image tests.
    pub fn corrupt(&mut self, at: usize, value: u8) {
        self.bytes[at] = value;
    }

    /// Chop the file short.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }
}

impl BlockFile for MemFile {
    fn seek(&mut self, offset: u32) -> Result<(), FileError> {
        if offset as usize > self.bytes.len() {
            return Err(FileError::OutOfRange);
        }
        self.at = offset as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        let n = buf.len().min(self.bytes.len() - self.at);
        buf[..n].copy_from_slice(&self.bytes[self.at..self.at + n]);
        self.at += n;
        Ok(n)
    }
}
