/*
 * System Time
 *
 * The kernel time unit is one tick of a free-running 32-bit counter at
 * 10 MHz (100 ns resolution). The counter rolls over about every seven
 * minutes, so consumers compare timestamps with `difference` and never
 * order raw values.
 *
 * The counter itself lives in board-owned timer hardware and reaches the
 * kernel through the `Timebase` trait registered at `sched::init`. The
 * same trait carries the two timer services the kernel needs: a one-shot
 * for the periodic-task scheduler and a fixed 1 ms tick for the sleep
 * service.
 */

use core::cell::UnsafeCell;

/// Tick rate of the system counter.
pub const TICK_HZ: u32 = 10_000_000;

const TICKS_PER_US: u32 = TICK_HZ / 1_000_000;
const TICKS_PER_MS: u32 = TICK_HZ / 1_000;

/// Board-supplied timer hardware.
///
/// `now`/`clear` expose the free-running counter. `arm_oneshot` schedules a
/// single callback: after `ticks` the board's timer ISR must invoke
/// [`crate::sched::on_oneshot`]. `start_sleep_tick` starts a 1 ms periodic
/// interrupt whose handler must invoke [`crate::sched::on_sleep_tick`].
pub trait Timebase: Sync {
    /// Current value of the free-running 10 MHz counter.
    fn now(&self) -> u32;

    /// Reset the counter to zero.
    fn clear(&self);

    /// Arm the shared one-shot timer for `ticks` from now.
    fn arm_oneshot(&self, ticks: u32);

    /// Start the fixed 1 ms sleep tick.
    fn start_sleep_tick(&self);
}

struct TimebaseCell(UnsafeCell<Option<&'static dyn Timebase>>);

// Written once in `sched::init` with interrupts masked, read-only after.
unsafe impl Sync for TimebaseCell {}

static TIMEBASE: TimebaseCell = TimebaseCell(UnsafeCell::new(None));

pub(crate) fn set_timebase(tb: &'static dyn Timebase) {
    let crit = crate::arch::start_critical();
    unsafe { *TIMEBASE.0.get() = Some(tb) };
    crate::arch::end_critical(crit);
}

pub(crate) fn timebase() -> Option<&'static dyn Timebase> {
    unsafe { *TIMEBASE.0.get() }
}

/// Current system time in ticks.
pub fn now() -> u32 {
    timebase().map_or(0, |tb| tb.now())
}

/// Zero the system time.
pub fn clear() {
    if let Some(tb) = timebase() {
        tb.clear();
    }
}

/// Current system time in milliseconds.
pub fn ms_now() -> u32 {
    to_ms(now())
}

/// Tick delta from `start` to `stop`, assuming mod-2^32 arithmetic.
pub fn difference(start: u32, stop: u32) -> u32 {
    stop.wrapping_sub(start)
}

/// Microseconds to ticks.
pub fn us(n: u32) -> u32 {
    n.wrapping_mul(TICKS_PER_US)
}

/// Milliseconds to ticks.
pub fn ms(n: u32) -> u32 {
    n.wrapping_mul(TICKS_PER_MS)
}

/// Seconds to ticks. Takes a float so fractional seconds stay useful.
pub fn seconds(s: f32) -> u32 {
    (s * TICK_HZ as f32) as u32
}

/// Ticks to microseconds.
pub fn to_us(t: u32) -> u32 {
    t / TICKS_PER_US
}

/// Ticks to milliseconds.
pub fn to_ms(t: u32) -> u32 {
    t / TICKS_PER_MS
}
