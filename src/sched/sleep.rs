/*
 * Sleep Service
 *
 * Sleeping threads stay in the pool with their remaining time in ticks;
 * a fixed 1 ms tick walks the pool, subtracts the elapsed period and
 * reinserts every thread that reaches zero. The walk is O(MAX_THREADS)
 * under a critical section, which at 1 kHz and eight slots is well inside
 * the latency budget.
 *
 * `sleep` charges the caller for the part of the current tick that has
 * already passed, so nobody wakes earlier than asked.
 */

use crate::time;

use super::{tcb::IDLE, KERNEL};

/// Put the running thread to sleep for at least `ticks` clock ticks.
/// `sleep(0)` is a cooperative yield, identical to `suspend`.
pub fn sleep(ticks: u32) {
    if ticks == 0 {
        super::suspend();
        return;
    }
    KERNEL.with(|k| {
        let cur = k.current;
        if cur == IDLE {
            return;
        }
        let tick_elapsed =
            time::difference(k.last_sleep_tick, time::now()).min(time::ms(1));
        k.threads[cur].asleep = true;
        k.threads[cur].sleep_left = ticks.saturating_add(tick_elapsed);
        k.remove_current();
    });
}

/// 1 ms tick entry point, called from the board's timer handler.
pub fn on_sleep_tick() {
    KERNEL.with(|k| {
        k.last_sleep_tick = time::now();
        let period = time::ms(1);
        for i in 0..super::MAX_THREADS {
            if !k.threads[i].asleep {
                continue;
            }
            if k.threads[i].sleep_left <= period {
                k.threads[i].sleep_left = 0;
                k.threads[i].asleep = false;
                k.insert_thread(i);
            } else {
                k.threads[i].sleep_left -= period;
            }
        }
    });
}
