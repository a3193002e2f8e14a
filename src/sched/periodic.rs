/*
 * Periodic Background Tasks
 *
 * Up to MAX_PERIODIC callbacks run from interrupt context at fixed
 * intervals, all multiplexed onto one hardware one-shot timer. The timer
 * is armed for the minimum remaining time across the table; when it
 * fires, every task due within the elapsed window (including dispatch
 * lag) is folded into a priority-ordered chain and run in sequence, and
 * each one's remaining time is reloaded minus the overshoot before the
 * one-shot is re-armed.
 *
 * Background tasks must run to completion: no blocking, sleeping, or
 * killing. Signalling semaphores and adding threads are fine.
 *
 * Jitter accounting: every dispatch records |actual interval - reload| in
 * microseconds, tracking the running maximum and a histogram. This is the
 * scheduler's only observable quality metric under load.
 *
 * SW1/SW2 event tasks live here too: one callback each, invoked by the
 * board's button ISR through `on_sw1`/`on_sw2`.
 */

use heapless::Vec;

use crate::arch::IrqCell;
use crate::time;

/// Maximum number of periodic background tasks.
pub const MAX_PERIODIC: usize = 4;

/// Jitter histogram buckets, one per microsecond of lateness.
pub const JITTER_BUCKETS: usize = 128;

struct PTask {
    task: fn(),
    /// Dispatch-chain link, live only while the task is due.
    next: Option<usize>,
    reload: u32,
    remaining: u32,
    /// Timestamp of the previous dispatch, for jitter.
    last: u32,
    priority: u8,
}

pub(crate) struct PeriodicTable {
    tasks: Vec<PTask, MAX_PERIODIC>,
    /// Head of the priority-ordered chain of due tasks.
    chain: Option<usize>,
    max_jitter_us: u32,
    histogram: [u32; JITTER_BUCKETS],
}

static PERIODIC: IrqCell<PeriodicTable> = IrqCell::new(PeriodicTable::new());

#[derive(Clone, Copy)]
struct EventTask {
    task: fn(),
    priority: u8,
}

static SW1: IrqCell<Option<EventTask>> = IrqCell::new(None);
static SW2: IrqCell<Option<EventTask>> = IrqCell::new(None);

impl PeriodicTable {
    pub(crate) const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            chain: None,
            max_jitter_us: 0,
            histogram: [0; JITTER_BUCKETS],
        }
    }

    fn add(&mut self, task: fn(), period: u32, priority: u8, last: u32) -> bool {
        self.tasks
            .push(PTask {
                task,
                next: None,
                reload: period,
                remaining: period,
                last,
                priority,
            })
            .is_ok()
    }

    /// Link task `i` into the dispatch chain, highest priority first,
    /// FIFO among equals.
    fn chain_insert(&mut self, i: usize) {
        self.tasks[i].next = None;
        let prio = self.tasks[i].priority;
        match self.chain {
            None => self.chain = Some(i),
            Some(h) if prio < self.tasks[h].priority => {
                self.tasks[i].next = Some(h);
                self.chain = Some(i);
            }
            Some(h) => {
                let mut at = h;
                while let Some(n) = self.tasks[at].next {
                    if prio < self.tasks[n].priority {
                        break;
                    }
                    at = n;
                }
                self.tasks[i].next = self.tasks[at].next;
                self.tasks[at].next = Some(i);
            }
        }
    }

    /// Fold every task due within `lag` of the nearest deadline into the
    /// dispatch chain, reload them past the overshoot, advance the rest,
    /// and return the delay to arm the one-shot with.
    fn plan_next(&mut self, lag: u32) -> u32 {
        let mut nearest = u32::MAX;
        for t in &self.tasks {
            nearest = nearest.min(t.remaining);
        }
        let threshold = nearest.max(lag);
        for i in 0..self.tasks.len() {
            if self.tasks[i].remaining <= threshold {
                let overshoot = threshold - self.tasks[i].remaining;
                self.chain_insert(i);
                self.tasks[i].remaining = self.tasks[i].reload.saturating_sub(overshoot);
            } else {
                self.tasks[i].remaining -= threshold;
            }
        }
        nearest.saturating_sub(lag).max(1)
    }

    /// Unlink the chain head, charge its jitter at `now`, and hand back
    /// the callback.
    fn pop_due(&mut self, now: u32) -> Option<fn()> {
        let head = self.chain?;
        self.chain = self.tasks[head].next.take();

        let interval = time::difference(self.tasks[head].last, now);
        self.tasks[head].last = now;
        let skew = interval.wrapping_sub(self.tasks[head].reload);
        let jitter_us = time::to_us(skew.min(skew.wrapping_neg()));
        self.max_jitter_us = self.max_jitter_us.max(jitter_us);
        self.histogram[(jitter_us as usize).min(JITTER_BUCKETS - 1)] += 1;

        Some(self.tasks[head].task)
    }
}

/// Register a periodic background task. `period` is in clock ticks;
/// priority orders same-window dispatches, 0 first. False when the table
/// is full.
pub fn add_periodic(task: fn(), period: u32, priority: u8) -> bool {
    let running = super::is_running();
    let last = if running { time::now() } else { 0 };
    let arm = PERIODIC.with(|p| {
        if !p.add(task, period, priority, last) {
            return None;
        }
        // first task registered after launch: the one-shot isn't running
        Some((p.tasks.len() == 1 && running).then(|| p.plan_next(0)))
    });
    match arm {
        None => false,
        Some(None) => true,
        Some(Some(delay)) => {
            arm_oneshot(delay);
            true
        }
    }
}

/// One-shot timer entry point, called from the board's timer handler.
/// Runs every due task, then re-arms for the next deadline.
pub fn on_oneshot() {
    let start = time::now();
    loop {
        let task = PERIODIC.with(|p| p.pop_due(time::now()));
        match task {
            Some(f) => f(),
            None => break,
        }
    }
    let lag = time::difference(start, time::now());
    if let Some(delay) = PERIODIC.with(|p| (!p.tasks.is_empty()).then(|| p.plan_next(lag))) {
        arm_oneshot(delay);
    }
}

/// Arm the one-shot at launch if any tasks were registered early.
pub(crate) fn start() {
    if let Some(delay) = PERIODIC.with(|p| (!p.tasks.is_empty()).then(|| p.plan_next(0))) {
        arm_oneshot(delay);
    }
}

pub(crate) fn reset() {
    PERIODIC.with(|p| *p = PeriodicTable::new());
    SW1.with(|s| *s = None);
    SW2.with(|s| *s = None);
}

fn arm_oneshot(delay: u32) {
    if let Some(tb) = time::timebase() {
        tb.arm_oneshot(delay);
    }
}

/// Largest observed periodic-task jitter, in microseconds.
pub fn max_jitter() -> u32 {
    PERIODIC.with(|p| p.max_jitter_us)
}

/// Log the jitter summary: maximum, modal bucket, and mean.
pub fn report_jitter() {
    PERIODIC.with(|p| {
        let mut most = 0;
        let mut most_idx = 0;
        let mut sum: u64 = 0;
        let mut count: u64 = 0;
        for (i, &n) in p.histogram.iter().enumerate() {
            sum += (i as u64) * (n as u64);
            count += n as u64;
            if n > most {
                most = n;
                most_idx = i;
            }
        }
        log::info!("max jitter: {} us", p.max_jitter_us);
        if count > 0 {
            log::info!("modal jitter: {} us", most_idx);
            log::info!("average jitter: {} us", sum / count);
        }
    });
}

#[cfg(test)]
pub(crate) fn histogram_bucket(i: usize) -> u32 {
    PERIODIC.with(|p| p.histogram[i])
}

/// Register the task run when switch 1 is pressed. The board's GPIO
/// handler delivers the event through `on_sw1`; `priority` is advisory
/// for the board's interrupt setup.
pub fn add_sw1_task(task: fn(), priority: u8) -> bool {
    SW1.with(|s| *s = Some(EventTask { task, priority }));
    log::debug!("SW1 task registered at priority {}", priority);
    true
}

/// Register the task run when switch 2 is pressed.
pub fn add_sw2_task(task: fn(), priority: u8) -> bool {
    SW2.with(|s| *s = Some(EventTask { task, priority }));
    log::debug!("SW2 task registered at priority {}", priority);
    true
}

/// Switch 1 event entry point.
pub fn on_sw1() {
    if let Some(t) = SW1.with(|s| *s) {
        (t.task)();
    }
}

/// Switch 2 event entry point.
pub fn on_sw2() {
    if let Some(t) = SW2.with(|s| *s) {
        (t.task)();
    }
}
