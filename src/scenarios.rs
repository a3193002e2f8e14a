/*
 * Kernel Scenarios
 *
 * End-to-end walks over the scheduler, standing in for the interrupt
 * fabric: tests advance the test timebase and invoke the same entry
 * points the hardware handlers call (`on_sleep_tick`, `on_oneshot`,
 * `on_slice_tick`), and take the context switch by advancing the ring
 * exactly as PendSV would.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sched::{self, semaphore::Semaphore, KERNEL, MAX_THREADS};
use crate::test_support;
use crate::time::{ms, us};
use crate::{arch, ipc};

fn noop() {}

/// Take the pended context switch, as PendSV would, and return the slot
/// that is now running.
fn switch() -> usize {
    assert!(
        arch::take_switch_request(),
        "switch taken without a pending request"
    );
    KERNEL.with(|k| k.pick_next())
}

fn slot_of(name: &str) -> usize {
    KERNEL.with(|k| {
        (0..MAX_THREADS)
            .find(|&i| k.threads[i].alive && k.threads[i].name == name)
            .expect("no such thread")
    })
}

fn current() -> usize {
    KERNEL.with(|k| k.current)
}

fn become_current(slot: usize) {
    KERNEL.with(|k| k.current = slot);
}

#[test]
fn priority_preemption_chain() {
    // A low-priority worker spins; a priority-0 thread sleeps 100 ms and
    // then signals; a priority-1 thread waits for that signal. The signal
    // must reach the waiter within the next millisecond, preempting the
    // worker on the way.
    let _guard = test_support::fresh_kernel();
    let tb = test_support::install_timebase();
    static SEM: Semaphore = Semaphore::new(0);
    SEM.init(0);

    assert!(sched::add_thread(noop, "low", 256, 3));
    assert!(sched::add_thread(noop, "high", 256, 0));
    assert!(sched::add_thread(noop, "mid", 256, 1));
    let (low, high, mid) = (slot_of("low"), slot_of("high"), slot_of("mid"));

    // launch: the pended switch lands on the best priority
    assert_eq!(switch(), high);

    // high sleeps until the 100 ms mark
    sched::sleep(ms(100));
    assert_eq!(switch(), mid);

    // mid blocks on the semaphore; only the worker is left
    SEM.wait();
    assert_eq!(switch(), low);

    // the worker owns the core for the next 100 ms of slice ticks
    for tick in 1..=99u32 {
        tb.advance(ms(1));
        sched::on_sleep_tick();
        assert!(
            !arch::switch_requested(),
            "spurious preemption at tick {}",
            tick
        );
        sched::on_slice_tick();
        assert_eq!(switch(), low, "worker lost the core at tick {}", tick);
    }

    // 100 ms: the sleeper wakes and preempts the worker at once
    tb.advance(ms(1));
    sched::on_sleep_tick();
    assert_eq!(switch(), high);

    // high signals and dies; the waiter runs next, then the worker
    SEM.signal();
    sched::kill();
    assert_eq!(switch(), mid);
    sched::kill();
    assert_eq!(switch(), low);
    assert_eq!(current(), low);
}

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static LOST: AtomicU32 = AtomicU32::new(0);

fn producer() {
    let n = PRODUCED.fetch_add(1, Ordering::SeqCst);
    if !ipc::fifo_put(n) {
        LOST.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn fifo_keeps_sequence_under_periodic_load() {
    // A 500 us periodic task produces increasing integers; the consumer
    // checks strict sequentiality over 10 000 samples with no losses on
    // a capacity-16 ring.
    let _guard = test_support::fresh_kernel();
    let tb = test_support::install_timebase();
    PRODUCED.store(0, Ordering::SeqCst);
    LOST.store(0, Ordering::SeqCst);

    assert!(ipc::fifo_init(16));
    assert!(sched::periodic::add_periodic(producer, us(500), 1));
    sched::periodic::start();

    let mut errors = 0u32;
    for expected in 0..10_000u32 {
        tb.advance(us(500));
        sched::on_oneshot();
        if ipc::fifo_get() != expected {
            errors += 1;
        }
    }
    assert_eq!(errors, 0);
    assert_eq!(LOST.load(Ordering::SeqCst), 0);
    assert_eq!(PRODUCED.load(Ordering::SeqCst), 10_000);
    assert_eq!(ipc::fifo_size(), 0);
}

#[test]
fn periodic_task_jitter_stays_bounded_when_idle() {
    // A 1 ms task for ten simulated seconds on an otherwise idle system:
    // the maximum jitter stays under 100 us and the histogram mode is
    // bucket zero.
    let _guard = test_support::fresh_kernel();
    let tb = test_support::install_timebase();

    assert!(sched::periodic::add_periodic(noop, ms(1), 0));
    sched::periodic::start();
    for _ in 0..10_000 {
        tb.advance(ms(1));
        sched::on_oneshot();
    }
    assert!(sched::periodic::max_jitter() <= 100);
    let mode = (0..sched::periodic::JITTER_BUCKETS)
        .max_by_key(|&i| sched::periodic::histogram_bucket(i))
        .unwrap();
    assert_eq!(mode, 0);
}

#[test]
fn sleep_wakeups_land_in_order_and_on_time() {
    // Four sleepers with staggered 10/20/30/40 ms deadlines record their
    // wake time; wakes are ordered and each lands within 1 ms.
    let _guard = test_support::fresh_kernel();
    let tb = test_support::install_timebase();

    for name in ["s1", "s2", "s3", "s4"] {
        assert!(sched::add_thread(noop, name, 256, 2));
    }
    let slots: Vec<usize> = ["s1", "s2", "s3", "s4"].iter().map(|n| slot_of(n)).collect();
    for (i, &s) in slots.iter().enumerate() {
        become_current(s);
        sched::sleep(ms(10) * (i as u32 + 1));
    }
    become_current(MAX_THREADS); // idle
    arch::take_switch_request();

    let mut wake_time = [0u32; 4];
    for _ in 0..45 {
        tb.advance(ms(1));
        sched::on_sleep_tick();
        for (i, &s) in slots.iter().enumerate() {
            let awake = KERNEL.with(|k| !k.threads[s].asleep);
            if awake && wake_time[i] == 0 {
                wake_time[i] = crate::time::now();
            }
        }
    }
    for i in 0..4 {
        let target = ms(10) * (i as u32 + 1);
        assert!(wake_time[i] >= target, "sleeper {} woke early", i);
        assert!(
            wake_time[i] - target <= ms(1),
            "sleeper {} woke {} ticks late",
            i,
            wake_time[i] - target
        );
        if i > 0 {
            assert!(wake_time[i] > wake_time[i - 1]);
        }
    }
}
