/*
 * Mailbox
 *
 * One data cell guarded by two binary semaphores: `empty` starts
 * available, `full` starts taken. A sender and a receiver rendezvous
 * through the cell; further senders block until the receiver has drained
 * it.
 */

use crate::arch::IrqCell;
use crate::sched::semaphore::Semaphore;

static CELL: IrqCell<u32> = IrqCell::new(0);
static EMPTY: Semaphore = Semaphore::new(1);
static FULL: Semaphore = Semaphore::new(0);

/// Reset the mailbox to empty.
pub fn mailbox_init() {
    EMPTY.init(1);
    FULL.init(0);
}

/// Deposit `data`, blocking while the mailbox still holds an unreceived
/// value. Foreground threads only.
pub fn mailbox_send(data: u32) {
    EMPTY.bwait();
    CELL.with(|c| *c = data);
    FULL.bsignal();
}

/// Collect the next value, blocking until a sender has deposited one.
/// Foreground threads only.
pub fn mailbox_recv() -> u32 {
    FULL.bwait();
    let data = CELL.with(|c| *c);
    EMPTY.bsignal();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn send_then_recv_round_trips() {
        let _guard = test_support::fresh_kernel();
        mailbox_init();
        mailbox_send(0xDEAD_BEEF);
        assert_eq!(mailbox_recv(), 0xDEAD_BEEF);
        // both semaphores are back in their initial state
        mailbox_send(7);
        assert_eq!(mailbox_recv(), 7);
    }
}
