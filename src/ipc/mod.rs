/*
 * Producer-Consumer Communication
 *
 * Two primitives built on the counting semaphore: a one-slot mailbox for
 * rendezvous between foreground threads, and a bounded word FIFO with a
 * non-blocking producer side (meant for interrupt handlers) and a
 * blocking consumer side.
 */

mod fifo;
mod mailbox;

pub use fifo::{fifo_get, fifo_init, fifo_put, fifo_size};
pub use mailbox::{mailbox_init, mailbox_recv, mailbox_send};

pub(crate) use fifo::reset as reset_fifo;
