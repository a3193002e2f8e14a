/*
 * Supervisor Call Numbers
 *
 * Encoded as the immediate operand of the `svc` instruction. Five calls
 * exist; anything else is a programmer error and panics the kernel.
 */

/// Identifier of the calling thread.
///
/// Arguments: none. Returns: thread id in R0.
pub const SVC_ID: u8 = 0;

/// Terminate the calling thread.
///
/// Arguments: none. Does not return to the call site.
pub const SVC_KILL: u8 = 1;

/// Sleep for R0 clock ticks.
pub const SVC_SLEEP: u8 = 2;

/// Current system time.
///
/// Arguments: none. Returns: tick count in R0.
pub const SVC_TIME: u8 = 3;

/// Add a thread in the calling process.
///
/// Arguments: R0 entry point, R1 name (NUL-terminated, in the process
/// image), R2 stack bytes, R3 priority. Returns: 1 on success, 0 on
/// failure, in R0.
pub const SVC_ADD_THREAD: u8 = 4;
