/*
 * Semihosting Logger
 *
 * Minimal `log` backend writing through the debug probe. Semihosting
 * stalls the core for every message, so this is a bring-up and test
 * facility; production boards should install their own UART-backed
 * logger instead of this one.
 */

use core::fmt::Write;

use cortex_m_semihosting::hio;
use log::{Level, LevelFilter, Metadata, Record};

struct KestrelLogger;

impl log::Log for KestrelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if let Ok(mut out) = hio::hstdout() {
                _ = writeln!(out, "[{}] {}", record.level(), record.args());
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: KestrelLogger = KestrelLogger;

/// Install the semihosting logger. Call before `sched::init` to see the
/// kernel bring-up messages.
pub fn init() {
    match log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info)) {
        Ok(()) => log::info!("logger initialized"),
        Err(err) => panic!("logger initialization failed: {}", err),
    }
}
