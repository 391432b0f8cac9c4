//! `log` facade sink over the serial port.
//!
//! The transport library reports through the `log` macros; this routes
//! every record to COM1 with a level prefix.

use log::{LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        crate::serial_println!("[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the serial logger. Call once, after the serial port is up.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
