//! Serial port driver for console output.
//!
//! This module provides serial diagnostics output using the 16550 UART.

use core::fmt;
use core::fmt::Write;
use spin::Mutex;
use uart_16550::SerialPort;

/// COM1 base address.
const COM1_BASE: u16 = 0x3F8;

/// Global serial port (COM1).
static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Initialize the serial port.
pub fn init() {
    let mut port = unsafe { SerialPort::new(COM1_BASE) };
    port.init();
    *SERIAL1.lock() = Some(port);
}

/// Write a string to COM1.
pub fn write_str(s: &str) {
    if let Some(ref mut serial) = *SERIAL1.lock() {
        for byte in s.bytes() {
            serial.send(byte);
        }
    }
}

/// Serial writer for formatting.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

/// Print macro for serial output.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*));
    };
}

/// Println macro for serial output.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*));
    };
}

/// Internal print function.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use x86_64::instructions::interrupts;

    // Disable interrupts to prevent deadlock on the port lock
    interrupts::without_interrupts(|| {
        SerialWriter.write_fmt(args).unwrap();
    });
}
