//! Panic handler for the guest payload.
//!
//! Reports the panic over the serial port and halts.

use crate::serial_println;
use core::panic::PanicInfo;

/// Panic handler implementation.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!();
    serial_println!("========================================");
    serial_println!("GUEST PANIC");
    serial_println!("========================================");

    if let Some(location) = info.location() {
        serial_println!(
            "Location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }

    serial_println!("Message: {}", info.message());

    serial_println!();
    serial_println!("System halted.");
    serial_println!("========================================");

    crate::interrupts::hlt_loop()
}
