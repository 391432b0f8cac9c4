//! 8254 PIT driver.
//!
//! Programs channel 0 as a rate generator feeding IRQ 0 and keeps the
//! tick count the payload paces itself with.

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::instructions::port::Port;

/// PIT input clock in Hz.
const PIT_INPUT_HZ: u32 = 1_193_182;

/// PIT mode/command port.
const PIT_COMMAND: u16 = 0x43;

/// PIT channel 0 data port.
const PIT_CHANNEL0: u16 = 0x40;

/// Timer tick counter.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Program channel 0 to fire `hz` times per second.
pub fn init(hz: u32) {
    let divisor = (PIT_INPUT_HZ / hz).clamp(1, 65_535) as u16;

    let mut command: Port<u8> = Port::new(PIT_COMMAND);
    let mut channel0: Port<u8> = Port::new(PIT_CHANNEL0);
    unsafe {
        // Channel 0, lobyte/hibyte access, mode 2 (rate generator).
        command.write(0x34u8);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }

    crate::serial_println!("[PIT] Timer started at {} Hz", hz);
}

/// Advance the tick count; called from the timer interrupt handler.
pub(crate) fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}
