//! Guest payload configuration constants.
//!
//! Compile-time configuration for the demo payload: where the backend
//! device and the shared queue memory live, which IRQ line the console
//! uses, and how often the guest talks.

/// Guest-physical base of the shared-memory window holding both console
/// queue regions. The window must be visible to the backend device at
/// the same address, which is why it sits in plain guest RAM.
pub const SHMEM_PHYS_BASE: u64 = 0x5000_0000;

/// Guest-physical base of the console's VirtIO MMIO register block
/// (first virtio-mmio slot on a QEMU microvm-style machine).
pub const VIRTIO_MMIO_PHYS_BASE: u64 = 0xFEB0_0000;

/// PIC line the console's interrupt arrives on.
pub const VIRTIO_IRQ_LINE: u8 = 5;

/// PIC line of the PIT timer.
pub const TIMER_IRQ_LINE: u8 = 0;

/// Timer interrupt frequency in Hz.
pub const TIMER_HZ: u32 = 100;

/// Timer ticks between console greetings (one second at `TIMER_HZ`).
pub const TRANSMIT_INTERVAL_TICKS: u64 = 100;

/// Heap size in bytes (128 KiB).
pub const HEAP_SIZE: usize = 128 * 1024;

/// Message pushed to the backend on every transmit interval.
pub const GREETING: &str = "Hello from the bare-metal guest!\r\n";
