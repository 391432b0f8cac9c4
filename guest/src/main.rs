//! Bare-metal VirtIO console guest.
//!
//! A guest payload that brings up one VirtIO console device over MMIO
//! and exchanges messages with the backend: the receive path runs off
//! the console IRQ, the transmit path off the PIT tick.
//!
//! # Boot Process
//!
//! 1. bootloader loads the payload and maps physical memory
//! 2. serial console and logger come up
//! 3. GDT, IDT and PIC are installed, heap initialized
//! 4. the console device runs its MMIO handshake over the shared
//!    memory window
//! 5. IRQ lines open and the payload idles in a hlt loop

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod allocator;
mod config;
mod cpu;
mod gdt;
mod interrupts;
mod logger;
mod panic;
mod serial;
mod timer;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use bvg_virtio::{ConsoleDevice, DmaRegion, MmioRegisterBlock};
use spin::Mutex;

/// The one console device, shared between the IRQ handlers and boot
/// code. Every access goes through this lock; handlers run with
/// interrupts disabled, so lock holders cannot be preempted by each
/// other on this core.
static CONSOLE: Mutex<Option<ConsoleDevice<MmioRegisterBlock>>> = Mutex::new(None);

/// Bootloader configuration.
///
/// Physical memory is mapped at a bootloader-chosen offset; the MMIO
/// register block and the shared queue memory are reached through it.
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config
};

entry_point!(guest_main, config = &BOOTLOADER_CONFIG);

/// Payload entry point after bootloader handoff.
fn guest_main(boot_info: &'static mut BootInfo) -> ! {
    serial::init();
    serial_println!("VirtIO console bare-metal guest");
    logger::init();

    gdt::init();
    interrupts::init();
    allocator::init_heap();

    let phys_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("physical memory offset not provided");

    let mmio_base = (phys_offset + config::VIRTIO_MMIO_PHYS_BASE) as usize;
    let shmem = DmaRegion::new(
        (phys_offset + config::SHMEM_PHYS_BASE) as usize,
        config::SHMEM_PHYS_BASE,
    );

    log::info!("initializing virtio console ...");
    let mut console = ConsoleDevice::new(unsafe { MmioRegisterBlock::new(mmio_base) });
    match console.initialize(shmem) {
        Ok(()) => log::info!("virtio console initialized: {:?}", console.config()),
        Err(err) => {
            log::error!("virtio console initialization failed: {}", err);
            interrupts::hlt_loop();
        }
    }
    *CONSOLE.lock() = Some(console);

    interrupts::register_console_callback(console_rx_handler);
    interrupts::register_timer_callback(timer_tick_handler);

    timer::init(config::TIMER_HZ);
    interrupts::enable_irq(config::TIMER_IRQ_LINE);
    interrupts::enable_irq(config::VIRTIO_IRQ_LINE);
    interrupts::enable();

    serial_println!("cpu {} up", cpu::cpu_id());
    interrupts::hlt_loop()
}

/// Receive path; runs in the console IRQ handler.
fn console_rx_handler() {
    if let Some(console) = CONSOLE.lock().as_mut() {
        match console.receive() {
            Ok(Some(msg)) => match core::str::from_utf8(&msg) {
                Ok(text) => serial_println!("guest received: {}", text),
                Err(_) => serial_println!("guest received {} raw bytes", msg.len()),
            },
            Ok(None) => {}
            Err(err) => log::warn!("console receive failed: {}", err),
        }
    }
}

/// Transmit path; runs in the PIT handler and sends one greeting per
/// transmit interval.
fn timer_tick_handler() {
    if timer::ticks() % config::TRANSMIT_INTERVAL_TICKS != 0 {
        return;
    }
    if let Some(console) = CONSOLE.lock().as_mut() {
        if let Err(err) = console.transmit(config::GREETING.as_bytes()) {
            log::warn!("console transmit failed: {}", err);
        }
    }
}
