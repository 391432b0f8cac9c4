//! Interrupt handling subsystem.
//!
//! Sets up the Interrupt Descriptor Table (IDT) and the legacy 8259 PIC,
//! and dispatches hardware interrupts to callbacks registered by the
//! payload. Two lines matter here: the PIT timer (IRQ 0) and the VirtIO
//! console (IRQ `config::VIRTIO_IRQ_LINE`).

use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::{
    InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode,
};

use crate::gdt;

/// PIC1 offset (IRQ 0-7 mapped to vectors 32-39).
const PIC1_OFFSET: u8 = 32;

/// PIC2 offset (IRQ 8-15 mapped to vectors 40-47).
const PIC2_OFFSET: u8 = 40;

/// Interrupt vector numbers.
pub mod vectors {
    use crate::config;

    /// PIT timer vector (IRQ 0).
    pub const TIMER: u8 = 32;
    /// VirtIO console vector.
    pub const VIRTIO_CONSOLE: u8 = 32 + config::VIRTIO_IRQ_LINE;
}

/// The chained PICs (master and slave).
static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

/// Handler callback type.
pub type Callback = fn();

static TIMER_CALLBACK: Mutex<Option<Callback>> = Mutex::new(None);
static CONSOLE_CALLBACK: Mutex<Option<Callback>> = Mutex::new(None);

/// Register the function run on every timer tick.
pub fn register_timer_callback(cb: Callback) {
    *TIMER_CALLBACK.lock() = Some(cb);
}

/// Register the function run on every console interrupt.
pub fn register_console_callback(cb: Callback) {
    *CONSOLE_CALLBACK.lock() = Some(cb);
}

lazy_static! {
    /// The interrupt descriptor table.
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        // CPU exceptions
        idt.breakpoint.set_handler_fn(breakpoint_handler);

        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);

        // Hardware interrupts
        idt[vectors::TIMER].set_handler_fn(timer_interrupt_handler);
        idt[vectors::VIRTIO_CONSOLE].set_handler_fn(virtio_console_interrupt_handler);

        idt
    };
}

/// Load the IDT and remap the PICs with every line masked.
///
/// Lines are opened individually with [`enable_irq`] once their handlers
/// are registered.
pub fn init() {
    IDT.load();

    unsafe {
        PICS.lock().initialize();
    }

    unsafe {
        x86_64::instructions::port::Port::<u8>::new(0x21).write(0xFFu8);
        x86_64::instructions::port::Port::<u8>::new(0xA1).write(0xFFu8);
    }

    crate::serial_println!("[IDT] Interrupt Descriptor Table loaded");
}

/// Unmask a specific IRQ.
pub fn enable_irq(irq: u8) {
    if irq < 8 {
        // PIC1
        let mut mask = unsafe { x86_64::instructions::port::Port::<u8>::new(0x21).read() };
        mask &= !(1 << irq);
        unsafe { x86_64::instructions::port::Port::<u8>::new(0x21).write(mask) };
    } else {
        // PIC2
        let irq = irq - 8;
        let mut mask = unsafe { x86_64::instructions::port::Port::<u8>::new(0xA1).read() };
        mask &= !(1 << irq);
        unsafe { x86_64::instructions::port::Port::<u8>::new(0xA1).write(mask) };
    }
}

/// Mask a specific IRQ.
pub fn disable_irq(irq: u8) {
    if irq < 8 {
        // PIC1
        let mut mask = unsafe { x86_64::instructions::port::Port::<u8>::new(0x21).read() };
        mask |= 1 << irq;
        unsafe { x86_64::instructions::port::Port::<u8>::new(0x21).write(mask) };
    } else {
        // PIC2
        let irq = irq - 8;
        let mut mask = unsafe { x86_64::instructions::port::Port::<u8>::new(0xA1).read() };
        mask |= 1 << irq;
        unsafe { x86_64::instructions::port::Port::<u8>::new(0xA1).write(mask) };
    }
}

/// Send end-of-interrupt for the given vector.
fn end_of_interrupt(vector: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}

/// Enable hardware interrupts.
pub fn enable() {
    x86_64::instructions::interrupts::enable();
    crate::serial_println!("[INT] Hardware interrupts enabled");
}

/// Run a closure with interrupts disabled.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    x86_64::instructions::interrupts::without_interrupts(f)
}

/// Halt loop.
///
/// Loops indefinitely, halting the CPU until the next interrupt.
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

// Exception handlers

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: GENERAL PROTECTION FAULT (error code: {})\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let faulting_address = Cr2::read();

    crate::serial_println!(
        "EXCEPTION: PAGE FAULT\nAccessed Address: {:?}\nError Code: {:?}\n{:#?}",
        faulting_address,
        error_code,
        stack_frame
    );

    panic!("Unrecoverable page fault");
}

// Hardware interrupt handlers

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::timer::on_tick();

    if let Some(cb) = *TIMER_CALLBACK.lock() {
        cb();
    }

    end_of_interrupt(vectors::TIMER);
}

extern "x86-interrupt" fn virtio_console_interrupt_handler(_stack_frame: InterruptStackFrame) {
    if let Some(cb) = *CONSOLE_CALLBACK.lock() {
        cb();
    }

    end_of_interrupt(vectors::VIRTIO_CONSOLE);
}
