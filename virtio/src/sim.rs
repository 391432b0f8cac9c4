//! Register-level device model and shared-memory helpers for tests.
//!
//! [`SimulatedDevice`] stands in for a backend's MMIO register block:
//! feature words are banked behind the selector registers, status writes
//! are accepted as-is, and notifications are recorded. The free
//! functions poke the ring structures inside a test region the way the
//! device side of the split-queue protocol would.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{fence, Ordering};

use crate::console::SHMEM_SIZE;
use crate::mmio::{reg, RegisterAccess, MAGIC_VALUE, VERSION_MODERN};
use crate::queue::{
    DmaRegion, VirtqDesc, VirtqUsed, VirtqUsedElem, AVAIL_RING_OFFSET, DESC_TABLE_OFFSET,
    QUEUE_REGION_SIZE, QUEUE_SIZE, USED_RING_OFFSET,
};

/// One queue's register state on the simulated device.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimQueue {
    pub ready: u32,
    pub desc_lo: u32,
    pub desc_hi: u32,
    pub driver_lo: u32,
    pub driver_hi: u32,
    pub device_lo: u32,
    pub device_hi: u32,
}

impl SimQueue {
    pub fn desc_addr(&self) -> u64 {
        (self.desc_hi as u64) << 32 | self.desc_lo as u64
    }

    pub fn driver_addr(&self) -> u64 {
        (self.driver_hi as u64) << 32 | self.driver_lo as u64
    }

    pub fn device_addr(&self) -> u64 {
        (self.device_hi as u64) << 32 | self.device_lo as u64
    }
}

/// A well-behaved VirtIO MMIO device model.
pub struct SimulatedDevice {
    pub magic: u32,
    pub version: u32,
    pub device_id: u32,
    pub device_features: u64,
    pub queue_num_max: u32,
    pub config: [u32; 3],
    pub queues: [SimQueue; 2],
    pub interrupt_status: u32,
    pub driver_features: [u32; 2],
    pub notifications: Vec<u32>,
    status: u32,
    device_features_sel: u32,
    driver_features_sel: u32,
    queue_sel: u32,
}

impl SimulatedDevice {
    /// A console device offering exactly `features`.
    pub fn console(features: u64) -> Self {
        SimulatedDevice {
            magic: MAGIC_VALUE,
            version: VERSION_MODERN,
            device_id: crate::console::DEVICE_ID_CONSOLE,
            device_features: features,
            queue_num_max: 256,
            config: [0; 3],
            queues: [SimQueue::default(); 2],
            interrupt_status: 0,
            driver_features: [0; 2],
            notifications: Vec::new(),
            status: 0,
            device_features_sel: 0,
            driver_features_sel: 0,
            queue_sel: 0,
        }
    }

    fn queue(&mut self) -> &mut SimQueue {
        &mut self.queues[self.queue_sel as usize % 2]
    }
}

impl RegisterAccess for SimulatedDevice {
    fn read_reg(&mut self, offset: usize) -> u32 {
        match offset {
            reg::MAGIC => self.magic,
            reg::VERSION => self.version,
            reg::DEVICE_ID => self.device_id,
            reg::VENDOR_ID => 0x554D_4551,
            reg::DEVICE_FEATURES => {
                (self.device_features >> (32 * self.device_features_sel)) as u32
            }
            reg::QUEUE_NUM_MAX => self.queue_num_max,
            reg::QUEUE_READY => self.queue().ready,
            reg::INTERRUPT_STATUS => self.interrupt_status,
            reg::STATUS => self.status,
            _ if (reg::CONFIG..reg::CONFIG + 12).contains(&offset) => {
                self.config[(offset - reg::CONFIG) / 4]
            }
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: usize, value: u32) {
        match offset {
            reg::DEVICE_FEATURES_SEL => self.device_features_sel = value,
            reg::DRIVER_FEATURES_SEL => self.driver_features_sel = value,
            reg::DRIVER_FEATURES => {
                self.driver_features[self.driver_features_sel as usize % 2] = value
            }
            reg::QUEUE_SEL => self.queue_sel = value,
            reg::QUEUE_READY => self.queue().ready = value,
            reg::QUEUE_NOTIFY => self.notifications.push(value),
            reg::INTERRUPT_ACK => self.interrupt_status &= !value,
            reg::STATUS => self.status = value,
            reg::QUEUE_DESC_LOW => self.queue().desc_lo = value,
            reg::QUEUE_DESC_HIGH => self.queue().desc_hi = value,
            reg::QUEUE_DRIVER_LOW => self.queue().driver_lo = value,
            reg::QUEUE_DRIVER_HIGH => self.queue().driver_hi = value,
            reg::QUEUE_DEVICE_LOW => self.queue().device_lo = value,
            reg::QUEUE_DEVICE_HIGH => self.queue().device_hi = value,
            _ => {}
        }
    }
}

/// Identity-mapped memory backing one queue region.
pub struct TestRegion {
    mem: Box<[u8; QUEUE_REGION_SIZE]>,
}

impl TestRegion {
    pub fn zeroed() -> Self {
        TestRegion {
            mem: Box::new([0; QUEUE_REGION_SIZE]),
        }
    }

    pub fn dma(&self) -> DmaRegion {
        DmaRegion::identity(self.mem.as_ptr() as usize)
    }
}

/// Identity-mapped memory backing a full console shared-memory window
/// (receive region followed by transmit region).
pub struct TestShmem {
    mem: Box<[u8; SHMEM_SIZE]>,
}

impl TestShmem {
    pub fn zeroed() -> Self {
        TestShmem {
            mem: Box::new([0; SHMEM_SIZE]),
        }
    }

    pub fn dma(&self) -> DmaRegion {
        DmaRegion::identity(self.mem.as_ptr() as usize)
    }

    pub fn tx_region(&self) -> DmaRegion {
        self.dma().offset(QUEUE_REGION_SIZE)
    }
}

fn cpu_ptr(region: DmaRegion, device_addr: u64) -> *mut u8 {
    (region.virt as u64 + (device_addr - region.phys)) as usize as *mut u8
}

/// Current available-ring index as the device would read it.
pub fn avail_idx(region: DmaRegion) -> u16 {
    let idx = (region.virt + AVAIL_RING_OFFSET + 2) as *const u16;
    unsafe { ptr::read_volatile(idx) }
}

/// Descriptor id stored in available-ring slot `slot`.
pub fn avail_entry(region: DmaRegion, slot: usize) -> u16 {
    let ring = (region.virt + AVAIL_RING_OFFSET + 4) as *const u16;
    unsafe { ptr::read_volatile(ring.add(slot % QUEUE_SIZE)) }
}

/// Descriptor table entry `id` as the device would read it.
pub fn desc_entry(region: DmaRegion, id: u16) -> VirtqDesc {
    let table = (region.virt + DESC_TABLE_OFFSET) as *const VirtqDesc;
    unsafe { ptr::read_volatile(table.add(id as usize % QUEUE_SIZE)) }
}

/// Device half of the used-ring protocol: return descriptor `id` with
/// `len` bytes written.
pub fn push_used(region: DmaRegion, id: u16, len: u32) {
    let used = (region.virt + USED_RING_OFFSET) as *mut VirtqUsed;
    unsafe {
        let idx = ptr::read_volatile(ptr::addr_of!((*used).idx));
        ptr::write_volatile(
            ptr::addr_of_mut!((*used).ring[idx as usize % QUEUE_SIZE]),
            VirtqUsedElem {
                id: id as u32,
                len,
            },
        );
        fence(Ordering::SeqCst);
        ptr::write_volatile(ptr::addr_of_mut!((*used).idx), idx.wrapping_add(1));
    }
}

/// Device write into a lent buffer.
pub fn write_buffer(region: DmaRegion, device_addr: u64, bytes: &[u8]) {
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), cpu_ptr(region, device_addr), bytes.len());
    }
}

/// Device read of a lent buffer.
pub fn read_buffer(region: DmaRegion, device_addr: u64, len: usize) -> Vec<u8> {
    let mut out = alloc::vec![0u8; len];
    unsafe {
        ptr::copy_nonoverlapping(cpu_ptr(region, device_addr), out.as_mut_ptr(), len);
    }
    out
}
