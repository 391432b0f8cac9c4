//! VirtIO MMIO transport (v2).
//!
//! Drives a device's memory-mapped register block through the VirtIO
//! initialization handshake: probe, status sequencing, feature
//! negotiation, queue activation, and notification. Every step is
//! verified by reading the register back; the first mismatch marks the
//! device FAILED and aborts the handshake with no retry.
//!
//! Register access goes through the [`RegisterAccess`] seam so the same
//! state machine runs against real MMIO and against a simulated device
//! in tests.

use core::fmt;
use core::ptr;

use bitflags::bitflags;
use log::error;

/// MMIO register offsets (VirtIO MMIO transport v2).
pub mod reg {
    pub const MAGIC: usize = 0x00;
    pub const VERSION: usize = 0x04;
    pub const DEVICE_ID: usize = 0x08;
    pub const VENDOR_ID: usize = 0x0C;
    pub const DEVICE_FEATURES: usize = 0x10;
    pub const DEVICE_FEATURES_SEL: usize = 0x14;
    pub const DRIVER_FEATURES: usize = 0x20;
    pub const DRIVER_FEATURES_SEL: usize = 0x24;
    pub const QUEUE_SEL: usize = 0x30;
    pub const QUEUE_NUM_MAX: usize = 0x34;
    pub const QUEUE_READY: usize = 0x44;
    pub const QUEUE_NOTIFY: usize = 0x50;
    pub const INTERRUPT_STATUS: usize = 0x60;
    pub const INTERRUPT_ACK: usize = 0x64;
    pub const STATUS: usize = 0x70;
    pub const QUEUE_DESC_LOW: usize = 0x80;
    pub const QUEUE_DESC_HIGH: usize = 0x84;
    pub const QUEUE_DRIVER_LOW: usize = 0x90;
    pub const QUEUE_DRIVER_HIGH: usize = 0x94;
    pub const QUEUE_DEVICE_LOW: usize = 0xA0;
    pub const QUEUE_DEVICE_HIGH: usize = 0xA4;
    pub const CONFIG: usize = 0x100;
}

/// Magic value "virt" expected in the MAGIC register.
pub const MAGIC_VALUE: u32 = 0x7472_6976;

/// Transport version implemented here (modern, non-legacy).
pub const VERSION_MODERN: u32 = 2;

/// Interrupt status bit: a used ring was updated.
pub const INT_VRING: u32 = 1 << 0;
/// Interrupt status bit: the device configuration changed.
pub const INT_CONFIG: u32 = 1 << 1;

/// Device-independent feature bit: the device conforms to VirtIO 1.x.
pub const VIRTIO_F_VERSION_1: u64 = 1 << 32;

/// Number of 32-bit feature words exchanged during negotiation.
pub const FEATURE_WORDS: u32 = 2;

bitflags! {
    /// Device status bits (cumulative; cleared only by a full reset).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceStatus: u32 {
        /// Driver has acknowledged the device.
        const ACKNOWLEDGE = 1;
        /// Driver knows how to drive the device.
        const DRIVER = 2;
        /// Driver is ready.
        const DRIVER_OK = 4;
        /// Feature negotiation complete.
        const FEATURES_OK = 8;
        /// Device has experienced an error and needs reset.
        const DEVICE_NEEDS_RESET = 64;
        /// Something went wrong; the device is unusable.
        const FAILED = 128;
    }
}

/// Errors surfaced by the MMIO handshake.
///
/// Each variant is terminal for the initialization attempt: the FAILED
/// status bit has already been set and the device must not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The MAGIC register did not read "virt".
    InvalidMagic(u32),
    /// The device advertised a transport version other than v2.
    UnsupportedVersion(u32),
    /// The device at this slot is not the expected device class.
    DeviceIdMismatch { expected: u32, found: u32 },
    /// A status read-back disagreed with the bits just written.
    StatusMismatch { expected: u32, found: u32 },
    /// The device did not accept every requested feature bit.
    FeatureMismatch { desired: u64, negotiated: u64 },
    /// The selected queue is already live on the device.
    QueueInUse(u32),
    /// The selected queue is absent or too shallow.
    QueueUnavailable(u32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(f, "magic value unexpected: {:#010x}", magic)
            }
            Self::UnsupportedVersion(version) => {
                write!(f, "transport version {} unsupported (want v2)", version)
            }
            Self::DeviceIdMismatch { expected, found } => {
                write!(f, "device id {} found, expected {}", found, expected)
            }
            Self::StatusMismatch { expected, found } => {
                write!(
                    f,
                    "status read back {:#04x}, expected {:#04x}",
                    found, expected
                )
            }
            Self::FeatureMismatch {
                desired,
                negotiated,
            } => {
                write!(
                    f,
                    "features {:#x} negotiated, wanted {:#x}",
                    negotiated, desired
                )
            }
            Self::QueueInUse(index) => write!(f, "queue {} already ready", index),
            Self::QueueUnavailable(index) => write!(f, "queue {} unavailable", index),
        }
    }
}

/// Raw 32-bit access to a device register block.
///
/// The production implementation is [`MmioRegisterBlock`]; tests provide
/// a register-level device model instead.
pub trait RegisterAccess {
    /// Read the register at `offset` bytes into the block.
    fn read_reg(&mut self, offset: usize) -> u32;
    /// Write the register at `offset` bytes into the block.
    fn write_reg(&mut self, offset: usize, value: u32);
}

/// Memory-mapped register window of one VirtIO MMIO slot.
///
/// All accesses are volatile; the compiler may neither elide nor reorder
/// them relative to each other.
pub struct MmioRegisterBlock {
    base: *mut u8,
}

impl MmioRegisterBlock {
    /// Wrap the register block mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point at a mapped VirtIO MMIO register block that
    /// stays mapped for the lifetime of the value.
    pub unsafe fn new(base: usize) -> Self {
        MmioRegisterBlock {
            base: base as *mut u8,
        }
    }
}

// The window refers to device registers, not CPU-owned memory; moving it
// between contexts is fine as long as access stays serialized.
unsafe impl Send for MmioRegisterBlock {}

impl RegisterAccess for MmioRegisterBlock {
    fn read_reg(&mut self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    fn write_reg(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

/// Handshake state machine over a VirtIO MMIO register block.
pub struct MmioTransport<R: RegisterAccess> {
    pub(crate) regs: R,
    negotiated_features: u64,
}

impl<R: RegisterAccess> MmioTransport<R> {
    /// Wrap a register block; no device access happens yet.
    pub fn new(regs: R) -> Self {
        MmioTransport {
            regs,
            negotiated_features: 0,
        }
    }

    /// Verify magic value, transport version and device class.
    pub fn probe(&mut self, device_id: u32) -> Result<(), TransportError> {
        let magic = self.regs.read_reg(reg::MAGIC);
        if magic != MAGIC_VALUE {
            return self.fail(TransportError::InvalidMagic(magic));
        }

        let version = self.regs.read_reg(reg::VERSION);
        if version != VERSION_MODERN {
            return self.fail(TransportError::UnsupportedVersion(version));
        }

        let found = self.regs.read_reg(reg::DEVICE_ID);
        if found != device_id {
            return self.fail(TransportError::DeviceIdMismatch {
                expected: device_id,
                found,
            });
        }

        Ok(())
    }

    /// Reset the device, then announce the driver.
    ///
    /// Leaves the status register at exactly ACKNOWLEDGE | DRIVER.
    pub fn reset_and_acknowledge(&mut self) -> Result<(), TransportError> {
        self.regs.write_reg(reg::STATUS, 0);
        self.set_status(DeviceStatus::ACKNOWLEDGE);
        self.set_status(DeviceStatus::DRIVER);
        self.expect_status(DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER)
    }

    /// Negotiate `desired` with the device, word by word.
    ///
    /// The device must accept every desired bit; a subset is a failure.
    pub fn negotiate_features(&mut self, desired: u64) -> Result<u64, TransportError> {
        let mut negotiated = 0u64;

        for word in 0..FEATURE_WORDS {
            self.regs.write_reg(reg::DEVICE_FEATURES_SEL, word);
            self.regs.write_reg(reg::DRIVER_FEATURES_SEL, word);

            let offered = self.regs.read_reg(reg::DEVICE_FEATURES) as u64;
            let acked = offered & ((desired >> (32 * word)) & 0xFFFF_FFFF);
            self.regs.write_reg(reg::DRIVER_FEATURES, acked as u32);

            negotiated |= acked << (32 * word);
        }

        if negotiated != desired {
            return self.fail(TransportError::FeatureMismatch {
                desired,
                negotiated,
            });
        }

        self.negotiated_features = negotiated;
        Ok(negotiated)
    }

    /// Latch FEATURES_OK and verify the device kept it.
    pub fn confirm_features(&mut self) -> Result<(), TransportError> {
        self.set_status(DeviceStatus::FEATURES_OK);
        self.expect_status(
            DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER | DeviceStatus::FEATURES_OK,
        )
    }

    /// Read a 32-bit word from the device-specific configuration space.
    pub fn read_config32(&mut self, offset: usize) -> u32 {
        self.regs.read_reg(reg::CONFIG + offset)
    }

    /// Publish ring addresses for queue `index` and mark it ready.
    ///
    /// The queue must not already be live and must be at least
    /// `min_depth` descriptors deep on the device side.
    pub fn activate_queue(
        &mut self,
        index: u32,
        desc_addr: u64,
        driver_addr: u64,
        device_addr: u64,
        min_depth: u32,
    ) -> Result<(), TransportError> {
        self.regs.write_reg(reg::QUEUE_SEL, index);

        if self.regs.read_reg(reg::QUEUE_READY) != 0 {
            return self.fail(TransportError::QueueInUse(index));
        }

        let max_depth = self.regs.read_reg(reg::QUEUE_NUM_MAX);
        if max_depth == 0 || max_depth < min_depth {
            return self.fail(TransportError::QueueUnavailable(index));
        }

        self.regs.write_reg(reg::QUEUE_DESC_LOW, desc_addr as u32);
        self.regs
            .write_reg(reg::QUEUE_DESC_HIGH, (desc_addr >> 32) as u32);
        self.regs
            .write_reg(reg::QUEUE_DRIVER_LOW, driver_addr as u32);
        self.regs
            .write_reg(reg::QUEUE_DRIVER_HIGH, (driver_addr >> 32) as u32);
        self.regs
            .write_reg(reg::QUEUE_DEVICE_LOW, device_addr as u32);
        self.regs
            .write_reg(reg::QUEUE_DEVICE_HIGH, (device_addr >> 32) as u32);

        self.regs.write_reg(reg::QUEUE_READY, 1);
        Ok(())
    }

    /// Latch DRIVER_OK; the device is live afterwards.
    pub fn driver_ok(&mut self) -> Result<(), TransportError> {
        self.set_status(DeviceStatus::DRIVER_OK);
        self.expect_status(
            DeviceStatus::ACKNOWLEDGE
                | DeviceStatus::DRIVER
                | DeviceStatus::FEATURES_OK
                | DeviceStatus::DRIVER_OK,
        )
    }

    /// Tell the device that queue `index` has new available buffers.
    pub fn notify(&mut self, index: u32) {
        self.regs.write_reg(reg::QUEUE_NOTIFY, index);
    }

    /// Read the pending interrupt bitmask.
    pub fn interrupt_status(&mut self) -> u32 {
        self.regs.read_reg(reg::INTERRUPT_STATUS)
    }

    /// Acknowledge the given interrupt bits.
    pub fn ack_interrupt(&mut self, mask: u32) {
        self.regs.write_reg(reg::INTERRUPT_ACK, mask);
    }

    /// Feature mask agreed on during negotiation.
    pub fn negotiated_features(&self) -> u64 {
        self.negotiated_features
    }

    /// Current value of the status register.
    pub fn status(&mut self) -> u32 {
        self.regs.read_reg(reg::STATUS)
    }

    /// OR `bits` into the status register.
    fn set_status(&mut self, bits: DeviceStatus) {
        let status = self.regs.read_reg(reg::STATUS);
        self.regs.write_reg(reg::STATUS, status | bits.bits());
    }

    /// Verify the status register holds exactly `expected`.
    fn expect_status(&mut self, expected: DeviceStatus) -> Result<(), TransportError> {
        let found = self.regs.read_reg(reg::STATUS);
        if found != expected.bits() {
            return self.fail(TransportError::StatusMismatch {
                expected: expected.bits(),
                found,
            });
        }
        Ok(())
    }

    /// Mark the device FAILED and report the error.
    fn fail<T>(&mut self, err: TransportError) -> Result<T, TransportError> {
        error!("virtio-mmio handshake failed: {}", err);
        let status = self.regs.read_reg(reg::STATUS);
        self.regs
            .write_reg(reg::STATUS, status | DeviceStatus::FAILED.bits());
        Err(err)
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;

    const TEST_DEVICE_ID: u32 = 3;
    const TEST_FEATURES: u64 = VIRTIO_F_VERSION_1 | 0b101;

    fn transport() -> MmioTransport<SimulatedDevice> {
        MmioTransport::new(SimulatedDevice::console(TEST_FEATURES))
    }

    #[test]
    fn probe_accepts_a_conforming_device() {
        let mut t = transport();
        assert!(t.probe(TEST_DEVICE_ID).is_ok());
    }

    #[test]
    fn probe_rejects_bad_magic() {
        let mut t = transport();
        t.regs.magic = 0xdead_beef;
        assert_eq!(
            t.probe(TEST_DEVICE_ID),
            Err(TransportError::InvalidMagic(0xdead_beef))
        );
        assert_ne!(t.status() & DeviceStatus::FAILED.bits(), 0);
    }

    #[test]
    fn probe_rejects_legacy_version() {
        let mut t = transport();
        t.regs.version = 1;
        assert_eq!(
            t.probe(TEST_DEVICE_ID),
            Err(TransportError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn probe_rejects_wrong_device_class() {
        let mut t = transport();
        assert_eq!(
            t.probe(1),
            Err(TransportError::DeviceIdMismatch {
                expected: 1,
                found: TEST_DEVICE_ID,
            })
        );
    }

    #[test]
    fn acknowledge_leaves_exact_status() {
        let mut t = transport();
        t.reset_and_acknowledge().unwrap();
        assert_eq!(
            t.status(),
            (DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER).bits()
        );
    }

    #[test]
    fn negotiation_accepts_full_feature_set() {
        let mut t = transport();
        t.reset_and_acknowledge().unwrap();
        assert_eq!(t.negotiate_features(TEST_FEATURES), Ok(TEST_FEATURES));
        assert_eq!(t.negotiated_features(), TEST_FEATURES);
        // The driver wrote both feature words back.
        assert_eq!(t.regs.driver_features[0], TEST_FEATURES as u32);
        assert_eq!(t.regs.driver_features[1], (TEST_FEATURES >> 32) as u32);
    }

    #[test]
    fn negotiation_fails_on_missing_bit() {
        let mut t = MmioTransport::new(SimulatedDevice::console(VIRTIO_F_VERSION_1));
        t.reset_and_acknowledge().unwrap();
        let desired = VIRTIO_F_VERSION_1 | 0b1;
        assert_eq!(
            t.negotiate_features(desired),
            Err(TransportError::FeatureMismatch {
                desired,
                negotiated: VIRTIO_F_VERSION_1,
            })
        );
        assert_ne!(t.status() & DeviceStatus::FAILED.bits(), 0);
    }

    #[test]
    fn queue_activation_publishes_ring_addresses() {
        let mut t = transport();
        t.activate_queue(1, 0x1_0000_0000, 0x1_0000_0100, 0x1_0000_0200, 16)
            .unwrap();

        let q = &t.regs.queues[1];
        assert_eq!(q.ready, 1);
        assert_eq!(q.desc_addr(), 0x1_0000_0000);
        assert_eq!(q.driver_addr(), 0x1_0000_0100);
        assert_eq!(q.device_addr(), 0x1_0000_0200);
    }

    #[test]
    fn queue_activation_rejects_live_queue() {
        let mut t = transport();
        t.regs.queues[0].ready = 1;
        assert_eq!(
            t.activate_queue(0, 0, 0, 0, 16),
            Err(TransportError::QueueInUse(0))
        );
    }

    #[test]
    fn queue_activation_rejects_shallow_queue() {
        let mut t = transport();
        t.regs.queue_num_max = 8;
        assert_eq!(
            t.activate_queue(0, 0, 0, 0, 16),
            Err(TransportError::QueueUnavailable(0))
        );

        let mut t = transport();
        t.regs.queue_num_max = 0;
        assert_eq!(
            t.activate_queue(0, 0, 0, 0, 16),
            Err(TransportError::QueueUnavailable(0))
        );
    }

    #[test]
    fn interrupt_ack_clears_acknowledged_bits() {
        let mut t = transport();
        t.regs.interrupt_status = INT_VRING | INT_CONFIG;
        let pending = t.interrupt_status();
        t.ack_interrupt(pending);
        assert_eq!(t.interrupt_status(), 0);
    }

    #[test]
    fn notify_reaches_the_device() {
        let mut t = transport();
        t.notify(1);
        t.notify(0);
        assert_eq!(t.regs.notifications, [1, 0]);
    }
}
