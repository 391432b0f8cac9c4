//! VirtIO console device driver.
//!
//! Composes the MMIO transport with one receive and one transmit
//! virtqueue. `initialize` pre-loads the receive queue with
//! device-writable buffers and walks the full handshake; afterwards
//! `transmit` publishes byte buffers to the device and `receive`,
//! normally called from the device's interrupt handler, drains both used
//! rings and returns whatever the device wrote.

use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::slice;

use log::{debug, warn};

use crate::mmio::{self, MmioTransport, RegisterAccess, TransportError};
use crate::queue::{DmaRegion, VirtQueue, QUEUE_REGION_SIZE, QUEUE_SIZE};

/// VirtIO device class id of the console.
pub const DEVICE_ID_CONSOLE: u32 = 3;

/// Index of the receive (device-writes) queue.
pub const RX_QUEUE_INDEX: u32 = 0;
/// Index of the transmit (device-reads) queue.
pub const TX_QUEUE_INDEX: u32 = 1;
/// Number of virtqueues the console uses (port 0 rx/tx only).
pub const NUM_QUEUES: usize = 2;

/// Size of each pre-loaded receive buffer.
pub const RX_BUFFER_SIZE: u32 = 256;

/// Shared-memory footprint of the console: both queue regions
/// back-to-back.
pub const SHMEM_SIZE: usize = NUM_QUEUES * QUEUE_REGION_SIZE;

/// Console device feature bits.
pub mod features {
    /// Console size (cols/rows) is valid in config space.
    pub const SIZE: u64 = 1 << 0;
    /// Device supports multiple ports.
    pub const MULTIPORT: u64 = 1 << 1;
    /// Device supports emergency write.
    pub const EMERG_WRITE: u64 = 1 << 2;
}

/// Feature set requested from the device; negotiation requires all of it.
pub const CONSOLE_FEATURES: u64 =
    mmio::VIRTIO_F_VERSION_1 | features::SIZE | features::EMERG_WRITE;

/// Console configuration space, read once after feature negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Console width in characters.
    pub cols: u16,
    /// Console height in characters.
    pub rows: u16,
    /// Maximum number of ports the device supports.
    pub max_nr_ports: u32,
    /// Emergency write register value.
    pub emerg_wr: u32,
}

impl ConsoleConfig {
    /// Decode the console config words (cols/rows packed in word 0).
    fn read<R: RegisterAccess>(transport: &mut MmioTransport<R>) -> Self {
        let size = transport.read_config32(0x0);
        ConsoleConfig {
            cols: (size & 0xFFFF) as u16,
            rows: (size >> 16) as u16,
            max_nr_ports: transport.read_config32(0x4),
            emerg_wr: transport.read_config32(0x8),
        }
    }
}

/// Errors surfaced by console operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleError {
    /// The device has not completed initialization.
    NotReady,
    /// Transmit called with no bytes.
    EmptyPayload,
    /// No free transmit descriptor.
    QueueFull,
    /// The transmit buffer pool could not hold the payload.
    PoolExhausted,
    /// The MMIO handshake failed.
    Transport(TransportError),
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("console device is not ready"),
            Self::EmptyPayload => f.write_str("no data to transmit"),
            Self::QueueFull => f.write_str("no free transmit descriptor"),
            Self::PoolExhausted => f.write_str("transmit buffer pool exhausted"),
            Self::Transport(err) => write!(f, "transport: {}", err),
        }
    }
}

impl From<TransportError> for ConsoleError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// The two virtqueues of console port 0.
struct Queues {
    rx: VirtQueue,
    tx: VirtQueue,
}

/// VirtIO console device over an MMIO transport.
pub struct ConsoleDevice<R: RegisterAccess> {
    transport: MmioTransport<R>,
    queues: Option<Queues>,
    config: Option<ConsoleConfig>,
    ready: bool,
}

impl<R: RegisterAccess> ConsoleDevice<R> {
    /// Wrap a register block. The device is unusable until
    /// [`initialize`](Self::initialize) succeeds.
    pub fn new(regs: R) -> Self {
        ConsoleDevice {
            transport: MmioTransport::new(regs),
            queues: None,
            config: None,
            ready: false,
        }
    }

    /// Bring the device up.
    ///
    /// Lays both virtqueues out over `shmem` (`SHMEM_SIZE` bytes), hands
    /// the device one writable receive buffer per descriptor, then runs
    /// the MMIO handshake and publishes the ring addresses. The device
    /// becomes ready only when every step verified.
    ///
    /// # Safety contract
    ///
    /// `shmem` must satisfy the requirements of [`VirtQueue::new`] for
    /// two consecutive queue regions; the caller guarantees the backend
    /// device shares that memory.
    pub fn initialize(&mut self, shmem: DmaRegion) -> Result<(), ConsoleError> {
        let mut rx = unsafe { VirtQueue::new(RX_QUEUE_INDEX, shmem) };
        let tx = unsafe { VirtQueue::new(TX_QUEUE_INDEX, shmem.offset(QUEUE_REGION_SIZE)) };

        // The device must never be handed a readable buffer on the
        // receive queue, so every pre-loaded buffer is marked write-only.
        while rx.has_free_slots() {
            let Some(buf) = rx.alloc_buffer(RX_BUFFER_SIZE) else {
                break;
            };
            if rx.add_buffer(buf, RX_BUFFER_SIZE, true).is_none() {
                break;
            }
        }
        debug!(
            "virtio-console: receive queue pre-loaded with {} buffers",
            QUEUE_SIZE - rx.free_count()
        );

        self.transport.probe(DEVICE_ID_CONSOLE)?;
        self.transport.reset_and_acknowledge()?;
        self.transport.negotiate_features(CONSOLE_FEATURES)?;
        self.transport.confirm_features()?;

        let config = ConsoleConfig::read(&mut self.transport);

        for vq in [&rx, &tx] {
            self.transport.activate_queue(
                vq.queue_index(),
                vq.desc_table_device_addr(),
                vq.avail_ring_device_addr(),
                vq.used_ring_device_addr(),
                QUEUE_SIZE as u32,
            )?;
        }

        self.transport.driver_ok()?;

        debug!(
            "virtio-console: up, {}x{}, {} ports max",
            config.cols, config.rows, config.max_nr_ports
        );

        self.config = Some(config);
        self.queues = Some(Queues { rx, tx });
        self.ready = true;
        Ok(())
    }

    /// Hand `bytes` to the device on the transmit queue.
    ///
    /// The payload is copied into the queue's buffer pool, published
    /// device-readable, and the device is notified. The buffer stays
    /// lent to the device until its used-ring entry is reclaimed by
    /// [`receive`](Self::receive).
    pub fn transmit(&mut self, bytes: &[u8]) -> Result<(), ConsoleError> {
        if !self.ready {
            return Err(ConsoleError::NotReady);
        }
        if bytes.is_empty() {
            return Err(ConsoleError::EmptyPayload);
        }
        let queues = self.queues.as_mut().ok_or(ConsoleError::NotReady)?;
        let tx = &mut queues.tx;

        if !tx.has_free_slots() {
            return Err(ConsoleError::QueueFull);
        }
        let buf = tx
            .alloc_buffer(bytes.len() as u32)
            .ok_or(ConsoleError::PoolExhausted)?;

        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf as usize as *mut u8, bytes.len());
        }

        let id = tx
            .add_buffer(buf, bytes.len() as u32, false)
            .ok_or(ConsoleError::QueueFull)?;
        debug!(
            "virtio-console: tx desc {} published, {} bytes",
            id,
            bytes.len()
        );

        self.transport.notify(TX_QUEUE_INDEX);
        Ok(())
    }

    /// Drain completions after a device interrupt.
    ///
    /// Acknowledges the pending interrupt bits, reclaims every used
    /// descriptor on both queues and returns the bytes the device wrote
    /// to receive buffers, concatenated in used-ring order. Payload
    /// length comes from the used-ring `len` field, clamped to the
    /// descriptor length.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, ConsoleError> {
        if !self.ready {
            return Err(ConsoleError::NotReady);
        }
        let queues = self.queues.as_mut().ok_or(ConsoleError::NotReady)?;

        let pending = self.transport.interrupt_status();
        if pending != 0 {
            self.transport.ack_interrupt(pending);
        }
        let config_change = pending & mmio::INT_CONFIG != 0;
        if config_change {
            warn!("virtio-console: configuration change notifications not supported");
        }

        // Transmit completions only hand the buffers back for reuse.
        while let Some((id, _)) = queues.tx.pop_used() {
            queues.tx.free_desc(id);
        }

        let mut payload: Vec<u8> = Vec::new();
        while let Some((id, written)) = queues.rx.pop_used() {
            let entry = queues.rx.desc(id);
            let len = written.min(entry.len) as usize;
            if len > 0 {
                let buf = queues.rx.cpu_addr(entry.addr) as usize as *const u8;
                payload.extend_from_slice(unsafe { slice::from_raw_parts(buf, len) });
            }
            queues.rx.free_desc(id);
        }

        if config_change || payload.is_empty() {
            Ok(None)
        } else {
            Ok(Some(payload))
        }
    }

    /// Whether initialization completed successfully.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Configuration space snapshot taken during initialization.
    pub fn config(&self) -> Option<ConsoleConfig> {
        self.config
    }

    /// Feature mask agreed on with the device.
    pub fn negotiated_features(&self) -> u64 {
        self.transport.negotiated_features()
    }
}

// ── Tests ───────────────────────────────────────────────────
