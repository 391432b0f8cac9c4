//! VirtIO MMIO console transport.
//!
//! Guest-side implementation of the VirtIO split-queue protocol over the
//! MMIO (v2) transport, specialized for the console device. The crate is
//! platform-independent: it owns no statics, takes no locks and reaches
//! hardware only through the [`mmio::RegisterAccess`] seam and the
//! shared-memory window described by [`queue::DmaRegion`], so the whole
//! protocol stack runs unmodified under a host test harness against a
//! simulated device.
//!
//! # Architecture
//!
//! - [`pool`]: circular bump allocator handing out I/O buffer space.
//! - [`queue`]: split virtqueue (descriptor table, available ring, used
//!   ring) with driver-side bookkeeping.
//! - [`mmio`]: register map, device status sequencing and the
//!   initialization handshake.
//! - [`console`]: the console device composing one transport and two
//!   queues.
//!
//! Callers are responsible for serializing access: every operation takes
//! `&mut self` and the composition layer decides how transmit (timer
//! context) and receive (interrupt context) exclude each other.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod console;
pub mod mmio;
pub mod pool;
pub mod queue;

#[cfg(test)]
mod sim;

pub use console::{ConsoleConfig, ConsoleDevice, ConsoleError};
pub use mmio::{MmioRegisterBlock, MmioTransport, RegisterAccess, TransportError};
pub use queue::{DmaRegion, VirtQueue};
