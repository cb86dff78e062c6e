//! Hardware packet I/O seam.
//!
//! The slow path never talks to an ASIC directly. It allocates transmit
//! buffers and hands finished frames to a `PacketIo` implementation, which
//! in production wraps the switch SDK and in tests records what was sent.

use crate::state::{PortId, VlanId};

/// A transmit buffer of a fixed size, filled in place by a frame builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPacket {
    buf: Vec<u8>,
}

impl TxPacket {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
        }
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl From<Vec<u8>> for TxPacket {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

/// Packet allocation and transmission.
pub trait PacketIo: Send + Sync {
    fn allocate(&self, size: usize) -> TxPacket {
        TxPacket::new(size)
    }

    /// Transmit through the forwarding pipeline (L2/L3 lookup in hardware).
    fn send_switched(&self, pkt: TxPacket);

    /// Transmit out of one specific port, bypassing lookup.
    fn send_out_of_port(&self, pkt: TxPacket, port: PortId);

    /// Deliver a received frame to the host network stack.
    fn send_to_host(&self, frame: &[u8], port: PortId, vlan: Option<VlanId>);
}
