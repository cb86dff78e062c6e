//! Recording packet I/O

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::hw::{PacketIo, TxPacket};
use crate::state::{PortId, VlanId};

/// A frame handed to the host stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFrame {
    pub data: Vec<u8>,
    pub port: PortId,
    pub vlan: Option<VlanId>,
}

#[derive(Debug, Default)]
struct Sent {
    switched: Vec<Vec<u8>>,
    out_of_port: Vec<(PortId, Vec<u8>)>,
    to_host: Vec<HostFrame>,
}

/// `PacketIo` that records instead of transmitting.
#[derive(Debug, Default)]
pub struct RecordingIo {
    sent: Mutex<Sent>,
}

impl RecordingIo {
    fn sent(&self) -> MutexGuard<'_, Sent> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frames sent through the forwarding pipeline, oldest first.
    pub fn switched(&self) -> Vec<Vec<u8>> {
        self.sent().switched.clone()
    }

    /// Frames sent out of a specific port.
    pub fn out_of_port(&self) -> Vec<(PortId, Vec<u8>)> {
        self.sent().out_of_port.clone()
    }

    pub fn to_host(&self) -> Vec<HostFrame> {
        self.sent().to_host.clone()
    }

    /// Total frames transmitted on the wire.
    pub fn transmitted(&self) -> usize {
        let sent = self.sent();
        sent.switched.len() + sent.out_of_port.len()
    }

    pub fn clear(&self) {
        *self.sent() = Sent::default();
    }
}

impl PacketIo for RecordingIo {
    fn send_switched(&self, pkt: TxPacket) {
        self.sent().switched.push(pkt.into_inner());
    }

    fn send_out_of_port(&self, pkt: TxPacket, port: PortId) {
        self.sent().out_of_port.push((port, pkt.into_inner()));
    }

    fn send_to_host(&self, frame: &[u8], port: PortId, vlan: Option<VlanId>) {
        self.sent().to_host.push(HostFrame {
            data: frame.to_vec(),
            port,
            vlan,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let io = RecordingIo::default();
        io.send_switched(TxPacket::from(vec![1]));
        io.send_out_of_port(TxPacket::from(vec![2]), PortId(7));
        io.send_switched(TxPacket::from(vec![3]));
        io.send_to_host(&[4], PortId(1), Some(VlanId(5)));

        assert_eq!(io.switched(), vec![vec![1], vec![3]]);
        assert_eq!(io.out_of_port(), vec![(PortId(7), vec![2])]);
        assert_eq!(io.to_host()[0].vlan, Some(VlanId(5)));
        assert_eq!(io.transmitted(), 3);

        io.clear();
        assert_eq!(io.transmitted(), 0);
    }
}
