//! TCP header (RFC 9293). Options are carried opaquely.

use super::{Checksum, Cursor, IpProtocol, Ipv4Hdr, Ipv6Hdr, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};

/// TCP header size without options
pub const TCP_HEADER_SIZE: usize = 20;

pub const TCP_FIN: u16 = 0x001;
pub const TCP_SYN: u16 = 0x002;
pub const TCP_RST: u16 = 0x004;
pub const TCP_PSH: u16 = 0x008;
pub const TCP_ACK: u16 = 0x010;
pub const TCP_URG: u16 = 0x020;
pub const TCP_ECE: u16 = 0x040;
pub const TCP_CWR: u16 = 0x080;
pub const TCP_NS: u16 = 0x100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHdr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Low nine bits: NS, CWR, ECE, URG, ACK, PSH, RST, SYN, FIN.
    pub flags: u16,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
    pub options: Vec<u8>,
}

impl TcpHdr {
    pub fn header_len(&self) -> usize {
        TCP_HEADER_SIZE + self.options.len()
    }

    pub fn compute_checksum_v4(&self, ip: &Ipv4Hdr, payload: &[u8]) -> u16 {
        let len = self.header_len() + payload.len();
        let mut c = Checksum::new();
        c.add_ipv4_pseudo_header(ip.src, ip.dst, IpProtocol::TCP, len as u16);
        self.add_to(&mut c);
        c.add_bytes(payload);
        c.finish()
    }

    pub fn compute_checksum_v6(&self, ip: &Ipv6Hdr, payload: &[u8]) -> u16 {
        let len = self.header_len() + payload.len();
        let mut c = Checksum::new();
        c.add_ipv6_pseudo_header(ip.src, ip.dst, IpProtocol::TCP, len as u32);
        self.add_to(&mut c);
        c.add_bytes(payload);
        c.finish()
    }

    fn add_to(&self, c: &mut Checksum) {
        let mut hdr = Vec::with_capacity(self.header_len());
        let zeroed = TcpHdr {
            checksum: 0,
            ..self.clone()
        };
        let _ = zeroed.write(&mut hdr);
        c.add_bytes(&hdr);
    }
}

impl WireHeader for TcpHdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("tcp header", TCP_HEADER_SIZE)?;
        let src_port = cursor.read_be_u16("tcp src port")?;
        let dst_port = cursor.read_be_u16("tcp dst port")?;
        let seq = cursor.read_be_u32("tcp seq")?;
        let ack = cursor.read_be_u32("tcp ack")?;
        let off_flags = cursor.read_be_u16("tcp flags")?;
        let data_offset = usize::from(off_flags >> 12);
        if data_offset < 5 {
            return Err(ParseError::malformed("tcp header", "data offset below 5"));
        }
        let window = cursor.read_be_u16("tcp window")?;
        let checksum = cursor.read_be_u16("tcp checksum")?;
        let urgent = cursor.read_be_u16("tcp urgent")?;
        let options = cursor
            .read_bytes("tcp options", data_offset * 4 - TCP_HEADER_SIZE)?
            .to_vec();

        Ok(Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags: off_flags & 0x01ff,
            window,
            checksum,
            urgent,
            options,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        let data_offset = (self.header_len() / 4) as u16;
        w.put_be_u16(self.src_port)?;
        w.put_be_u16(self.dst_port)?;
        w.put_be_u32(self.seq)?;
        w.put_be_u32(self.ack)?;
        w.put_be_u16((data_offset << 12) | (self.flags & 0x01ff))?;
        w.put_be_u16(self.window)?;
        w.put_be_u16(self.checksum)?;
        w.put_be_u16(self.urgent)?;
        w.put_slice(&self.options)
    }

    fn size(&self) -> usize {
        self.header_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoltcp::wire::{IpAddress, Ipv4Packet, TcpPacket};
    use std::net::Ipv4Addr;

    fn syn() -> TcpHdr {
        TcpHdr {
            src_port: 40000,
            dst_port: 179,
            seq: 0x0102_0304,
            ack: 0,
            flags: TCP_SYN | TCP_NS,
            window: 65535,
            checksum: 0,
            urgent: 0,
            options: vec![0x02, 0x04, 0x05, 0xb4], // MSS 1460
        }
    }

    #[test]
    fn test_round_trip() {
        let hdr = syn();
        let mut out = Vec::new();
        hdr.write(&mut out).unwrap();
        assert_eq!(out.len(), 24);
        assert_eq!(&out[12..14], &[0x61, 0x02]);

        let parsed = TcpHdr::parse(&mut Cursor::new(&out)).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn test_checksum_matches_smoltcp() {
        let mut tcp = syn();
        let mut ip = Ipv4Hdr::new(
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 1, 1, 2),
            IpProtocol::TCP,
            64,
        );
        ip.total_length = (20 + tcp.header_len()) as u16;
        ip.checksum = ip.compute_checksum();
        tcp.checksum = tcp.compute_checksum_v4(&ip, &[]);

        let mut out = Vec::new();
        ip.write(&mut out).unwrap();
        tcp.write(&mut out).unwrap();

        let ip_pkt = Ipv4Packet::new_checked(&out[..]).unwrap();
        let tcp_pkt = TcpPacket::new_checked(ip_pkt.payload()).unwrap();
        assert!(tcp_pkt.verify_checksum(
            &IpAddress::from(ip_pkt.src_addr()),
            &IpAddress::from(ip_pkt.dst_addr())
        ));
        assert!(tcp_pkt.syn());
    }

    #[test]
    fn test_bad_data_offset() {
        let mut out = Vec::new();
        syn().write(&mut out).unwrap();
        out[12] = 0x40;
        assert!(matches!(
            TcpHdr::parse(&mut Cursor::new(&out)),
            Err(ParseError::Malformed { .. })
        ));
    }
}
