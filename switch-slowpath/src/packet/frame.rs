//! Builders for complete outbound frames.
//!
//! Each builder knows its exact wire length so callers can allocate a
//! buffer of that size from the hardware layer and write into it with a
//! `RwCursor`. Length fields and checksums are filled in during `write`.

use super::{
    EthHdr, EtherType, IcmpHdr, IpProtocol, Ipv4Hdr, Ipv6Hdr, PacketWriter, RwCursor, UdpHdr,
    WireHeader,
};
use crate::error::WriteError;

use super::icmp::ICMP_HEADER_SIZE;
use super::ipv6::IPV6_HEADER_SIZE;
use super::udp::UDP_HEADER_SIZE;

/// Ethernet + IPv4 + UDP.
#[derive(Debug)]
pub struct UdpV4Frame<'a> {
    pub eth: EthHdr,
    /// Template; length, protocol and checksum are recomputed.
    pub ip: Ipv4Hdr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl UdpV4Frame<'_> {
    pub fn len(&self) -> usize {
        self.eth.size() + self.ip.header_len() + UDP_HEADER_SIZE + self.payload.len()
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, WriteError> {
        let mut w = RwCursor::new(buf);
        let mut eth = self.eth.clone();
        eth.ethertype = EtherType::IPV4;
        eth.write(&mut w)?;

        let mut udp = UdpHdr::new(self.src_port, self.dst_port, self.payload.len());
        let mut ip = self.ip.clone();
        ip.protocol = IpProtocol::UDP;
        ip.total_length = (ip.header_len() + usize::from(udp.length)) as u16;
        ip.checksum = ip.compute_checksum();
        udp.checksum = udp.compute_checksum_v4(&ip, self.payload);

        ip.write(&mut w)?;
        udp.write(&mut w)?;
        w.put_slice(self.payload)?;
        Ok(w.written())
    }
}

/// Ethernet + IPv6 + UDP.
#[derive(Debug)]
pub struct UdpV6Frame<'a> {
    pub eth: EthHdr,
    /// Template; payload length and next header are recomputed.
    pub ip: Ipv6Hdr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl UdpV6Frame<'_> {
    pub fn len(&self) -> usize {
        self.eth.size() + IPV6_HEADER_SIZE + UDP_HEADER_SIZE + self.payload.len()
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, WriteError> {
        let mut w = RwCursor::new(buf);
        let mut eth = self.eth.clone();
        eth.ethertype = EtherType::IPV6;
        eth.write(&mut w)?;

        let mut udp = UdpHdr::new(self.src_port, self.dst_port, self.payload.len());
        let mut ip = self.ip.clone();
        ip.next_header = IpProtocol::UDP;
        ip.payload_length = udp.length;
        udp.checksum = udp.compute_checksum_v6(&ip, self.payload);

        ip.write(&mut w)?;
        udp.write(&mut w)?;
        w.put_slice(self.payload)?;
        Ok(w.written())
    }
}

/// Ethernet + IPv6 + ICMPv6.
#[derive(Debug)]
pub struct Icmpv6Frame<'a> {
    pub eth: EthHdr,
    pub ip: Ipv6Hdr,
    pub icmp_type: u8,
    pub code: u8,
    /// Everything after the 4-byte ICMP header.
    pub body: &'a [u8],
}

impl Icmpv6Frame<'_> {
    pub fn len(&self) -> usize {
        self.eth.size() + IPV6_HEADER_SIZE + ICMP_HEADER_SIZE + self.body.len()
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, WriteError> {
        let mut w = RwCursor::new(buf);
        let mut eth = self.eth.clone();
        eth.ethertype = EtherType::IPV6;
        eth.write(&mut w)?;

        let mut ip = self.ip.clone();
        ip.next_header = IpProtocol::ICMPV6;
        ip.payload_length = (ICMP_HEADER_SIZE + self.body.len()) as u16;
        let mut icmp = IcmpHdr::new(self.icmp_type, self.code);
        icmp.checksum = icmp.compute_checksum_v6(&ip, self.body);

        ip.write(&mut w)?;
        icmp.write(&mut w)?;
        w.put_slice(self.body)?;
        Ok(w.written())
    }

    /// Serialize into a freshly allocated buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, WriteError> {
        let mut buf = vec![0u8; self.len()];
        self.write(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Cursor, MacAddress};
    use crate::state::VlanId;
    use std::net::Ipv4Addr;

    #[test]
    fn test_udp_v4_frame() {
        let payload = [0xaa; 10];
        let frame = UdpV4Frame {
            eth: EthHdr::new(
                MacAddress::BROADCAST,
                MacAddress::new([2, 0, 0, 0, 0, 1]),
                Some(VlanId(5)),
                EtherType::IPV4,
            ),
            ip: Ipv4Hdr::new(
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                IpProtocol::UDP,
                64,
            ),
            src_port: 67,
            dst_port: 68,
            payload: &payload,
        };
        let mut buf = vec![0u8; frame.len()];
        assert_eq!(frame.write(&mut buf).unwrap(), 18 + 20 + 8 + 10);

        let mut cur = Cursor::new(&buf);
        let eth = EthHdr::parse(&mut cur).unwrap();
        assert_eq!(eth.vlan(), Some(VlanId(5)));
        let ip = Ipv4Hdr::parse(&mut cur).unwrap();
        assert_eq!(ip.total_length, 38);
        assert!(ip.checksum_valid());
        let udp = UdpHdr::parse(&mut cur).unwrap();
        assert_eq!(udp.length, 18);
        assert_eq!(cur.rest(), &payload);
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let frame = Icmpv6Frame {
            eth: EthHdr::new(MacAddress::ZERO, MacAddress::ZERO, None, EtherType::IPV6),
            ip: Ipv6Hdr::new(
                "fe80::1".parse().unwrap(),
                "ff02::1".parse().unwrap(),
                IpProtocol::ICMPV6,
                255,
            ),
            icmp_type: 134,
            code: 0,
            body: &[0; 12],
        };
        let mut buf = vec![0u8; frame.len() - 1];
        assert!(frame.write(&mut buf).is_err());
        assert_eq!(frame.to_vec().unwrap().len(), 14 + 40 + 4 + 12);
    }
}
