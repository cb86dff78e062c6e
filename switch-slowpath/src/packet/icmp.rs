//! ICMP / ICMPv6 common header.

use super::{Checksum, Cursor, IpProtocol, Ipv6Hdr, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};

/// ICMP header size (type, code, checksum)
pub const ICMP_HEADER_SIZE: usize = 4;

/// ICMPv6 message types the slow path knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    PacketTooBig = 2,
    TimeExceeded = 3,
    EchoRequest = 128,
    EchoReply = 129,
    RouterSolicitation = 133,
    RouterAdvertisement = 134,
    NeighborSolicitation = 135,
    NeighborAdvertisement = 136,
    Redirect = 137,
}

impl TryFrom<u8> for Icmpv6Type {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            2 => Icmpv6Type::PacketTooBig,
            3 => Icmpv6Type::TimeExceeded,
            128 => Icmpv6Type::EchoRequest,
            129 => Icmpv6Type::EchoReply,
            133 => Icmpv6Type::RouterSolicitation,
            134 => Icmpv6Type::RouterAdvertisement,
            135 => Icmpv6Type::NeighborSolicitation,
            136 => Icmpv6Type::NeighborAdvertisement,
            137 => Icmpv6Type::Redirect,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHdr {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
}

impl IcmpHdr {
    pub fn new(icmp_type: u8, code: u8) -> Self {
        Self {
            icmp_type,
            code,
            checksum: 0,
        }
    }

    /// ICMPv4 checksum: header plus body, no pseudo-header.
    pub fn compute_checksum_v4(&self, body: &[u8]) -> u16 {
        let mut c = Checksum::new();
        self.add_to(&mut c, false);
        c.add_bytes(body);
        c.finish()
    }

    /// ICMPv6 checksum over the IPv6 pseudo-header, header and body.
    pub fn compute_checksum_v6(&self, ip: &Ipv6Hdr, body: &[u8]) -> u16 {
        let mut c = Checksum::new();
        c.add_ipv6_pseudo_header(
            ip.src,
            ip.dst,
            IpProtocol::ICMPV6,
            (ICMP_HEADER_SIZE + body.len()) as u32,
        );
        self.add_to(&mut c, false);
        c.add_bytes(body);
        c.finish()
    }

    /// Verify the stored ICMPv6 checksum.
    pub fn validate_checksum_v6(&self, ip: &Ipv6Hdr, body: &[u8]) -> bool {
        let mut c = Checksum::new();
        c.add_ipv6_pseudo_header(
            ip.src,
            ip.dst,
            IpProtocol::ICMPV6,
            (ICMP_HEADER_SIZE + body.len()) as u32,
        );
        self.add_to(&mut c, true);
        c.add_bytes(body);
        c.finish_raw() == 0
    }

    fn add_to(&self, c: &mut Checksum, with_checksum: bool) {
        c.add_bytes(&[self.icmp_type, self.code]);
        c.add_u16(if with_checksum { self.checksum } else { 0 });
    }
}

impl WireHeader for IcmpHdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("icmp header", ICMP_HEADER_SIZE)?;
        Ok(Self {
            icmp_type: cursor.read_u8("icmp type")?,
            code: cursor.read_u8("icmp code")?,
            checksum: cursor.read_be_u16("icmp checksum")?,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        w.put_u8(self.icmp_type)?;
        w.put_u8(self.code)?;
        w.put_be_u16(self.checksum)
    }

    fn size(&self) -> usize {
        ICMP_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_solicitation_checksum() {
        // RS from 2401:db00:2110:1234::1:0 to ff02::2, checksum 0x4971 on the wire
        let ip = Ipv6Hdr {
            payload_length: 8,
            ..Ipv6Hdr::new(
                "2401:db00:2110:1234::1:0".parse().unwrap(),
                "ff02::2".parse().unwrap(),
                IpProtocol::ICMPV6,
                255,
            )
        };
        let body = [0u8; 4];
        let mut hdr = IcmpHdr::new(Icmpv6Type::RouterSolicitation as u8, 0);
        hdr.checksum = hdr.compute_checksum_v6(&ip, &body);
        assert_eq!(hdr.checksum, 0x4971);
        assert!(hdr.validate_checksum_v6(&ip, &body));

        hdr.checksum ^= 1;
        assert!(!hdr.validate_checksum_v6(&ip, &body));
    }

    #[test]
    fn test_router_solicitation_with_option_checksum() {
        let ip = Ipv6Hdr::new(
            "2401:db00:2110:1234::1:0".parse().unwrap(),
            "ff02::2".parse().unwrap(),
            IpProtocol::ICMPV6,
            255,
        );
        let body = [0, 0, 0, 0, 0x01, 0x01, 0x02, 0xab, 0x73, 0xf9, 0x46, 0xfc];
        let hdr = IcmpHdr::new(133, 0);
        assert_eq!(hdr.compute_checksum_v6(&ip, &body), 0x8ac7);
    }

    #[test]
    fn test_echo_v4_checksum() {
        let body = [0x00, 0x01, 0x00, 0x01, b'h', b'i'];
        let mut hdr = IcmpHdr::new(8, 0);
        hdr.checksum = hdr.compute_checksum_v4(&body);

        let mut out = Vec::new();
        hdr.write(&mut out).unwrap();
        out.extend_from_slice(&body);
        assert_eq!(crate::packet::internet_checksum(&out), 0);
    }

    #[test]
    fn test_type_conversion() {
        assert_eq!(Icmpv6Type::try_from(136), Ok(Icmpv6Type::NeighborAdvertisement));
        assert_eq!(Icmpv6Type::try_from(1), Err(1));
    }
}
