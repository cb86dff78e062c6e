//! IPv6 fixed header (RFC 8200) and address helpers.

use std::net::Ipv6Addr;

use super::{Cursor, IpProtocol, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};

/// IPv6 header size
pub const IPV6_HEADER_SIZE: usize = 40;

/// Minimum link MTU every IPv6 link supports
pub const IPV6_MIN_MTU: usize = 1280;

/// All-nodes link-local multicast group
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// All-nodes interface-local multicast group
pub const INTERFACE_LOCAL_ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff01, 0, 0, 0, 0, 0, 0, 1);

/// All-routers link-local multicast group
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Hdr {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_length: u16,
    pub next_header: IpProtocol,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Hdr {
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, next_header: IpProtocol, hop_limit: u8) -> Self {
        Self {
            traffic_class: 0,
            flow_label: 0,
            payload_length: 0,
            next_header,
            hop_limit,
            src,
            dst,
        }
    }
}

impl WireHeader for Ipv6Hdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("ipv6 header", IPV6_HEADER_SIZE)?;
        let word = cursor.read_be_u32("ipv6 version")?;
        if word >> 28 != 6 {
            return Err(ParseError::malformed("ipv6 header", "version is not 6"));
        }
        let payload_length = cursor.read_be_u16("ipv6 payload length")?;
        let next_header = IpProtocol(cursor.read_u8("ipv6 next header")?);
        let hop_limit = cursor.read_u8("ipv6 hop limit")?;
        if hop_limit == 0 {
            return Err(ParseError::malformed("ipv6 header", "hop limit is zero"));
        }
        let src = cursor.read_ipv6("ipv6 src")?;
        let dst = cursor.read_ipv6("ipv6 dst")?;

        Ok(Self {
            traffic_class: (word >> 20) as u8,
            flow_label: word & 0x000f_ffff,
            payload_length,
            next_header,
            hop_limit,
            src,
            dst,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        let word =
            (6u32 << 28) | (u32::from(self.traffic_class) << 20) | (self.flow_label & 0x000f_ffff);
        w.put_be_u32(word)?;
        w.put_be_u16(self.payload_length)?;
        w.put_u8(self.next_header.0)?;
        w.put_u8(self.hop_limit)?;
        w.put_ipv6(self.src)?;
        w.put_ipv6(self.dst)
    }

    fn size(&self) -> usize {
        IPV6_HEADER_SIZE
    }
}

/// Solicited-node multicast group for `addr` (ff02::1:ffXX:XXXX).
pub fn solicited_node_address(addr: Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, o[13], o[14], o[15],
    ])
}

/// fe80::/10
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}
