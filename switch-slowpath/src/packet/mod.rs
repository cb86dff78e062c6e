//! Wire-format codec.
//!
//! This module provides:
//! - `Cursor` / `PacketWriter`: byte cursors the headers parse from and write to
//! - `WireHeader`: the parse/write capability every header implements
//! - Header value types for Ethernet, IPv4, IPv6, ICMP, UDP and TCP
//! - `Checksum`: the RFC 1071 accumulator shared by all of them
//! - `frame`: builders for the complete frames the slow path emits

pub mod checksum;
pub mod cursor;
pub mod ethernet;
pub mod frame;
pub mod icmp;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;

use std::fmt;

pub use checksum::{Checksum, internet_checksum};
pub use cursor::{Cursor, PacketWriter, RwCursor};
pub use ethernet::{EthHdr, MacAddress, VlanTag};
pub use icmp::{IcmpHdr, Icmpv6Type};
pub use ipv4::Ipv4Hdr;
pub use ipv6::Ipv6Hdr;
pub use tcp::TcpHdr;
pub use udp::UdpHdr;

use crate::error::{ParseError, WriteError};

/// Parse/serialize capability shared by all headers.
pub trait WireHeader: Sized {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError>;

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError>;

    /// Serialized size in bytes.
    fn size(&self) -> usize;
}

/// Ethernet payload type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: EtherType = EtherType(0x0800);
    pub const ARP: EtherType = EtherType(0x0806);
    pub const VLAN: EtherType = EtherType(0x8100);
    pub const QINQ: EtherType = EtherType(0x88a8);
    pub const IPV6: EtherType = EtherType(0x86dd);
}

impl fmt::Debug for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EtherType::IPV4 => f.write_str("IPv4"),
            EtherType::ARP => f.write_str("ARP"),
            EtherType::VLAN => f.write_str("802.1Q"),
            EtherType::QINQ => f.write_str("802.1ad"),
            EtherType::IPV6 => f.write_str("IPv6"),
            EtherType(other) => write!(f, "{other:#06x}"),
        }
    }
}

/// IP protocol / IPv6 next-header number.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);
    pub const ICMPV6: IpProtocol = IpProtocol(58);
}

impl fmt::Debug for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IpProtocol::ICMP => f.write_str("ICMP"),
            IpProtocol::TCP => f.write_str("TCP"),
            IpProtocol::UDP => f.write_str("UDP"),
            IpProtocol::ICMPV6 => f.write_str("ICMPv6"),
            IpProtocol(other) => write!(f, "{other}"),
        }
    }
}
