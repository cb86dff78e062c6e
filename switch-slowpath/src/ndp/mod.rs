//! IPv6 Neighbor Discovery.
//!
//! This module provides:
//! - Builders for the solicitations and advertisements the switch emits,
//!   encoded with smoltcp's `NdiscRepr`
//! - `neighbor`: aging, probing and expiry of neighbor entries
//! - `ra`: periodic unsolicited router advertisements

pub mod neighbor;
pub mod ra;

use std::net::Ipv6Addr;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    Icmpv6Packet, Icmpv6Repr, NdiscNeighborFlags, NdiscOption, NdiscOptionRepr, NdiscPrefixInformation,
    NdiscRepr, RawHardwareAddress,
};

use crate::error::WriteError;
use crate::hw::{PacketIo, TxPacket};
use crate::packet::frame::Icmpv6Frame;
use crate::packet::ipv6::solicited_node_address;
use crate::packet::{EthHdr, EtherType, IpProtocol, Ipv6Hdr, MacAddress, PacketWriter, WireHeader};
use crate::state::Interface;

pub use neighbor::{NeighborConfig, NeighborSweeper};
pub use ra::RaScheduler;

/// Hop limit every ND message must carry
pub const NDP_HOP_LIMIT: u8 = 255;

/// CS6 (network control) traffic class used for generated ICMPv6
pub const NETWORK_CONTROL_TRAFFIC_CLASS: u8 = 0xc0;

/// Header template for an ICMPv6 message the switch originates.
pub(crate) fn control_ipv6_header(src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8) -> Ipv6Hdr {
    let mut ip = Ipv6Hdr::new(src, dst, IpProtocol::ICMPV6, hop_limit);
    ip.traffic_class = NETWORK_CONTROL_TRAFFIC_CLASS;
    ip
}

/// Allocate a buffer from `io` and serialize `frame` into it.
pub(crate) fn allocate_frame(io: &dyn PacketIo, frame: &Icmpv6Frame<'_>) -> Result<TxPacket, WriteError> {
    let mut pkt = io.allocate(frame.len());
    frame.write(pkt.buf_mut())?;
    Ok(pkt)
}

pub(crate) fn hardware_address(mac: MacAddress) -> RawHardwareAddress {
    RawHardwareAddress::from_bytes(&mac.octets())
}

/// MAC carried in a link-layer address option; `None` unless it is six bytes.
pub(crate) fn ethernet_address(addr: &RawHardwareAddress) -> Option<MacAddress> {
    MacAddress::from_slice(addr.as_bytes())
}

/// Encode `message` as a complete ICMPv6 message from `src` to `dst`.
///
/// smoltcp carries at most one prefix per advertisement, so every entry of
/// `prefixes` is appended as its own option after the ones it emits.
pub fn ndisc_message(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    message: NdiscRepr<'_>,
    prefixes: &[NdiscPrefixInformation],
) -> Vec<u8> {
    let repr = Icmpv6Repr::Ndisc(message);
    let base = repr.buffer_len();
    let total = base
        + prefixes
            .iter()
            .map(|p| NdiscOptionRepr::PrefixInformation(*p).buffer_len())
            .sum::<usize>();

    let mut buf = vec![0u8; total];
    repr.emit(
        &src,
        &dst,
        &mut Icmpv6Packet::new_unchecked(&mut buf[..]),
        &ChecksumCapabilities::ignored(),
    );
    let mut offset = base;
    for prefix in prefixes {
        // the option borrows the buffer it is emitted into
        let option = NdiscOptionRepr::PrefixInformation(*prefix);
        let end = offset + option.buffer_len();
        option.emit(&mut NdiscOption::new_unchecked(&mut buf[offset..end]));
        offset = end;
    }
    Icmpv6Packet::new_unchecked(&mut buf[..]).fill_checksum(&src, &dst);
    buf
}

/// Wrap an ND message in the tagged Ethernet and IPv6 headers of `intf`.
fn ndisc_frame(
    intf: &Interface,
    dst_mac: MacAddress,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    message: NdiscRepr<'_>,
    prefixes: &[NdiscPrefixInformation],
) -> Result<Vec<u8>, WriteError> {
    let icmp = ndisc_message(src, dst, message, prefixes);
    let eth = EthHdr::new(dst_mac, intf.mac, Some(intf.vlan), EtherType::IPV6);
    let mut ip = control_ipv6_header(src, dst, NDP_HOP_LIMIT);
    ip.payload_length = icmp.len() as u16;

    let mut buf = Vec::with_capacity(eth.size() + ip.size() + icmp.len());
    eth.write(&mut buf)?;
    ip.write(&mut buf)?;
    buf.put_slice(&icmp)?;
    Ok(buf)
}

/// Solicitation for `target` sent to its solicited-node group from the
/// interface link-local address.
pub fn multicast_solicitation(intf: &Interface, target: Ipv6Addr) -> Result<Vec<u8>, WriteError> {
    let group = solicited_node_address(target);
    ndisc_frame(
        intf,
        MacAddress::ipv6_multicast(group),
        intf.link_local(),
        group,
        NdiscRepr::NeighborSolicit {
            target_addr: target,
            lladdr: Some(hardware_address(intf.mac)),
        },
        &[],
    )
}

/// Solicitation sent straight to a neighbor whose MAC is already known.
pub fn unicast_solicitation(
    intf: &Interface,
    src: Ipv6Addr,
    target: Ipv6Addr,
    target_mac: MacAddress,
) -> Result<Vec<u8>, WriteError> {
    ndisc_frame(
        intf,
        target_mac,
        src,
        target,
        NdiscRepr::NeighborSolicit {
            target_addr: target,
            lladdr: Some(hardware_address(intf.mac)),
        },
        &[],
    )
}

/// Advertisement of one of our addresses.
///
/// `solicited` is false when answering duplicate address detection.
pub fn neighbor_advertisement(
    intf: &Interface,
    target: Ipv6Addr,
    dst: Ipv6Addr,
    dst_mac: MacAddress,
    solicited: bool,
) -> Result<Vec<u8>, WriteError> {
    let mut flags = NdiscNeighborFlags::ROUTER | NdiscNeighborFlags::OVERRIDE;
    if solicited {
        flags |= NdiscNeighborFlags::SOLICITED;
    }
    ndisc_frame(
        intf,
        dst_mac,
        target,
        dst,
        NdiscRepr::NeighborAdvert {
            flags,
            target_addr: target,
            lladdr: Some(hardware_address(intf.mac)),
        },
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InterfaceId, NdpConfig, VlanId};
    use crate::packet::{Cursor, IcmpHdr};
    use smoltcp::wire::{EthernetFrame, Ipv6Packet};

    fn intf() -> Interface {
        Interface {
            id: InterfaceId(55),
            vlan: VlanId(5),
            mac: MacAddress::new([0x00, 0x02, 0x00, 0x00, 0x00, 0x01]),
            mtu: 1500,
            addresses: vec!["2401:db00:2110:3004::1/64".parse().unwrap()],
            ndp: NdpConfig::default(),
        }
    }

    /// Decode the ND message of a generated frame, verifying its checksum.
    fn decode(bytes: &[u8]) -> (Ipv6Hdr, NdiscRepr<'_>) {
        let mut cursor = Cursor::new(&bytes[18..]);
        let ip = Ipv6Hdr::parse(&mut cursor).unwrap();
        let packet = Icmpv6Packet::new_checked(&bytes[18 + 40..]).unwrap();
        match Icmpv6Repr::parse(&ip.src, &ip.dst, &packet, &ChecksumCapabilities::default()).unwrap() {
            Icmpv6Repr::Ndisc(repr) => (ip, repr),
            other => panic!("not an ND message: {other:?}"),
        }
    }

    #[test]
    fn test_multicast_solicitation() {
        let target: Ipv6Addr = "2401:db00:2110:3004::1:0".parse().unwrap();
        let bytes = multicast_solicitation(&intf(), target).unwrap();

        let eth = EthernetFrame::new_checked(&bytes[..]).unwrap();
        assert_eq!(eth.dst_addr().as_bytes(), &[0x33, 0x33, 0xff, 0x01, 0x00, 0x00]);
        // 802.1Q tag then IPv6
        let ip = Ipv6Packet::new_checked(&bytes[18..]).unwrap();
        assert_eq!(ip.hop_limit(), 255);
        assert_eq!(ip.traffic_class(), NETWORK_CONTROL_TRAFFIC_CLASS);

        let (hdr, repr) = decode(&bytes);
        assert_eq!(hdr.dst, "ff02::1:ff01:0".parse::<Ipv6Addr>().unwrap());
        assert_eq!(hdr.src, intf().link_local());
        assert_eq!(
            repr,
            NdiscRepr::NeighborSolicit {
                target_addr: target,
                lladdr: Some(hardware_address(intf().mac)),
            }
        );
        // SLLA carries the interface MAC
        assert_eq!(&ip.payload()[24..32], &[1, 1, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_unicast_solicitation_checksum() {
        let src: Ipv6Addr = "2401:db00:2110:3004::1".parse().unwrap();
        let target: Ipv6Addr = "2401:db00:2110:3004::99".parse().unwrap();
        let peer = MacAddress::new([0x02, 0x05, 0x73, 0xf9, 0x46, 0xfc]);
        let bytes = unicast_solicitation(&intf(), src, target, peer).unwrap();
        assert_eq!(&bytes[..6], &peer.octets());

        // our own ICMPv6 checksum agrees with smoltcp's
        let mut cursor = Cursor::new(&bytes[18..]);
        let ip = Ipv6Hdr::parse(&mut cursor).unwrap();
        let icmp = IcmpHdr::parse(&mut cursor).unwrap();
        assert!(icmp.validate_checksum_v6(&ip, cursor.rest()));
        assert_eq!((ip.src, ip.dst), (src, target));
    }

    #[test]
    fn test_unsolicited_advertisement_flags() {
        let target: Ipv6Addr = "2401:db00:2110:3004::1".parse().unwrap();
        let bytes = neighbor_advertisement(
            &intf(),
            target,
            crate::packet::ipv6::ALL_NODES,
            MacAddress::new([0x02, 0x05, 0x73, 0xf9, 0x46, 0xfc]),
            false,
        )
        .unwrap();
        let ip = Ipv6Packet::new_checked(&bytes[18..]).unwrap();
        assert_eq!(&ip.payload()[4..8], &[0xa0, 0, 0, 0]);

        let (_, repr) = decode(&bytes);
        assert_eq!(
            repr,
            NdiscRepr::NeighborAdvert {
                flags: NdiscNeighborFlags::ROUTER | NdiscNeighborFlags::OVERRIDE,
                target_addr: target,
                lladdr: Some(hardware_address(intf().mac)),
            }
        );
    }
}
