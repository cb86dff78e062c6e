//! IPv6 ingress handling.
//!
//! Every trapped IPv6 frame lands here. DHCPv6 goes to the relay first
//! (clients solicit with hop limit 1). Traffic for one of our addresses is
//! checked against the interface MTU, ICMPv6 is handed to the ND handler
//! and the rest is punted to the host. Transit traffic that reached the CPU
//! means the destination is unresolved: solicit it and drop the frame.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use tracing::{debug, trace};

use super::{HandlerContext, RxFrame, UdpV6Headers, dhcpv6, ndp};
use crate::error::{HandlerError, ResourceUnavailable};
use crate::ndp::{allocate_frame, control_ipv6_header, multicast_solicitation};
use crate::packet::frame::Icmpv6Frame;
use crate::packet::icmp::ICMP_HEADER_SIZE;
use crate::packet::ipv6::{IPV6_HEADER_SIZE, IPV6_MIN_MTU, is_link_local};
use crate::packet::{
    Cursor, EthHdr, EtherType, IcmpHdr, Icmpv6Type, IpProtocol, Ipv6Hdr, PacketWriter, UdpHdr,
    WireHeader,
};
use crate::hw::TxPacket;
use crate::state::{Interface, StateUpdate, VlanId};
use crate::stats::Counter;

/// Hop limit of generated ICMPv6 errors
const ICMPV6_ERROR_HOP_LIMIT: u8 = 255;

/// Largest ICMPv6 error body that keeps the error within the minimum MTU
const MAX_ICMPV6_ERROR_BODY: usize = IPV6_MIN_MTU - IPV6_HEADER_SIZE - ICMP_HEADER_SIZE;

/// The parsed IPv6 packet a handler works on; `payload` is trimmed to the
/// header's payload length.
#[derive(Debug, Clone)]
pub struct Ipv6Packet<'a> {
    pub eth: EthHdr,
    pub ip: Ipv6Hdr,
    pub payload: &'a [u8],
}

/// Handle a trapped IPv6 frame. `cursor` is positioned after the Ethernet
/// header.
pub fn handle_packet(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    eth: &EthHdr,
    mut cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    let ip = Ipv6Hdr::parse(&mut cursor)?;
    trace!(
        port = %rx.port,
        vlan = %rx.vlan,
        src = %ip.src,
        dst = %ip.dst,
        next_header = ?ip.next_header,
        "IPv6 packet"
    );

    let payload_len = usize::from(ip.payload_length);
    if payload_len > cursor.remaining() {
        debug!(
            length = payload_len,
            available = cursor.remaining(),
            src = %ip.src,
            "IPv6 payload length exceeds frame"
        );
        ctx.stats.increment(Counter::Ipv6BadPayloadLength);
        return Ok(());
    }
    // trailing bytes (padding, FCS) are not part of the packet
    let payload = cursor.read_bytes("ipv6 payload", payload_len)?;

    if ip.next_header == IpProtocol::UDP {
        let mut segment = Cursor::new(payload);
        let udp = UdpHdr::parse(&mut segment)?;
        if dhcpv6::is_for_relay(udp.dst_port) {
            let headers = UdpV6Headers {
                eth: eth.clone(),
                ip,
                udp,
            };
            return dhcpv6::handle_packet(ctx, rx, &headers, segment);
        }
    }

    let pkt = Ipv6Packet {
        eth: eth.clone(),
        ip,
        payload,
    };
    let local = local_interface(ctx, rx, &pkt.ip.dst);

    let min_hop_limit = if local.is_some() { 0 } else { 1 };
    if pkt.ip.hop_limit <= min_hop_limit {
        debug!(src = %pkt.ip.src, dst = %pkt.ip.dst, "IPv6 hop limit exceeded");
        ctx.stats.increment(Counter::PktDropped);
        ctx.stats.increment(Counter::Ipv6HopExceeded);
        return send_time_exceeded(ctx, rx, &pkt);
    }

    match local {
        Some(intf) => handle_local(ctx, rx, &intf, &pkt),
        None if pkt.ip.dst.is_multicast() => {
            trace!(dst = %pkt.ip.dst, "multicast without an ingress interface");
            ctx.stats.increment(Counter::PktDropped);
            Ok(())
        }
        None => resolve_destination(ctx, rx, &pkt),
    }
}

/// Interface the packet is addressed to, if it is for us.
fn local_interface(ctx: &HandlerContext<'_>, rx: &RxFrame<'_>, dst: &Ipv6Addr) -> Option<Arc<Interface>> {
    if dst.is_multicast() {
        return ctx.state.interface_for_vlan(rx.vlan).cloned();
    }
    if is_link_local(dst) {
        return ctx
            .state
            .interface_for_vlan(rx.vlan)
            .filter(|i| i.has_address(IpAddr::V6(*dst)))
            .cloned();
    }
    ctx.state.interface_owning(IpAddr::V6(*dst)).cloned()
}

fn handle_local(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    intf: &Interface,
    pkt: &Ipv6Packet<'_>,
) -> Result<(), HandlerError> {
    if pkt.payload.len() > usize::from(intf.mtu) {
        ctx.stats.increment(Counter::PktDropped);
        return send_packet_too_big(ctx, rx, pkt, u32::from(intf.mtu));
    }

    if pkt.ip.next_header == IpProtocol::ICMPV6 && handle_icmpv6(ctx, rx, pkt)? {
        return Ok(());
    }

    trace!(interface = %intf.id, dst = %pkt.ip.dst, "punting IPv6 packet to host");
    ctx.io.send_to_host(rx.data, rx.port, Some(rx.vlan));
    ctx.stats.increment(Counter::PktToHost);
    Ok(())
}

/// Returns true when the message was consumed here.
fn handle_icmpv6(ctx: &HandlerContext<'_>, rx: &RxFrame<'_>, pkt: &Ipv6Packet<'_>) -> Result<bool, HandlerError> {
    let mut cursor = Cursor::new(pkt.payload);
    let icmp = IcmpHdr::parse(&mut cursor)?;
    if !icmp.validate_checksum_v6(&pkt.ip, cursor.rest()) {
        debug!(src = %pkt.ip.src, icmp_type = icmp.icmp_type, "bad ICMPv6 checksum");
        ctx.stats.increment(Counter::Icmpv6BadChecksum);
        ctx.stats.increment(Counter::PktDropped);
        return Ok(true);
    }

    match Icmpv6Type::try_from(icmp.icmp_type) {
        Ok(Icmpv6Type::RouterSolicitation) => ndp::handle_router_solicitation(ctx, pkt, &icmp)?,
        Ok(Icmpv6Type::RouterAdvertisement) => ndp::handle_router_advertisement(ctx, pkt, &icmp)?,
        Ok(Icmpv6Type::NeighborSolicitation) => ndp::handle_neighbor_solicitation(ctx, rx, pkt, &icmp)?,
        Ok(Icmpv6Type::NeighborAdvertisement) => ndp::handle_neighbor_advertisement(ctx, rx, pkt, &icmp)?,
        Ok(Icmpv6Type::Redirect) => {
            ctx.stats.increment(Counter::NdpPkt);
            ctx.stats.increment(Counter::PktDropped);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Solicit the next hop(s) towards the destination of a transit packet.
fn resolve_destination(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    pkt: &Ipv6Packet<'_>,
) -> Result<(), HandlerError> {
    let dst = pkt.ip.dst;
    if ctx.state.interface_for_vlan(rx.vlan).is_none() {
        trace!(vlan = %rx.vlan, dst = %dst, "transit packet on a VLAN without interface");
        ctx.stats.increment(Counter::PktDropped);
        return Ok(());
    }

    let Some(route) = ctx.state.routes.lookup(dst) else {
        debug!(dst = %dst, "no route to IPv6 destination");
        ctx.stats.increment(Counter::Ipv6DstLookupFailure);
        return Ok(());
    };

    for nexthop in &route.nexthops {
        let Some(intf) = ctx.state.interface(nexthop.interface) else {
            continue;
        };
        let target = match nexthop.addr {
            Some(gateway) if !route.connected => gateway,
            _ => dst,
        };
        if intf.has_address(IpAddr::V6(target)) {
            // the packet is for us after all
            continue;
        }

        if pkt.payload.len() > usize::from(intf.mtu) {
            ctx.stats.increment(Counter::PktDropped);
            return send_packet_too_big(ctx, rx, pkt, u32::from(intf.mtu));
        }

        let known = ctx
            .state
            .vlan(intf.vlan)
            .and_then(|v| v.neighbors.get(target))
            .is_some();
        if known {
            trace!(target = %target, "neighbor entry already exists");
            continue;
        }

        debug!(target = %target, vlan = %intf.vlan, interface = %intf.id, "soliciting next hop");
        let bytes = multicast_solicitation(intf, target)?;
        ctx.io.send_switched(TxPacket::from(bytes));
        ctx.stats.increment(Counter::NeighborSolicitationsSent);
        ctx.updater.submit(StateUpdate::NeighborPending {
            vlan: intf.vlan,
            ip: target,
            interface: intf.id,
        });
    }

    ctx.stats.increment(Counter::PktDropped);
    Ok(())
}

/// Our address for ICMPv6 errors: the ingress interface's, else any.
fn error_source(ctx: &HandlerContext<'_>, vlan: VlanId) -> Result<Ipv6Addr, HandlerError> {
    ctx.state
        .interface_for_vlan(vlan)
        .or_else(|| ctx.state.interfaces.values().next())
        .map(|i| i.first_ipv6())
        .ok_or_else(|| ResourceUnavailable::NoSourceAddress(vlan).into())
}

/// Body of an ICMPv6 error: the 4-byte word, then the offending header and
/// as much of its payload as fits.
fn error_body(word: u32, pkt: &Ipv6Packet<'_>) -> Result<Vec<u8>, HandlerError> {
    let len = (4 + IPV6_HEADER_SIZE + pkt.payload.len()).min(MAX_ICMPV6_ERROR_BODY);
    let mut body = Vec::with_capacity(len);
    body.put_be_u32(word)?;
    pkt.ip.write(&mut body)?;
    body.put_slice(&pkt.payload[..len - 4 - IPV6_HEADER_SIZE])?;
    Ok(body)
}

fn send_time_exceeded(ctx: &HandlerContext<'_>, rx: &RxFrame<'_>, pkt: &Ipv6Packet<'_>) -> Result<(), HandlerError> {
    let src = error_source(ctx, rx.vlan)?;
    let body = error_body(0, pkt)?;
    let cpu = ctx.state.cpu_mac;
    debug!(
        dst = %pkt.ip.src,
        src = %src,
        vlan = %rx.vlan,
        body_len = body.len(),
        "sending ICMPv6 time exceeded"
    );
    send_error(
        ctx,
        Icmpv6Frame {
            eth: EthHdr::new(cpu, cpu, Some(rx.vlan), EtherType::IPV6),
            ip: control_ipv6_header(src, pkt.ip.src, ICMPV6_ERROR_HOP_LIMIT),
            icmp_type: Icmpv6Type::TimeExceeded as u8,
            code: 0,
            body: &body,
        },
    )
}

fn send_packet_too_big(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    pkt: &Ipv6Packet<'_>,
    mtu: u32,
) -> Result<(), HandlerError> {
    let src = error_source(ctx, rx.vlan)?;
    let body = error_body(mtu, pkt)?;
    debug!(
        dst = %pkt.ip.src,
        src = %src,
        mtu,
        payload_len = pkt.payload.len(),
        "sending ICMPv6 packet too big"
    );
    send_error(
        ctx,
        Icmpv6Frame {
            eth: reply_eth(&pkt.eth, rx.vlan),
            ip: control_ipv6_header(src, pkt.ip.src, ICMPV6_ERROR_HOP_LIMIT),
            icmp_type: Icmpv6Type::PacketTooBig as u8,
            code: 0,
            body: &body,
        },
    )?;
    ctx.stats.increment(Counter::Ipv6PacketTooBig);
    Ok(())
}

/// Ethernet header back to the sender of `eth`.
fn reply_eth(eth: &EthHdr, vlan: VlanId) -> EthHdr {
    EthHdr::new(eth.src, eth.dst, Some(vlan), EtherType::IPV6)
}

fn send_error(ctx: &HandlerContext<'_>, frame: Icmpv6Frame<'_>) -> Result<(), HandlerError> {
    let pkt = allocate_frame(ctx.io, &frame)?;
    ctx.io.send_switched(pkt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MacAddress, VlanTag};
    use crate::state::{NeighborState, PortId};
    use crate::test_util::{CLIENT_MAC, CPU_MAC, Harness, TestFrame};
    use smoltcp::wire::Ipv6Packet as SmolIpv6;

    const PEER: &str = "2401:db00:2110:3004::99";

    fn transit(dst: &str, hop_limit: u8, payload_len: usize) -> Vec<u8> {
        TestFrame::udp_v6(
            Some(5),
            CLIENT_MAC,
            CPU_MAC,
            PEER,
            dst,
            4000,
            4001,
            hop_limit,
            &vec![0x5a; payload_len],
        )
    }

    fn parse_icmp(frame: &[u8]) -> (EthHdr, Ipv6Hdr, IcmpHdr, Vec<u8>) {
        let mut cursor = Cursor::new(frame);
        let eth = EthHdr::parse(&mut cursor).unwrap();
        let ip = Ipv6Hdr::parse(&mut cursor).unwrap();
        let icmp = IcmpHdr::parse(&mut cursor).unwrap();
        assert!(icmp.validate_checksum_v6(&ip, cursor.rest()));
        (eth, ip, icmp, cursor.rest().to_vec())
    }

    #[test]
    fn test_hop_limit_exceeded_sends_time_exceeded() {
        let h = Harness::new();
        let frame = transit("2401:db00:2110:3005::1", 1, 2000 - 48);
        h.dispatch(&frame, PortId(1), None).unwrap();

        let sent = h.io.switched();
        assert_eq!(sent.len(), 1);
        let (eth, ip, icmp, body) = parse_icmp(&sent[0]);
        assert_eq!((eth.src, eth.dst), (CPU_MAC, CPU_MAC));
        assert_eq!(eth.vlan(), Some(VlanId(5)));
        assert_eq!(icmp.icmp_type, Icmpv6Type::TimeExceeded as u8);
        assert_eq!(icmp.code, 0);
        assert_eq!(ip.dst, PEER.parse::<Ipv6Addr>().unwrap());
        assert_eq!(ip.hop_limit, 255);
        assert_eq!(ip.traffic_class, 0xc0);
        assert_eq!(body.len(), 1280 - 40 - 4);
        assert_eq!(&body[..4], &[0, 0, 0, 0]);
        // the quoted header is the original one
        assert_eq!(&body[4..44], &frame[18..58]);

        let outer = SmolIpv6::new_checked(&sent[0][18..]).unwrap();
        assert_eq!(usize::from(outer.payload_len()), 1280 - 40);

        assert_eq!(h.stats.get(Counter::Ipv6HopExceeded), 1);
        assert_eq!(h.stats.get(Counter::PktDropped), 1);
    }

    #[test]
    fn test_short_packet_quoted_whole() {
        let h = Harness::new();
        let frame = transit("2401:db00:2110:3005::1", 1, 20);
        h.dispatch(&frame, PortId(1), None).unwrap();
        let (_, _, _, body) = parse_icmp(&h.io.switched()[0]);
        assert_eq!(body.len(), 4 + 40 + 8 + 20);
    }

    #[test]
    fn test_local_packet_with_hop_limit_one_goes_to_host() {
        let h = Harness::new();
        let frame = transit("2401:db00:2110:3004::a", 1, 20);
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert!(h.io.switched().is_empty());
        assert_eq!(h.io.to_host().len(), 1);
        assert_eq!(h.stats.get(Counter::PktToHost), 1);
    }

    #[test]
    fn test_bad_payload_length_dropped() {
        let h = Harness::new();
        let mut frame = transit("2401:db00:2110:3004::a", 64, 20);
        // claim more payload than the frame carries
        frame[18 + 4..18 + 6].copy_from_slice(&200u16.to_be_bytes());
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert_eq!(h.stats.get(Counter::Ipv6BadPayloadLength), 1);
        assert!(h.io.to_host().is_empty());
    }

    #[test]
    fn test_trailing_bytes_trimmed() {
        let h = Harness::new();
        let mut frame = TestFrame::icmpv6_echo(Some(5), PEER, "2401:db00:2110:3004::a", 64);
        frame.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert_eq!(h.stats.get(Counter::Icmpv6BadChecksum), 0);
        assert_eq!(h.io.to_host().len(), 1);
    }

    #[test]
    fn test_local_payload_over_mtu_sends_packet_too_big() {
        let h = Harness::new();
        let frame = transit("2401:db00:2110:3004::a", 64, Harness::INTERFACE_MTU as usize);
        h.dispatch(&frame, PortId(1), None).unwrap();

        let sent = h.io.switched();
        assert_eq!(sent.len(), 1);
        let (eth, _, icmp, body) = parse_icmp(&sent[0]);
        assert_eq!(icmp.icmp_type, Icmpv6Type::PacketTooBig as u8);
        assert_eq!(eth.dst, CLIENT_MAC);
        assert_eq!(eth.src, CPU_MAC);
        assert_eq!(&body[..4], &u32::from(Harness::INTERFACE_MTU).to_be_bytes());
        assert_eq!(h.stats.get(Counter::Ipv6PacketTooBig), 1);
        assert!(h.io.to_host().is_empty());
    }

    #[test]
    fn test_bad_icmpv6_checksum_dropped() {
        let h = Harness::new();
        let mut frame = TestFrame::icmpv6_echo(Some(5), PEER, "2401:db00:2110:3004::a", 64);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert_eq!(h.stats.get(Counter::Icmpv6BadChecksum), 1);
        assert!(h.io.to_host().is_empty());
    }

    #[test]
    fn test_unresolved_destination_solicited_once() {
        let h = Harness::new();
        let frame = transit("2401:db00:2110:3004::1:0", 64, 20);
        h.dispatch(&frame, PortId(1), None).unwrap();
        h.apply_updates();

        let sent = h.io.switched();
        assert_eq!(sent.len(), 1);
        let (eth, ip, icmp, _) = parse_icmp(&sent[0]);
        assert_eq!(icmp.icmp_type, Icmpv6Type::NeighborSolicitation as u8);
        assert_eq!(eth.dst, MacAddress::new([0x33, 0x33, 0xff, 0x01, 0x00, 0x00]));
        assert_eq!(ip.dst, "ff02::1:ff01:0".parse::<Ipv6Addr>().unwrap());
        let entry = h.neighbor(VlanId(5), "2401:db00:2110:3004::1:0").unwrap();
        assert_eq!(entry.state, NeighborState::Pending);
        assert_eq!(h.stats.get(Counter::NeighborSolicitationsSent), 1);
        assert_eq!(h.stats.get(Counter::PktDropped), 1);

        // a second packet for the same destination finds the pending entry
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert_eq!(h.io.switched().len(), 1);
        assert_eq!(h.stats.get(Counter::PktDropped), 2);
    }

    #[test]
    fn test_no_route_counts_lookup_failure() {
        let h = Harness::new();
        let frame = transit("2001:db8:ffff::1", 64, 20);
        h.dispatch(&frame, PortId(1), None).unwrap();
        assert!(h.io.switched().is_empty());
        assert_eq!(h.stats.get(Counter::Ipv6DstLookupFailure), 1);
    }

    #[test]
    fn test_reply_eth_swaps_addresses() {
        let eth = EthHdr::new(CPU_MAC, CLIENT_MAC, Some(VlanId(5)), EtherType::IPV6);
        let reply = reply_eth(&eth, VlanId(5));
        assert_eq!((reply.dst, reply.src), (CLIENT_MAC, CPU_MAC));
        assert_eq!(reply.vlan_tags, vec![VlanTag::new(VlanId(5))]);
    }
}
