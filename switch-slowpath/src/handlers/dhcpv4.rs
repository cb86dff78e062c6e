//! DHCPv4 relay agent.
//!
//! Client requests are relayed to the VLAN's DHCP server with a Relay Agent
//! Information option naming the switch; server replies have that option
//! removed and are delivered to the client's MAC.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use super::{HandlerContext, RxFrame, UdpV4Headers};
use crate::dhcp::DhcpV4Packet;
use crate::dhcp::v4::{BOOTP_CLIENT_PORT, BOOTP_SERVER_PORT, BOOTREPLY, BOOTREQUEST};
use crate::error::{HandlerError, ProtocolViolation, ResourceUnavailable};
use crate::packet::frame::UdpV4Frame;
use crate::packet::udp::UDP_HEADER_SIZE;
use crate::packet::{Cursor, EthHdr, EtherType, Ipv4Hdr, WireHeader};
use crate::stats::{Counter, SwitchStats};

/// Maximum relay hop count carried in the BOOTP header
const MAX_HOPS: u8 = 255;

/// Relay one BOOTP/DHCPv4 message. `cursor` is positioned after the UDP
/// header.
pub fn handle_packet(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV4Headers,
    cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::Dhcpv4Pkt);
    let result = relay(ctx, rx, headers, cursor);
    if let Err(e) = &result {
        count_failure(ctx.stats, e);
        debug!(vlan = %rx.vlan, port = %rx.port, error = %e, "dropped DHCPv4 packet");
    }
    result
}

/// Every failure drops the packet; malformed ones are also counted as bad.
fn count_failure(stats: &SwitchStats, err: &HandlerError) {
    stats.increment(Counter::Dhcpv4DropPkt);
    let bad = match err {
        HandlerError::Parse(_) => true,
        HandlerError::Protocol(v) => v.is_bad_packet(),
        _ => false,
    };
    if bad {
        stats.increment(Counter::Dhcpv4BadPkt);
    }
}

fn relay(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV4Headers,
    mut cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    if headers.ip.ttl <= 1 {
        return Err(ProtocolViolation::TtlExpired(headers.ip.ttl).into());
    }

    let payload_len = usize::from(headers.udp.length) - UDP_HEADER_SIZE;
    let mut payload = cursor.sub_cursor("udp payload", payload_len)?;
    let dhcp = DhcpV4Packet::parse(&mut payload)?;
    if !dhcp.has_magic_cookie {
        return Err(ProtocolViolation::Bootp.into());
    }

    match dhcp.op {
        BOOTREQUEST => relay_to_server(ctx, rx, headers, &dhcp),
        BOOTREPLY => relay_to_client(ctx, rx, headers, &dhcp),
        op => Err(ProtocolViolation::UnknownOp(op).into()),
    }
}

fn relay_to_server(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV4Headers,
    dhcp: &DhcpV4Packet,
) -> Result<(), HandlerError> {
    let vlan = ctx
        .state
        .vlan(rx.vlan)
        .ok_or(ResourceUnavailable::UnknownVlan(rx.vlan))?;
    let server = vlan
        .relay
        .dhcp_v4_server_for(headers.eth.src)
        .ok_or(ResourceUnavailable::NoRelayServer(rx.vlan))?;

    let switch_ip = vlan
        .relay
        .dhcp_v4_relay_src
        .filter(|ip| !ip.is_unspecified())
        .or_else(|| {
            ctx.state
                .interface_for_vlan(rx.vlan)
                .and_then(|intf| intf.first_ipv4())
        })
        .ok_or(ResourceUnavailable::NoSourceAddress(rx.vlan))?;

    let mut out = dhcp.add_agent_circuit_id(switch_ip)?;
    if out.hops >= MAX_HOPS {
        return Err(ProtocolViolation::HopLimit(out.hops).into());
    }
    out.hops += 1;
    out.giaddr = switch_ip;

    debug!(
        vlan = %rx.vlan,
        client = %headers.eth.src,
        server = %server,
        relay = %switch_ip,
        xid = out.xid,
        "relaying DHCPv4 request"
    );

    let cpu = ctx.state.cpu_mac;
    let eth = EthHdr::new(cpu, cpu, Some(rx.vlan), EtherType::IPV4);
    let ip = relayed_ip_header(&headers.ip, switch_ip, server);
    send(ctx, eth, ip, BOOTP_SERVER_PORT, BOOTP_SERVER_PORT, &out)
}

fn relay_to_client(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV4Headers,
    dhcp: &DhcpV4Packet,
) -> Result<(), HandlerError> {
    let mut out = dhcp.strip_agent_options()?;

    let client_ip = if dhcp.is_broadcast() {
        Ipv4Addr::BROADCAST
    } else {
        dhcp.yiaddr
    };
    let switch_ip = ctx
        .state
        .vlan(rx.vlan)
        .and_then(|v| v.relay.dhcp_v4_reply_src)
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(headers.ip.dst);
    let intf = ctx
        .state
        .interface_owning(IpAddr::V4(switch_ip))
        .ok_or(ResourceUnavailable::NoInterface(IpAddr::V4(switch_ip)))?;

    let client_mac = out.client_mac();
    out.giaddr = Ipv4Addr::UNSPECIFIED;

    debug!(
        vlan = %intf.vlan,
        client = %client_mac,
        client_ip = %client_ip,
        src = %switch_ip,
        xid = out.xid,
        "relaying DHCPv4 reply"
    );

    let eth = EthHdr::new(client_mac, ctx.state.cpu_mac, Some(intf.vlan), EtherType::IPV4);
    let ip = relayed_ip_header(&headers.ip, switch_ip, client_ip);
    send(ctx, eth, ip, BOOTP_SERVER_PORT, BOOTP_CLIENT_PORT, &out)
}

/// The received IPv4 header, readdressed and aged by one hop.
fn relayed_ip_header(orig: &Ipv4Hdr, src: Ipv4Addr, dst: Ipv4Addr) -> Ipv4Hdr {
    Ipv4Hdr {
        id: 0,
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl: orig.ttl - 1,
        src,
        dst,
        options: Vec::new(),
        ..orig.clone()
    }
}

fn send(
    ctx: &HandlerContext<'_>,
    eth: EthHdr,
    ip: Ipv4Hdr,
    src_port: u16,
    dst_port: u16,
    dhcp: &DhcpV4Packet,
) -> Result<(), HandlerError> {
    let mut payload = Vec::with_capacity(dhcp.size());
    dhcp.write(&mut payload)?;
    let frame = UdpV4Frame {
        eth,
        ip,
        src_port,
        dst_port,
        payload: &payload,
    };
    let mut pkt = ctx.io.allocate(frame.len());
    frame.write(pkt.buf_mut())?;
    ctx.io.send_switched(pkt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::v4::{DHCPV4_MIN_SIZE, FLAG_BROADCAST, OPT_END};
    use crate::packet::MacAddress;
    use crate::state::PortId;
    use crate::test_util::{CLIENT_MAC, CPU_MAC, Harness, TestFrame};
    use dhcproto::v4::{Message, OptionCode};
    use dhcproto::{Decodable, Decoder};

    fn request(options: &[u8]) -> DhcpV4Packet {
        TestFrame::dhcpv4_message(BOOTREQUEST, CLIENT_MAC, options)
    }

    fn parse_relayed(frame: &[u8]) -> (EthHdr, Ipv4Hdr, Vec<u8>) {
        let mut cursor = Cursor::new(frame);
        let eth = EthHdr::parse(&mut cursor).unwrap();
        let ip = Ipv4Hdr::parse(&mut cursor).unwrap();
        let udp = crate::packet::UdpHdr::parse(&mut cursor).unwrap();
        let payload = cursor.rest()[..usize::from(udp.length) - 8].to_vec();
        (eth, ip, payload)
    }

    #[test]
    fn test_request_relayed_with_agent_option() {
        let h = Harness::new();
        let frame = TestFrame::dhcpv4(
            Some(5),
            CLIENT_MAC,
            MacAddress::BROADCAST,
            "0.0.0.0",
            "255.255.255.255",
            68,
            67,
            &request(&[53, 1, 1, OPT_END]),
        );
        h.dispatch(&frame, PortId(1), None).unwrap();

        let sent = h.io.switched();
        assert_eq!(sent.len(), 1);
        let (eth, ip, payload) = parse_relayed(&sent[0]);
        assert_eq!(eth.src, CPU_MAC);
        assert_eq!(eth.dst, CPU_MAC);
        assert_eq!(eth.vlan(), Some(crate::state::VlanId(5)));
        assert_eq!(ip.src, Ipv4Addr::new(10, 164, 4, 10));
        assert_eq!(ip.dst, Harness::DHCP_V4_SERVER);
        assert_eq!(ip.ttl, 63);
        assert!(ip.checksum_valid());
        assert!(payload.len() >= DHCPV4_MIN_SIZE);

        let msg = Message::decode(&mut Decoder::new(&payload)).unwrap();
        assert_eq!(msg.giaddr(), Ipv4Addr::new(10, 164, 4, 10));
        assert_eq!(msg.hops(), 1);
        assert!(msg.opts().get(OptionCode::RelayAgentInformation).is_some());
        assert_eq!(h.stats.get(Counter::Dhcpv4Pkt), 1);
    }

    #[test]
    fn test_request_with_agent_option_dropped() {
        let h = Harness::new();
        let frame = TestFrame::dhcpv4(
            Some(5),
            CLIENT_MAC,
            MacAddress::BROADCAST,
            "0.0.0.0",
            "255.255.255.255",
            68,
            67,
            &request(&[53, 1, 1, 82, 3, 1, 1, 9, OPT_END]),
        );
        let err = h.dispatch(&frame, PortId(1), None).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Protocol(ProtocolViolation::AgentOptionPresent)
        ));
        assert!(h.io.switched().is_empty());
        assert_eq!(h.stats.get(Counter::Dhcpv4BadPkt), 1);
        assert_eq!(h.stats.get(Counter::Dhcpv4DropPkt), 1);
    }

    #[test]
    fn test_low_ttl_dropped() {
        let h = Harness::new();
        let mut frame = TestFrame::dhcpv4(
            Some(5),
            CLIENT_MAC,
            MacAddress::BROADCAST,
            "0.0.0.0",
            "255.255.255.255",
            68,
            67,
            &request(&[53, 1, 1, OPT_END]),
        );
        TestFrame::set_ipv4_ttl(&mut frame, 18, 1);
        assert!(h.dispatch(&frame, PortId(1), None).is_err());
        assert_eq!(h.stats.get(Counter::Dhcpv4BadPkt), 1);
        assert_eq!(h.stats.get(Counter::Dhcpv4DropPkt), 1);
    }

    #[test]
    fn test_no_server_dropped() {
        let h = Harness::new();
        let frame = TestFrame::dhcpv4(
            Some(1),
            CLIENT_MAC,
            MacAddress::BROADCAST,
            "0.0.0.0",
            "255.255.255.255",
            68,
            67,
            &request(&[53, 1, 1, OPT_END]),
        );
        let err = h.dispatch(&frame, PortId(1), None).unwrap_err();
        assert!(matches!(err, HandlerError::Unavailable(_)));
        assert_eq!(h.stats.get(Counter::Dhcpv4DropPkt), 1);
        assert_eq!(h.stats.get(Counter::Dhcpv4BadPkt), 0);
    }

    #[test]
    fn test_bootp_dropped() {
        let h = Harness::new();
        let mut bootp = request(&[]);
        bootp.has_magic_cookie = false;
        bootp.options.clear();
        let frame = TestFrame::dhcpv4(
            Some(5),
            CLIENT_MAC,
            MacAddress::BROADCAST,
            "0.0.0.0",
            "255.255.255.255",
            68,
            67,
            &bootp,
        );
        assert!(h.dispatch(&frame, PortId(1), None).is_err());
        assert_eq!(h.stats.get(Counter::Dhcpv4DropPkt), 1);
        assert_eq!(h.stats.get(Counter::Dhcpv4BadPkt), 0);
    }

    #[test]
    fn test_reply_relayed_to_client() {
        let h = Harness::new();
        let mut reply = TestFrame::dhcpv4_message(
            BOOTREPLY,
            CLIENT_MAC,
            &[53, 1, 2, 82, 6, 1, 4, 10, 164, 4, 10, OPT_END],
        );
        reply.flags = 0;
        reply.yiaddr = Ipv4Addr::new(10, 164, 4, 77);
        reply.giaddr = Ipv4Addr::new(10, 164, 4, 10);
        let frame = TestFrame::dhcpv4(
            Some(5),
            MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x99]),
            CPU_MAC,
            "10.1.2.3",
            "10.164.4.10",
            67,
            67,
            &reply,
        );
        h.dispatch(&frame, PortId(2), None).unwrap();

        let sent = h.io.switched();
        assert_eq!(sent.len(), 1);
        let (eth, ip, payload) = parse_relayed(&sent[0]);
        assert_eq!(eth.dst, CLIENT_MAC);
        assert_eq!(eth.src, CPU_MAC);
        assert_eq!(ip.src, Ipv4Addr::new(10, 164, 4, 10));
        assert_eq!(ip.dst, Ipv4Addr::new(10, 164, 4, 77));

        let msg = Message::decode(&mut Decoder::new(&payload)).unwrap();
        assert_eq!(msg.giaddr(), Ipv4Addr::UNSPECIFIED);
        assert!(msg.opts().get(OptionCode::RelayAgentInformation).is_none());
    }

    #[test]
    fn test_broadcast_reply() {
        let h = Harness::new();
        let mut reply = TestFrame::dhcpv4_message(BOOTREPLY, CLIENT_MAC, &[53, 1, 5, OPT_END]);
        reply.flags = FLAG_BROADCAST;
        let frame = TestFrame::dhcpv4(
            Some(5),
            MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x99]),
            CPU_MAC,
            "10.1.2.3",
            "10.164.4.10",
            67,
            67,
            &reply,
        );
        h.dispatch(&frame, PortId(2), None).unwrap();
        let (_, ip, _) = parse_relayed(&h.io.switched()[0]);
        assert_eq!(ip.dst, Ipv4Addr::BROADCAST);
    }
}
