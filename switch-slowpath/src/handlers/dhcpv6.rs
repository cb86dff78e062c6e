//! DHCPv6 relay agent (RFC 8415 section 19).
//!
//! Client messages are wrapped in a Relay-Forward envelope and sent to the
//! VLAN's server; Relay-Forward messages from downstream relays are passed
//! on with their hop count bumped; Relay-Reply envelopes are unwrapped and
//! the inner message delivered to the client named by the Interface-ID.

use std::net::{IpAddr, Ipv6Addr};

use tracing::debug;

use super::{HandlerContext, RxFrame, UdpV6Headers};
use crate::dhcp::v6::{
    DHCPV6_CLIENT_PORT, DHCPV6_SERVER_PORT, MAX_HOP_COUNT, MAX_RELAY_MESSAGE_SIZE,
    OPTION_INTERFACE_ID, OPTION_RELAY_MSG, RELAY_FORWARD, RELAY_REPLY,
};
use crate::dhcp::{DhcpV6Header, DhcpV6Packet};
use crate::error::{HandlerError, ProtocolViolation, ResourceUnavailable};
use crate::packet::frame::UdpV6Frame;
use crate::packet::udp::UDP_HEADER_SIZE;
use crate::packet::{Cursor, EthHdr, EtherType, Ipv6Hdr, MacAddress, WireHeader};
use crate::stats::{Counter, SwitchStats};

/// Whether a UDP segment is addressed to a DHCPv6 relay or server.
pub fn is_for_relay(headers_dst_port: u16) -> bool {
    headers_dst_port == DHCPV6_SERVER_PORT
}

/// Relay one DHCPv6 message. `cursor` is positioned after the UDP header.
pub fn handle_packet(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV6Headers,
    cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::Dhcpv6Pkt);
    let result = relay(ctx, rx, headers, cursor);
    if let Err(e) = &result {
        count_failure(ctx.stats, e);
        debug!(vlan = %rx.vlan, port = %rx.port, error = %e, "dropped DHCPv6 packet");
    }
    result
}

/// Every failure drops the packet; malformed ones are also counted as bad.
fn count_failure(stats: &SwitchStats, err: &HandlerError) {
    stats.increment(Counter::Dhcpv6DropPkt);
    let bad = match err {
        HandlerError::Parse(_) => true,
        HandlerError::Protocol(v) => v.is_bad_packet(),
        _ => false,
    };
    if bad {
        stats.increment(Counter::Dhcpv6BadPkt);
    }
}

fn relay(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV6Headers,
    mut cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    let payload_len = usize::from(headers.udp.length) - UDP_HEADER_SIZE;
    let raw = cursor.read_bytes("udp payload", payload_len)?;
    let dhcp = DhcpV6Packet::parse(&mut Cursor::new(raw))?;

    match dhcp.msg_type {
        RELAY_FORWARD => forward_relayed(ctx, rx, headers, dhcp),
        RELAY_REPLY => relay_to_client(ctx, rx, headers, &dhcp),
        _ => relay_to_server(ctx, rx, headers, raw),
    }
}

/// Wrap a client message in a fresh Relay-Forward envelope.
fn relay_to_server(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV6Headers,
    message: &[u8],
) -> Result<(), HandlerError> {
    let client = headers.eth.src;
    let vlan = ctx
        .state
        .vlan(rx.vlan)
        .ok_or(ResourceUnavailable::UnknownVlan(rx.vlan))?;
    let server = vlan
        .relay
        .dhcp_v6_server_for(client)
        .ok_or(ResourceUnavailable::NoRelayServer(rx.vlan))?;
    let src = vlan
        .relay
        .dhcp_v6_relay_src
        .filter(|ip| !ip.is_unspecified())
        .or_else(|| ctx.state.interface_for_vlan(rx.vlan).map(|i| i.first_ipv6()))
        .ok_or(ResourceUnavailable::NoSourceAddress(rx.vlan))?;

    let mut envelope = DhcpV6Packet::relay_forward(0, Ipv6Addr::UNSPECIFIED, headers.ip.src);
    envelope.add_interface_id_option(client);
    envelope.add_relay_message_option(message);
    let len = envelope.compute_packet_length();
    if len > MAX_RELAY_MESSAGE_SIZE {
        return Err(ProtocolViolation::TooLong {
            len,
            max: MAX_RELAY_MESSAGE_SIZE,
        }
        .into());
    }

    debug!(
        vlan = %rx.vlan,
        client = %client,
        peer = %headers.ip.src,
        server = %server,
        "relaying DHCPv6 client message"
    );

    let cpu = ctx.state.cpu_mac;
    send(
        ctx,
        EthHdr::new(cpu, cpu, Some(rx.vlan), EtherType::IPV6),
        Ipv6Hdr {
            src,
            dst: server,
            ..headers.ip.clone()
        },
        DHCPV6_SERVER_PORT,
        &envelope.to_vec()?,
    )
}

/// Pass on a Relay-Forward from a downstream relay agent.
fn forward_relayed(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV6Headers,
    mut dhcp: DhcpV6Packet,
) -> Result<(), HandlerError> {
    let DhcpV6Header::Relay { hop_count, .. } = &mut dhcp.header else {
        return Err(ProtocolViolation::InvalidField("relay header").into());
    };
    if *hop_count >= MAX_HOP_COUNT {
        return Err(ProtocolViolation::HopLimit(*hop_count).into());
    }
    *hop_count += 1;

    debug!(
        vlan = %rx.vlan,
        src = %headers.ip.src,
        dst = %headers.ip.dst,
        hop_count = *hop_count,
        "forwarding DHCPv6 relay-forward"
    );

    let cpu = ctx.state.cpu_mac;
    send(
        ctx,
        EthHdr::new(cpu, cpu, Some(rx.vlan), EtherType::IPV6),
        headers.ip.clone(),
        DHCPV6_SERVER_PORT,
        &dhcp.to_vec()?,
    )
}

/// Unwrap a Relay-Reply and deliver the inner message to the client.
fn relay_to_client(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    headers: &UdpV6Headers,
    dhcp: &DhcpV6Packet,
) -> Result<(), HandlerError> {
    let DhcpV6Header::Relay { peer_addr, .. } = dhcp.header else {
        return Err(ProtocolViolation::InvalidField("relay header").into());
    };
    let client_mac = dhcp
        .find_option(OPTION_INTERFACE_ID)
        .ok_or(ProtocolViolation::MissingOption("interface-id"))?;
    let client_mac = MacAddress::from_slice(&client_mac.data)
        .filter(|mac| !mac.is_zero() && !mac.is_multicast())
        .ok_or(ProtocolViolation::InvalidField("interface-id"))?;
    let message = dhcp
        .find_option(OPTION_RELAY_MSG)
        .ok_or(ProtocolViolation::MissingOption("relay-message"))?;

    let src = ctx
        .state
        .vlan(rx.vlan)
        .and_then(|v| v.relay.dhcp_v6_reply_src)
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(headers.ip.dst);
    let intf = ctx
        .state
        .interface_owning(IpAddr::V6(src))
        .ok_or(ResourceUnavailable::NoInterface(IpAddr::V6(src)))?;

    debug!(
        vlan = %intf.vlan,
        client = %client_mac,
        peer = %peer_addr,
        src = %src,
        "relaying DHCPv6 reply"
    );

    send(
        ctx,
        EthHdr::new(client_mac, ctx.state.cpu_mac, Some(intf.vlan), EtherType::IPV6),
        Ipv6Hdr {
            src,
            dst: peer_addr,
            ..headers.ip.clone()
        },
        DHCPV6_CLIENT_PORT,
        &message.data,
    )
}

fn send(
    ctx: &HandlerContext<'_>,
    eth: EthHdr,
    ip: Ipv6Hdr,
    dst_port: u16,
    payload: &[u8],
) -> Result<(), HandlerError> {
    let frame = UdpV6Frame {
        eth,
        ip,
        src_port: DHCPV6_SERVER_PORT,
        dst_port,
        payload,
    };
    let mut pkt = ctx.io.allocate(frame.len());
    frame.write(pkt.buf_mut())?;
    ctx.io.send_switched(pkt);
    Ok(())
}
