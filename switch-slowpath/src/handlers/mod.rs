//! Trapped-frame handlers.
//!
//! This module provides:
//! - `HandlerContext`: everything a handler may touch, passed explicitly
//! - `dispatch`: Ethernet/IP demultiplexing to the protocol handlers
//! - `dhcpv4` / `dhcpv6`: relay agents
//! - `ipv6`: hop-limit, MTU and resolution handling for IPv6 traffic
//! - `ndp`: Neighbor Discovery message processing
//!
//! Handlers are synchronous and run on the caller's thread. They either
//! transmit a frame, submit a state update, or drop and count.

pub mod dhcpv4;
pub mod dhcpv6;
pub mod ipv6;
pub mod ndp;

use std::net::IpAddr;

use tracing::{debug, trace};

use crate::dhcp::v4::{BOOTP_CLIENT_PORT, BOOTP_SERVER_PORT};
use crate::error::{HandlerError, ParseError, ResourceUnavailable};
use crate::hw::PacketIo;
use crate::packet::{Cursor, EthHdr, EtherType, IpProtocol, Ipv4Hdr, Ipv6Hdr, UdpHdr, WireHeader};
use crate::state::{PortId, StateUpdater, SwitchState, VlanId};
use crate::stats::{Counter, SwitchStats};

/// Collaborators available to a handler for one frame.
pub struct HandlerContext<'a> {
    /// Snapshot taken when the frame arrived.
    pub state: &'a SwitchState,
    pub io: &'a dyn PacketIo,
    pub stats: &'a SwitchStats,
    pub updater: &'a StateUpdater,
}

/// A frame trapped to the CPU.
#[derive(Debug, Clone, Copy)]
pub struct RxFrame<'a> {
    pub data: &'a [u8],
    pub port: PortId,
    /// Ingress VLAN.
    pub vlan: VlanId,
}

/// Parsed headers of a UDP-over-IPv4 frame.
#[derive(Debug, Clone)]
pub struct UdpV4Headers {
    pub eth: EthHdr,
    pub ip: Ipv4Hdr,
    pub udp: UdpHdr,
}

/// Parsed headers of a UDP-over-IPv6 frame.
#[derive(Debug, Clone)]
pub struct UdpV6Headers {
    pub eth: EthHdr,
    pub ip: Ipv6Hdr,
    pub udp: UdpHdr,
}

/// Whether a UDP segment belongs to BOOTP/DHCPv4.
pub fn is_dhcpv4(udp: &UdpHdr) -> bool {
    [BOOTP_SERVER_PORT, BOOTP_CLIENT_PORT].contains(&udp.src_port)
        || [BOOTP_SERVER_PORT, BOOTP_CLIENT_PORT].contains(&udp.dst_port)
}

/// Handle one trapped frame. `vlan` is the VLAN the hardware reported,
/// falling back to the outermost tag of the frame.
pub fn dispatch(
    ctx: &HandlerContext<'_>,
    data: &[u8],
    port: PortId,
    vlan: Option<VlanId>,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::TrappedPkts);
    let result = dispatch_inner(ctx, data, port, vlan);
    if let Err(e) = &result {
        record_error(ctx.stats, e);
        debug!(port = %port, error = %e, "trapped frame dropped");
    }
    result
}

fn dispatch_inner(
    ctx: &HandlerContext<'_>,
    data: &[u8],
    port: PortId,
    vlan: Option<VlanId>,
) -> Result<(), HandlerError> {
    let mut cursor = Cursor::new(data);
    let eth = EthHdr::parse(&mut cursor)?;
    let vlan = vlan
        .or_else(|| eth.vlan())
        .ok_or(ResourceUnavailable::NoVlan)?;
    let rx = RxFrame { data, port, vlan };

    match eth.ethertype {
        EtherType::IPV4 => handle_ipv4(ctx, &rx, eth, cursor),
        EtherType::IPV6 => ipv6::handle_packet(ctx, &rx, &eth, cursor),
        other => {
            trace!(port = %port, ethertype = ?other, "unhandled ethertype");
            ctx.stats.increment(Counter::TrappedUnhandled);
            Ok(())
        }
    }
}

fn handle_ipv4(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    eth: EthHdr,
    mut cursor: Cursor<'_>,
) -> Result<(), HandlerError> {
    let ip = Ipv4Hdr::parse(&mut cursor)?;
    if ip.protocol == IpProtocol::UDP {
        let mut segment = cursor;
        let udp = UdpHdr::parse(&mut segment)?;
        if is_dhcpv4(&udp) {
            let headers = UdpV4Headers { eth, ip, udp };
            return dhcpv4::handle_packet(ctx, rx, &headers, segment);
        }
    }

    if ctx.state.is_local_address(IpAddr::V4(ip.dst)) {
        trace!(dst = %ip.dst, "punting IPv4 packet to host");
        ctx.io.send_to_host(rx.data, rx.port, Some(rx.vlan));
        ctx.stats.increment(Counter::PktToHost);
    } else {
        ctx.stats.increment(Counter::TrappedUnhandled);
    }
    Ok(())
}

/// Count the generic parse and encode failures. Protocol-level drops are
/// counted by the handler that saw them.
fn record_error(stats: &SwitchStats, err: &HandlerError) {
    match err {
        HandlerError::Parse(ParseError::Truncated { .. }) => stats.increment(Counter::ParseTruncated),
        HandlerError::Parse(ParseError::Malformed { .. }) => stats.increment(Counter::ParseMalformed),
        HandlerError::Encode(_) => stats.increment(Counter::EncodeError),
        HandlerError::Protocol(_) | HandlerError::Unavailable(_) => {}
    }
}
