//! Neighbor Discovery message handling (RFC 4861).
//!
//! Solicitations for our addresses are answered out of the ingress port.
//! Advertisements and solicitations carrying a link-layer address feed the
//! neighbor table through state updates; whether a new entry may be created
//! depends on whether the message was meant for us.

use std::net::{IpAddr, Ipv6Addr};

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{Icmpv6Packet, Icmpv6Repr, NdiscRepr};
use tracing::{debug, trace};

use super::ipv6::Ipv6Packet;
use super::{HandlerContext, RxFrame};
use crate::error::HandlerError;
use crate::hw::TxPacket;
use crate::ndp::{NDP_HOP_LIMIT, ethernet_address, neighbor_advertisement};
use crate::packet::ipv6::{INTERFACE_LOCAL_ALL_NODES, is_link_local};
use crate::packet::{IcmpHdr, MacAddress};
use crate::state::{Interface, StateUpdate};
use crate::stats::Counter;

/// Checks shared by every ND message.
fn check_ndp_packet(ctx: &HandlerContext<'_>, pkt: &Ipv6Packet<'_>, icmp: &IcmpHdr) -> bool {
    if pkt.ip.hop_limit != NDP_HOP_LIMIT {
        debug!(icmp_type = icmp.icmp_type, hop_limit = pkt.ip.hop_limit, "bad NDP hop limit");
        ctx.stats.increment(Counter::NdpBad);
        return false;
    }
    if icmp.code != 0 {
        debug!(icmp_type = icmp.icmp_type, code = icmp.code, "bad NDP code");
        ctx.stats.increment(Counter::NdpBad);
        return false;
    }
    true
}

/// Decode the ND message in `pkt`. The checksum was verified on dispatch.
fn parse_ndisc<'a>(pkt: &Ipv6Packet<'a>) -> Option<NdiscRepr<'a>> {
    let packet = Icmpv6Packet::new_checked(pkt.payload).ok()?;
    match Icmpv6Repr::parse(&pkt.ip.src, &pkt.ip.dst, &packet, &ChecksumCapabilities::ignored()) {
        Ok(Icmpv6Repr::Ndisc(repr)) => Some(repr),
        _ => None,
    }
}

/// Router solicitations are validated and dropped; advertisements only
/// go out on the periodic schedule.
pub fn handle_router_solicitation(
    ctx: &HandlerContext<'_>,
    pkt: &Ipv6Packet<'_>,
    icmp: &IcmpHdr,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::NdpPkt);
    if !check_ndp_packet(ctx, pkt, icmp) {
        return Ok(());
    }
    let Some(NdiscRepr::RouterSolicit { lladdr }) = parse_ndisc(pkt) else {
        debug!(src = %pkt.ip.src, "malformed router solicitation");
        ctx.stats.increment(Counter::NdpBad);
        return Ok(());
    };
    trace!(src = %pkt.ip.src, slla = ?lladdr.as_ref().and_then(ethernet_address), "dropping router solicitation");
    ctx.stats.increment(Counter::PktDropped);
    Ok(())
}

/// Options are read leniently and never acted on.
pub fn handle_router_advertisement(
    ctx: &HandlerContext<'_>,
    pkt: &Ipv6Packet<'_>,
    icmp: &IcmpHdr,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::NdpPkt);
    if !check_ndp_packet(ctx, pkt, icmp) {
        return Ok(());
    }
    if !is_link_local(&pkt.ip.src) {
        debug!(src = %pkt.ip.src, "router advertisement from non link-local source");
        ctx.stats.increment(Counter::NdpBad);
        return Ok(());
    }
    match parse_ndisc(pkt) {
        Some(NdiscRepr::RouterAdvert { router_lifetime, .. }) => {
            debug!(src = %pkt.ip.src, lifetime = %router_lifetime, "dropping router advertisement");
        }
        _ => trace!(src = %pkt.ip.src, "dropping unparsable router advertisement"),
    }
    ctx.stats.increment(Counter::PktDropped);
    Ok(())
}

pub fn handle_neighbor_solicitation(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    pkt: &Ipv6Packet<'_>,
    icmp: &IcmpHdr,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::NdpPkt);
    if !check_ndp_packet(ctx, pkt, icmp) {
        return Ok(());
    }

    let Some(NdiscRepr::NeighborSolicit { target_addr: target, lladdr }) = parse_ndisc(pkt) else {
        debug!(src = %pkt.ip.src, "malformed neighbor solicitation");
        ctx.stats.increment(Counter::NdpBad);
        return Ok(());
    };
    if target.is_multicast() {
        debug!(target = %target, "neighbor solicitation for a multicast target");
        ctx.stats.increment(Counter::NdpBad);
        return Ok(());
    }

    let Some(intf) = ctx.state.interface_for_vlan(rx.vlan) else {
        debug!(vlan = %rx.vlan, port = %rx.port, "neighbor solicitation on a VLAN without interface");
        ctx.stats.increment(Counter::PktDropped);
        return Ok(());
    };

    // RFC 4861 7.1.1: SLLA is mandatory in multicast solicitations and
    // forbidden when the source is unspecified
    let src_unspecified = pkt.ip.src.is_unspecified();
    let slla = match lladdr {
        None if pkt.ip.dst.is_multicast() => {
            debug!(src = %pkt.ip.src, "multicast solicitation without source link-layer address");
            ctx.stats.increment(Counter::NdpBad);
            return Ok(());
        }
        Some(_) if src_unspecified => {
            debug!("source link-layer address with unspecified source");
            ctx.stats.increment(Counter::NdpBad);
            return Ok(());
        }
        None => None,
        Some(addr) => match ethernet_address(&addr) {
            Some(mac) => Some(mac),
            None => {
                debug!(src = %pkt.ip.src, len = addr.len(), "source link-layer address is not a MAC");
                ctx.stats.increment(Counter::NdpBad);
                return Ok(());
            }
        },
    };

    let mine = intf.has_address(IpAddr::V6(target));
    trace!(target = %target, src = %pkt.ip.src, mine, "neighbor solicitation");

    if let Some(mac) = slla {
        learn(ctx, rx, intf, pkt.ip.src, mac, mine);
    }
    if !mine {
        return Ok(());
    }

    // duplicate address detection gets an unsolicited answer to the
    // interface-local all-nodes group
    let (dst, dst_mac) = if src_unspecified {
        (
            INTERFACE_LOCAL_ALL_NODES,
            MacAddress::ipv6_multicast(INTERFACE_LOCAL_ALL_NODES),
        )
    } else {
        (pkt.ip.src, pkt.eth.src)
    };
    debug!(target = %target, dst = %dst, port = %rx.port, "sending neighbor advertisement");
    let bytes = neighbor_advertisement(intf, target, dst, dst_mac, !src_unspecified)?;
    ctx.io.send_out_of_port(TxPacket::from(bytes), rx.port);
    ctx.stats.increment(Counter::NeighborAdvertisementsSent);
    Ok(())
}

pub fn handle_neighbor_advertisement(
    ctx: &HandlerContext<'_>,
    rx: &RxFrame<'_>,
    pkt: &Ipv6Packet<'_>,
    icmp: &IcmpHdr,
) -> Result<(), HandlerError> {
    ctx.stats.increment(Counter::NdpPkt);
    if !check_ndp_packet(ctx, pkt, icmp) {
        return Ok(());
    }

    let Some(NdiscRepr::NeighborAdvert {
        flags,
        target_addr: target,
        lladdr,
    }) = parse_ndisc(pkt)
    else {
        debug!(src = %pkt.ip.src, "malformed neighbor advertisement");
        ctx.stats.increment(Counter::NdpBad);
        return Ok(());
    };
    let mac = match lladdr {
        Some(addr) => match ethernet_address(&addr) {
            Some(mac) => mac,
            None => {
                debug!(target = %target, len = addr.len(), "target link-layer address is not a MAC");
                ctx.stats.increment(Counter::NdpBad);
                return Ok(());
            }
        },
        None => pkt.eth.src,
    };
    if mac.is_multicast() {
        debug!(target = %target, mac = %mac, "neighbor advertisement with multicast MAC");
        ctx.stats.increment(Counter::PktDropped);
        return Ok(());
    }

    let Some(intf) = ctx.state.interface_for_vlan(rx.vlan) else {
        debug!(vlan = %rx.vlan, port = %rx.port, "neighbor advertisement on a VLAN without interface");
        ctx.stats.increment(Counter::PktDropped);
        return Ok(());
    };

    debug!(target = %target, mac = %mac, flags = flags.bits(), "got neighbor advertisement");
    // unsolicited advertisements go to all-nodes and are always accepted
    let mine = pkt.ip.dst.is_multicast() || intf.has_address(IpAddr::V6(pkt.ip.dst));
    learn(ctx, rx, intf, target, mac, mine);
    Ok(())
}

/// Record `ip` at `mac`. Only messages meant for us may create an entry;
/// others can merely refresh one.
fn learn(ctx: &HandlerContext<'_>, rx: &RxFrame<'_>, intf: &Interface, ip: Ipv6Addr, mac: MacAddress, mine: bool) {
    if !mine {
        ctx.stats.increment(Counter::NdpNotMine);
    }
    ctx.updater.submit(StateUpdate::NeighborReachable {
        vlan: rx.vlan,
        ip,
        mac,
        port: rx.port,
        interface: intf.id,
        create: mine,
    });
}
