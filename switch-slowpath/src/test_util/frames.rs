//! Frame builders for tests
//!
//! Frames are assembled with the crate's own header writers; tests decode
//! what the slow path emits with independent decoders (smoltcp, dhcproto).

use std::net::{Ipv4Addr, Ipv6Addr};

use smoltcp::wire::NdiscRepr;

use crate::dhcp::v4::{DhcpV4Packet, FLAG_BROADCAST};
use crate::packet::frame::{Icmpv6Frame, UdpV4Frame, UdpV6Frame};
use crate::packet::{
    EthHdr, EtherType, IpProtocol, Ipv4Hdr, Ipv6Hdr, MacAddress, WireHeader, internet_checksum,
};
use crate::ndp::ndisc_message;
use crate::state::VlanId;

// ============================================================================
// Constants
// ============================================================================

/// MAC of the test client.
pub const CLIENT_MAC: MacAddress = MacAddress::new([0x02, 0x05, 0x73, 0xf9, 0x46, 0xfc]);

/// MAC of the switch CPU port.
pub const CPU_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

/// ICMPv6 Echo Request type.
const ECHO_REQUEST: u8 = 128;

fn v4(s: &str) -> Ipv4Addr {
    s.parse().expect("invalid IPv4 literal")
}

fn v6(s: &str) -> Ipv6Addr {
    s.parse().expect("invalid IPv6 literal")
}

fn eth(vlan: Option<u16>, src: MacAddress, dst: MacAddress, ethertype: EtherType) -> EthHdr {
    EthHdr::new(dst, src, vlan.map(VlanId), ethertype)
}

/// Namespace for the builders.
pub struct TestFrame;

impl TestFrame {
    // ========================================================================
    // IPv4
    // ========================================================================

    /// UDP over IPv4 from the client to the CPU.
    pub fn udp_v4(
        vlan: Option<u16>,
        src: &str,
        dst: &str,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let frame = UdpV4Frame {
            eth: eth(vlan, CLIENT_MAC, CPU_MAC, EtherType::IPV4),
            ip: Ipv4Hdr::new(v4(src), v4(dst), IpProtocol::UDP, 64),
            src_port,
            dst_port,
            payload,
        };
        let mut buf = vec![0u8; frame.len()];
        frame.write(&mut buf).expect("udp v4 frame");
        buf
    }

    /// A DHCPv4 message carried in UDP over IPv4 with TTL 64.
    #[allow(clippy::too_many_arguments)]
    pub fn dhcpv4(
        vlan: Option<u16>,
        src_mac: MacAddress,
        dst_mac: MacAddress,
        src: &str,
        dst: &str,
        src_port: u16,
        dst_port: u16,
        msg: &DhcpV4Packet,
    ) -> Vec<u8> {
        let mut payload = Vec::new();
        msg.write(&mut payload).expect("dhcpv4 message");
        let frame = UdpV4Frame {
            eth: eth(vlan, src_mac, dst_mac, EtherType::IPV4),
            ip: Ipv4Hdr::new(v4(src), v4(dst), IpProtocol::UDP, 64),
            src_port,
            dst_port,
            payload: &payload,
        };
        let mut buf = vec![0u8; frame.len()];
        frame.write(&mut buf).expect("dhcpv4 frame");
        buf
    }

    /// A BOOTP/DHCP message from (or about) `client` with the broadcast
    /// flag set, `options` after the cookie and padding to 300 bytes.
    pub fn dhcpv4_message(op: u8, client: MacAddress, options: &[u8]) -> DhcpV4Packet {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&client.octets());
        let mut msg = DhcpV4Packet {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x3903_f326,
            secs: 0,
            flags: FLAG_BROADCAST,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            has_magic_cookie: true,
            options: options.to_vec(),
        };
        msg.pad_to_min_length();
        msg
    }

    /// Rewrite the TTL of the IPv4 header at `ip_offset` and fix up its
    /// checksum.
    pub fn set_ipv4_ttl(frame: &mut [u8], ip_offset: usize, ttl: u8) {
        let ihl = usize::from(frame[ip_offset] & 0x0f) * 4;
        frame[ip_offset + 8] = ttl;
        frame[ip_offset + 10..ip_offset + 12].fill(0);
        let sum = internet_checksum(&frame[ip_offset..ip_offset + ihl]);
        frame[ip_offset + 10..ip_offset + 12].copy_from_slice(&sum.to_be_bytes());
    }

    // ========================================================================
    // IPv6
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub fn udp_v6(
        vlan: Option<u16>,
        src_mac: MacAddress,
        dst_mac: MacAddress,
        src: &str,
        dst: &str,
        src_port: u16,
        dst_port: u16,
        hop_limit: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let frame = UdpV6Frame {
            eth: eth(vlan, src_mac, dst_mac, EtherType::IPV6),
            ip: Ipv6Hdr::new(v6(src), v6(dst), IpProtocol::UDP, hop_limit),
            src_port,
            dst_port,
            payload,
        };
        let mut buf = vec![0u8; frame.len()];
        frame.write(&mut buf).expect("udp v6 frame");
        buf
    }

    /// ICMPv6 message; `body` is everything after the 4-byte header.
    #[allow(clippy::too_many_arguments)]
    pub fn icmpv6(
        vlan: Option<u16>,
        src_mac: MacAddress,
        dst_mac: MacAddress,
        src: &str,
        dst: &str,
        hop_limit: u8,
        icmp_type: u8,
        code: u8,
        body: &[u8],
    ) -> Vec<u8> {
        Icmpv6Frame {
            eth: eth(vlan, src_mac, dst_mac, EtherType::IPV6),
            ip: Ipv6Hdr::new(v6(src), v6(dst), IpProtocol::ICMPV6, hop_limit),
            icmp_type,
            code,
            body,
        }
        .to_vec()
        .expect("icmpv6 frame")
    }

    /// ND message encoded by smoltcp.
    pub fn ndisc(
        vlan: Option<u16>,
        src_mac: MacAddress,
        dst_mac: MacAddress,
        src: &str,
        dst: &str,
        hop_limit: u8,
        message: NdiscRepr<'_>,
    ) -> Vec<u8> {
        let icmp = ndisc_message(v6(src), v6(dst), message, &[]);
        Self::icmpv6(vlan, src_mac, dst_mac, src, dst, hop_limit, icmp[0], icmp[1], &icmp[4..])
    }

    /// Echo Request from the client to the CPU.
    pub fn icmpv6_echo(vlan: Option<u16>, src: &str, dst: &str, hop_limit: u8) -> Vec<u8> {
        let body = [0x12, 0x34, 0x00, 0x01, b'p', b'i', b'n', b'g'];
        Self::icmpv6(
            vlan,
            CLIENT_MAC,
            CPU_MAC,
            src,
            dst,
            hop_limit,
            ECHO_REQUEST,
            0,
            &body,
        )
    }
}
