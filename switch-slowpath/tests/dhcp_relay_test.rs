//! DHCP relay integration tests
//!
//! Drives complete client/server exchanges through a running `Switch`:
//! 1. DHCPv4 DISCOVER relayed to the server with a circuit id
//! 2. DHCPv4 OFFER relayed back to the client with option 82 stripped
//! 3. DHCPv6 SOLICIT wrapped in RELAY-FORWARD
//! 4. RELAY-REPLY unwrapped and delivered to the client

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use dhcproto::v4::{self, OptionCode};
use dhcproto::v6;
use dhcproto::{Decodable, Decoder};

use switch_slowpath::Switch;
use switch_slowpath::dhcp::v4::{BOOTREPLY, BOOTREQUEST, OPT_END};
use switch_slowpath::dhcp::{DhcpV6Header, DhcpV6Packet};
use switch_slowpath::dhcp::v6::{OPTION_INTERFACE_ID, OPTION_RELAY_MSG, RELAY_REPLY};
use switch_slowpath::ndp::neighbor::NeighborConfig;
use switch_slowpath::packet::{Cursor, EthHdr, Ipv4Hdr, Ipv6Hdr, MacAddress, UdpHdr, WireHeader};
use switch_slowpath::state::{PortId, VlanId};
use switch_slowpath::stats::Counter;
use switch_slowpath::test_util::{CLIENT_MAC, CPU_MAC, Harness, RecordingIo, TestFrame};

const SERVER_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x99]);
const SWITCH_V4: Ipv4Addr = Ipv4Addr::new(10, 164, 4, 10);
const CLIENT_LL: &str = "fe80::5:73ff:fef9:46fc";

fn start() -> (Switch, Arc<RecordingIo>) {
    let _ = tracing_subscriber::fmt::try_init();
    let io = Arc::new(RecordingIo::default());
    let switch = Switch::start(Harness::default_state(), NeighborConfig::default(), io.clone())
        .expect("switch starts");
    (switch, io)
}

fn split_v4(frame: &[u8]) -> (EthHdr, Ipv4Hdr, UdpHdr, Vec<u8>) {
    let mut cursor = Cursor::new(frame);
    let eth = EthHdr::parse(&mut cursor).unwrap();
    let ip = Ipv4Hdr::parse(&mut cursor).unwrap();
    let udp = UdpHdr::parse(&mut cursor).unwrap();
    let payload = cursor.rest()[..usize::from(udp.length) - 8].to_vec();
    (eth, ip, udp, payload)
}

fn split_v6(frame: &[u8]) -> (EthHdr, Ipv6Hdr, UdpHdr, Vec<u8>) {
    let mut cursor = Cursor::new(frame);
    let eth = EthHdr::parse(&mut cursor).unwrap();
    let ip = Ipv6Hdr::parse(&mut cursor).unwrap();
    let udp = UdpHdr::parse(&mut cursor).unwrap();
    (eth, ip, udp, cursor.rest().to_vec())
}

#[test]
fn test_dhcpv4_discover_offer_exchange() {
    let (mut switch, io) = start();

    // DISCOVER with a parameter request list
    let discover = TestFrame::dhcpv4_message(BOOTREQUEST, CLIENT_MAC, &[53, 1, 1, 55, 3, 1, 3, 6, OPT_END]);
    let frame = TestFrame::dhcpv4(
        Some(5),
        CLIENT_MAC,
        MacAddress::BROADCAST,
        "0.0.0.0",
        "255.255.255.255",
        68,
        67,
        &discover,
    );
    switch.handle_inbound_frame(&frame, PortId(1), None).unwrap();

    let sent = io.switched();
    assert_eq!(sent.len(), 1);
    let (eth, ip, udp, payload) = split_v4(&sent[0]);
    assert_eq!((eth.src, eth.dst), (CPU_MAC, CPU_MAC));
    assert_eq!(eth.vlan(), Some(VlanId(5)));
    assert_eq!((ip.src, ip.dst), (SWITCH_V4, Harness::DHCP_V4_SERVER));
    assert_eq!((udp.src_port, udp.dst_port), (67, 67));

    let relayed = v4::Message::decode(&mut Decoder::new(&payload)).unwrap();
    assert_eq!(relayed.xid(), 0x3903_f326);
    assert_eq!(relayed.giaddr(), SWITCH_V4);
    assert_eq!(&relayed.chaddr()[..6], &CLIENT_MAC.octets());
    assert!(relayed.opts().get(OptionCode::RelayAgentInformation).is_some());
    // option 82 whose only sub-option is the circuit id carrying our address
    let options = &payload[240..];
    assert!(options.windows(8).any(|w| w == [82, 6, 1, 4, 10, 164, 4, 10]));

    // OFFER from the server, still carrying our option 82
    let mut offer = TestFrame::dhcpv4_message(
        BOOTREPLY,
        CLIENT_MAC,
        &[53, 1, 2, 54, 4, 10, 1, 2, 3, 82, 6, 1, 4, 10, 164, 4, 10, OPT_END],
    );
    offer.flags = 0;
    offer.yiaddr = Ipv4Addr::new(10, 164, 4, 77);
    offer.giaddr = SWITCH_V4;
    let frame = TestFrame::dhcpv4(Some(5), SERVER_MAC, CPU_MAC, "10.1.2.3", "10.164.4.10", 67, 67, &offer);
    switch.handle_inbound_frame(&frame, PortId(4), None).unwrap();

    let sent = io.switched();
    assert_eq!(sent.len(), 2);
    let (eth, ip, udp, payload) = split_v4(&sent[1]);
    assert_eq!((eth.src, eth.dst), (CPU_MAC, CLIENT_MAC));
    assert_eq!((ip.src, ip.dst), (SWITCH_V4, Ipv4Addr::new(10, 164, 4, 77)));
    assert_eq!(ip.ttl, 63);
    assert!(ip.checksum_valid());
    assert_eq!((udp.src_port, udp.dst_port), (67, 68));

    let delivered = v4::Message::decode(&mut Decoder::new(&payload)).unwrap();
    assert_eq!(delivered.giaddr(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(delivered.yiaddr(), Ipv4Addr::new(10, 164, 4, 77));
    assert!(delivered.opts().get(OptionCode::RelayAgentInformation).is_none());
    assert!(delivered.opts().get(OptionCode::ServerIdentifier).is_some());

    assert_eq!(switch.stats().get(Counter::Dhcpv4Pkt), 2);
    assert_eq!(switch.stats().get(Counter::Dhcpv4BadPkt), 0);
    switch.shutdown();
}

#[test]
fn test_dhcpv4_relay_loop_dropped() {
    let (mut switch, io) = start();
    let looped = TestFrame::dhcpv4_message(BOOTREQUEST, CLIENT_MAC, &[53, 1, 3, 82, 3, 1, 1, 0, OPT_END]);
    let frame = TestFrame::dhcpv4(
        Some(5),
        CLIENT_MAC,
        MacAddress::BROADCAST,
        "0.0.0.0",
        "255.255.255.255",
        68,
        67,
        &looped,
    );
    assert!(switch.handle_inbound_frame(&frame, PortId(1), None).is_err());
    assert!(io.switched().is_empty());
    assert_eq!(switch.stats().get(Counter::Dhcpv4BadPkt), 1);
    assert_eq!(switch.stats().get(Counter::Dhcpv4DropPkt), 1);
    switch.shutdown();
}

fn solicit() -> Vec<u8> {
    vec![
        0x01, 0x0a, 0x0b, 0x0c, // solicit, xid
        0x00, 0x01, 0x00, 0x0a, 0x00, 0x03, 0x00, 0x01, 0x02, 0x05, 0x73, 0xf9, 0x46,
        0xfc, // client id
        0x00, 0x08, 0x00, 0x02, 0x00, 0x00, // elapsed time
    ]
}

fn advertise() -> Vec<u8> {
    vec![
        0x02, 0x0a, 0x0b, 0x0c, // advertise, xid
        0x00, 0x02, 0x00, 0x0a, 0x00, 0x03, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00,
        0x99, // server id
    ]
}

#[test]
fn test_dhcpv6_solicit_and_reply() {
    let (mut switch, io) = start();

    let frame = TestFrame::udp_v6(
        Some(5),
        CLIENT_MAC,
        MacAddress::new([0x33, 0x33, 0, 1, 0, 2]),
        CLIENT_LL,
        "ff02::1:2",
        546,
        547,
        1,
        &solicit(),
    );
    switch.handle_inbound_frame(&frame, PortId(2), None).unwrap();

    let sent = io.switched();
    assert_eq!(sent.len(), 1);
    let (_, ip, udp, payload) = split_v6(&sent[0]);
    assert_eq!(ip.dst, Harness::DHCP_V6_SERVER);
    assert_eq!(udp.dst_port, 547);

    let envelope = DhcpV6Packet::parse(&mut Cursor::new(&payload)).unwrap();
    let DhcpV6Header::Relay { peer_addr, .. } = envelope.header else {
        panic!("expected a relay header");
    };
    assert_eq!(peer_addr, CLIENT_LL.parse::<Ipv6Addr>().unwrap());
    let inner = &envelope.find_option(OPTION_RELAY_MSG).unwrap().data;
    assert_eq!(inner, &solicit());
    let wrapped = v6::Message::decode(&mut Decoder::new(inner)).unwrap();
    assert_eq!(wrapped.msg_type(), v6::MessageType::Solicit);

    // server answers with a RELAY-REPLY echoing the interface id
    let advertise = advertise();

    let mut reply = DhcpV6Packet {
        msg_type: RELAY_REPLY,
        header: envelope.header.clone(),
        options: Vec::new(),
    };
    reply.options.push(envelope.find_option(OPTION_INTERFACE_ID).unwrap().clone());
    reply.add_relay_message_option(&advertise);
    let frame = TestFrame::udp_v6(
        Some(5),
        SERVER_MAC,
        CPU_MAC,
        "2001:db8:200::2",
        "2401:db00:2110:3004::a",
        547,
        547,
        60,
        &reply.to_vec().unwrap(),
    );
    switch.handle_inbound_frame(&frame, PortId(4), None).unwrap();

    let sent = io.switched();
    assert_eq!(sent.len(), 2);
    let (eth, ip, udp, payload) = split_v6(&sent[1]);
    assert_eq!((eth.src, eth.dst), (CPU_MAC, CLIENT_MAC));
    assert_eq!(ip.dst, CLIENT_LL.parse::<Ipv6Addr>().unwrap());
    assert_eq!((udp.src_port, udp.dst_port), (547, 546));
    assert_eq!(udp.checksum, udp.compute_checksum_v6(&ip, &payload));
    assert_eq!(payload, advertise);

    let delivered = v6::Message::decode(&mut Decoder::new(&payload)).unwrap();
    assert_eq!(delivered.msg_type(), v6::MessageType::Advertise);
    assert_eq!(switch.stats().get(Counter::Dhcpv6Pkt), 2);
    switch.shutdown();
}

#[test]
fn test_dhcpv6_oversized_solicit_dropped() {
    let (mut switch, io) = start();
    let mut message = solicit();
    // vendor class padding pushes the relay-forward past 1214 bytes
    message.extend_from_slice(&[0x00, 0x10, 0x04, 0xb0]);
    message.resize(message.len() + 1200, 0xab);
    let frame = TestFrame::udp_v6(
        Some(5),
        CLIENT_MAC,
        MacAddress::new([0x33, 0x33, 0, 1, 0, 2]),
        CLIENT_LL,
        "ff02::1:2",
        546,
        547,
        1,
        &message,
    );
    assert!(switch.handle_inbound_frame(&frame, PortId(2), None).is_err());
    assert!(io.switched().is_empty());
    assert_eq!(switch.stats().get(Counter::Dhcpv6BadPkt), 1);
    assert_eq!(switch.stats().get(Counter::Dhcpv6DropPkt), 1);
    switch.shutdown();
}
