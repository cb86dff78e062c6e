//! DHCPv6 messages (RFC 8415), including the relay envelope.

use std::net::Ipv6Addr;

use crate::error::{ParseError, WriteError};
use crate::packet::{Cursor, MacAddress, PacketWriter, WireHeader};

/// DHCPv6 server/relay port
pub const DHCPV6_SERVER_PORT: u16 = 547;

/// DHCPv6 client port
pub const DHCPV6_CLIENT_PORT: u16 = 546;

pub const SOLICIT: u8 = 1;
pub const ADVERTISE: u8 = 2;
pub const REQUEST: u8 = 3;
pub const CONFIRM: u8 = 4;
pub const RENEW: u8 = 5;
pub const REBIND: u8 = 6;
pub const REPLY: u8 = 7;
pub const RELEASE: u8 = 8;
pub const DECLINE: u8 = 9;
pub const RECONFIGURE: u8 = 10;
pub const INFORMATION_REQUEST: u8 = 11;
pub const RELAY_FORWARD: u8 = 12;
pub const RELAY_REPLY: u8 = 13;

pub const OPTION_RELAY_MSG: u16 = 9;
pub const OPTION_INTERFACE_ID: u16 = 18;

/// Largest relay message we emit (1280 minus IPv6 and UDP headers, minus
/// room for one more relay hop's envelope)
pub const MAX_RELAY_MESSAGE_SIZE: usize = 1214;

/// Relays beyond this hop count are discarded (RFC 8415 HOP_COUNT_LIMIT)
pub const MAX_HOP_COUNT: u8 = 10;

const CLIENT_HEADER_SIZE: usize = 4;
const RELAY_HEADER_SIZE: usize = 34;
const OPTION_HEADER_SIZE: usize = 4;

/// Fixed part after the message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpV6Header {
    /// Client/server message: 24-bit transaction id.
    Client { transaction_id: u32 },
    /// Relay-forward or relay-reply envelope.
    Relay {
        hop_count: u8,
        link_addr: Ipv6Addr,
        peer_addr: Ipv6Addr,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV6Option {
    pub code: u16,
    pub data: Vec<u8>,
}

impl DhcpV6Option {
    pub fn size(&self) -> usize {
        OPTION_HEADER_SIZE + self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV6Packet {
    pub msg_type: u8,
    pub header: DhcpV6Header,
    pub options: Vec<DhcpV6Option>,
}

impl DhcpV6Packet {
    /// Empty relay-forward envelope.
    pub fn relay_forward(hop_count: u8, link_addr: Ipv6Addr, peer_addr: Ipv6Addr) -> Self {
        Self {
            msg_type: RELAY_FORWARD,
            header: DhcpV6Header::Relay {
                hop_count,
                link_addr,
                peer_addr,
            },
            options: Vec::new(),
        }
    }

    pub fn is_relay(&self) -> bool {
        matches!(self.header, DhcpV6Header::Relay { .. })
    }

    /// Serialized length.
    pub fn compute_packet_length(&self) -> usize {
        let header = match self.header {
            DhcpV6Header::Client { .. } => CLIENT_HEADER_SIZE,
            DhcpV6Header::Relay { .. } => RELAY_HEADER_SIZE,
        };
        header + self.options.iter().map(DhcpV6Option::size).sum::<usize>()
    }

    pub fn find_option(&self, code: u16) -> Option<&DhcpV6Option> {
        self.options.iter().find(|o| o.code == code)
    }

    pub fn add_interface_id_option(&mut self, mac: MacAddress) {
        self.options.push(DhcpV6Option {
            code: OPTION_INTERFACE_ID,
            data: mac.octets().to_vec(),
        });
    }

    /// Wrap `message` (an already serialized DHCPv6 message) verbatim.
    pub fn add_relay_message_option(&mut self, message: &[u8]) {
        self.options.push(DhcpV6Option {
            code: OPTION_RELAY_MSG,
            data: message.to_vec(),
        });
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, WriteError> {
        let mut out = Vec::with_capacity(self.compute_packet_length());
        self.write(&mut out)?;
        Ok(out)
    }
}

impl WireHeader for DhcpV6Packet {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        let msg_type = cursor.read_u8("dhcpv6 message type")?;
        let header = if msg_type == RELAY_FORWARD || msg_type == RELAY_REPLY {
            DhcpV6Header::Relay {
                hop_count: cursor.read_u8("dhcpv6 hop count")?,
                link_addr: cursor.read_ipv6("dhcpv6 link address")?,
                peer_addr: cursor.read_ipv6("dhcpv6 peer address")?,
            }
        } else {
            let b: [u8; 3] = cursor.read_array("dhcpv6 transaction id")?;
            DhcpV6Header::Client {
                transaction_id: u32::from_be_bytes([0, b[0], b[1], b[2]]),
            }
        };

        let mut options = Vec::new();
        while !cursor.is_empty() {
            let code = cursor.read_be_u16("dhcpv6 option code")?;
            let len = cursor.read_be_u16("dhcpv6 option length")?;
            let data = cursor.read_bytes("dhcpv6 option data", usize::from(len))?;
            options.push(DhcpV6Option {
                code,
                data: data.to_vec(),
            });
        }

        Ok(Self {
            msg_type,
            header,
            options,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        w.put_u8(self.msg_type)?;
        match self.header {
            DhcpV6Header::Client { transaction_id } => {
                w.put_slice(&transaction_id.to_be_bytes()[1..])?;
            }
            DhcpV6Header::Relay {
                hop_count,
                link_addr,
                peer_addr,
            } => {
                w.put_u8(hop_count)?;
                w.put_ipv6(link_addr)?;
                w.put_ipv6(peer_addr)?;
            }
        }
        for opt in &self.options {
            w.put_be_u16(opt.code)?;
            w.put_be_u16(opt.data.len() as u16)?;
            w.put_slice(&opt.data)?;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.compute_packet_length()
    }
}
