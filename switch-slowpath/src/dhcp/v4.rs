//! BOOTP / DHCPv4 message (RFC 2131) and Relay Agent Information (RFC 3046).
//!
//! The option area is kept as the raw byte stream it arrived as. Relaying
//! only ever needs to copy options through, drop option 82 or append it, so
//! options are walked on demand rather than decoded into a map.

use std::net::Ipv4Addr;

use crate::error::{ParseError, ProtocolViolation, WriteError};
use crate::packet::{Cursor, PacketWriter, WireHeader};

/// BOOTP server port
pub const BOOTP_SERVER_PORT: u16 = 67;

/// BOOTP client port
pub const BOOTP_CLIENT_PORT: u16 = 68;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Fixed BOOTP header, everything before the magic cookie
pub const DHCPV4_FIXED_SIZE: usize = 236;

/// Minimum BOOTP message size (RFC 1542)
pub const DHCPV4_MIN_SIZE: usize = 300;

pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Broadcast bit of the flags field
pub const FLAG_BROADCAST: u16 = 0x8000;

pub const OPT_PAD: u8 = 0;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_MAX_MESSAGE_SIZE: u8 = 57;
pub const OPT_AGENT_INFORMATION: u8 = 82;
pub const OPT_END: u8 = 255;

/// Agent Circuit ID sub-option of option 82
pub const AGENT_CIRCUIT_ID: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV4Packet {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    /// False for legacy BOOTP, which carries no options.
    pub has_magic_cookie: bool,
    /// Raw option stream following the cookie.
    pub options: Vec<u8>,
}

impl DhcpV4Packet {
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// Extend the option area with PAD bytes up to the 300 byte minimum.
    pub fn pad_to_min_length(&mut self) {
        let size = self.size();
        if size < DHCPV4_MIN_SIZE {
            self.options.resize(self.options.len() + DHCPV4_MIN_SIZE - size, OPT_PAD);
        }
    }

    /// Copy of this request with a Relay Agent Information option whose only
    /// sub-option is a Circuit ID carrying `circuit`.
    ///
    /// Fails when the request already carries option 82 (a relay loop),
    /// carries no message type, or would outgrow the client's advertised
    /// maximum message size.
    pub fn add_agent_circuit_id(&self, circuit: Ipv4Addr) -> Result<Self, ProtocolViolation> {
        let mut out = Vec::with_capacity(self.options.len() + 8);
        let mut is_dhcp = false;
        let mut max_size = None;

        for opt in OptionWalker::new(&self.options) {
            let opt = opt?;
            match opt.code {
                OPT_END => break,
                OPT_MESSAGE_TYPE => is_dhcp = true,
                OPT_MAX_MESSAGE_SIZE => match opt.data {
                    [hi, lo, ..] => max_size = Some(u16::from_be_bytes([*hi, *lo])),
                    _ => return Err(ProtocolViolation::BadOptions("short max message size")),
                },
                OPT_AGENT_INFORMATION => return Err(ProtocolViolation::AgentOptionPresent),
                _ => {}
            }
            out.extend_from_slice(opt.encoded);
        }

        if !is_dhcp {
            return Err(ProtocolViolation::NotDhcp);
        }

        let addr = circuit.octets();
        out.extend_from_slice(&[OPT_AGENT_INFORMATION, 2 + addr.len() as u8]);
        out.extend_from_slice(&[AGENT_CIRCUIT_ID, addr.len() as u8]);
        out.extend_from_slice(&addr);
        out.push(OPT_END);

        let mut relayed = Self {
            options: out,
            ..self.clone()
        };
        relayed.pad_to_min_length();

        if let Some(max) = max_size
            && max > 0
            && relayed.size() > usize::from(max)
        {
            return Err(ProtocolViolation::TooLong {
                len: relayed.size(),
                max: usize::from(max),
            });
        }
        Ok(relayed)
    }

    /// Copy of this reply with every Relay Agent Information option removed.
    pub fn strip_agent_options(&self) -> Result<Self, ProtocolViolation> {
        let mut out = Vec::with_capacity(self.options.len());
        let mut is_dhcp = false;

        for opt in OptionWalker::new(&self.options) {
            let opt = opt?;
            match opt.code {
                OPT_MESSAGE_TYPE => is_dhcp = true,
                OPT_AGENT_INFORMATION => continue,
                _ => {}
            }
            out.extend_from_slice(opt.encoded);
            if opt.code == OPT_END {
                break;
            }
        }

        if !is_dhcp {
            return Err(ProtocolViolation::NotDhcp);
        }

        let mut stripped = Self {
            options: out,
            ..self.clone()
        };
        stripped.pad_to_min_length();
        Ok(stripped)
    }

    /// Data of the first option with `code`, if any.
    pub fn find_option(&self, code: u8) -> Option<&[u8]> {
        OptionWalker::new(&self.options)
            .map_while(Result::ok)
            .take_while(|o| o.code != OPT_END)
            .find(|o| o.code == code)
            .map(|o| o.data)
    }

    /// Client hardware address, assuming Ethernet.
    pub fn client_mac(&self) -> crate::packet::MacAddress {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        crate::packet::MacAddress::new(mac)
    }
}

impl WireHeader for DhcpV4Packet {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("dhcpv4 header", DHCPV4_FIXED_SIZE)?;
        let op = cursor.read_u8("dhcpv4 op")?;
        let htype = cursor.read_u8("dhcpv4 htype")?;
        let hlen = cursor.read_u8("dhcpv4 hlen")?;
        let hops = cursor.read_u8("dhcpv4 hops")?;
        let xid = cursor.read_be_u32("dhcpv4 xid")?;
        let secs = cursor.read_be_u16("dhcpv4 secs")?;
        let flags = cursor.read_be_u16("dhcpv4 flags")?;
        let ciaddr = cursor.read_ipv4("dhcpv4 ciaddr")?;
        let yiaddr = cursor.read_ipv4("dhcpv4 yiaddr")?;
        let siaddr = cursor.read_ipv4("dhcpv4 siaddr")?;
        let giaddr = cursor.read_ipv4("dhcpv4 giaddr")?;
        let chaddr = cursor.read_array("dhcpv4 chaddr")?;
        let sname = cursor.read_array("dhcpv4 sname")?;
        let file = cursor.read_array("dhcpv4 file")?;

        let (has_magic_cookie, options) = if cursor.is_empty() {
            (false, Vec::new())
        } else {
            let cookie: [u8; 4] = cursor.read_array("dhcpv4 magic cookie")?;
            if cookie != MAGIC_COOKIE {
                return Err(ParseError::malformed("dhcpv4 magic cookie", "cookie mismatch"));
            }
            (true, cursor.rest().to_vec())
        };
        cursor.skip("dhcpv4 options", options.len())?;

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            has_magic_cookie,
            options,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        w.put_u8(self.op)?;
        w.put_u8(self.htype)?;
        w.put_u8(self.hlen)?;
        w.put_u8(self.hops)?;
        w.put_be_u32(self.xid)?;
        w.put_be_u16(self.secs)?;
        w.put_be_u16(self.flags)?;
        w.put_ipv4(self.ciaddr)?;
        w.put_ipv4(self.yiaddr)?;
        w.put_ipv4(self.siaddr)?;
        w.put_ipv4(self.giaddr)?;
        w.put_slice(&self.chaddr)?;
        w.put_slice(&self.sname)?;
        w.put_slice(&self.file)?;
        if self.has_magic_cookie {
            w.put_slice(&MAGIC_COOKIE)?;
            w.put_slice(&self.options)?;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        if self.has_magic_cookie {
            DHCPV4_FIXED_SIZE + MAGIC_COOKIE.len() + self.options.len()
        } else {
            DHCPV4_FIXED_SIZE
        }
    }
}

/// One option as found in the stream.
struct RawOption<'a> {
    code: u8,
    data: &'a [u8],
    /// Code, length and data exactly as on the wire.
    encoded: &'a [u8],
}

/// Walks a DHCPv4 option stream. PAD and END have no length byte.
struct OptionWalker<'a> {
    rest: &'a [u8],
}

impl<'a> OptionWalker<'a> {
    fn new(options: &'a [u8]) -> Self {
        Self { rest: options }
    }
}

impl<'a> Iterator for OptionWalker<'a> {
    type Item = Result<RawOption<'a>, ProtocolViolation>;

    fn next(&mut self) -> Option<Self::Item> {
        let code = *self.rest.first()?;
        let total = match code {
            OPT_PAD | OPT_END => 1,
            _ => match self.rest.get(1) {
                Some(&len) => 2 + usize::from(len),
                None => {
                    self.rest = &[];
                    return Some(Err(ProtocolViolation::BadOptions("option without length")));
                }
            },
        };
        if total > self.rest.len() {
            self.rest = &[];
            return Some(Err(ProtocolViolation::BadOptions("option overruns packet")));
        }
        let (encoded, rest) = self.rest.split_at(total);
        self.rest = rest;
        Some(Ok(RawOption {
            code,
            data: if total == 1 { &[] } else { &encoded[2..] },
            encoded,
        }))
    }
}
