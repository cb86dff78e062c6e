//! UDP header (RFC 768).

use super::{Checksum, Cursor, IpProtocol, Ipv4Hdr, Ipv6Hdr, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};

/// UDP header size
pub const UDP_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHdr {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHdr {
    /// Header for a datagram carrying `payload_len` bytes.
    pub fn new(src_port: u16, dst_port: u16, payload_len: usize) -> Self {
        Self {
            src_port,
            dst_port,
            length: (UDP_HEADER_SIZE + payload_len) as u16,
            checksum: 0,
        }
    }

    pub fn compute_checksum_v4(&self, ip: &Ipv4Hdr, payload: &[u8]) -> u16 {
        let mut c = Checksum::new();
        c.add_ipv4_pseudo_header(ip.src, ip.dst, IpProtocol::UDP, self.length);
        self.add_to(&mut c);
        c.add_bytes(payload);
        c.finish()
    }

    pub fn compute_checksum_v6(&self, ip: &Ipv6Hdr, payload: &[u8]) -> u16 {
        let mut c = Checksum::new();
        c.add_ipv6_pseudo_header(ip.src, ip.dst, IpProtocol::UDP, u32::from(self.length));
        self.add_to(&mut c);
        c.add_bytes(payload);
        c.finish()
    }

    fn add_to(&self, c: &mut Checksum) {
        c.add_u16(self.src_port);
        c.add_u16(self.dst_port);
        c.add_u16(self.length);
    }
}

impl WireHeader for UdpHdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("udp header", UDP_HEADER_SIZE)?;
        let hdr = Self {
            src_port: cursor.read_be_u16("udp src port")?,
            dst_port: cursor.read_be_u16("udp dst port")?,
            length: cursor.read_be_u16("udp length")?,
            checksum: cursor.read_be_u16("udp checksum")?,
        };
        if usize::from(hdr.length) < UDP_HEADER_SIZE {
            return Err(ParseError::malformed("udp header", "length below 8"));
        }
        Ok(hdr)
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        w.put_be_u16(self.src_port)?;
        w.put_be_u16(self.dst_port)?;
        w.put_be_u16(self.length)?;
        w.put_be_u16(self.checksum)
    }

    fn size(&self) -> usize {
        UDP_HEADER_SIZE
    }
}
