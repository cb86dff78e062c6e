//! IPv4 header (RFC 791). Options are carried opaquely.

use std::net::Ipv4Addr;

use super::{Checksum, Cursor, IpProtocol, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};

/// IPv4 header size without options
pub const IPV4_HEADER_SIZE: usize = 20;

/// Largest header IHL can describe
const IPV4_MAX_HEADER_SIZE: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Hdr {
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub id: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Option words beyond the fixed 20 bytes, verbatim.
    pub options: Vec<u8>,
}

impl Ipv4Hdr {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, ttl: u8) -> Self {
        Self {
            dscp: 0,
            ecn: 0,
            total_length: IPV4_HEADER_SIZE as u16,
            id: 0,
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl,
            protocol,
            checksum: 0,
            src,
            dst,
            options: Vec::new(),
        }
    }

    /// Header length in bytes (IHL * 4).
    pub fn header_len(&self) -> usize {
        IPV4_HEADER_SIZE + self.options.len()
    }

    /// Bytes following the header according to `total_length`.
    pub fn payload_len(&self) -> usize {
        usize::from(self.total_length).saturating_sub(self.header_len())
    }

    /// Header checksum over the current field values.
    pub fn compute_checksum(&self) -> u16 {
        let mut copy = Vec::with_capacity(self.header_len());
        let zeroed = Ipv4Hdr {
            checksum: 0,
            ..self.clone()
        };
        // Writing into a Vec cannot fail
        let _ = zeroed.write(&mut copy);
        let mut c = Checksum::new();
        c.add_bytes(&copy);
        c.finish()
    }

    /// True when the stored checksum verifies.
    pub fn checksum_valid(&self) -> bool {
        let mut copy = Vec::with_capacity(self.header_len());
        let _ = self.write(&mut copy);
        let mut c = Checksum::new();
        c.add_bytes(&copy);
        c.finish_raw() == 0
    }
}

impl WireHeader for Ipv4Hdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("ipv4 header", IPV4_HEADER_SIZE)?;
        let ver_ihl = cursor.read_u8("ipv4 version")?;
        if ver_ihl >> 4 != 4 {
            return Err(ParseError::malformed("ipv4 header", "version is not 4"));
        }
        let ihl = usize::from(ver_ihl & 0x0f);
        if ihl < 5 {
            return Err(ParseError::malformed("ipv4 header", "IHL below 5"));
        }
        let tos = cursor.read_u8("ipv4 tos")?;
        let total_length = cursor.read_be_u16("ipv4 total length")?;
        let id = cursor.read_be_u16("ipv4 id")?;
        let frag = cursor.read_be_u16("ipv4 fragment")?;
        let ttl = cursor.read_u8("ipv4 ttl")?;
        if ttl == 0 {
            return Err(ParseError::malformed("ipv4 header", "TTL is zero"));
        }
        let protocol = IpProtocol(cursor.read_u8("ipv4 protocol")?);
        let checksum = cursor.read_be_u16("ipv4 checksum")?;
        let src = cursor.read_ipv4("ipv4 src")?;
        let dst = cursor.read_ipv4("ipv4 dst")?;
        let options = cursor
            .read_bytes("ipv4 options", ihl * 4 - IPV4_HEADER_SIZE)?
            .to_vec();
        if usize::from(total_length) < ihl * 4 {
            return Err(ParseError::malformed(
                "ipv4 header",
                "total length shorter than header",
            ));
        }

        Ok(Self {
            dscp: tos >> 2,
            ecn: tos & 0x03,
            total_length,
            id,
            dont_fragment: frag & 0x4000 != 0,
            more_fragments: frag & 0x2000 != 0,
            fragment_offset: frag & 0x1fff,
            ttl,
            protocol,
            checksum,
            src,
            dst,
            options,
        })
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        let ihl = (self.header_len().min(IPV4_MAX_HEADER_SIZE) / 4) as u8;
        w.put_u8(0x40 | ihl)?;
        w.put_u8((self.dscp << 2) | (self.ecn & 0x03))?;
        w.put_be_u16(self.total_length)?;
        w.put_be_u16(self.id)?;
        let frag = (u16::from(self.dont_fragment) << 14)
            | (u16::from(self.more_fragments) << 13)
            | (self.fragment_offset & 0x1fff);
        w.put_be_u16(frag)?;
        w.put_u8(self.ttl)?;
        w.put_u8(self.protocol.0)?;
        w.put_be_u16(self.checksum)?;
        w.put_ipv4(self.src)?;
        w.put_ipv4(self.dst)?;
        w.put_slice(&self.options)
    }

    fn size(&self) -> usize {
        self.header_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ipv4Hdr {
        let mut hdr = Ipv4Hdr::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            IpProtocol::UDP,
            64,
        );
        hdr.total_length = 28;
        hdr.id = 0x1c46;
        hdr.dont_fragment = true;
        hdr.dscp = 46;
        hdr.checksum = hdr.compute_checksum();
        hdr
    }

    #[test]
    fn test_write_layout_and_checksum() {
        let hdr = sample();
        let mut out = Vec::new();
        hdr.write(&mut out).unwrap();

        assert_eq!(out.len(), 20);
        assert_eq!(out[0], 0x45);
        assert_eq!(out[1], 46 << 2);
        assert_eq!(&out[6..8], &[0x40, 0x00]);
        assert_eq!(out[9], 17);
        assert_eq!(crate::packet::internet_checksum(&out), 0);

        // Cross-check with an independent decoder
        let pkt = smoltcp::wire::Ipv4Packet::new_unchecked(&out[..]);
        assert!(pkt.verify_checksum());
        assert_eq!(pkt.hop_limit(), 64);
    }

    #[test]
    fn test_round_trip_with_options() {
        let mut hdr = sample();
        hdr.options = vec![0x94, 0x04, 0x00, 0x00]; // router alert
        hdr.total_length = 32;
        hdr.checksum = hdr.compute_checksum();

        let mut out = Vec::new();
        hdr.write(&mut out).unwrap();
        assert_eq!(out[0], 0x46);

        let mut cur = Cursor::new(&out);
        let parsed = Ipv4Hdr::parse(&mut cur).unwrap();
        assert_eq!(parsed, hdr);
        assert!(parsed.checksum_valid());
        assert!(cur.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        let mut out = Vec::new();
        sample().write(&mut out).unwrap();

        let mut bad_version = out.clone();
        bad_version[0] = 0x65;
        assert!(matches!(
            Ipv4Hdr::parse(&mut Cursor::new(&bad_version)),
            Err(ParseError::Malformed { .. })
        ));

        let mut short_ihl = out.clone();
        short_ihl[0] = 0x44;
        assert!(matches!(
            Ipv4Hdr::parse(&mut Cursor::new(&short_ihl)),
            Err(ParseError::Malformed { .. })
        ));

        let mut zero_ttl = out.clone();
        zero_ttl[8] = 0;
        assert!(matches!(
            Ipv4Hdr::parse(&mut Cursor::new(&zero_ttl)),
            Err(ParseError::Malformed { .. })
        ));

        assert!(matches!(
            Ipv4Hdr::parse(&mut Cursor::new(&out[..19])),
            Err(ParseError::Truncated { .. })
        ));

        // IHL promises options that are not there
        let mut long_ihl = out.clone();
        long_ihl[0] = 0x47;
        assert!(matches!(
            Ipv4Hdr::parse(&mut Cursor::new(&long_ihl)),
            Err(ParseError::Truncated { .. })
        ));
    }
}
