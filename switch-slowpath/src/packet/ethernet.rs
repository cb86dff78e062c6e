//! Ethernet II header with 802.1Q / 802.1ad tags.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Cursor, EtherType, PacketWriter, WireHeader};
use crate::error::{ParseError, WriteError};
use crate::state::VlanId;

/// Ethernet header size without tags
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// VLAN tag size
pub const VLAN_TAG_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0:?}")]
pub struct MacParseError(String);

/// 48-bit IEEE MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(MacAddress)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (includes broadcast).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Multicast MAC for an IPv6 multicast group (RFC 2464 section 7).
    pub fn ipv6_multicast(group: Ipv6Addr) -> Self {
        let o = group.octets();
        MacAddress([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }

    /// Modified EUI-64 link-local address derived from this MAC.
    pub fn link_local_ipv6(&self) -> Ipv6Addr {
        let m = self.0;
        Ipv6Addr::from([
            0xfe,
            0x80,
            0,
            0,
            0,
            0,
            0,
            0,
            m[0] ^ 0x02,
            m[1],
            m[2],
            0xff,
            0xfe,
            m[3],
            m[4],
            m[5],
        ])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddress(out))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

/// One 802.1Q tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub tpid: EtherType,
    pub priority: u8,
    pub drop_eligible: bool,
    pub vid: VlanId,
}

impl VlanTag {
    /// Plain 802.1Q tag with priority 0.
    pub fn new(vid: VlanId) -> Self {
        Self {
            tpid: EtherType::VLAN,
            priority: 0,
            drop_eligible: false,
            vid,
        }
    }

    fn tci(&self) -> u16 {
        (u16::from(self.priority & 0x07) << 13)
            | (u16::from(self.drop_eligible) << 12)
            | (self.vid.0 & 0x0fff)
    }

    fn from_tci(tpid: EtherType, tci: u16) -> Self {
        Self {
            tpid,
            priority: (tci >> 13) as u8,
            drop_eligible: tci & 0x1000 != 0,
            vid: VlanId(tci & 0x0fff),
        }
    }
}

/// Ethernet header.
///
/// Stacked tags are kept in wire order; the outermost one is the effective
/// VLAN. Frames built by the slow path carry exactly one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthHdr {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub vlan_tags: Vec<VlanTag>,
    pub ethertype: EtherType,
}

impl EthHdr {
    pub fn new(dst: MacAddress, src: MacAddress, vlan: Option<VlanId>, ethertype: EtherType) -> Self {
        Self {
            dst,
            src,
            vlan_tags: vlan.map(VlanTag::new).into_iter().collect(),
            ethertype,
        }
    }

    /// Effective (outermost) VLAN.
    pub fn vlan(&self) -> Option<VlanId> {
        self.vlan_tags.first().map(|t| t.vid)
    }
}

impl WireHeader for EthHdr {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ParseError> {
        cursor.ensure("ethernet header", ETHERNET_HEADER_SIZE)?;
        let dst = MacAddress(cursor.read_array("ethernet dst")?);
        let src = MacAddress(cursor.read_array("ethernet src")?);

        let mut vlan_tags = Vec::new();
        loop {
            let ethertype = EtherType(cursor.read_be_u16("ethertype")?);
            if ethertype != EtherType::VLAN && ethertype != EtherType::QINQ {
                return Ok(Self {
                    dst,
                    src,
                    vlan_tags,
                    ethertype,
                });
            }
            let tci = cursor.read_be_u16("vlan tag")?;
            vlan_tags.push(VlanTag::from_tci(ethertype, tci));
        }
    }

    fn write<W: PacketWriter>(&self, w: &mut W) -> Result<(), WriteError> {
        w.put_slice(&self.dst.0)?;
        w.put_slice(&self.src.0)?;
        for tag in &self.vlan_tags {
            w.put_be_u16(tag.tpid.0)?;
            w.put_be_u16(tag.tci())?;
        }
        w.put_be_u16(self.ethertype.0)
    }

    fn size(&self) -> usize {
        ETHERNET_HEADER_SIZE + VLAN_TAG_SIZE * self.vlan_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: MacAddress = MacAddress::new([0x02, 0x05, 0x73, 0xf9, 0x46, 0xfc]);

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "02:05:73:F9:46:fc".parse().unwrap();
        assert_eq!(mac, CLIENT);
        assert_eq!(mac.to_string(), "02:05:73:f9:46:fc");
        assert!("02:05:73:f9:46".parse::<MacAddress>().is_err());
        assert!("02:05:73:f9:46:fc:00".parse::<MacAddress>().is_err());
        assert!("02:05:73:f9:46:zz".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serde() {
        let json = serde_json::to_string(&CLIENT).unwrap();
        assert_eq!(json, "\"02:05:73:f9:46:fc\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CLIENT);
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }

    #[test]
    fn test_mac_classes() {
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(!CLIENT.is_multicast());
        assert!(MacAddress::new([0x33, 0x33, 0, 0, 0, 1]).is_multicast());
        assert!(MacAddress::ZERO.is_zero());
    }

    #[test]
    fn test_ipv6_multicast_mac() {
        let group: Ipv6Addr = "ff02::1:ff01:0".parse().unwrap();
        assert_eq!(
            MacAddress::ipv6_multicast(group).to_string(),
            "33:33:ff:01:00:00"
        );
    }

    #[test]
    fn test_link_local_eui64() {
        let mac: MacAddress = "02:00:01:00:00:01".parse().unwrap();
        let expected: Ipv6Addr = "fe80::ff:fe00:1".parse().unwrap();
        assert_eq!(mac.link_local_ipv6(), expected);
    }

    #[test]
    fn test_parse_untagged() {
        let bytes = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02, 0x05, 0x73, 0xf9, 0x46, 0xfc, 0x86, 0xdd,
        ];
        let mut cur = Cursor::new(&bytes);
        let hdr = EthHdr::parse(&mut cur).unwrap();
        assert_eq!(hdr.dst, MacAddress::BROADCAST);
        assert_eq!(hdr.src, CLIENT);
        assert!(hdr.vlan_tags.is_empty());
        assert_eq!(hdr.ethertype, EtherType::IPV6);
        assert!(cur.is_empty());
    }

    #[test]
    fn test_write_single_tag_layout() {
        let mut tag = VlanTag::new(VlanId(5));
        tag.priority = 6;
        tag.drop_eligible = true;
        let hdr = EthHdr {
            dst: MacAddress::BROADCAST,
            src: CLIENT,
            vlan_tags: vec![tag],
            ethertype: EtherType::IPV4,
        };

        let mut out = Vec::new();
        hdr.write(&mut out).unwrap();
        assert_eq!(out.len(), hdr.size());
        assert_eq!(&out[12..18], &[0x81, 0x00, 0xd0, 0x05, 0x08, 0x00]);

        let parsed = EthHdr::parse(&mut Cursor::new(&out)).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.vlan(), Some(VlanId(5)));
    }

    #[test]
    fn test_parse_qinq_outer_tag_wins() {
        let bytes = [
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 2, // macs
            0x88, 0xa8, 0x00, 0x64, // S-tag 100
            0x81, 0x00, 0x00, 0x05, // C-tag 5
            0x08, 0x00,
        ];
        let hdr = EthHdr::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(hdr.vlan_tags.len(), 2);
        assert_eq!(hdr.vlan(), Some(VlanId(100)));
        assert_eq!(hdr.size(), 22);
    }

    #[test]
    fn test_parse_truncated() {
        let bytes = [0u8; 13];
        assert!(matches!(
            EthHdr::parse(&mut Cursor::new(&bytes)),
            Err(ParseError::Truncated { .. })
        ));

        // Tag announced but missing
        let mut tagged = vec![0u8; 12];
        tagged.extend_from_slice(&[0x81, 0x00, 0x00]);
        assert!(matches!(
            EthHdr::parse(&mut Cursor::new(&tagged)),
            Err(ParseError::Truncated { .. })
        ));
    }
}
