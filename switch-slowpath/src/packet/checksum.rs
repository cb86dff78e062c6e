//! RFC 1071 Internet checksum, shared by IPv4, UDP, TCP and ICMP.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::IpProtocol;

/// One's-complement accumulator.
///
/// Bytes may be added in several pieces; an odd trailing byte is carried
/// into the next piece so the result matches a single pass over the
/// concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u64,
    pending: Option<u8>,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, mut data: &[u8]) {
        if let Some(hi) = self.pending.take() {
            match data.split_first() {
                Some((lo, rest)) => {
                    self.sum += u64::from(u16::from_be_bytes([hi, *lo]));
                    data = rest;
                }
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }

        let mut chunks = data.chunks_exact(2);
        for word in &mut chunks {
            self.sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = chunks.remainder() {
            self.pending = Some(*last);
        }
    }

    pub fn add_u16(&mut self, v: u16) {
        self.add_bytes(&v.to_be_bytes());
    }

    pub fn add_u32(&mut self, v: u32) {
        self.add_bytes(&v.to_be_bytes());
    }

    /// IPv4 pseudo-header (RFC 768 / RFC 793).
    pub fn add_ipv4_pseudo_header(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: IpProtocol,
        length: u16,
    ) {
        self.add_bytes(&src.octets());
        self.add_bytes(&dst.octets());
        self.add_u16(u16::from(protocol.0));
        self.add_u16(length);
    }

    /// IPv6 pseudo-header (RFC 8200 section 8.1).
    pub fn add_ipv6_pseudo_header(
        &mut self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: IpProtocol,
        length: u32,
    ) {
        self.add_bytes(&src.octets());
        self.add_bytes(&dst.octets());
        self.add_u32(length);
        self.add_u32(u32::from(next_header.0));
    }

    /// Folded one's complement. Zero means a received buffer verified.
    pub fn finish_raw(self) -> u16 {
        let mut sum = self.sum;
        if let Some(hi) = self.pending {
            sum += u64::from(u16::from_be_bytes([hi, 0]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }

    /// Checksum value to put on the wire (zero is sent as 0xFFFF).
    pub fn finish(self) -> u16 {
        match self.finish_raw() {
            0 => 0xffff,
            v => v,
        }
    }
}

/// Raw checksum of a single buffer.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut c = Checksum::new();
    c.add_bytes(data);
    c.finish_raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        // Folded sum is 0xDDF2, transmitted value its complement
        assert_eq!(internet_checksum(&data), !0xddf2);
        assert_eq!(internet_checksum(&data), 0x220d);

        let mut with_sum = data.to_vec();
        with_sum.extend_from_slice(&0x220du16.to_be_bytes());
        assert_eq!(internet_checksum(&with_sum), 0);
    }

    #[test]
    fn test_odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0xab]), !0xab00);
        assert_eq!(internet_checksum(&[0x12, 0x34, 0x56]), !(0x1234u16 + 0x5600));
    }

    #[test]
    fn test_split_input_matches_single_pass() {
        let data: Vec<u8> = (0u8..=200).collect();
        let mut split = Checksum::new();
        split.add_bytes(&data[..7]);
        split.add_bytes(&data[7..8]);
        split.add_bytes(&[]);
        split.add_bytes(&data[8..101]);
        split.add_bytes(&data[101..]);
        assert_eq!(split.finish_raw(), internet_checksum(&data));
    }

    #[test]
    fn test_zero_transmitted_as_ffff() {
        // Sum of 0xFFFF complements to zero
        let mut c = Checksum::new();
        c.add_u16(0xffff);
        assert_eq!(c.finish_raw(), 0);
        assert_eq!(c.finish(), 0xffff);
    }

    #[test]
    fn test_carry_folding() {
        let mut c = Checksum::new();
        for _ in 0..0x1_0001 {
            c.add_u16(0xffff);
        }
        assert_eq!(c.finish_raw(), 0);
    }
}
