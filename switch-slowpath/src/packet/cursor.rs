//! Byte cursors used by every header codec.
//!
//! - `Cursor`: read-only, advances over an immutable buffer
//! - `PacketWriter`: big-endian output capability, implemented by
//!   `RwCursor` (pre-sized buffer) and `Vec<u8>` (growable)

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{ParseError, WriteError};

/// Read cursor over a received frame.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Fail with `Truncated` unless `n` bytes remain.
    pub fn ensure(&self, what: &'static str, n: usize) -> Result<(), ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated {
                what,
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, what: &'static str, n: usize) -> Result<&'a [u8], ParseError> {
        self.ensure(what, n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], ParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(what, N)?);
        Ok(out)
    }

    pub fn skip(&mut self, what: &'static str, n: usize) -> Result<(), ParseError> {
        self.read_bytes(what, n).map(|_| ())
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, ParseError> {
        Ok(self.read_array::<1>(what)?[0])
    }

    pub fn read_be_u16(&mut self, what: &'static str) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.read_array(what)?))
    }

    pub fn read_be_u32(&mut self, what: &'static str) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.read_array(what)?))
    }

    pub fn read_ipv4(&mut self, what: &'static str) -> Result<Ipv4Addr, ParseError> {
        Ok(Ipv4Addr::from(self.read_array::<4>(what)?))
    }

    pub fn read_ipv6(&mut self, what: &'static str) -> Result<Ipv6Addr, ParseError> {
        Ok(Ipv6Addr::from(self.read_array::<16>(what)?))
    }

    /// Split off the next `n` bytes as an independent cursor.
    pub fn sub_cursor(&mut self, what: &'static str, n: usize) -> Result<Cursor<'a>, ParseError> {
        Ok(Cursor::new(self.read_bytes(what, n)?))
    }
}

/// Big-endian serialization target.
pub trait PacketWriter {
    fn put_slice(&mut self, data: &[u8]) -> Result<(), WriteError>;

    /// Bytes written so far.
    fn written(&self) -> usize;

    fn put_u8(&mut self, v: u8) -> Result<(), WriteError> {
        self.put_slice(&[v])
    }

    fn put_be_u16(&mut self, v: u16) -> Result<(), WriteError> {
        self.put_slice(&v.to_be_bytes())
    }

    fn put_be_u32(&mut self, v: u32) -> Result<(), WriteError> {
        self.put_slice(&v.to_be_bytes())
    }

    fn put_ipv4(&mut self, addr: Ipv4Addr) -> Result<(), WriteError> {
        self.put_slice(&addr.octets())
    }

    fn put_ipv6(&mut self, addr: Ipv6Addr) -> Result<(), WriteError> {
        self.put_slice(&addr.octets())
    }

    fn put_zeros(&mut self, n: usize) -> Result<(), WriteError> {
        for _ in 0..n {
            self.put_u8(0)?;
        }
        Ok(())
    }
}

/// Write cursor over a pre-sized mutable buffer.
#[derive(Debug)]
pub struct RwCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> RwCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Overwrite two bytes at an absolute offset (checksum back-patching).
    pub fn patch_be_u16(&mut self, offset: usize, v: u16) -> Result<(), WriteError> {
        let slot = self
            .buf
            .get_mut(offset..offset + 2)
            .ok_or(WriteError::BufferTooSmall {
                needed: offset + 2,
                remaining: 0,
            })?;
        slot.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// The bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

impl PacketWriter for RwCursor<'_> {
    fn put_slice(&mut self, data: &[u8]) -> Result<(), WriteError> {
        if self.remaining() < data.len() {
            return Err(WriteError::BufferTooSmall {
                needed: data.len(),
                remaining: self.remaining(),
            });
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(())
    }

    fn written(&self) -> usize {
        self.pos
    }
}

impl PacketWriter for Vec<u8> {
    fn put_slice(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn written(&self) -> usize {
        self.len()
    }
}
