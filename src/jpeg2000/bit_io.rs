//! Byte-level readers and writers for marker segments and boxes, and the
//! bit-stuffed reader/writer used by packet headers.

use super::markers::J2kMarker;
use crate::error::{J2kError, Result};

/// Big-endian cursor over a borrowed byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(J2kError::Truncated("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(J2kError::Truncated("unexpected end of data"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn peek_u16(&self) -> Option<u16> {
        let b = self.data.get(self.pos..self.pos + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Growable big-endian writer.
#[derive(Default)]
pub struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_marker(&mut self, marker: J2kMarker) {
        self.write_u16(marker.code());
    }

    /// Overwrites a previously written big-endian `u32`.
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.data[at..at + 4].copy_from_slice(&v.to_be_bytes());
    }

    pub fn patch_u16(&mut self, at: usize, v: u16) {
        self.data[at..at + 2].copy_from_slice(&v.to_be_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Packet-header bit reader: a byte following `0xFF` carries only seven bits.
pub struct J2kBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    current: u8,
    bits_left: u8,
    last: u8,
}

impl<'a> J2kBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            current: 0,
            bits_left: 0,
            last: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        if self.bits_left == 0 {
            let b = *self
                .data
                .get(self.pos)
                .ok_or(J2kError::Truncated("packet header"))?;
            self.pos += 1;
            self.bits_left = if self.last == 0xFF { 7 } else { 8 };
            self.current = b;
            self.last = b;
        }
        self.bits_left -= 1;
        Ok(((self.current >> self.bits_left) & 1) as u32)
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        let mut v = 0;
        for _ in 0..count {
            v = (v << 1) | self.read_bit()?;
        }
        Ok(v)
    }

    /// Ends the header, skipping the stuffed byte after a final `0xFF`.
    /// Returns the number of bytes consumed.
    pub fn finish(mut self) -> usize {
        if self.last == 0xFF && self.pos < self.data.len() {
            self.pos += 1;
        }
        self.pos
    }
}

/// Packet-header bit writer, the counterpart of [`J2kBitReader`].
pub struct J2kBitWriter {
    data: Vec<u8>,
    current: u8,
    capacity: u8,
    free: u8,
}

impl Default for J2kBitWriter {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            current: 0,
            capacity: 8,
            free: 8,
        }
    }
}

impl J2kBitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: u32) {
        self.free -= 1;
        self.current |= ((bit & 1) as u8) << self.free;
        if self.free == 0 {
            self.data.push(self.current);
            self.capacity = if self.current == 0xFF { 7 } else { 8 };
            self.free = self.capacity;
            self.current = 0;
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.free != self.capacity {
            self.data.push(self.current);
        }
        if self.data.last() == Some(&0xFF) {
            self.data.push(0);
        }
        self.data
    }
}
