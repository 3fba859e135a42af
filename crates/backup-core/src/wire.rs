//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! The tag-length-value wire codec a decoded [`crate::frame::Frame`] is built from.
//!
//! Wire types: varint (0), 64-bit fixed (1), length-delimited (2). The format is a
//! subset of protobuf's encoding, not the format itself: unknown tags and unknown
//! wire types are rejected rather than skipped, since the backup format is fixed.

use crate::error::WireError;

pub const WIRE_VARINT: u32 = 0;
pub const WIRE_FIXED64: u32 = 1;
pub const WIRE_LENGTH_DELIMITED: u32 = 2;

/// A forward-only cursor over one frame's decrypted payload.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Reads one `(field_number << 3 | wire_type)` tag varint and splits it.
    /// Returns `None` once the buffer is exhausted.
    pub fn read_tag(&mut self) -> Result<Option<(u32, u32)>, WireError> {
        if self.is_empty() {
            return Ok(None);
        }
        let tag = self.read_varint()?;
        let wire_type = (tag & 0x7) as u32;
        let field_number = (tag >> 3) as u32;
        Ok(Some((field_number, wire_type)))
    }

    /// Decodes a base-128 varint: up to ten 7-bit groups, high bit of each byte
    /// continues the value.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        for i in 0..10 {
            let byte = *self.buf.get(self.pos).ok_or(WireError::UnexpectedEof)?;
            self.pos += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && byte & 0x80 != 0 {
                // A tenth byte may only carry the final bit of a 64-bit value.
                return Err(WireError::MalformedVarint);
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(WireError::MalformedVarint)
    }

    /// Reads a little-endian 8-byte fixed64 field.
    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        let end = self.pos.checked_add(8).ok_or(WireError::LengthOverrun)?;
        let bytes = self.buf.get(self.pos..end).ok_or(WireError::UnexpectedEof)?;
        self.pos = end;
        Ok(u64::from_le_bytes(bytes.try_into().expect("slice is 8 bytes")))
    }

    /// Reads a length-delimited field: a varint length followed by that many bytes,
    /// which must fit entirely within the remaining buffer.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::LengthOverrun)?;
        let end = self.pos.checked_add(len).ok_or(WireError::LengthOverrun)?;
        let bytes = self.buf.get(self.pos..end).ok_or(WireError::LengthOverrun)?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_string(&mut self) -> Result<&'a str, WireError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| WireError::LengthOverrun)
    }
}

/// A little-endian 8-byte IEEE-754 double carried in a fixed64 field.
pub fn fixed64_to_f64(bits: u64) -> f64 {
    f64::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_varint(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    #[test]
    fn decodes_single_byte_varint() {
        let mut c = Cursor::new(&[0x01]);
        assert_eq!(c.read_varint().unwrap(), 1);
    }

    #[test]
    fn decodes_multi_byte_varint() {
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        let mut c = Cursor::new(&buf);
        assert_eq!(c.read_varint().unwrap(), 300);
    }

    #[test]
    fn rejects_truncated_varint() {
        let mut c = Cursor::new(&[0x80]);
        assert_eq!(c.read_varint().unwrap_err(), WireError::MalformedVarint);
    }

    #[test]
    fn rejects_oversize_varint() {
        let buf = [0xffu8; 11];
        let mut c = Cursor::new(&buf);
        assert!(c.read_varint().is_err());
    }

    #[test]
    fn length_delimited_must_fit_remaining_buffer() {
        let mut buf = Vec::new();
        encode_varint(5, &mut buf); // claims 5 bytes
        buf.extend_from_slice(&[1, 2, 3]); // only 3 remain
        let mut c = Cursor::new(&buf);
        assert_eq!(c.read_bytes().unwrap_err(), WireError::LengthOverrun);
    }

    #[test]
    fn tag_splits_field_number_and_wire_type() {
        // field 4, wire type 2 -> tag = (4 << 3) | 2 = 34
        let mut buf = Vec::new();
        encode_varint(34, &mut buf);
        let mut c = Cursor::new(&buf);
        assert_eq!(c.read_tag().unwrap(), Some((4, WIRE_LENGTH_DELIMITED)));
    }

    #[test]
    fn fixed64_round_trips_a_double() {
        let value = 3.14159_f64;
        let mut buf = Vec::new();
        buf.extend_from_slice(&value.to_bits().to_le_bytes());
        let mut c = Cursor::new(&buf);
        let bits = c.read_fixed64().unwrap();
        assert_eq!(fixed64_to_f64(bits), value);
    }

    proptest! {
        #[test]
        fn varint_round_trip(v: u64) {
            let mut buf = Vec::new();
            encode_varint(v, &mut buf);
            let mut c = Cursor::new(&buf);
            prop_assert_eq!(c.read_varint().unwrap(), v);
            prop_assert!(c.is_empty());
        }
    }
}
