//! Low-level protobuf wire format primitives.
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: START_GROUP / END_GROUP (legacy groups)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! Decoding goes through [`Cursor`], which tracks absolute offsets so that
//! errors raised deep inside a nested message still point at the right byte.

use crate::error::{Error, Result};
use bytes::BufMut;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::invalid_wire_format(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Field numbers reserved for the protobuf implementation itself
pub const RESERVED_FIELD_NUMBERS: std::ops::RangeInclusive<u32> = 19_000..=19_999;

/// Longest possible encoding of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Composes a tag from a field number and wire type.
#[inline]
pub fn make_tag(number: u32, wire_type: WireType) -> u32 {
    (number << 3) | wire_type as u32
}

/// Writes a field tag.
#[inline]
pub fn encode_tag(number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    encode_varint(u64::from(make_tag(number, wire_type)), buf);
}

/// Writes a varint.
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Number of bytes [`encode_varint`] writes for `value`.
#[inline]
pub fn encoded_len_varint(value: u64) -> usize {
    // Each byte holds 7 bits; a zero still takes one byte.
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Maps signed integers to unsigned so that small magnitudes stay small.
#[inline]
pub fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`].
#[inline]
pub fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Maps signed integers to unsigned so that small magnitudes stay small.
#[inline]
pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode64`].
#[inline]
pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            // Varints are at most 10 bytes for a 64-bit value
            return Err(Error::varint_decode(i));
        }

        result |= u64::from(byte & 0x7F) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::varint_decode(data.len()))
}

/// Bounds-checked reader over a byte slice.
///
/// Offsets reported in errors are absolute with respect to the outermost
/// buffer, including for cursors obtained through [`Cursor::split_to`].
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Reads a varint of up to 64 bits.
    pub fn read_varint(&mut self) -> Result<u64> {
        let offset = self.position();
        let (value, len) =
            decode_varint(&self.data[self.pos..]).map_err(|_| Error::varint_decode(offset))?;
        self.pos += len;
        Ok(value)
    }

    /// Reads a varint and keeps the low 32 bits, as the int32 family requires.
    pub fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint()? as u32)
    }

    /// Reads four little-endian bytes.
    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads eight little-endian bytes.
    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::truncated(self.position(), len, self.remaining()));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a varint length prefix followed by that many bytes.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        Ok(self.split_length_delimited()?.data)
    }

    /// Reads a varint length prefix and returns a cursor over the payload.
    pub fn split_length_delimited(&mut self) -> Result<Cursor<'a>> {
        let offset = self.position();
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::invalid_wire_format(offset, "length prefix overflows usize"))?;
        self.split_to(len)
    }

    /// Consumes the next `len` bytes and returns a cursor over them.
    pub fn split_to(&mut self, len: usize) -> Result<Cursor<'a>> {
        let base = self.position();
        let data = self.read_bytes(len)?;
        Ok(Cursor { data, pos: 0, base })
    }

    /// Reads a tag and splits it into field number and wire type.
    ///
    /// Field number 0 and wire types 6 and 7 are rejected.
    pub fn read_tag(&mut self) -> Result<(u32, WireType)> {
        let offset = self.position();
        let tag = self.read_varint()?;

        let wire_type = WireType::try_from((tag & 0x07) as u8).map_err(|_| {
            Error::invalid_wire_format(offset, format!("unknown wire type: {}", tag & 0x07))
        })?;
        let number = tag >> 3;

        if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
            return Err(Error::InvalidFieldNumber {
                number,
                max: MAX_FIELD_NUMBER,
            });
        }

        Ok((number as u32, wire_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_varint_single_byte() {
        let data = [0x08]; // Value 8
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 8);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_decode_varint_multi_byte() {
        let data = [0xAC, 0x02]; // Value 300
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_decode_varint_max() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, u64::MAX);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_decode_varint_too_long() {
        let data = [0xFF; 11];
        assert!(decode_varint(&data).is_err());
        // Unterminated
        assert!(decode_varint(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn test_encode_varint() {
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        assert_eq!(buf, [0xAC, 0x02]);
        assert_eq!(encoded_len_varint(300), 2);
        assert_eq!(encoded_len_varint(0), 1);
        assert_eq!(encoded_len_varint(u64::MAX), 10);

        // int32 -1 is sign-extended to ten bytes
        let mut buf = Vec::new();
        encode_varint(-1i64 as u64, &mut buf);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_decode32(u32::MAX), i32::MIN);
        assert_eq!(zigzag_encode64(-1), 1);
        assert_eq!(zigzag_decode64(zigzag_encode64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn test_wire_type_conversion() {
        assert_eq!(WireType::try_from(0).unwrap(), WireType::Varint);
        assert_eq!(WireType::try_from(1).unwrap(), WireType::I64);
        assert_eq!(WireType::try_from(2).unwrap(), WireType::Len);
        assert_eq!(WireType::try_from(5).unwrap(), WireType::I32);
        assert!(WireType::try_from(6).is_err());
    }

    #[test]
    fn test_read_tag() {
        let mut cursor = Cursor::new(&[0x08, 0x96, 0x01]);
        assert_eq!(cursor.read_tag().unwrap(), (1, WireType::Varint));
        assert_eq!(cursor.read_varint().unwrap(), 150);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_invalid_field_number() {
        // Field 0 is invalid
        let mut cursor = Cursor::new(&[0x00, 0x01]);
        assert!(matches!(
            cursor.read_tag(),
            Err(Error::InvalidFieldNumber { number: 0, .. })
        ));

        // Wire type 7 is invalid
        let mut cursor = Cursor::new(&[0x0F]);
        assert!(cursor.read_tag().is_err());
    }

    #[test]
    fn test_length_delimited_truncated() {
        // Field 1, LEN, claims 5 bytes but only 2 follow
        let mut cursor = Cursor::new(&[0x0A, 0x05, b'h', b'i']);
        cursor.read_tag().unwrap();
        let err = cursor.read_length_delimited().unwrap_err();
        assert!(matches!(
            err,
            Error::Truncated {
                offset: 2,
                needed: 5,
                remaining: 2
            }
        ));
    }

    #[test]
    fn test_split_keeps_absolute_offsets() {
        let data = [0x0A, 0x02, 0x80, 0x80];
        let mut cursor = Cursor::new(&data);
        cursor.read_tag().unwrap();
        let mut inner = cursor.split_length_delimited().unwrap();
        assert_eq!(inner.position(), 2);
        assert!(matches!(
            inner.read_varint(),
            Err(Error::VarintDecode { offset: 2 })
        ));
    }

    #[test]
    fn test_fixed_widths() {
        let mut cursor = Cursor::new(&[0x01, 0x00, 0x00, 0x00, 0x02, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(cursor.read_fixed32().unwrap(), 1);
        assert_eq!(cursor.read_fixed64().unwrap(), 2);
        assert!(cursor.read_fixed32().is_err());
    }
}
