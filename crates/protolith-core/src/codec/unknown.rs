//! Storage for fields the schema does not describe.

use crate::error::{Error, Result};
use crate::wire::{encode_tag, encode_varint, encoded_len_varint, Cursor, WireType};
use bytes::{BufMut, Bytes};

/// Payload of an unknown field, kept in its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownValue {
    /// Wire type 0
    Varint(u64),
    /// Wire type 5
    Fixed32(u32),
    /// Wire type 1
    Fixed64(u64),
    /// Wire type 2
    LengthDelimited(Bytes),
    /// Wire types 3/4 and everything between them
    Group(UnknownFieldSet),
}

impl UnknownValue {
    /// Wire type this value is encoded with
    pub fn wire_type(&self) -> WireType {
        match self {
            UnknownValue::Varint(_) => WireType::Varint,
            UnknownValue::Fixed32(_) => WireType::I32,
            UnknownValue::Fixed64(_) => WireType::I64,
            UnknownValue::LengthDelimited(_) => WireType::Len,
            UnknownValue::Group(_) => WireType::StartGroup,
        }
    }
}

/// One unknown field occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    /// Field number
    pub number: u32,
    /// Payload
    pub value: UnknownValue,
}

impl UnknownField {
    /// Writes the tag and payload.
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        encode_tag(self.number, self.value.wire_type(), buf);
        match &self.value {
            UnknownValue::Varint(v) => encode_varint(*v, buf),
            UnknownValue::Fixed32(v) => buf.put_u32_le(*v),
            UnknownValue::Fixed64(v) => buf.put_u64_le(*v),
            UnknownValue::LengthDelimited(bytes) => {
                encode_varint(bytes.len() as u64, buf);
                buf.put_slice(bytes);
            }
            UnknownValue::Group(group) => {
                group.encode(buf);
                encode_tag(self.number, WireType::EndGroup, buf);
            }
        }
    }
}

/// Unknown fields in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownFieldSet {
    fields: Vec<UnknownField>,
}

impl UnknownFieldSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an occurrence
    pub fn push(&mut self, number: u32, value: UnknownValue) {
        self.fields.push(UnknownField { number, value });
    }

    /// Occurrences in arrival order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &UnknownField> + '_ {
        self.fields.iter()
    }

    /// Occurrences of one field number, in arrival order
    pub fn get(&self, number: u32) -> impl Iterator<Item = &UnknownValue> + '_ {
        self.fields
            .iter()
            .filter(move |f| f.number == number)
            .map(|f| &f.value)
    }

    /// Number of occurrences
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Removes all occurrences
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Reads the payload of a field whose tag has just been consumed.
    ///
    /// `depth` is the remaining group nesting budget.
    pub(crate) fn read_value(
        cursor: &mut Cursor<'_>,
        number: u32,
        wire_type: WireType,
        depth: u32,
        limit: u32,
    ) -> Result<UnknownValue> {
        Ok(match wire_type {
            WireType::Varint => UnknownValue::Varint(cursor.read_varint()?),
            WireType::I32 => UnknownValue::Fixed32(cursor.read_fixed32()?),
            WireType::I64 => UnknownValue::Fixed64(cursor.read_fixed64()?),
            WireType::Len => {
                let bytes = cursor.read_length_delimited()?;
                UnknownValue::LengthDelimited(Bytes::copy_from_slice(bytes))
            }
            WireType::StartGroup => {
                if depth == 0 {
                    return Err(Error::RecursionLimitExceeded { limit });
                }
                UnknownValue::Group(Self::read_group(cursor, number, depth - 1, limit)?)
            }
            WireType::EndGroup => {
                return Err(Error::invalid_wire_format(
                    cursor.position(),
                    format!("unexpected END_GROUP for field {}", number),
                ))
            }
        })
    }

    fn read_group(cursor: &mut Cursor<'_>, group: u32, depth: u32, limit: u32) -> Result<Self> {
        let mut set = Self::new();
        loop {
            if cursor.is_empty() {
                return Err(Error::invalid_wire_format(
                    cursor.position(),
                    format!("missing END_GROUP for field {}", group),
                ));
            }
            let (number, wire_type) = cursor.read_tag()?;
            if wire_type == WireType::EndGroup {
                if number != group {
                    return Err(Error::invalid_wire_format(
                        cursor.position(),
                        format!("END_GROUP for field {} inside group {}", number, group),
                    ));
                }
                return Ok(set);
            }
            let value = Self::read_value(cursor, number, wire_type, depth, limit)?;
            set.push(number, value);
        }
    }

    /// Writes every occurrence, in arrival order.
    pub fn encode(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            field.encode(buf);
        }
    }

    /// Size of [`encode`](Self::encode)'s output
    pub fn encoded_len(&self) -> usize {
        self.fields
            .iter()
            .map(|field| {
                let tag = encoded_len_varint(u64::from(field.number) << 3);
                tag + match &field.value {
                    UnknownValue::Varint(v) => encoded_len_varint(*v),
                    UnknownValue::Fixed32(_) => 4,
                    UnknownValue::Fixed64(_) => 8,
                    UnknownValue::LengthDelimited(bytes) => {
                        encoded_len_varint(bytes.len() as u64) + bytes.len()
                    }
                    UnknownValue::Group(group) => group.encoded_len() + tag,
                }
            })
            .sum()
    }
}

impl<'a> IntoIterator for &'a UnknownFieldSet {
    type Item = &'a UnknownField;
    type IntoIter = std::slice::Iter<'a, UnknownField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
