//! Dynamically typed field values.
//!
//! [`Value`] is what the access layer hands out and accepts, and what the
//! codec deposits into holders. Scalar variants mirror the mapped type of a
//! field rather than its exact wire encoding, so `sint32`, `sfixed32` and
//! `int32` fields all carry [`Value::I32`].

use crate::access::Holder;
use crate::descriptor::{EnumDescriptor, EnumValueDescriptor, MappedType};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// A single field value, or the whole contents of a repeated or map field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// `int32`, `sint32`, `sfixed32`
    I32(i32),
    /// `int64`, `sint64`, `sfixed64`
    I64(i64),
    /// `uint32`, `fixed32`
    U32(u32),
    /// `uint64`, `fixed64`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `string`
    String(String),
    /// `bytes`
    Bytes(Bytes),
    /// Enum value held by number, recognized or not
    EnumNumber(i32),
    /// Embedded message or group
    Message(Box<dyn Holder>),
    /// Contents of a repeated field
    List(Vec<Value>),
    /// Contents of a map field
    Map(HashMap<MapKey, Value>),
}

impl Value {
    /// The zero value for a mapped type, or `None` for messages, which have
    /// no holder-independent default.
    pub fn zero(mapped: MappedType) -> Option<Value> {
        Some(match mapped {
            MappedType::Bool => Value::Bool(false),
            MappedType::Int32 => Value::I32(0),
            MappedType::Int64 => Value::I64(0),
            MappedType::UInt32 => Value::U32(0),
            MappedType::UInt64 => Value::U64(0),
            MappedType::Float => Value::F32(0.0),
            MappedType::Double => Value::F64(0.0),
            MappedType::String => Value::String(String::new()),
            MappedType::Bytes => Value::Bytes(Bytes::new()),
            MappedType::Enum => Value::EnumNumber(0),
            MappedType::Message => return None,
        })
    }

    /// Returns true if this value is the zero value of its type.
    ///
    /// Used for implicit presence, where a field set to zero cannot be told
    /// apart from an unset one. Negative zero floats are not zero here, since
    /// they encode differently.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Bool(v) => !*v,
            Value::I32(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            Value::F32(v) => v.to_bits() == 0,
            Value::F64(v) => v.to_bits() == 0,
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
            Value::EnumNumber(v) => *v == 0,
            Value::Message(_) => false,
            Value::List(v) => v.is_empty(),
            Value::Map(v) => v.is_empty(),
        }
    }

    /// Returns true if this value can be stored in a singular field of the
    /// given mapped type.
    pub fn is_valid_for(&self, mapped: MappedType) -> bool {
        matches!(
            (self, mapped),
            (Value::Bool(_), MappedType::Bool)
                | (Value::I32(_), MappedType::Int32)
                | (Value::I64(_), MappedType::Int64)
                | (Value::U32(_), MappedType::UInt32)
                | (Value::U64(_), MappedType::UInt64)
                | (Value::F32(_), MappedType::Float)
                | (Value::F64(_), MappedType::Double)
                | (Value::String(_), MappedType::String)
                | (Value::Bytes(_), MappedType::Bytes)
                | (Value::EnumNumber(_), MappedType::Enum)
                | (Value::Message(_), MappedType::Message)
        )
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::EnumNumber(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns the value as a `bool`, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `i32`, if it is one.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `i64`, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a `u32`, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a `u64`, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `f32`, if it is one.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `f64`, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as bytes, if it is a bytes value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the held enum number, if this is an enum value.
    pub fn as_enum_number(&self) -> Option<i32> {
        match self {
            Value::EnumNumber(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the embedded message, if this is a message value.
    pub fn as_message(&self) -> Option<&dyn Holder> {
        match self {
            Value::Message(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Returns the embedded message mutably, if this is a message value.
    pub fn as_message_mut(&mut self) -> Option<&mut (dyn Holder + 'static)> {
        match self {
            Value::Message(v) => Some(v.as_mut()),
            _ => None,
        }
    }

    /// Returns the elements, if this is a list value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the entries, if this is a map value.
    pub fn as_map(&self) -> Option<&HashMap<MapKey, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

/// A map key. Only integral, bool and string types may key a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    /// `bool` key
    Bool(bool),
    /// `int32`, `sint32`, `sfixed32` key
    I32(i32),
    /// `int64`, `sint64`, `sfixed64` key
    I64(i64),
    /// `uint32`, `fixed32` key
    U32(u32),
    /// `uint64`, `fixed64` key
    U64(u64),
    /// `string` key
    String(String),
}

impl MapKey {
    /// The zero key for a mapped type, if the type can key a map.
    pub fn zero(mapped: MappedType) -> Option<MapKey> {
        MapKey::try_from(Value::zero(mapped)?).ok()
    }

    /// Returns true if this key can be stored under the given mapped type.
    pub fn is_valid_for(&self, mapped: MappedType) -> bool {
        matches!(
            (self, mapped),
            (MapKey::Bool(_), MappedType::Bool)
                | (MapKey::I32(_), MappedType::Int32)
                | (MapKey::I64(_), MappedType::Int64)
                | (MapKey::U32(_), MappedType::UInt32)
                | (MapKey::U64(_), MappedType::UInt64)
                | (MapKey::String(_), MappedType::String)
        )
    }
}

impl TryFrom<Value> for MapKey {
    type Error = Value;

    fn try_from(value: Value) -> std::result::Result<Self, Value> {
        match value {
            Value::Bool(v) => Ok(MapKey::Bool(v)),
            Value::I32(v) => Ok(MapKey::I32(v)),
            Value::I64(v) => Ok(MapKey::I64(v)),
            Value::U32(v) => Ok(MapKey::U32(v)),
            Value::U64(v) => Ok(MapKey::U64(v)),
            Value::String(v) => Ok(MapKey::String(v)),
            other => Err(other),
        }
    }
}

impl From<MapKey> for Value {
    fn from(key: MapKey) -> Self {
        match key {
            MapKey::Bool(v) => Value::Bool(v),
            MapKey::I32(v) => Value::I32(v),
            MapKey::I64(v) => Value::I64(v),
            MapKey::U32(v) => Value::U32(v),
            MapKey::U64(v) => Value::U64(v),
            MapKey::String(v) => Value::String(v),
        }
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        MapKey::String(v.to_string())
    }
}

/// An enum value read through its descriptor.
///
/// Enums are open: a number the schema does not declare is still a valid
/// value and is reported as [`EnumValue::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnumValue {
    /// The number matches a declared value (the first one, if aliased)
    Known(EnumValueDescriptor),
    /// The number is not declared by the enum
    Unknown(i32),
}

impl EnumValue {
    /// Resolves a number against an enum descriptor.
    pub fn resolve(enum_type: &EnumDescriptor, number: i32) -> Self {
        match enum_type.get_value(number) {
            Some(value) => EnumValue::Known(value),
            None => EnumValue::Unknown(number),
        }
    }

    /// The numeric value.
    pub fn number(&self) -> i32 {
        match self {
            EnumValue::Known(value) => value.number(),
            EnumValue::Unknown(number) => *number,
        }
    }

    /// The declared name, if the number is known.
    pub fn name(&self) -> Option<&str> {
        match self {
            EnumValue::Known(value) => Some(value.name()),
            EnumValue::Unknown(_) => None,
        }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumValue::Known(value) => f.write_str(value.name()),
            EnumValue::Unknown(number) => write!(f, "{}", number),
        }
    }
}
