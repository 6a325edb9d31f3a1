//! Encoder: holder to bytes.

use super::{UnknownValue, MESSAGE_SET_ITEM, MESSAGE_SET_MESSAGE, MESSAGE_SET_TYPE_ID};
use crate::access::{AccessTable, FieldAccessor, Holder};
use crate::descriptor::{FieldDescriptor, Kind};
use crate::error::{Error, Result};
use crate::value::Value;
use crate::wire::{encode_tag, encode_varint, zigzag_encode32, zigzag_encode64, WireType};
use bytes::BufMut;

/// Writes known fields and extensions by ascending number, then unknown
/// fields.
pub(super) fn encode_message(
    holder: &dyn Holder,
    table: &AccessTable,
    buf: &mut Vec<u8>,
) -> Result<()> {
    if table.descriptor().is_message_set() {
        return encode_message_set(holder, buf);
    }

    let mut extensions = holder.extensions().iter().peekable();

    for accessor in table.fields_by_number() {
        let number = accessor.field().number();
        while let Some((extension, value)) =
            extensions.next_if(|(extension, _)| extension.number() < number)
        {
            encode_field(extension, value, None, buf)?;
        }
        encode_known(holder, table, accessor, buf)?;
    }
    for (extension, value) in extensions {
        encode_field(extension, value, None, buf)?;
    }

    holder.unknown_fields().encode(buf);
    Ok(())
}

/// Writes every extension as a MessageSet item, then the unknown fields.
///
/// Unknown length-delimited fields are items whose extension was not
/// recognized and get the same framing.
fn encode_message_set(holder: &dyn Holder, buf: &mut Vec<u8>) -> Result<()> {
    for (extension, value) in holder.extensions().iter() {
        let Value::Message(message) = value else {
            return Err(cannot_encode(extension, value));
        };
        let table = nested_table(extension, message.as_ref(), None)?;
        let mut payload = Vec::new();
        encode_message(message.as_ref(), &table, &mut payload)?;
        encode_item(extension.number(), &payload, buf);
    }

    for field in holder.unknown_fields() {
        match &field.value {
            UnknownValue::LengthDelimited(payload) => encode_item(field.number, payload, buf),
            _ => field.encode(buf),
        }
    }
    Ok(())
}

fn encode_item(type_id: u32, payload: &[u8], buf: &mut Vec<u8>) {
    encode_tag(MESSAGE_SET_ITEM, WireType::StartGroup, buf);
    encode_tag(MESSAGE_SET_TYPE_ID, WireType::Varint, buf);
    encode_varint(u64::from(type_id), buf);
    encode_tag(MESSAGE_SET_MESSAGE, WireType::Len, buf);
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
    encode_tag(MESSAGE_SET_ITEM, WireType::EndGroup, buf);
}

fn encode_known(
    holder: &dyn Holder,
    table: &AccessTable,
    accessor: &FieldAccessor,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let member = accessor.slot().member();
    if !accessor.is_repeated() && !accessor.has(holder)? {
        return Ok(());
    }
    let Some(value) = holder.value(member) else {
        return Ok(());
    };

    let field = accessor.field();
    let child = table.child(field.index());
    encode_field(field, value, child.as_ref(), buf)
}

/// Encodes one field's whole value: a single value, a list or a map.
fn encode_field(
    field: &FieldDescriptor,
    value: &Value,
    child: Option<&AccessTable>,
    buf: &mut Vec<u8>,
) -> Result<()> {
    if field.is_map() {
        return encode_map(field, value, child, buf);
    }
    if !field.is_repeated() {
        return encode_single(field, value, child, buf);
    }

    let Value::List(items) = value else {
        return Err(cannot_encode(field, value));
    };
    if items.is_empty() {
        return Ok(());
    }

    if field.is_packed() {
        let mut payload = Vec::new();
        for item in items {
            encode_scalar(field, item, &mut payload)?;
        }
        encode_tag(field.number(), WireType::Len, buf);
        encode_varint(payload.len() as u64, buf);
        buf.extend_from_slice(&payload);
    } else {
        for item in items {
            encode_single(field, item, child, buf)?;
        }
    }
    Ok(())
}

/// Encodes one value with its tag.
fn encode_single(
    field: &FieldDescriptor,
    value: &Value,
    child: Option<&AccessTable>,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let number = field.number();
    match field.kind() {
        Kind::Message => {
            let Value::Message(message) = value else {
                return Err(cannot_encode(field, value));
            };
            let table = nested_table(field, message.as_ref(), child)?;
            let mut payload = Vec::new();
            encode_message(message.as_ref(), &table, &mut payload)?;
            encode_tag(number, WireType::Len, buf);
            encode_varint(payload.len() as u64, buf);
            buf.extend_from_slice(&payload);
        }
        Kind::Group => {
            let Value::Message(message) = value else {
                return Err(cannot_encode(field, value));
            };
            let table = nested_table(field, message.as_ref(), child)?;
            encode_tag(number, WireType::StartGroup, buf);
            encode_message(message.as_ref(), &table, buf)?;
            encode_tag(number, WireType::EndGroup, buf);
        }
        kind => {
            encode_tag(number, kind.wire_type(), buf);
            encode_scalar(field, value, buf)?;
        }
    }
    Ok(())
}

/// Encodes map entries sorted by key; key and value are always written.
fn encode_map(
    field: &FieldDescriptor,
    value: &Value,
    child: Option<&AccessTable>,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let Value::Map(entries) = value else {
        return Err(cannot_encode(field, value));
    };
    let entry = field.message_type();
    let (Some(key_field), Some(value_field)) = (
        entry.as_ref().and_then(|e| e.map_entry_key()),
        entry.as_ref().and_then(|e| e.map_entry_value()),
    ) else {
        return Err(Error::internal(format!(
            "map field {} has no entry fields",
            field.full_name()
        )));
    };

    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    for (key, entry_value) in sorted {
        let mut payload = Vec::new();
        encode_single(&key_field, &Value::from(key.clone()), None, &mut payload)?;
        encode_single(&value_field, entry_value, child, &mut payload)?;
        encode_tag(field.number(), WireType::Len, buf);
        encode_varint(payload.len() as u64, buf);
        buf.extend_from_slice(&payload);
    }
    Ok(())
}

/// Writes a scalar, string or bytes payload without its tag.
fn encode_scalar(field: &FieldDescriptor, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match (field.kind(), value) {
        // Negative int32 and enum values are sign-extended to 64 bits.
        (Kind::Int32, Value::I32(v)) | (Kind::Enum, Value::EnumNumber(v)) => {
            encode_varint(i64::from(*v) as u64, buf)
        }
        (Kind::Sint32, Value::I32(v)) => encode_varint(u64::from(zigzag_encode32(*v)), buf),
        (Kind::Sfixed32, Value::I32(v)) => buf.put_i32_le(*v),
        (Kind::Int64, Value::I64(v)) => encode_varint(*v as u64, buf),
        (Kind::Sint64, Value::I64(v)) => encode_varint(zigzag_encode64(*v), buf),
        (Kind::Sfixed64, Value::I64(v)) => buf.put_i64_le(*v),
        (Kind::Uint32, Value::U32(v)) => encode_varint(u64::from(*v), buf),
        (Kind::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
        (Kind::Uint64, Value::U64(v)) => encode_varint(*v, buf),
        (Kind::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
        (Kind::Float, Value::F32(v)) => buf.put_f32_le(*v),
        (Kind::Double, Value::F64(v)) => buf.put_f64_le(*v),
        (Kind::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), buf),
        (Kind::String, Value::String(s)) => {
            encode_varint(s.len() as u64, buf);
            buf.extend_from_slice(s.as_bytes());
        }
        (Kind::Bytes, Value::Bytes(b)) => {
            encode_varint(b.len() as u64, buf);
            buf.extend_from_slice(b);
        }
        _ => return Err(cannot_encode(field, value)),
    }
    Ok(())
}

/// Table for a nested message: the prebuilt child if there is one,
/// otherwise built from the message's own shape.
fn nested_table(
    field: &FieldDescriptor,
    message: &dyn Holder,
    child: Option<&AccessTable>,
) -> Result<AccessTable> {
    if let Some(table) = child {
        return Ok(table.clone());
    }
    let message_type = field.message_type().ok_or_else(|| {
        Error::internal(format!("message field {} has no type", field.full_name()))
    })?;
    AccessTable::build(&message_type, message.shape())
}

fn cannot_encode(field: &FieldDescriptor, value: &Value) -> Error {
    Error::invalid_value(
        field.full_name(),
        format!("cannot encode {} as {}", value.kind_name(), field.kind().as_str()),
    )
}
