//! Decoder: bytes to holder.

use super::extension::RegisteredExtension;
use super::{
    DecodeOptions, ExtensionRegistry, UnknownFieldSet, UnknownValue, Utf8Policy,
    MESSAGE_SET_ITEM, MESSAGE_SET_MESSAGE, MESSAGE_SET_TYPE_ID,
};
use crate::access::{AccessTable, DynamicMessage, FieldAccessor, Holder};
use crate::descriptor::{FieldDescriptor, Kind, MappedType, Syntax};
use crate::error::{Error, Result};
use crate::value::{MapKey, Value};
use crate::wire::{zigzag_decode32, zigzag_decode64, Cursor, WireType};
use bytes::Bytes;
use tracing::{trace, warn};

/// Wire-format decoder.
///
/// Holds the decode options and, optionally, the extension registry used
/// to recognize extension fields. The decoder itself keeps no state
/// between calls.
#[derive(Debug, Clone, Default)]
pub struct Decoder<'r> {
    options: DecodeOptions,
    registry: Option<&'r ExtensionRegistry>,
}

impl<'r> Decoder<'r> {
    /// Creates a decoder with default options and no registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder with custom options
    pub fn with_options(options: DecodeOptions) -> Self {
        Self {
            options,
            registry: None,
        }
    }

    /// Set the extension registry
    pub fn registry(mut self, registry: &'r ExtensionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Options in effect
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Merges `buf` into an existing holder.
    ///
    /// Singular scalars are overwritten, singular messages merged and
    /// repeated fields appended to. With
    /// [`check_required`](DecodeOptions::check_required) set, the merged
    /// holder must have every required field set.
    pub fn decode_into(
        &self,
        buf: &[u8],
        table: &AccessTable,
        holder: &mut dyn Holder,
    ) -> Result<()> {
        let mut cursor = Cursor::new(buf);
        self.merge(&mut cursor, table, holder, self.options.recursion_limit, None)?;

        if self.options.check_required {
            let fields = table.missing_required(holder)?;
            if !fields.is_empty() {
                return Err(Error::MissingRequired {
                    type_name: table.descriptor().full_name().to_string(),
                    fields,
                });
            }
        }
        Ok(())
    }

    /// Decodes into a fresh holder of type `H`.
    pub fn decode<H: Holder + Default>(&self, buf: &[u8], table: &AccessTable) -> Result<H> {
        let mut holder = H::default();
        self.decode_into(buf, table, &mut holder)?;
        Ok(holder)
    }

    /// Decodes into a fresh [`DynamicMessage`].
    ///
    /// `table` must have been built with the message descriptor as shape.
    pub fn decode_dynamic(&self, buf: &[u8], table: &AccessTable) -> Result<DynamicMessage> {
        if let Some(accessor) = table
            .fields()
            .find(|a| a.slot().member() != a.field().index())
        {
            return Err(Error::shape_mismatch(
                table.descriptor().full_name(),
                format!(
                    "table does not use the descriptor layout (field `{}`)",
                    accessor.field().name()
                ),
            ));
        }
        let mut message = DynamicMessage::new(table.descriptor().clone());
        self.decode_into(buf, table, &mut message)?;
        Ok(message)
    }

    /// Reads fields until the cursor is exhausted or, inside a group, the
    /// matching END_GROUP tag.
    fn merge(
        &self,
        cursor: &mut Cursor<'_>,
        table: &AccessTable,
        holder: &mut dyn Holder,
        depth: u32,
        group: Option<u32>,
    ) -> Result<()> {
        loop {
            if cursor.is_empty() {
                return match group {
                    Some(number) => Err(Error::invalid_wire_format(
                        cursor.position(),
                        format!("missing END_GROUP for field {}", number),
                    )),
                    None => Ok(()),
                };
            }

            let offset = cursor.position();
            let (number, wire_type) = cursor.read_tag()?;
            if wire_type == WireType::EndGroup {
                return match group {
                    Some(open) if open == number => Ok(()),
                    _ => Err(Error::invalid_wire_format(
                        offset,
                        format!("unmatched END_GROUP for field {}", number),
                    )),
                };
            }

            if number == MESSAGE_SET_ITEM
                && wire_type == WireType::StartGroup
                && table.descriptor().is_message_set()
            {
                self.read_message_set_item(cursor, table, holder, depth)?;
                continue;
            }

            if let Some(accessor) = table.accessor_by_number(number) {
                if fits(accessor.field(), wire_type) {
                    trace!("Field {} at offset {}", accessor.field().full_name(), offset);
                    self.read_known(cursor, table, accessor, holder, wire_type, depth)?;
                    continue;
                }
                trace!(
                    "Field {} has wire type {:?}, keeping as unknown",
                    accessor.field().full_name(),
                    wire_type
                );
            } else if let Some(extension) = self
                .registry
                .and_then(|r| r.lookup(table.descriptor().full_name(), number))
            {
                if fits(&extension.field, wire_type) {
                    trace!("Extension {} at offset {}", extension.field.full_name(), offset);
                    self.read_extension(cursor, extension, holder, wire_type, depth)?;
                    continue;
                }
            }

            let value = UnknownFieldSet::read_value(
                cursor,
                number,
                wire_type,
                depth,
                self.options.recursion_limit,
            )?;
            holder.unknown_fields_mut().push(number, value);
        }
    }

    fn read_known(
        &self,
        cursor: &mut Cursor<'_>,
        table: &AccessTable,
        accessor: &FieldAccessor,
        holder: &mut dyn Holder,
        wire_type: WireType,
        depth: u32,
    ) -> Result<()> {
        let field = accessor.field();
        match accessor {
            FieldAccessor::SingularPrimitive(_) | FieldAccessor::SingularEnum(_) => {
                let value = self.read_scalar(cursor, field)?;
                accessor.set(holder, value)
            }
            FieldAccessor::SingularMessage(_) => {
                let child = child_table(table, field)?;
                let message = accessor.message_mut(holder)?;
                self.read_message(cursor, field, &child, message, depth)
            }
            FieldAccessor::RepeatedPrimitive(_) | FieldAccessor::RepeatedEnum(_) => {
                if is_packed_occurrence(field, wire_type) {
                    let mut packed = cursor.split_length_delimited()?;
                    while !packed.is_empty() {
                        let value = self.read_scalar(&mut packed, field)?;
                        accessor.push(holder, value)?;
                    }
                    Ok(())
                } else {
                    let value = self.read_scalar(cursor, field)?;
                    accessor.push(holder, value)
                }
            }
            FieldAccessor::RepeatedMessage(_) => {
                let child = child_table(table, field)?;
                let mut message = accessor.new_message(holder)?;
                self.read_message(cursor, field, &child, message.as_mut(), depth)?;
                accessor.push(holder, Value::Message(message))
            }
            FieldAccessor::Map { key, value, .. } => {
                let mut entry = cursor.split_length_delimited()?;
                let (key, value) =
                    self.read_map_entry(&mut entry, table, accessor, key, value, holder, depth)?;
                accessor.map_insert(holder, key, value)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read_map_entry(
        &self,
        entry: &mut Cursor<'_>,
        table: &AccessTable,
        accessor: &FieldAccessor,
        key_field: &FieldDescriptor,
        value_field: &FieldDescriptor,
        holder: &dyn Holder,
        depth: u32,
    ) -> Result<(MapKey, Value)> {
        let mut key = None;
        let mut value = None;

        while !entry.is_empty() {
            let offset = entry.position();
            let (number, wire_type) = entry.read_tag()?;
            match number {
                1 if wire_type == key_field.wire_type() => {
                    key = Some(self.read_scalar(entry, key_field)?);
                }
                2 if wire_type == value_field.wire_type() => {
                    if value_field.mapped_type() == MappedType::Message {
                        let child = child_table(table, accessor.field())?;
                        let mut message = match value.take() {
                            Some(Value::Message(message)) => message,
                            _ => accessor.new_message(holder)?,
                        };
                        self.read_message(entry, value_field, &child, message.as_mut(), depth)?;
                        value = Some(Value::Message(message));
                    } else {
                        value = Some(self.read_scalar(entry, value_field)?);
                    }
                }
                _ if wire_type == WireType::EndGroup => {
                    return Err(Error::invalid_wire_format(
                        offset,
                        format!("unmatched END_GROUP for field {}", number),
                    ));
                }
                _ => {
                    UnknownFieldSet::read_value(
                        entry,
                        number,
                        wire_type,
                        depth,
                        self.options.recursion_limit,
                    )?;
                }
            }
        }

        let key = match key {
            Some(key) => MapKey::try_from(key).map_err(|v| {
                Error::internal(format!("{} is not a valid map key", v.kind_name()))
            })?,
            None => MapKey::zero(key_field.mapped_type()).ok_or_else(|| {
                Error::internal(format!("{} has no zero key", key_field.full_name()))
            })?,
        };
        let value = match value {
            Some(value) => value,
            None if value_field.mapped_type() == MappedType::Message => {
                Value::Message(accessor.new_message(holder)?)
            }
            None => value_field.default_value().ok_or_else(|| {
                Error::internal(format!("{} has no default", value_field.full_name()))
            })?,
        };
        Ok((key, value))
    }

    fn read_extension(
        &self,
        cursor: &mut Cursor<'_>,
        extension: &RegisteredExtension,
        holder: &mut dyn Holder,
        wire_type: WireType,
        depth: u32,
    ) -> Result<()> {
        let field = &extension.field;
        let extensions = holder.extensions_mut();
        let is_message = field.mapped_type() == MappedType::Message;

        if field.is_repeated() {
            let Value::List(items) =
                extensions.get_or_insert_with(field, || Value::List(Vec::new()))
            else {
                return Err(Error::internal(format!(
                    "extension {} does not hold a list",
                    field.full_name()
                )));
            };
            if is_message {
                let (table, mut message) = extension_message(extension)?;
                self.read_message(cursor, field, table, &mut message, depth)?;
                items.push(Value::Message(Box::new(message)));
            } else if is_packed_occurrence(field, wire_type) {
                let mut packed = cursor.split_length_delimited()?;
                while !packed.is_empty() {
                    items.push(self.read_scalar(&mut packed, field)?);
                }
            } else {
                items.push(self.read_scalar(cursor, field)?);
            }
            return Ok(());
        }

        if is_message {
            let (table, fresh) = extension_message(extension)?;
            let Value::Message(message) =
                extensions.get_or_insert_with(field, || Value::Message(Box::new(fresh)))
            else {
                return Err(Error::internal(format!(
                    "extension {} does not hold a message",
                    field.full_name()
                )));
            };
            return self.read_message(cursor, field, table, message.as_mut(), depth);
        }

        let value = self.read_scalar(cursor, field)?;
        extensions.set(field, value)
    }

    /// Reads one MessageSet `Item` group whose start tag has been consumed.
    ///
    /// The message may precede the type id; the first of each wins. A
    /// registered extension gets the message merged in, anything else is
    /// kept as an unknown length-delimited field numbered by the type id.
    fn read_message_set_item(
        &self,
        cursor: &mut Cursor<'_>,
        table: &AccessTable,
        holder: &mut dyn Holder,
        depth: u32,
    ) -> Result<()> {
        if depth == 0 {
            return Err(Error::RecursionLimitExceeded {
                limit: self.options.recursion_limit,
            });
        }

        let mut type_id = None;
        let mut payload = None;
        loop {
            if cursor.is_empty() {
                return Err(Error::invalid_wire_format(
                    cursor.position(),
                    format!("missing END_GROUP for field {}", MESSAGE_SET_ITEM),
                ));
            }
            let offset = cursor.position();
            let (number, wire_type) = cursor.read_tag()?;
            match (number, wire_type) {
                (MESSAGE_SET_ITEM, WireType::EndGroup) => break,
                (_, WireType::EndGroup) => {
                    return Err(Error::invalid_wire_format(
                        offset,
                        format!("unmatched END_GROUP for field {}", number),
                    ));
                }
                (MESSAGE_SET_TYPE_ID, WireType::Varint) => {
                    let id = cursor.read_varint32()?;
                    if id == 0 {
                        return Err(Error::invalid_wire_format(
                            offset,
                            "MessageSet item has type id 0",
                        ));
                    }
                    if type_id.is_none() {
                        type_id = Some(id);
                    }
                }
                (MESSAGE_SET_MESSAGE, WireType::Len) => {
                    let message = cursor.split_length_delimited()?;
                    if payload.is_none() {
                        payload = Some(message);
                    }
                }
                _ => {
                    UnknownFieldSet::read_value(
                        cursor,
                        number,
                        wire_type,
                        depth - 1,
                        self.options.recursion_limit,
                    )?;
                }
            }
        }

        let (Some(type_id), Some(mut payload)) = (type_id, payload) else {
            trace!("Dropping incomplete MessageSet item");
            return Ok(());
        };

        let extension = self
            .registry
            .and_then(|r| r.lookup(table.descriptor().full_name(), type_id))
            .filter(|e| {
                e.field.mapped_type() == MappedType::Message && !e.field.is_repeated()
            });
        let Some(extension) = extension else {
            let bytes = payload.read_bytes(payload.remaining())?;
            holder.unknown_fields_mut().push(
                type_id,
                UnknownValue::LengthDelimited(Bytes::copy_from_slice(bytes)),
            );
            return Ok(());
        };

        trace!("MessageSet item {}", extension.field.full_name());
        let (child, fresh) = extension_message(extension)?;
        let Value::Message(message) = holder
            .extensions_mut()
            .get_or_insert_with(&extension.field, || Value::Message(Box::new(fresh)))
        else {
            return Err(Error::internal(format!(
                "extension {} does not hold a message",
                extension.field.full_name()
            )));
        };
        self.merge(&mut payload, child, message.as_mut(), depth - 1, None)
    }

    /// Reads a nested message or group body into `holder`.
    fn read_message(
        &self,
        cursor: &mut Cursor<'_>,
        field: &FieldDescriptor,
        table: &AccessTable,
        holder: &mut dyn Holder,
        depth: u32,
    ) -> Result<()> {
        if depth == 0 {
            return Err(Error::RecursionLimitExceeded {
                limit: self.options.recursion_limit,
            });
        }
        if field.is_group() {
            self.merge(cursor, table, holder, depth - 1, Some(field.number()))
        } else {
            let mut payload = cursor.split_length_delimited()?;
            self.merge(&mut payload, table, holder, depth - 1, None)
        }
    }

    fn read_scalar(&self, cursor: &mut Cursor<'_>, field: &FieldDescriptor) -> Result<Value> {
        Ok(match field.kind() {
            Kind::Int32 => Value::I32(cursor.read_varint()? as i32),
            Kind::Int64 => Value::I64(cursor.read_varint()? as i64),
            Kind::Uint32 => Value::U32(cursor.read_varint32()?),
            Kind::Uint64 => Value::U64(cursor.read_varint()?),
            Kind::Sint32 => Value::I32(zigzag_decode32(cursor.read_varint32()?)),
            Kind::Sint64 => Value::I64(zigzag_decode64(cursor.read_varint()?)),
            Kind::Bool => Value::Bool(cursor.read_varint()? != 0),
            Kind::Enum => Value::EnumNumber(cursor.read_varint()? as i32),
            Kind::Fixed32 => Value::U32(cursor.read_fixed32()?),
            Kind::Sfixed32 => Value::I32(cursor.read_fixed32()? as i32),
            Kind::Float => Value::F32(f32::from_bits(cursor.read_fixed32()?)),
            Kind::Fixed64 => Value::U64(cursor.read_fixed64()?),
            Kind::Sfixed64 => Value::I64(cursor.read_fixed64()? as i64),
            Kind::Double => Value::F64(f64::from_bits(cursor.read_fixed64()?)),
            Kind::String => {
                let bytes = cursor.read_length_delimited()?;
                let offset = cursor.position() - bytes.len();
                Value::String(self.decode_utf8(field, bytes, offset)?)
            }
            Kind::Bytes => Value::Bytes(Bytes::copy_from_slice(cursor.read_length_delimited()?)),
            Kind::Message | Kind::Group => {
                return Err(Error::internal(format!(
                    "{} is not a scalar field",
                    field.full_name()
                )))
            }
        })
    }

    fn decode_utf8(&self, field: &FieldDescriptor, bytes: &[u8], offset: usize) -> Result<String> {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return Ok(s.to_owned());
        }

        let repair = match self.options.utf8_policy {
            Utf8Policy::Reject => false,
            Utf8Policy::Lossy => true,
            Utf8Policy::PerDialect => field.parent_file().syntax() == Syntax::Proto2,
        };
        if !repair {
            return Err(Error::InvalidUtf8 {
                field: field.full_name().to_string(),
                offset,
            });
        }

        warn!(
            "Replacing invalid UTF-8 in {} at offset {}",
            field.full_name(),
            offset
        );
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Returns true if an occurrence with `wire_type` can be read as `field`.
fn fits(field: &FieldDescriptor, wire_type: WireType) -> bool {
    wire_type == field.wire_type() || (field.is_packable() && wire_type == WireType::Len)
}

fn is_packed_occurrence(field: &FieldDescriptor, wire_type: WireType) -> bool {
    wire_type == WireType::Len && field.wire_type() != WireType::Len
}

fn child_table(table: &AccessTable, field: &FieldDescriptor) -> Result<AccessTable> {
    table
        .child(field.index())
        .ok_or_else(|| Error::internal(format!("no nested table for {}", field.full_name())))
}

fn extension_message(
    extension: &RegisteredExtension,
) -> Result<(&AccessTable, DynamicMessage)> {
    let table = extension.table.as_ref().ok_or_else(|| {
        Error::internal(format!(
            "no table for message extension {}",
            extension.field.full_name()
        ))
    })?;
    Ok((table, DynamicMessage::new(table.descriptor().clone())))
}
