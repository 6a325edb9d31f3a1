//! Access tables: per-type accessor sets built from a descriptor and a shape.

use super::{member_of, value_message_type, Holder, Member, MemberKind, Presence, Shape};
use crate::descriptor::{FieldDescriptor, MappedType, MessageDescriptor, OneofDescriptor};
use crate::error::{Error, Result};
use crate::value::{MapKey, Value};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Where an accessor finds its field inside a holder.
#[derive(Debug, Clone)]
pub struct Slot {
    field: FieldDescriptor,
    member: usize,
    oneof: Option<usize>,
}

impl Slot {
    /// Field served by this slot
    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    /// Holder member index
    pub fn member(&self) -> usize {
        self.member
    }

    /// Oneof discriminator index, for real oneof members
    pub fn oneof(&self) -> Option<usize> {
        self.oneof
    }
}

/// Accessor for one field, chosen from a closed set of variants by the
/// field's label and mapped type.
#[derive(Debug, Clone)]
pub enum FieldAccessor {
    /// Singular scalar, string or bytes field
    SingularPrimitive(Slot),
    /// Singular enum field, stored as its number
    SingularEnum(Slot),
    /// Singular message or group field
    SingularMessage(Slot),
    /// Repeated scalar, string or bytes field
    RepeatedPrimitive(Slot),
    /// Repeated enum field
    RepeatedEnum(Slot),
    /// Repeated message or group field
    RepeatedMessage(Slot),
    /// Map field over the implicit entry type
    Map {
        /// Storage of the whole map
        slot: Slot,
        /// Entry field 1
        key: FieldDescriptor,
        /// Entry field 2
        value: FieldDescriptor,
    },
}

impl FieldAccessor {
    fn new(field: FieldDescriptor, member: &Member) -> Result<Self> {
        let slot = Slot {
            field: field.clone(),
            member: member.index,
            oneof: member.oneof,
        };

        if field.is_map() {
            let entry = field.message_type();
            let key = entry.as_ref().and_then(|e| e.map_entry_key());
            let value = entry.as_ref().and_then(|e| e.map_entry_value());
            return match (key, value) {
                (Some(key), Some(value)) => Ok(FieldAccessor::Map { slot, key, value }),
                _ => Err(Error::shape_mismatch(
                    field.full_name(),
                    "map entry type must declare key = 1 and value = 2",
                )),
            };
        }

        Ok(match (field.is_repeated(), field.mapped_type()) {
            (false, MappedType::Enum) => FieldAccessor::SingularEnum(slot),
            (false, MappedType::Message) => FieldAccessor::SingularMessage(slot),
            (false, _) => FieldAccessor::SingularPrimitive(slot),
            (true, MappedType::Enum) => FieldAccessor::RepeatedEnum(slot),
            (true, MappedType::Message) => FieldAccessor::RepeatedMessage(slot),
            (true, _) => FieldAccessor::RepeatedPrimitive(slot),
        })
    }

    /// Accessor for a field of a descriptor-driven holder such as
    /// [`DynamicMessage`](super::DynamicMessage).
    pub(crate) fn for_field(field: &FieldDescriptor) -> Result<Self> {
        Self::new(field.clone(), &member_of(field))
    }

    /// Storage location of the field
    pub fn slot(&self) -> &Slot {
        match self {
            FieldAccessor::SingularPrimitive(slot)
            | FieldAccessor::SingularEnum(slot)
            | FieldAccessor::SingularMessage(slot)
            | FieldAccessor::RepeatedPrimitive(slot)
            | FieldAccessor::RepeatedEnum(slot)
            | FieldAccessor::RepeatedMessage(slot)
            | FieldAccessor::Map { slot, .. } => slot,
        }
    }

    /// Field served by this accessor
    pub fn field(&self) -> &FieldDescriptor {
        &self.slot().field
    }

    /// Returns true for repeated and map accessors
    pub fn is_repeated(&self) -> bool {
        matches!(
            self,
            FieldAccessor::RepeatedPrimitive(_)
                | FieldAccessor::RepeatedEnum(_)
                | FieldAccessor::RepeatedMessage(_)
                | FieldAccessor::Map { .. }
        )
    }

    fn stored<'h>(&self, holder: &'h dyn Holder) -> Option<&'h Value> {
        let slot = self.slot();
        if let Some(oneof) = slot.oneof {
            if holder.oneof_case(oneof) != Some(slot.member) {
                return None;
            }
        }
        holder.value(slot.member)
    }

    /// Returns true if the field is set.
    ///
    /// With implicit presence a stored zero value counts as unset. Fails for
    /// repeated fields, which have no presence.
    pub fn has(&self, holder: &dyn Holder) -> Result<bool> {
        if self.is_repeated() {
            return Err(Error::invalid_operation(
                self.field().full_name(),
                "has() is not defined for repeated fields",
            ));
        }
        Ok(match self.stored(holder) {
            Some(value) => self.field().has_presence() || !value.is_zero(),
            None => false,
        })
    }

    /// Reads the field, falling back to its default when unset.
    ///
    /// Unset message fields read as a fresh empty message.
    pub fn get(&self, holder: &dyn Holder) -> Result<Value> {
        if let Some(value) = self.stored(holder) {
            return Ok(value.clone());
        }
        match self {
            FieldAccessor::SingularMessage(_) => Ok(Value::Message(self.new_message(holder)?)),
            _ => self.field().default_value().ok_or_else(|| {
                Error::internal(format!("no default value for {}", self.field().full_name()))
            }),
        }
    }

    /// Replaces the field's value after checking its type.
    ///
    /// Repeated fields take a whole [`Value::List`], maps a whole
    /// [`Value::Map`]. Storing a zero value in an implicit-presence field
    /// clears it.
    pub fn set(&self, holder: &mut dyn Holder, value: Value) -> Result<()> {
        self.check_value(&value)?;
        let slot = self.slot();
        match self {
            FieldAccessor::SingularPrimitive(_) | FieldAccessor::SingularEnum(_)
                if !slot.field.has_presence() && value.is_zero() =>
            {
                holder.clear_value(slot.member);
            }
            _ => holder.set_value(slot.member, value),
        }
        Ok(())
    }

    /// Clears the field.
    pub fn clear(&self, holder: &mut dyn Holder) {
        if self.stored(holder).is_some() {
            holder.clear_value(self.slot().member);
        }
    }

    /// Creates an empty message of the type stored by this field.
    pub fn new_message(&self, holder: &dyn Holder) -> Result<Box<dyn Holder>> {
        holder.new_message(self.slot().member).ok_or_else(|| {
            Error::invalid_operation(
                self.field().full_name(),
                "holder cannot create a message for this field",
            )
        })
    }

    /// Mutable access to a singular message field, creating it if unset.
    pub fn message_mut<'h>(
        &self,
        holder: &'h mut dyn Holder,
    ) -> Result<&'h mut (dyn Holder + 'static)> {
        if !matches!(self, FieldAccessor::SingularMessage(_)) {
            return Err(Error::invalid_operation(
                self.field().full_name(),
                "not a singular message field",
            ));
        }
        let member = self.slot().member;
        if self.stored(holder).is_none() {
            let fresh = self.new_message(holder)?;
            holder.set_value(member, Value::Message(fresh));
        }
        match holder.value_mut(member) {
            Some(Value::Message(message)) => Ok(message.as_mut()),
            _ => Err(self.storage_error()),
        }
    }

    /// Number of elements of a repeated or map field
    pub fn len(&self, holder: &dyn Holder) -> Result<usize> {
        self.require_repeated()?;
        match holder.value(self.slot().member) {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len()),
            Some(Value::Map(entries)) => Ok(entries.len()),
            Some(_) => Err(self.storage_error()),
        }
    }

    /// Element `index` of a repeated field
    pub fn get_index(&self, holder: &dyn Holder, index: usize) -> Result<Value> {
        self.require_list()?;
        let items = match holder.value(self.slot().member) {
            None => &[][..],
            Some(Value::List(items)) => items.as_slice(),
            Some(_) => return Err(self.storage_error()),
        };
        items.get(index).cloned().ok_or_else(|| self.out_of_bounds(index, items.len()))
    }

    /// Replaces element `index` of a repeated field.
    pub fn set_index(&self, holder: &mut dyn Holder, index: usize, value: Value) -> Result<()> {
        self.check_element(&value)?;
        let items = self.list_mut(holder)?;
        let len = items.len();
        match items.get_mut(index) {
            Some(item) => {
                *item = value;
                Ok(())
            }
            None => Err(self.out_of_bounds(index, len)),
        }
    }

    /// Appends to a repeated field.
    pub fn push(&self, holder: &mut dyn Holder, value: Value) -> Result<()> {
        self.check_element(&value)?;
        self.list_mut(holder)?.push(value);
        Ok(())
    }

    /// Value stored under `key` in a map field
    pub fn map_get(&self, holder: &dyn Holder, key: &MapKey) -> Result<Option<Value>> {
        self.require_map()?;
        match holder.value(self.slot().member) {
            None => Ok(None),
            Some(Value::Map(entries)) => Ok(entries.get(key).cloned()),
            Some(_) => Err(self.storage_error()),
        }
    }

    /// Inserts or replaces a map entry.
    pub fn map_insert(&self, holder: &mut dyn Holder, key: MapKey, value: Value) -> Result<()> {
        let FieldAccessor::Map { key: key_field, value: value_field, .. } = self else {
            return Err(self.not_a_map());
        };
        if !key.is_valid_for(key_field.mapped_type()) {
            return Err(Error::invalid_value(
                self.field().full_name(),
                format!("map key {:?} is not a {}", key, key_field.kind().as_str()),
            ));
        }
        check_single(value_field, &value)?;
        self.map_mut(holder)?.insert(key, value);
        Ok(())
    }

    /// Removes a map entry, returning its value.
    pub fn map_remove(&self, holder: &mut dyn Holder, key: &MapKey) -> Result<Option<Value>> {
        self.require_map()?;
        if holder.value(self.slot().member).is_none() {
            return Ok(None);
        }
        Ok(self.map_mut(holder)?.remove(key))
    }

    /// Checks that `value` can be stored in this field as a whole.
    pub(crate) fn check_value(&self, value: &Value) -> Result<()> {
        match self {
            FieldAccessor::SingularPrimitive(slot)
            | FieldAccessor::SingularEnum(slot)
            | FieldAccessor::SingularMessage(slot) => check_single(&slot.field, value),
            FieldAccessor::RepeatedPrimitive(slot)
            | FieldAccessor::RepeatedEnum(slot)
            | FieldAccessor::RepeatedMessage(slot) => match value {
                Value::List(items) => items.iter().try_for_each(|v| check_single(&slot.field, v)),
                other => Err(mismatch(&slot.field, "list", other)),
            },
            FieldAccessor::Map { slot, key, value: value_field } => match value {
                Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
                    if !k.is_valid_for(key.mapped_type()) {
                        return Err(Error::invalid_value(
                            slot.field.full_name(),
                            format!("map key {:?} is not a {}", k, key.kind().as_str()),
                        ));
                    }
                    check_single(value_field, v)
                }),
                other => Err(mismatch(&slot.field, "map", other)),
            },
        }
    }

    fn check_element(&self, value: &Value) -> Result<()> {
        self.require_list()?;
        check_single(self.field(), value)
    }

    fn list_mut<'h>(&self, holder: &'h mut dyn Holder) -> Result<&'h mut Vec<Value>> {
        self.require_list()?;
        let member = self.slot().member;
        if holder.value(member).is_none() {
            holder.set_value(member, Value::List(Vec::new()));
        }
        match holder.value_mut(member) {
            Some(Value::List(items)) => Ok(items),
            _ => Err(self.storage_error()),
        }
    }

    fn map_mut<'h>(&self, holder: &'h mut dyn Holder) -> Result<&'h mut HashMap<MapKey, Value>> {
        self.require_map()?;
        let member = self.slot().member;
        if holder.value(member).is_none() {
            holder.set_value(member, Value::Map(HashMap::new()));
        }
        match holder.value_mut(member) {
            Some(Value::Map(entries)) => Ok(entries),
            _ => Err(self.storage_error()),
        }
    }

    fn require_repeated(&self) -> Result<()> {
        if self.is_repeated() {
            Ok(())
        } else {
            Err(Error::invalid_operation(
                self.field().full_name(),
                "not a repeated field",
            ))
        }
    }

    fn require_list(&self) -> Result<()> {
        match self {
            FieldAccessor::RepeatedPrimitive(_)
            | FieldAccessor::RepeatedEnum(_)
            | FieldAccessor::RepeatedMessage(_) => Ok(()),
            _ => Err(Error::invalid_operation(
                self.field().full_name(),
                "not a repeated non-map field",
            )),
        }
    }

    fn require_map(&self) -> Result<()> {
        match self {
            FieldAccessor::Map { .. } => Ok(()),
            _ => Err(self.not_a_map()),
        }
    }

    fn not_a_map(&self) -> Error {
        Error::invalid_operation(self.field().full_name(), "not a map field")
    }

    fn out_of_bounds(&self, index: usize, len: usize) -> Error {
        Error::invalid_operation(
            self.field().full_name(),
            format!("index {} out of bounds for length {}", index, len),
        )
    }

    fn storage_error(&self) -> Error {
        Error::internal(format!(
            "holder stores an unexpected value for {}",
            self.field().full_name()
        ))
    }
}

/// Checks a single value (not a list or map) against a field's type.
fn check_single(field: &FieldDescriptor, value: &Value) -> Result<()> {
    match field.mapped_type() {
        MappedType::Message => {
            let expected = field.message_type();
            let expected = expected.as_ref().map(|m| m.full_name()).unwrap_or_default();
            match value {
                Value::Message(message) if message.shape().type_name() == expected => Ok(()),
                Value::Message(message) => Err(Error::invalid_value(
                    field.full_name(),
                    format!(
                        "expected message {}, found {}",
                        expected,
                        message.shape().type_name()
                    ),
                )),
                other => Err(mismatch(field, "message", other)),
            }
        }
        mapped if value.is_valid_for(mapped) => Ok(()),
        _ => Err(mismatch(field, field.kind().as_str(), value)),
    }
}

fn mismatch(field: &FieldDescriptor, expected: &str, found: &Value) -> Error {
    Error::invalid_value(
        field.full_name(),
        format!("expected {}, found {}", expected, found.kind_name()),
    )
}

/// Accessor for a real (non-synthetic) oneof.
#[derive(Debug, Clone)]
pub struct OneofAccessor {
    oneof: OneofDescriptor,
    discriminator: usize,
    members: Vec<(usize, FieldDescriptor)>,
}

impl OneofAccessor {
    /// Oneof served by this accessor
    pub fn descriptor(&self) -> &OneofDescriptor {
        &self.oneof
    }

    /// Member currently set, if any
    pub fn case(&self, holder: &dyn Holder) -> Option<FieldDescriptor> {
        let member = holder.oneof_case(self.discriminator)?;
        self.members
            .iter()
            .find(|(index, _)| *index == member)
            .map(|(_, field)| field.clone())
    }

    /// Clears whichever member is set.
    pub fn clear(&self, holder: &mut dyn Holder) {
        if let Some(member) = holder.oneof_case(self.discriminator) {
            holder.clear_value(member);
        }
    }
}

struct TypeTable {
    descriptor: MessageDescriptor,
    /// Declaration order
    fields: Vec<FieldAccessor>,
    /// Table of the stored messages, per field
    children: Vec<Option<usize>>,
    /// Positions in `fields`, ascending by field number
    by_number: Vec<usize>,
    oneofs: Vec<OneofAccessor>,
}

/// Immutable accessor set for one holder type and, transitively, every
/// message type reachable from it.
///
/// Cloning is cheap; the tables live in one shared arena. Nested tables
/// returned by [`AccessTable::nested`] point into the same arena.
#[derive(Clone)]
pub struct AccessTable {
    arena: Arc<[TypeTable]>,
    root: usize,
}

impl AccessTable {
    /// Builds the table for `descriptor` as stored by holders of `shape`.
    ///
    /// Every field must have a member of matching kind, and every oneof a
    /// discriminator. Message types reachable from the root are checked in
    /// the same pass; recursive types are built once.
    pub fn build(descriptor: &MessageDescriptor, shape: &dyn Shape) -> Result<Self> {
        let mut builder = Builder::default();
        let root = builder.build(descriptor, shape)?;
        let arena = builder
            .tables
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::internal("access table left unfinished"))?;

        debug!(
            "Built access table for {} ({} types)",
            descriptor.full_name(),
            arena.len()
        );
        Ok(Self {
            arena: arena.into(),
            root,
        })
    }

    fn table(&self) -> &TypeTable {
        &self.arena[self.root]
    }

    /// Message type served by this table
    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.table().descriptor
    }

    /// Number of message types covered by the shared arena
    pub fn type_count(&self) -> usize {
        self.arena.len()
    }

    /// Accessors in field declaration order
    pub fn fields(&self) -> impl ExactSizeIterator<Item = &FieldAccessor> + '_ {
        self.table().fields.iter()
    }

    /// Accessors in ascending field-number order
    pub fn fields_by_number(&self) -> impl ExactSizeIterator<Item = &FieldAccessor> + '_ {
        let table = self.table();
        table.by_number.iter().map(move |&i| &table.fields[i])
    }

    /// Accessor for `field`, which must be a regular field of this type.
    pub fn accessor(&self, field: &FieldDescriptor) -> Result<&FieldAccessor> {
        if field.is_extension() {
            return Err(Error::invalid_operation(
                field.full_name(),
                "extensions are accessed through the holder's extension set",
            ));
        }
        self.table()
            .fields
            .get(field.index())
            .filter(|a| a.field() == field)
            .ok_or_else(|| {
                Error::invalid_operation(
                    field.full_name(),
                    format!("not a field of {}", self.descriptor().full_name()),
                )
            })
    }

    /// Accessor for the field with the given name
    pub fn accessor_by_name(&self, name: &str) -> Option<&FieldAccessor> {
        let field = self.descriptor().get_field_by_name(name)?;
        self.table().fields.get(field.index())
    }

    /// Accessor for the field with the given number
    pub fn accessor_by_number(&self, number: u32) -> Option<&FieldAccessor> {
        let field = self.descriptor().get_field(number)?;
        self.table().fields.get(field.index())
    }

    /// Table for the messages stored in `field`
    pub fn nested(&self, field: &FieldDescriptor) -> Option<AccessTable> {
        self.accessor(field).ok()?;
        self.child(field.index())
    }

    pub(crate) fn child(&self, position: usize) -> Option<AccessTable> {
        let root = (*self.table().children.get(position)?)?;
        Some(Self {
            arena: Arc::clone(&self.arena),
            root,
        })
    }

    /// Accessor for a real oneof of this type
    pub fn oneof(&self, oneof: &OneofDescriptor) -> Result<&OneofAccessor> {
        self.table()
            .oneofs
            .get(oneof.index())
            .filter(|a| a.descriptor() == oneof)
            .ok_or_else(|| {
                Error::invalid_operation(
                    oneof.full_name(),
                    format!("not a real oneof of {}", self.descriptor().full_name()),
                )
            })
    }

    /// Real oneofs of this type
    pub fn oneofs(&self) -> impl ExactSizeIterator<Item = &OneofAccessor> + '_ {
        self.table().oneofs.iter()
    }

    /// See [`FieldAccessor::has`]
    pub fn has(&self, holder: &dyn Holder, field: &FieldDescriptor) -> Result<bool> {
        self.accessor(field)?.has(holder)
    }

    /// See [`FieldAccessor::get`]
    pub fn get(&self, holder: &dyn Holder, field: &FieldDescriptor) -> Result<Value> {
        self.accessor(field)?.get(holder)
    }

    /// See [`FieldAccessor::set`]
    pub fn set(
        &self,
        holder: &mut dyn Holder,
        field: &FieldDescriptor,
        value: Value,
    ) -> Result<()> {
        self.accessor(field)?.set(holder, value)
    }

    /// See [`FieldAccessor::clear`]
    pub fn clear(&self, holder: &mut dyn Holder, field: &FieldDescriptor) -> Result<()> {
        self.accessor(field)?.clear(holder);
        Ok(())
    }

    /// Member of `oneof` currently set in `holder`
    pub fn which_oneof(
        &self,
        holder: &dyn Holder,
        oneof: &OneofDescriptor,
    ) -> Result<Option<FieldDescriptor>> {
        Ok(self.oneof(oneof)?.case(holder))
    }

    /// Returns true if every required field is set, in this message and in
    /// every message stored below it.
    pub fn is_initialized(&self, holder: &dyn Holder) -> Result<bool> {
        Ok(self.missing_required(holder)?.is_empty())
    }

    /// Paths of unset required fields, such as `id`, `items[2].sku`,
    /// `labels["a"].text` or `(ext.note).text`.
    ///
    /// Walks set message fields, repeated and map message values, and
    /// message-valued extensions.
    pub fn missing_required(&self, holder: &dyn Holder) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        self.collect_missing(holder, "", &mut missing)?;
        Ok(missing)
    }

    fn collect_missing(
        &self,
        holder: &dyn Holder,
        prefix: &str,
        missing: &mut Vec<String>,
    ) -> Result<()> {
        for accessor in self.fields() {
            let field = accessor.field();
            let path = format!("{}{}", prefix, field.name());
            if field.is_required() && !accessor.has(holder)? {
                missing.push(path);
                continue;
            }

            let Some(child) = self.child(field.index()) else {
                continue;
            };
            match holder.value(accessor.slot().member()) {
                Some(Value::Message(message)) => {
                    child.collect_missing(message.as_ref(), &format!("{}.", path), missing)?;
                }
                Some(Value::List(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::Message(message) = item {
                            let prefix = format!("{}[{}].", path, i);
                            child.collect_missing(message.as_ref(), &prefix, missing)?;
                        }
                    }
                }
                Some(Value::Map(entries)) => {
                    let mut sorted: Vec<_> = entries.iter().collect();
                    sorted.sort_by(|a, b| a.0.cmp(b.0));
                    for (key, value) in sorted {
                        if let Value::Message(message) = value {
                            let prefix = format!("{}[{}].", path, key_label(key));
                            child.collect_missing(message.as_ref(), &prefix, missing)?;
                        }
                    }
                }
                _ => {}
            }
        }

        for (extension, value) in holder.extensions().iter() {
            let Some(message_type) = extension.message_type() else {
                continue;
            };
            let path = format!("{}({})", prefix, extension.full_name());
            let messages: Vec<(String, &dyn Holder)> = match value {
                Value::Message(message) => vec![(format!("{}.", path), message.as_ref())],
                Value::List(items) => items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        let message = item.as_message()?;
                        Some((format!("{}[{}].", path, i), message))
                    })
                    .collect(),
                _ => continue,
            };
            for (prefix, message) in messages {
                let table = AccessTable::build(&message_type, message.shape())?;
                table.collect_missing(message, &prefix, missing)?;
            }
        }
        Ok(())
    }
}

fn key_label(key: &MapKey) -> String {
    match key {
        MapKey::Bool(v) => v.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(v) => format!("{:?}", v),
    }
}

impl fmt::Debug for AccessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTable")
            .field("type", &self.descriptor().full_name())
            .field("fields", &self.table().fields.len())
            .field("types", &self.arena.len())
            .finish()
    }
}

#[derive(Default)]
struct Builder {
    tables: Vec<Option<TypeTable>>,
    memo: HashMap<String, usize>,
}

impl Builder {
    fn build(&mut self, descriptor: &MessageDescriptor, shape: &dyn Shape) -> Result<usize> {
        if let Some(&index) = self.memo.get(descriptor.full_name()) {
            return Ok(index);
        }
        let type_name = descriptor.full_name();
        if shape.type_name() != type_name {
            return Err(Error::shape_mismatch(
                type_name,
                format!("holder shape describes {}", shape.type_name()),
            ));
        }

        // Reserve the slot first so recursive references resolve to it.
        let index = self.tables.len();
        self.tables.push(None);
        self.memo.insert(type_name.to_string(), index);

        let mut fields = Vec::with_capacity(descriptor.field_count());
        let mut children = Vec::with_capacity(descriptor.field_count());
        for field in descriptor.fields() {
            let member = shape.member(field.name()).ok_or_else(|| {
                Error::shape_mismatch(type_name, format!("no member for field `{}`", field.name()))
            })?;
            check_member(&field, &member, shape, type_name)?;

            let child = match value_message_type(&field) {
                Some(message_type) => {
                    let nested = shape.nested(member.index).ok_or_else(|| {
                        Error::shape_mismatch(
                            type_name,
                            format!("no nested shape for field `{}`", field.name()),
                        )
                    })?;
                    Some(self.build(&message_type, nested.as_ref())?)
                }
                None => None,
            };

            trace!("Accessor for {} at member {}", field.full_name(), member.index);
            fields.push(FieldAccessor::new(field, &member)?);
            children.push(child);
        }

        let mut by_number: Vec<usize> = (0..fields.len()).collect();
        by_number.sort_by_key(|&i| fields[i].field().number());

        let mut oneofs = Vec::new();
        for oneof in descriptor.oneofs().filter(|o| !o.is_synthetic()) {
            let discriminator = shape.oneof(oneof.name()).ok_or_else(|| {
                Error::shape_mismatch(
                    type_name,
                    format!("no discriminator for oneof `{}`", oneof.name()),
                )
            })?;
            let members = oneof
                .fields()
                .map(|f| (fields[f.index()].slot().member, f))
                .collect();
            oneofs.push(OneofAccessor {
                oneof,
                discriminator,
                members,
            });
        }

        self.tables[index] = Some(TypeTable {
            descriptor: descriptor.clone(),
            fields,
            children,
            by_number,
            oneofs,
        });
        Ok(index)
    }
}

/// Checks that a shape member can store `field`.
fn check_member(
    field: &FieldDescriptor,
    member: &Member,
    shape: &dyn Shape,
    type_name: &str,
) -> Result<()> {
    let expected = member_of(field);
    if member.kind != expected.kind {
        return Err(Error::shape_mismatch(
            type_name,
            format!(
                "member `{}` is {:?}, field needs {:?}",
                field.name(),
                member.kind,
                expected.kind
            ),
        ));
    }

    if matches!(member.kind, MemberKind::Singular(_))
        && field.has_presence()
        && member.presence == Presence::Implicit
    {
        return Err(Error::shape_mismatch(
            type_name,
            format!("member `{}` cannot track presence", field.name()),
        ));
    }

    let expected_oneof = match field.real_containing_oneof() {
        Some(oneof) => Some(shape.oneof(oneof.name()).ok_or_else(|| {
            Error::shape_mismatch(
                type_name,
                format!("no discriminator for oneof `{}`", oneof.name()),
            )
        })?),
        None => None,
    };
    if member.oneof != expected_oneof {
        return Err(Error::shape_mismatch(
            type_name,
            format!("member `{}` has the wrong oneof discriminator", field.name()),
        ));
    }
    Ok(())
}

/// Caller-owned cache of access tables, one build per message type and
/// holder type.
///
/// The lock is held for the duration of a build, so concurrent first
/// requests for a type wait for one build instead of racing.
#[derive(Default)]
pub struct AccessCache {
    tables: Mutex<HashMap<(TypeId, String), AccessTable>>,
}

impl AccessCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached table for `descriptor` stored in holders of type
    /// `H`, building it with `shape` on first use.
    ///
    /// A cached table built from another pool's descriptor of the same name
    /// is replaced.
    pub fn get_or_build<H: Holder + 'static>(
        &self,
        descriptor: &MessageDescriptor,
        shape: &dyn Shape,
    ) -> Result<AccessTable> {
        let key = (TypeId::of::<H>(), descriptor.full_name().to_string());
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(&key) {
            if table.descriptor() == descriptor {
                return Ok(table.clone());
            }
            debug!("Rebuilding access table for {}", descriptor.full_name());
        }
        let table = AccessTable::build(descriptor, shape)?;
        tables.insert(key, table.clone());
        Ok(table)
    }

    /// Cached table for a message type stored in holders of type `H`
    pub fn get<H: Holder + 'static>(&self, type_name: &str) -> Option<AccessTable> {
        self.tables
            .lock()
            .get(&(TypeId::of::<H>(), type_name.to_string()))
            .cloned()
    }

    /// Number of cached root tables
    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    /// Returns true if nothing has been built yet
    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }
}

impl fmt::Debug for AccessCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCache")
            .field("tables", &self.len())
            .finish()
    }
}
