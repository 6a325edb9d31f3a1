//! Descriptor-driven holder.

use super::table::FieldAccessor;
use super::{value_message_type, AccessTable, Holder, Shape};
use crate::codec::{self, Decoder, ExtensionSet, UnknownFieldSet};
use crate::descriptor::{FieldDescriptor, MessageDescriptor};
use crate::error::{Error, Result};
use crate::value::Value;
use bytes::Bytes;
use std::any::Any;

/// A message whose layout is its descriptor.
///
/// Member `i` is the field at declaration index `i`; discriminator `j` is
/// the oneof at index `j`.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: MessageDescriptor,
    values: Vec<Option<Value>>,
    cases: Vec<Option<usize>>,
    unknown: UnknownFieldSet,
    extensions: ExtensionSet,
}

impl DynamicMessage {
    /// Creates an empty message of the given type
    pub fn new(descriptor: MessageDescriptor) -> Self {
        let fields = descriptor.field_count();
        let oneofs = descriptor.oneofs().len();
        Self {
            descriptor,
            values: vec![None; fields],
            cases: vec![None; oneofs],
            unknown: UnknownFieldSet::new(),
            extensions: ExtensionSet::new(),
        }
    }

    /// Decodes a message of the given type.
    ///
    /// Builds a fresh access table for the call; use a [`Decoder`] with a
    /// cached table when decoding many messages.
    pub fn decode(descriptor: MessageDescriptor, buf: &[u8]) -> Result<Self> {
        let table = AccessTable::build(&descriptor, &descriptor)?;
        let mut message = Self::new(descriptor);
        Decoder::new().decode_into(buf, &table, &mut message)?;
        Ok(message)
    }

    /// Merges encoded fields into this message.
    pub fn merge(&mut self, buf: &[u8]) -> Result<()> {
        let table = AccessTable::build(&self.descriptor, &self.descriptor)?;
        Decoder::new().decode_into(buf, &table, self)
    }

    /// Encodes the message.
    pub fn encode(&self) -> Result<Bytes> {
        let table = AccessTable::build(&self.descriptor, &self.descriptor)?;
        codec::encode(self, &table)
    }

    /// Encodes the message into a vector.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        self.encode().map(|b| b.to_vec())
    }

    /// Message type
    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Returns true if every required field is set, here and in nested
    /// messages.
    pub fn is_initialized(&self) -> Result<bool> {
        let table = AccessTable::build(&self.descriptor, &self.descriptor)?;
        table.is_initialized(self)
    }

    fn accessor(&self, field: &FieldDescriptor) -> Result<FieldAccessor> {
        if field.is_extension() || field.containing_type() != self.descriptor {
            return Err(Error::invalid_operation(
                field.full_name(),
                format!("not a field of {}", self.descriptor.full_name()),
            ));
        }
        FieldAccessor::for_field(field)
    }

    fn field_by_name(&self, name: &str) -> Result<FieldDescriptor> {
        self.descriptor.get_field_by_name(name).ok_or_else(|| {
            Error::invalid_operation(
                name,
                format!("{} has no field with this name", self.descriptor.full_name()),
            )
        })
    }

    /// Returns true if a singular field is set
    pub fn has_field(&self, field: &FieldDescriptor) -> Result<bool> {
        self.accessor(field)?.has(self)
    }

    /// Reads a field, or its default when unset
    pub fn get_field(&self, field: &FieldDescriptor) -> Result<Value> {
        self.accessor(field)?.get(self)
    }

    /// Replaces a field's value
    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<()> {
        self.accessor(field)?.set(self, value)
    }

    /// Clears a field
    pub fn clear_field(&mut self, field: &FieldDescriptor) -> Result<()> {
        self.accessor(field)?.clear(self);
        Ok(())
    }

    /// Returns true if the named singular field is set
    pub fn has_field_by_name(&self, name: &str) -> Result<bool> {
        let field = self.field_by_name(name)?;
        self.has_field(&field)
    }

    /// Reads the named field
    pub fn get_field_by_name(&self, name: &str) -> Result<Value> {
        let field = self.field_by_name(name)?;
        self.get_field(&field)
    }

    /// Replaces the named field's value
    pub fn set_field_by_name(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.field_by_name(name)?;
        self.set_field(&field, value.into())
    }

    /// Clears the named field
    pub fn clear_field_by_name(&mut self, name: &str) -> Result<()> {
        let field = self.field_by_name(name)?;
        self.clear_field(&field)
    }

    /// Value of an extension, if set
    pub fn get_extension(&self, extension: &FieldDescriptor) -> Option<&Value> {
        self.extensions.get(extension)
    }

    /// Sets an extension of this message type
    pub fn set_extension(&mut self, extension: &FieldDescriptor, value: Value) -> Result<()> {
        if extension.is_extension() && extension.containing_type() != self.descriptor {
            return Err(Error::invalid_operation(
                extension.full_name(),
                format!("does not extend {}", self.descriptor.full_name()),
            ));
        }
        self.extensions.set(extension, value)
    }

    fn real_oneof(&self, member: usize) -> Option<usize> {
        self.descriptor
            .field(member)?
            .real_containing_oneof()
            .map(|o| o.index())
    }
}

impl Holder for DynamicMessage {
    fn shape(&self) -> &dyn Shape {
        &self.descriptor
    }

    fn value(&self, member: usize) -> Option<&Value> {
        self.values.get(member)?.as_ref()
    }

    fn value_mut(&mut self, member: usize) -> Option<&mut Value> {
        self.values.get_mut(member)?.as_mut()
    }

    fn set_value(&mut self, member: usize, value: Value) {
        if member >= self.values.len() {
            return;
        }
        if let Some(oneof) = self.real_oneof(member) {
            if let Some(previous) = self.cases[oneof].replace(member) {
                if previous != member {
                    self.values[previous] = None;
                }
            }
        }
        self.values[member] = Some(value);
    }

    fn clear_value(&mut self, member: usize) {
        if member >= self.values.len() {
            return;
        }
        if let Some(oneof) = self.real_oneof(member) {
            if self.cases[oneof] == Some(member) {
                self.cases[oneof] = None;
            }
        }
        self.values[member] = None;
    }

    fn oneof_case(&self, oneof: usize) -> Option<usize> {
        self.cases.get(oneof).copied().flatten()
    }

    fn new_message(&self, member: usize) -> Option<Box<dyn Holder>> {
        let field = self.descriptor.field(member)?;
        let message_type = value_message_type(&field)?;
        Some(Box::new(DynamicMessage::new(message_type)))
    }

    fn unknown_fields(&self) -> &UnknownFieldSet {
        &self.unknown
    }

    fn unknown_fields_mut(&mut self) -> &mut UnknownFieldSet {
        &mut self.unknown
    }

    fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut ExtensionSet {
        &mut self.extensions
    }

    fn clone_holder(&self) -> Box<dyn Holder> {
        Box::new(self.clone())
    }

    fn eq_holder(&self, other: &dyn Holder) -> bool {
        other
            .as_any()
            .downcast_ref::<DynamicMessage>()
            .map_or(false, |other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
