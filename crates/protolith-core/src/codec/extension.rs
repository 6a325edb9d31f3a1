//! Extension values and the registry the decoder resolves them through.

use crate::access::{AccessTable, FieldAccessor};
use crate::descriptor::{DescriptorPool, FieldDescriptor, FileDescriptor, MappedType};
use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Extension values of one message, ordered by field number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionSet {
    values: BTreeMap<u32, (FieldDescriptor, Value)>,
}

impl ExtensionSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of an extension, if set
    pub fn get(&self, extension: &FieldDescriptor) -> Option<&Value> {
        self.values
            .get(&extension.number())
            .filter(|(field, _)| field == extension)
            .map(|(_, value)| value)
    }

    /// Returns true if the extension is set
    pub fn has(&self, extension: &FieldDescriptor) -> bool {
        self.get(extension).is_some()
    }

    /// Stores an extension value after checking its type.
    ///
    /// Repeated extensions take a whole [`Value::List`].
    pub fn set(&mut self, extension: &FieldDescriptor, value: Value) -> Result<()> {
        if !extension.is_extension() {
            return Err(Error::invalid_operation(
                extension.full_name(),
                "not an extension",
            ));
        }
        FieldAccessor::for_field(extension)?.check_value(&value)?;
        self.values
            .insert(extension.number(), (extension.clone(), value));
        Ok(())
    }

    /// Removes an extension value
    pub fn clear(&mut self, extension: &FieldDescriptor) -> Option<Value> {
        if !self.has(extension) {
            return None;
        }
        self.values.remove(&extension.number()).map(|(_, v)| v)
    }

    /// Set extensions in ascending field-number order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&FieldDescriptor, &Value)> + '_ {
        self.values.values().map(|(field, value)| (field, value))
    }

    /// Number of set extensions
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no extension is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stored value of `extension`, inserting `init()` first if unset.
    pub(crate) fn get_or_insert_with(
        &mut self,
        extension: &FieldDescriptor,
        init: impl FnOnce() -> Value,
    ) -> &mut Value {
        let entry = self
            .values
            .entry(extension.number())
            .or_insert_with(|| (extension.clone(), init()));
        &mut entry.1
    }
}

/// An extension known to a registry, with the access table for its
/// message values.
#[derive(Debug, Clone)]
pub(crate) struct RegisteredExtension {
    pub(crate) field: FieldDescriptor,
    pub(crate) table: Option<AccessTable>,
}

/// Extensions the decoder may recognize, keyed by extended type and number.
///
/// Registries are caller-owned and explicit; nothing is registered
/// globally. Message-valued extensions are decoded into
/// [`DynamicMessage`](crate::DynamicMessage)s.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<(String, u32), RegisteredExtension>,
}

impl ExtensionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every extension declared in a pool
    pub fn from_pool(pool: &DescriptorPool) -> Result<Self> {
        let mut registry = Self::new();
        for file in pool.files() {
            registry.add_file(&file)?;
        }
        Ok(registry)
    }

    /// Registers every extension declared in a file, nested ones included.
    pub fn add_file(&mut self, file: &FileDescriptor) -> Result<()> {
        for extension in file.all_extensions() {
            self.add(extension)?;
        }
        Ok(())
    }

    /// Registers one extension.
    ///
    /// Registering the same extension again is a no-op; registering a
    /// different extension for an extended type and number that is already
    /// taken fails.
    pub fn add(&mut self, extension: FieldDescriptor) -> Result<()> {
        if !extension.is_extension() {
            return Err(Error::invalid_operation(
                extension.full_name(),
                "not an extension",
            ));
        }

        let key = (
            extension.containing_type().full_name().to_string(),
            extension.number(),
        );
        if let Some(existing) = self.extensions.get(&key) {
            if existing.field == extension {
                return Ok(());
            }
            return Err(Error::validation(
                extension.full_name(),
                format!(
                    "Extension number {} on \"{}\" is already registered by \"{}\".",
                    key.1,
                    key.0,
                    existing.field.full_name()
                ),
            ));
        }

        let table = match extension.message_type() {
            Some(message_type) if extension.mapped_type() == MappedType::Message => {
                Some(AccessTable::build(&message_type, &message_type)?)
            }
            _ => None,
        };

        debug!("Registered extension {} for {}", extension.full_name(), key.0);
        self.extensions.insert(
            key,
            RegisteredExtension {
                field: extension,
                table,
            },
        );
        Ok(())
    }

    /// Extension of `extendee` with the given number
    pub fn find(&self, extendee: &str, number: u32) -> Option<&FieldDescriptor> {
        self.lookup(extendee, number).map(|e| &e.field)
    }

    pub(crate) fn lookup(
        &self,
        extendee: &str,
        number: u32,
    ) -> Option<&RegisteredExtension> {
        self.extensions.get(&(extendee.to_string(), number))
    }

    /// Number of registered extensions
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
