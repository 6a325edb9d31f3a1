//! Descriptor pool and cross-linked schema graph.
//!
//! A [`DescriptorPool`] owns an arena of descriptor records. Public
//! descriptor types ([`MessageDescriptor`], [`FieldDescriptor`], ...) are
//! cheap handles: a reference-counted pointer to the pool snapshot plus an
//! index into one of its arenas. Type references between descriptors are
//! indices too, which is what allows forward and mutually recursive
//! references without reference cycles.
//!
//! ## Building
//!
//! Files are added with [`DescriptorPool::add_file_descriptor_proto`] or
//! [`FileDescriptor::build`]. Construction runs in two phases:
//!
//! 1. *translate*: every declared entity gets a record and a fully-qualified
//!    symbol; duplicate symbols and field numbers are rejected immediately;
//! 2. *cross-link*: type names are resolved through the symbol table and
//!    the remaining structural rules are checked.
//!
//! A failure in either phase rejects the whole file and leaves the pool as it
//! was.

mod build;
mod lazy;
mod pool;

use crate::error::{Error, Result};
use crate::value::Value;
use crate::wire::WireType;
use arc_swap::ArcSwap;
use prost_types::field_descriptor_proto::Type;
use prost_types::FileDescriptorProto;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

pub use lazy::LazyFileDescriptor;
pub use pool::DescriptorPool;

pub(crate) use pool::{
    EnumData, EnumValueData, FieldData, FileData, MessageData, MethodData, OneofData, ServiceData,
};

/// Proto syntax version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    /// Proto2 syntax: explicit presence, required fields, closed defaults
    Proto2,
    /// Proto3 syntax: implicit presence unless declared `optional`
    Proto3,
}

impl Syntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

impl TryFrom<&str> for Syntax {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "" | "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            _ => Err(Error::UnsupportedSyntax {
                syntax: value.to_string(),
            }),
        }
    }
}

/// Field label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Singular field
    Optional,
    /// Singular field that must be present (proto2 only)
    Required,
    /// Repeated field
    Repeated,
}

/// Declared field type, as written in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    Uint64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// Legacy group
    Group,
    /// Embedded message
    Message,
    /// `bytes`
    Bytes,
    /// `uint32`
    Uint32,
    /// Enum
    Enum,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
}

impl Kind {
    /// The value category used for defaults and accessor dispatch.
    pub fn mapped_type(self) -> MappedType {
        match self {
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MappedType::Int32,
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MappedType::Int64,
            Kind::Uint32 | Kind::Fixed32 => MappedType::UInt32,
            Kind::Uint64 | Kind::Fixed64 => MappedType::UInt64,
            Kind::Float => MappedType::Float,
            Kind::Double => MappedType::Double,
            Kind::Bool => MappedType::Bool,
            Kind::String => MappedType::String,
            Kind::Bytes => MappedType::Bytes,
            Kind::Enum => MappedType::Enum,
            Kind::Message | Kind::Group => MappedType::Message,
        }
    }

    /// Wire type of a single, unpacked value of this kind.
    pub fn wire_type(self) -> WireType {
        match self {
            Kind::Int32
            | Kind::Int64
            | Kind::Uint32
            | Kind::Uint64
            | Kind::Sint32
            | Kind::Sint64
            | Kind::Bool
            | Kind::Enum => WireType::Varint,
            Kind::Fixed64 | Kind::Sfixed64 | Kind::Double => WireType::I64,
            Kind::Fixed32 | Kind::Sfixed32 | Kind::Float => WireType::I32,
            Kind::String | Kind::Bytes | Kind::Message => WireType::Len,
            Kind::Group => WireType::StartGroup,
        }
    }

    /// Returns true if repeated fields of this kind may use packed encoding.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            Kind::String | Kind::Bytes | Kind::Message | Kind::Group
        )
    }

    /// Returns the schema keyword for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Double => "double",
            Kind::Float => "float",
            Kind::Int64 => "int64",
            Kind::Uint64 => "uint64",
            Kind::Int32 => "int32",
            Kind::Fixed64 => "fixed64",
            Kind::Fixed32 => "fixed32",
            Kind::Bool => "bool",
            Kind::String => "string",
            Kind::Group => "group",
            Kind::Message => "message",
            Kind::Bytes => "bytes",
            Kind::Uint32 => "uint32",
            Kind::Enum => "enum",
            Kind::Sfixed32 => "sfixed32",
            Kind::Sfixed64 => "sfixed64",
            Kind::Sint32 => "sint32",
            Kind::Sint64 => "sint64",
        }
    }
}

impl From<Type> for Kind {
    fn from(ty: Type) -> Self {
        match ty {
            Type::Double => Kind::Double,
            Type::Float => Kind::Float,
            Type::Int64 => Kind::Int64,
            Type::Uint64 => Kind::Uint64,
            Type::Int32 => Kind::Int32,
            Type::Fixed64 => Kind::Fixed64,
            Type::Fixed32 => Kind::Fixed32,
            Type::Bool => Kind::Bool,
            Type::String => Kind::String,
            Type::Group => Kind::Group,
            Type::Message => Kind::Message,
            Type::Bytes => Kind::Bytes,
            Type::Uint32 => Kind::Uint32,
            Type::Enum => Kind::Enum,
            Type::Sfixed32 => Kind::Sfixed32,
            Type::Sfixed64 => Kind::Sfixed64,
            Type::Sint32 => Kind::Sint32,
            Type::Sint64 => Kind::Sint64,
        }
    }
}

/// Category of a field's values, independent of the exact numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappedType {
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Byte string
    Bytes,
    /// Enum number
    Enum,
    /// Message or group
    Message,
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $arena:ident, $data:ty) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            pool: DescriptorPool,
            index: usize,
        }

        impl $name {
            pub(crate) fn new(pool: DescriptorPool, index: usize) -> Self {
                Self { pool, index }
            }

            #[inline]
            fn data(&self) -> &$data {
                &self.pool.inner().$arena[self.index]
            }

            /// The pool this descriptor belongs to
            pub fn parent_pool(&self) -> &DescriptorPool {
                &self.pool
            }

            /// Position of this record in the pool's arena
            pub fn pool_index(&self) -> usize {
                self.index
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.index == other.index
                    && self.pool.same_entity(&other.pool, self.index, |w| w.$arena)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.index.hash(state);
                self.full_name().hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.full_name()).finish()
            }
        }
    };
}

handle!(
    /// A `.proto` file and everything declared in it
    FileDescriptor,
    files,
    FileData
);
handle!(
    /// A message type
    MessageDescriptor,
    messages,
    MessageData
);
handle!(
    /// A field or extension
    FieldDescriptor,
    fields,
    FieldData
);
handle!(
    /// A oneof declared in a message
    OneofDescriptor,
    oneofs,
    OneofData
);
handle!(
    /// An enum type
    EnumDescriptor,
    enums,
    EnumData
);
handle!(
    /// A single value of an enum type
    EnumValueDescriptor,
    enum_values,
    EnumValueData
);
handle!(
    /// A service
    ServiceDescriptor,
    services,
    ServiceData
);
handle!(
    /// A method of a service
    MethodDescriptor,
    methods,
    MethodData
);

impl FileDescriptor {
    /// Builds a file on top of already-built dependencies.
    ///
    /// All dependencies are merged into a single pool closure first; the new
    /// file is then translated and cross-linked against it. With
    /// `allow_unknown_dependencies`, imports that cannot be found are dropped
    /// instead of failing the build.
    pub fn build(
        proto: FileDescriptorProto,
        dependencies: &[FileDescriptor],
        allow_unknown_dependencies: bool,
    ) -> Result<FileDescriptor> {
        let mut pool = dependencies
            .iter()
            .max_by_key(|dep| dep.pool.file_count())
            .map(|dep| dep.pool.clone())
            .unwrap_or_default();

        for dependency in dependencies {
            pool.import_file(dependency)?;
        }

        pool.add_file_descriptor_proto_with(proto, allow_unknown_dependencies)
    }

    /// File name, e.g. `foo/bar.proto`
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// For API symmetry with the other handles, the file name.
    pub fn full_name(&self) -> &str {
        &self.data().name
    }

    /// Package name, possibly empty
    pub fn package(&self) -> &str {
        &self.data().package
    }

    /// Syntax dialect of the file
    pub fn syntax(&self) -> Syntax {
        self.data().syntax
    }

    /// Top-level messages in declaration order
    pub fn messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        self.data()
            .messages
            .iter()
            .map(|&i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Top-level enums in declaration order
    pub fn enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        self.data()
            .enums
            .iter()
            .map(|&i| EnumDescriptor::new(self.pool.clone(), i))
    }

    /// Services in declaration order
    pub fn services(&self) -> impl ExactSizeIterator<Item = ServiceDescriptor> + '_ {
        self.data()
            .services
            .iter()
            .map(|&i| ServiceDescriptor::new(self.pool.clone(), i))
    }

    /// Top-level extensions in declaration order
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.data()
            .extensions
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Every extension declared in this file, top-level and nested
    pub fn all_extensions(&self) -> impl Iterator<Item = FieldDescriptor> + '_ {
        let file = self.index;
        self.pool
            .inner()
            .fields
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.file == file && f.is_extension)
            .map(|(i, _)| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Direct dependencies that were resolved
    pub fn dependencies(&self) -> impl ExactSizeIterator<Item = FileDescriptor> + '_ {
        self.data()
            .dependencies
            .iter()
            .map(|&i| FileDescriptor::new(self.pool.clone(), i))
    }

    /// Dependencies re-exported by this file
    pub fn public_dependencies(&self) -> impl ExactSizeIterator<Item = FileDescriptor> + '_ {
        self.data()
            .public_dependencies
            .iter()
            .map(|&i| FileDescriptor::new(self.pool.clone(), i))
    }

    /// Looks up a top-level or nested message of this file by its name
    /// relative to the package.
    pub fn get_message(&self, name: &str) -> Option<MessageDescriptor> {
        let full_name = qualify(self.package(), name);
        self.pool
            .get_message_by_name(&full_name)
            .filter(|m| m.data().file == self.index)
    }

    /// Looks up an enum of this file by its name relative to the package.
    pub fn get_enum(&self, name: &str) -> Option<EnumDescriptor> {
        let full_name = qualify(self.package(), name);
        self.pool
            .get_enum_by_name(&full_name)
            .filter(|e| e.data().file == self.index)
    }

    /// The raw schema proto this file was built from.
    pub fn proto(&self) -> Arc<FileDescriptorProto> {
        self.data().proto.load_full()
    }

    /// Replaces the raw schema proto with a reparsed equivalent.
    ///
    /// Used when a schema describes itself: once custom options become
    /// resolvable the file proto can be re-decoded and swapped in. The
    /// replacement must declare the same file, package and top-level
    /// entities; descriptor identities are unchanged.
    pub fn refresh_proto(&self, proto: FileDescriptorProto) -> Result<()> {
        let current = self.proto();

        let names = |p: &FileDescriptorProto| {
            (
                p.message_type.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
                p.enum_type.iter().map(|e| e.name().to_string()).collect::<Vec<_>>(),
                p.service.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
                p.extension.iter().map(|f| f.name().to_string()).collect::<Vec<_>>(),
            )
        };

        if proto.name() != current.name()
            || proto.package() != current.package()
            || names(&proto) != names(&current)
        {
            return Err(Error::validation(
                self.name(),
                "replacement proto does not describe the same file",
            ));
        }

        self.data().proto.store(Arc::new(proto));
        Ok(())
    }
}

impl MessageDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// File the message is declared in
    pub fn parent_file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.data().file)
    }

    /// Enclosing message, for nested types
    pub fn parent_message(&self) -> Option<MessageDescriptor> {
        self.data()
            .parent
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Index within the parent's list of messages
    pub fn index(&self) -> usize {
        self.data().index
    }

    /// Syntax dialect of the declaring file
    pub fn syntax(&self) -> Syntax {
        self.pool.inner().files[self.data().file].syntax
    }

    /// Fields in declaration order
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.data()
            .fields
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Number of declared fields
    pub fn field_count(&self) -> usize {
        self.data().fields.len()
    }

    /// Field at `index` in declaration order
    pub fn field(&self, index: usize) -> Option<FieldDescriptor> {
        self.data()
            .fields
            .get(index)
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Oneofs in declaration order, synthetic ones last
    pub fn oneofs(&self) -> impl ExactSizeIterator<Item = OneofDescriptor> + '_ {
        self.data()
            .oneofs
            .iter()
            .map(|&i| OneofDescriptor::new(self.pool.clone(), i))
    }

    /// Nested message types
    pub fn nested_messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        self.data()
            .nested_messages
            .iter()
            .map(|&i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Nested enum types
    pub fn nested_enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        self.data()
            .nested_enums
            .iter()
            .map(|&i| EnumDescriptor::new(self.pool.clone(), i))
    }

    /// Extensions declared inside this message's scope
    pub fn nested_extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.data()
            .extensions
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Every extension in the pool that extends this message
    pub fn extensions(&self) -> impl Iterator<Item = FieldDescriptor> + '_ {
        let index = self.index;
        self.pool
            .inner()
            .fields
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.is_extension && f.containing == Some(index))
            .map(|(i, _)| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Field with the given number
    pub fn get_field(&self, number: u32) -> Option<FieldDescriptor> {
        self.pool
            .inner()
            .fields_by_number
            .get(&(self.index, number))
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Field with the given name
    pub fn get_field_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        self.pool
            .inner()
            .fields_by_name
            .get(&(self.index, name.to_string()))
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Extension of this message with the given number, if any file in the
    /// pool declares one
    pub fn get_extension(&self, number: u32) -> Option<FieldDescriptor> {
        self.pool
            .inner()
            .extensions_by_number
            .get(&(self.index, number))
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Declared extension ranges, end-exclusive
    pub fn extension_ranges(&self) -> impl ExactSizeIterator<Item = Range<u32>> + '_ {
        self.data().extension_ranges.iter().cloned()
    }

    /// Returns true if `number` falls in one of the extension ranges
    pub fn is_extension_number(&self, number: u32) -> bool {
        self.data()
            .extension_ranges
            .iter()
            .any(|r| r.contains(&number))
    }

    /// Returns true for the synthetic entry type backing a map field
    pub fn is_map_entry(&self) -> bool {
        self.data().map_entry
    }

    /// Returns true if the message uses the legacy message-set encoding
    pub fn is_message_set(&self) -> bool {
        self.data().message_set
    }

    /// Key field of a map entry type
    pub fn map_entry_key(&self) -> Option<FieldDescriptor> {
        if self.is_map_entry() {
            self.get_field(1)
        } else {
            None
        }
    }

    /// Value field of a map entry type
    pub fn map_entry_value(&self) -> Option<FieldDescriptor> {
        if self.is_map_entry() {
            self.get_field(2)
        } else {
            None
        }
    }
}

impl FieldDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// JSON name, either declared or derived as lowerCamelCase
    pub fn json_name(&self) -> &str {
        &self.data().json_name
    }

    /// Field number
    pub fn number(&self) -> u32 {
        self.data().number
    }

    /// Index within the containing message's field list (or, for
    /// extensions, within the declaring scope's extension list)
    pub fn index(&self) -> usize {
        self.data().index
    }

    /// Field label
    pub fn label(&self) -> Label {
        self.data().label
    }

    /// Declared type
    pub fn kind(&self) -> Kind {
        self.data().kind
    }

    /// Value category of the field
    pub fn mapped_type(&self) -> MappedType {
        self.data().kind.mapped_type()
    }

    /// File the field is declared in
    pub fn parent_file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.data().file)
    }

    /// Message this field belongs to. For extensions this is the extended
    /// message, not the declaring scope.
    pub fn containing_type(&self) -> MessageDescriptor {
        let index = self
            .data()
            .containing
            .expect("containing type is set once the file is cross-linked");
        MessageDescriptor::new(self.pool.clone(), index)
    }

    /// Message an extension was declared in, if it was declared inside one
    pub fn extension_scope(&self) -> Option<MessageDescriptor> {
        self.data()
            .scope
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Returns true for extension fields
    pub fn is_extension(&self) -> bool {
        self.data().is_extension
    }

    /// Oneof this field belongs to, including synthetic proto3 `optional`
    /// oneofs
    pub fn containing_oneof(&self) -> Option<OneofDescriptor> {
        self.data()
            .oneof
            .map(|i| OneofDescriptor::new(self.pool.clone(), i))
    }

    /// Oneof this field belongs to, ignoring synthetic ones
    pub fn real_containing_oneof(&self) -> Option<OneofDescriptor> {
        self.containing_oneof().filter(|o| !o.is_synthetic())
    }

    /// Resolved message type for message and group fields
    pub fn message_type(&self) -> Option<MessageDescriptor> {
        self.data()
            .message_type
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Resolved enum type for enum fields
    pub fn enum_type(&self) -> Option<EnumDescriptor> {
        self.data()
            .enum_type
            .map(|i| EnumDescriptor::new(self.pool.clone(), i))
    }

    /// Returns true for repeated fields, maps included
    pub fn is_repeated(&self) -> bool {
        self.data().label == Label::Repeated
    }

    /// Returns true for proto2 `required` fields
    pub fn is_required(&self) -> bool {
        self.data().label == Label::Required
    }

    /// Returns true for group fields
    pub fn is_group(&self) -> bool {
        self.data().kind == Kind::Group
    }

    /// Returns true if the field is a map
    pub fn is_map(&self) -> bool {
        self.is_repeated()
            && self
                .message_type()
                .map(|m| m.is_map_entry())
                .unwrap_or(false)
    }

    /// Returns true if repeated values of this field may be packed
    pub fn is_packable(&self) -> bool {
        self.is_repeated() && self.data().kind.is_packable()
    }

    /// Returns true if the encoder packs this field.
    ///
    /// Proto3 packs packable fields unless `[packed = false]`; proto2 packs
    /// only with `[packed = true]`.
    pub fn is_packed(&self) -> bool {
        if !self.is_packable() {
            return false;
        }
        match self.parent_file().syntax() {
            Syntax::Proto2 => self.data().packed == Some(true),
            Syntax::Proto3 => self.data().packed != Some(false),
        }
    }

    /// Returns true if the field tracks presence explicitly.
    ///
    /// Repeated fields never do. Message fields, oneof members, extensions
    /// and every singular proto2 field do; plain proto3 scalars do not.
    pub fn has_presence(&self) -> bool {
        if self.is_repeated() {
            return false;
        }
        self.data().is_extension
            || self.mapped_type() == MappedType::Message
            || self.data().oneof.is_some()
            || self.parent_file().syntax() == Syntax::Proto2
    }

    /// Returns true if the field was declared `optional` in proto3
    pub fn is_proto3_optional(&self) -> bool {
        self.data().proto3_optional
    }

    /// Returns true if the field declared an explicit default
    pub fn has_default_value(&self) -> bool {
        self.data().default.is_some()
    }

    /// Value the field reads as when unset.
    ///
    /// Explicit proto2 defaults win; otherwise the zero value, or the first
    /// declared value for enums. Returns `None` for message fields and
    /// repeated fields yield an empty list.
    pub fn default_value(&self) -> Option<Value> {
        if self.is_repeated() {
            return Some(if self.is_map() {
                Value::Map(Default::default())
            } else {
                Value::List(Vec::new())
            });
        }
        if let Some(default) = &self.data().default {
            return Some(default.clone());
        }
        match self.mapped_type() {
            MappedType::Enum => {
                let first = self
                    .enum_type()
                    .and_then(|e| e.values().next())
                    .map(|v| v.number())
                    .unwrap_or(0);
                Some(Value::EnumNumber(first))
            }
            mapped => Value::zero(mapped),
        }
    }

    /// Wire type of one unpacked value of this field
    pub fn wire_type(&self) -> WireType {
        self.data().kind.wire_type()
    }
}

impl OneofDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Index within the containing message's oneofs
    pub fn index(&self) -> usize {
        self.data().index
    }

    /// Message declaring the oneof
    pub fn containing_type(&self) -> MessageDescriptor {
        MessageDescriptor::new(self.pool.clone(), self.data().message)
    }

    /// Member fields
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        self.data()
            .fields
            .iter()
            .map(|&i| FieldDescriptor::new(self.pool.clone(), i))
    }

    /// Returns true for the single-member oneof generated for a proto3
    /// `optional` field
    pub fn is_synthetic(&self) -> bool {
        self.data().synthetic
    }
}

impl EnumDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// File the enum is declared in
    pub fn parent_file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.data().file)
    }

    /// Enclosing message, for nested enums
    pub fn parent_message(&self) -> Option<MessageDescriptor> {
        self.data()
            .parent
            .map(|i| MessageDescriptor::new(self.pool.clone(), i))
    }

    /// Values in declaration order
    pub fn values(&self) -> impl ExactSizeIterator<Item = EnumValueDescriptor> + '_ {
        self.data()
            .values
            .iter()
            .map(|&i| EnumValueDescriptor::new(self.pool.clone(), i))
    }

    /// First declared value with the given number
    pub fn get_value(&self, number: i32) -> Option<EnumValueDescriptor> {
        self.values().find(|v| v.number() == number)
    }

    /// Value with the given name
    pub fn get_value_by_name(&self, name: &str) -> Option<EnumValueDescriptor> {
        self.values().find(|v| v.name() == name)
    }

    /// Value the enum reads as when unset
    pub fn default_value(&self) -> EnumValueDescriptor {
        self.values()
            .next()
            .expect("enums are validated to declare at least one value")
    }
}

impl EnumValueDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name. Enum values are siblings of their enum type,
    /// so this is the enum's scope plus the value name.
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Numeric value
    pub fn number(&self) -> i32 {
        self.data().number
    }

    /// Index within the enum's values
    pub fn index(&self) -> usize {
        self.data().index
    }

    /// Enum declaring this value
    pub fn parent_enum(&self) -> EnumDescriptor {
        EnumDescriptor::new(self.pool.clone(), self.data().parent)
    }
}

impl ServiceDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// File the service is declared in
    pub fn parent_file(&self) -> FileDescriptor {
        FileDescriptor::new(self.pool.clone(), self.data().file)
    }

    /// Methods in declaration order
    pub fn methods(&self) -> impl ExactSizeIterator<Item = MethodDescriptor> + '_ {
        self.data()
            .methods
            .iter()
            .map(|&i| MethodDescriptor::new(self.pool.clone(), i))
    }

    /// Method with the given name
    pub fn get_method(&self, name: &str) -> Option<MethodDescriptor> {
        self.methods().find(|m| m.name() == name)
    }
}

impl MethodDescriptor {
    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Service declaring the method
    pub fn parent_service(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.pool.clone(), self.data().service)
    }

    /// Request message type
    pub fn input(&self) -> MessageDescriptor {
        let index = self
            .data()
            .input
            .expect("method input is set once the file is cross-linked");
        MessageDescriptor::new(self.pool.clone(), index)
    }

    /// Response message type
    pub fn output(&self) -> MessageDescriptor {
        let index = self
            .data()
            .output
            .expect("method output is set once the file is cross-linked");
        MessageDescriptor::new(self.pool.clone(), index)
    }

    /// Returns true if the client streams requests
    pub fn is_client_streaming(&self) -> bool {
        self.data().client_streaming
    }

    /// Returns true if the server streams responses
    pub fn is_server_streaming(&self) -> bool {
        self.data().server_streaming
    }
}

/// Joins a scope and a name with a dot, skipping empty scopes.
pub(crate) fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Raw proto of a file, swappable without disturbing descriptor identity.
pub(crate) type SharedProto = Arc<ArcSwap<FileDescriptorProto>>;
