//! Generic field access over arbitrary data holders.
//!
//! A data holder is anything that stores the fields of one message type:
//! the stock [`DynamicMessage`], or a type emitted by a code generator. The
//! holder describes its layout through a [`Shape`] and exposes its storage
//! through the value-level [`Holder`] contract. An [`AccessTable`] joins a
//! holder's shape with the message descriptor once, checks that they agree,
//! and from then on provides uniform get/set/has/clear, repeated, map and
//! oneof operations through one [`FieldAccessor`] per field.
//!
//! ## Example
//!
//! ```
//! use protolith_core::{AccessTable, DescriptorPool, DynamicMessage, Value};
//! use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};
//! use prost_types::field_descriptor_proto::{Label, Type};
//!
//! let mut pool = DescriptorPool::new();
//! pool.add_file_descriptor_proto(FileDescriptorProto {
//!     name: Some("point.proto".to_string()),
//!     syntax: Some("proto3".to_string()),
//!     message_type: vec![DescriptorProto {
//!         name: Some("Point".to_string()),
//!         field: vec![FieldDescriptorProto {
//!             name: Some("x".to_string()),
//!             number: Some(1),
//!             label: Some(Label::Optional as i32),
//!             r#type: Some(Type::Int32 as i32),
//!             ..Default::default()
//!         }],
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! })?;
//!
//! let point = pool.get_message_by_name("Point").unwrap();
//! let table = AccessTable::build(&point, &point)?;
//! let x = point.get_field_by_name("x").unwrap();
//!
//! let mut message = DynamicMessage::new(point.clone());
//! table.set(&mut message, &x, Value::I32(3))?;
//! assert!(table.has(&message, &x)?);
//!
//! // Implicit presence: zero reads as unset
//! table.set(&mut message, &x, Value::I32(0))?;
//! assert!(!table.has(&message, &x)?);
//! # Ok::<(), protolith_core::Error>(())
//! ```

mod dynamic;
mod table;

use crate::codec::{ExtensionSet, UnknownFieldSet};
use crate::descriptor::{FieldDescriptor, MappedType, MessageDescriptor};
use crate::value::Value;
use std::any::Any;
use std::fmt;

pub use dynamic::DynamicMessage;
pub use table::{AccessCache, AccessTable, FieldAccessor, OneofAccessor, Slot};

/// How a member stores its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// One value of the mapped type
    Singular(MappedType),
    /// A list of values of the mapped type
    Repeated(MappedType),
    /// Entries keyed by `key`, holding `value`
    Map {
        /// Mapped type of the keys
        key: MappedType,
        /// Mapped type of the values
        value: MappedType,
    },
}

/// Whether a singular member can distinguish "set to zero" from "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// The holder records whether the member is set
    Explicit,
    /// Only non-zero values count as set
    Implicit,
}

/// One storage slot of a holder, as reported by its [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    /// Slot index passed back to the holder's value operations
    pub index: usize,
    /// Storage kind
    pub kind: MemberKind,
    /// Presence discipline of singular members
    pub presence: Presence,
    /// Discriminator index if the member belongs to a oneof
    pub oneof: Option<usize>,
}

/// Static description of a holder's layout.
pub trait Shape: Send + Sync {
    /// Fully-qualified name of the message type the holder stores
    fn type_name(&self) -> &str;

    /// Looks up a member by field name.
    fn member(&self, name: &str) -> Option<Member>;

    /// Looks up a oneof discriminator by oneof name.
    fn oneof(&self, name: &str) -> Option<usize>;

    /// Shape of the messages stored in `member`: the singular value, the
    /// list elements or the map values.
    fn nested(&self, member: usize) -> Option<Box<dyn Shape>>;
}

impl<S: Shape + ?Sized> Shape for &S {
    fn type_name(&self) -> &str {
        (**self).type_name()
    }

    fn member(&self, name: &str) -> Option<Member> {
        (**self).member(name)
    }

    fn oneof(&self, name: &str) -> Option<usize> {
        (**self).oneof(name)
    }

    fn nested(&self, member: usize) -> Option<Box<dyn Shape>> {
        (**self).nested(member)
    }
}

/// Value-level storage contract of a data holder.
///
/// Holders store and return [`Value`]s without interpreting them; type
/// checks, presence rules and defaults live in the [`AccessTable`]. The one
/// rule a holder enforces itself is oneof exclusivity: storing a value in a
/// oneof member must clear the other members of that oneof.
pub trait Holder: Any + Send + Sync + fmt::Debug {
    /// Layout of this holder
    fn shape(&self) -> &dyn Shape;

    /// Stored value of a member, or `None` if unset.
    fn value(&self, member: usize) -> Option<&Value>;

    /// Mutable stored value of a member, or `None` if unset.
    fn value_mut(&mut self, member: usize) -> Option<&mut Value>;

    /// Stores a value, replacing the previous one and clearing any oneof
    /// siblings.
    fn set_value(&mut self, member: usize, value: Value);

    /// Removes a member's value.
    fn clear_value(&mut self, member: usize);

    /// Member currently selected by a oneof discriminator
    fn oneof_case(&self, oneof: usize) -> Option<usize>;

    /// A fresh, empty message suitable for storing in `member`.
    fn new_message(&self, member: usize) -> Option<Box<dyn Holder>>;

    /// Fields read from the wire that the schema does not know
    fn unknown_fields(&self) -> &UnknownFieldSet;

    /// Mutable unknown fields
    fn unknown_fields_mut(&mut self) -> &mut UnknownFieldSet;

    /// Extension values
    fn extensions(&self) -> &ExtensionSet;

    /// Mutable extension values
    fn extensions_mut(&mut self) -> &mut ExtensionSet;

    /// Clones the holder behind a box
    fn clone_holder(&self) -> Box<dyn Holder>;

    /// Compares with another holder of possibly different concrete type
    fn eq_holder(&self, other: &dyn Holder) -> bool;

    /// Upcast for downcasting to the concrete holder type
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Holder> {
    fn clone(&self) -> Self {
        self.clone_holder()
    }
}

impl PartialEq for Box<dyn Holder> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_holder(other.as_ref())
    }
}

impl<'a> dyn Holder + 'a {
    /// Downcasts to a concrete holder type.
    pub fn downcast_ref<T: Holder>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Member layout a descriptor-driven holder uses for `field`.
pub(crate) fn member_of(field: &FieldDescriptor) -> Member {
    let kind = if field.is_map() {
        let entry = field.message_type();
        let mapped = |f: Option<FieldDescriptor>| f.map(|f| f.mapped_type());
        MemberKind::Map {
            key: mapped(entry.as_ref().and_then(|e| e.map_entry_key()))
                .unwrap_or(MappedType::String),
            value: mapped(entry.as_ref().and_then(|e| e.map_entry_value()))
                .unwrap_or(MappedType::String),
        }
    } else if field.is_repeated() {
        MemberKind::Repeated(field.mapped_type())
    } else {
        MemberKind::Singular(field.mapped_type())
    };

    Member {
        index: field.index(),
        kind,
        presence: if field.has_presence() {
            Presence::Explicit
        } else {
            Presence::Implicit
        },
        oneof: field.real_containing_oneof().map(|o| o.index()),
    }
}

/// Message type of the values stored under a message, list or map member.
pub(crate) fn value_message_type(field: &FieldDescriptor) -> Option<MessageDescriptor> {
    if field.is_map() {
        field.message_type()?.map_entry_value()?.message_type()
    } else {
        field.message_type()
    }
}

impl Shape for MessageDescriptor {
    fn type_name(&self) -> &str {
        self.full_name()
    }

    fn member(&self, name: &str) -> Option<Member> {
        self.get_field_by_name(name).map(|f| member_of(&f))
    }

    fn oneof(&self, name: &str) -> Option<usize> {
        self.oneofs()
            .find(|o| o.name() == name && !o.is_synthetic())
            .map(|o| o.index())
    }

    fn nested(&self, member: usize) -> Option<Box<dyn Shape>> {
        let field = self.field(member)?;
        value_message_type(&field).map(|m| Box::new(m) as Box<dyn Shape>)
    }
}

/// One member of a [`StaticShape`].
#[derive(Debug, Clone, Copy)]
pub struct StaticMember {
    /// Field name
    pub name: &'static str,
    /// Storage kind
    pub kind: MemberKind,
    /// Presence discipline
    pub presence: Presence,
    /// Index into [`StaticShape::oneofs`] if the member belongs to a oneof
    pub oneof: Option<usize>,
    /// Shape of the stored messages, for message-valued members
    pub nested: Option<fn() -> &'static StaticShape>,
}

/// Shape declared as static data, the form generated holders use.
///
/// Member indices are positions in `members`; discriminator indices are
/// positions in `oneofs`.
#[derive(Debug, Clone, Copy)]
pub struct StaticShape {
    /// Fully-qualified message name
    pub type_name: &'static str,
    /// Members in slot order
    pub members: &'static [StaticMember],
    /// Oneof names in discriminator order
    pub oneofs: &'static [&'static str],
}

impl Shape for StaticShape {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn member(&self, name: &str) -> Option<Member> {
        self.members
            .iter()
            .position(|m| m.name == name)
            .map(|index| {
                let m = &self.members[index];
                Member {
                    index,
                    kind: m.kind,
                    presence: m.presence,
                    oneof: m.oneof,
                }
            })
    }

    fn oneof(&self, name: &str) -> Option<usize> {
        self.oneofs.iter().position(|o| *o == name)
    }

    fn nested(&self, member: usize) -> Option<Box<dyn Shape>> {
        let nested = self.members.get(member)?.nested?;
        Some(Box::new(nested()))
    }
}
