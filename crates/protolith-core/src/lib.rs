//! # protolith-core
//!
//! Runtime core for Protocol Buffers: schema graph, reflective field access
//! and the binary wire format.
//!
//! This crate provides:
//! - A descriptor pool that validates and cross-links `FileDescriptorProto`s
//! - A generic field-access layer over arbitrary data holders
//! - A wire-format codec preserving unknown fields and resolving extensions
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`descriptor`]: Descriptor pool, cross-linking and descriptor handles
//! - [`access`]: Holder contract, access tables and [`DynamicMessage`]
//! - [`codec`]: Encoder, decoder, unknown fields and extensions
//! - [`wire`]: Varints, tags and the bounds-checked cursor
//! - [`value`]: Dynamically typed field values
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protolith_core::{AccessTable, DescriptorPool, DynamicMessage};
//! use protolith_core::codec::{Decoder, ExtensionRegistry};
//! use std::fs;
//!
//! // A FileDescriptorSet as produced by `protoc --include_imports -o`
//! let pool = DescriptorPool::decode(&fs::read("schema.binpb")?)?;
//! let descriptor = pool.get_message_by_name("example.Order").unwrap();
//!
//! // Build the access table once per type and reuse it
//! let table = AccessTable::build(&descriptor, &descriptor)?;
//! let registry = ExtensionRegistry::from_pool(&pool)?;
//!
//! let message: DynamicMessage = Decoder::new()
//!     .registry(&registry)
//!     .decode_dynamic(&fs::read("order.bin")?, &table)?;
//! println!("{:?}", message.get_field_by_name("id")?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! Generated message types plug in by implementing two traits:
//!
//! - [`Shape`]: Describe the holder's layout (usually a [`StaticShape`])
//! - [`Holder`]: Store and return field values

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod access;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod value;
pub mod wire;

// Re-export primary types for convenience
pub use access::{
    AccessCache, AccessTable, DynamicMessage, FieldAccessor, Holder, Member, MemberKind,
    OneofAccessor, Presence, Shape, StaticMember, StaticShape,
};
pub use codec::{
    DecodeOptions, Decoder, ExtensionRegistry, ExtensionSet, UnknownFieldSet, Utf8Policy,
};
pub use descriptor::{
    DescriptorPool, EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FileDescriptor, Kind,
    Label, LazyFileDescriptor, MappedType, MessageDescriptor, MethodDescriptor, OneofDescriptor,
    ServiceDescriptor, Syntax,
};
pub use error::{Error, Result};
pub use value::{EnumValue, MapKey, Value};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
