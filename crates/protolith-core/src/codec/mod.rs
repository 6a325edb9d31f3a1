//! Binary wire-format codec.
//!
//! Encoding walks a holder through its [`AccessTable`] and writes known
//! fields and set extensions in ascending field-number order, followed by
//! unknown fields in the order they arrived. Map entries are written sorted
//! by key, so the output for a given message is deterministic.
//!
//! Decoding dispatches on field number. A field whose wire type does not
//! fit its declaration is kept as an unknown field, as is any number that
//! is neither declared nor found in the [`ExtensionRegistry`].
//!
//! Messages declared with `message_set_wire_format` use the MessageSet
//! framing for their extensions. Items whose extension is not registered
//! are kept as unknown length-delimited fields numbered by their type id,
//! and are framed as items again on encode.
//!
//! ```
//! use protolith_core::codec::{DecodeOptions, Decoder, Utf8Policy};
//!
//! let decoder = Decoder::with_options(
//!     DecodeOptions::new()
//!         .recursion_limit(32)
//!         .utf8_policy(Utf8Policy::Reject),
//! );
//! assert_eq!(decoder.options().recursion_limit, 32);
//! ```

mod decode;
mod encode;
mod extension;
mod unknown;

use crate::access::{AccessTable, DynamicMessage, Holder};
use crate::descriptor::MessageDescriptor;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes};

pub use decode::Decoder;
pub use extension::{ExtensionRegistry, ExtensionSet};
pub use unknown::{UnknownField, UnknownFieldSet, UnknownValue};

/// Default bound on message and group nesting while decoding
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

// MessageSet framing: every extension is an `Item` group (field 1) holding
// the extension number (field 2) and the encoded message (field 3).
const MESSAGE_SET_ITEM: u32 = 1;
const MESSAGE_SET_TYPE_ID: u32 = 2;
const MESSAGE_SET_MESSAGE: u32 = 3;

/// What the decoder does with string fields that are not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Utf8Policy {
    /// Fail the decode
    Reject,
    /// Replace invalid sequences with U+FFFD and log a warning
    Lossy,
    /// Reject in proto3 files, repair in proto2 files
    #[default]
    PerDialect,
}

/// Configuration for the decoder
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum nesting of messages and groups
    pub recursion_limit: u32,
    /// Handling of invalid UTF-8 in string fields
    pub utf8_policy: Utf8Policy,
    /// Fail when a decoded message lacks required fields
    pub check_required: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            utf8_policy: Utf8Policy::default(),
            check_required: false,
        }
    }
}

impl DecodeOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum nesting depth
    pub fn recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Set the UTF-8 policy
    pub fn utf8_policy(mut self, policy: Utf8Policy) -> Self {
        self.utf8_policy = policy;
        self
    }

    /// Reject messages whose required fields are not all set once the
    /// whole input has been merged
    pub fn check_required(mut self, check: bool) -> Self {
        self.check_required = check;
        self
    }
}

/// Encodes a holder.
pub fn encode(holder: &dyn Holder, table: &AccessTable) -> Result<Bytes> {
    let mut buf = Vec::new();
    encode::encode_message(holder, table, &mut buf)?;
    Ok(Bytes::from(buf))
}

/// Encodes a holder into a caller-owned buffer.
pub fn encode_to(
    holder: &dyn Holder,
    table: &AccessTable,
    buf: &mut impl BufMut,
) -> Result<()> {
    let mut scratch = Vec::new();
    encode::encode_message(holder, table, &mut scratch)?;
    buf.put_slice(&scratch);
    Ok(())
}

/// Size of the encoding of a holder.
pub fn encoded_len(holder: &dyn Holder, table: &AccessTable) -> Result<usize> {
    let mut buf = Vec::new();
    encode::encode_message(holder, table, &mut buf)?;
    Ok(buf.len())
}

/// Decodes a message of type `descriptor` into a [`DynamicMessage`].
///
/// `table` must have been built for `descriptor` with the descriptor as
/// the holder shape.
pub fn decode(
    buf: &[u8],
    descriptor: &MessageDescriptor,
    table: &AccessTable,
    registry: Option<&ExtensionRegistry>,
) -> Result<DynamicMessage> {
    if table.descriptor() != descriptor {
        return Err(Error::shape_mismatch(
            descriptor.full_name(),
            format!("access table was built for {}", table.descriptor().full_name()),
        ));
    }
    let mut decoder = Decoder::new();
    if let Some(registry) = registry {
        decoder = decoder.registry(registry);
    }
    decoder.decode_dynamic(buf, table)
}
