//! Error types for the protolith-core library.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants fall
//! into four families, which can be queried with the `is_*` helpers:
//!
//! - schema validation (pool construction and cross-linking),
//! - access-table construction (holder shape does not match the schema),
//! - value type errors raised by the access layer at the call site,
//! - wire parse errors raised by the decoder.

use thiserror::Error;

/// Result type alias for protolith operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all protolith operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A schema entity failed validation while building a file
    #[error("invalid descriptor '{name}': {reason}")]
    Validation {
        /// Fully-qualified name of the offending descriptor
        name: String,
        /// Human-readable description of the violation
        reason: String,
    },

    /// Unsupported proto syntax version
    #[error("unsupported proto syntax: '{syntax}'")]
    UnsupportedSyntax {
        /// The unsupported syntax string
        syntax: String,
    },

    /// Failed to parse a serialized descriptor message
    #[error("failed to parse descriptor: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// A holder shape does not provide what the schema requires
    #[error("holder '{type_name}' does not match its descriptor: {details}")]
    ShapeMismatch {
        /// Type name reported by the holder shape
        type_name: String,
        /// What was missing or incompatible
        details: String,
    },

    /// A value of the wrong kind was handed to an accessor
    #[error("invalid value for field '{field}': {details}")]
    InvalidValue {
        /// Fully-qualified name of the field
        field: String,
        /// Description of the mismatch
        details: String,
    },

    /// An accessor operation that does not apply to the field's shape
    #[error("unsupported operation on field '{field}': {details}")]
    InvalidOperation {
        /// Fully-qualified name of the field
        field: String,
        /// Description of the operation
        details: String,
    },

    /// A length or fixed-width payload runs past the end of the input
    #[error("truncated input at offset {offset}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Byte offset where the read started
        offset: usize,
        /// Bytes required by the payload
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Failed to decode varint
    #[error("failed to decode varint at offset {offset}: buffer too small or invalid encoding")]
    VarintDecode {
        /// Byte offset where the error occurred
        offset: usize,
    },

    /// Invalid protobuf wire format
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Invalid field number in a tag or descriptor
    #[error("invalid field number {number}: must be between 1 and {max}")]
    InvalidFieldNumber {
        /// The invalid field number
        number: u64,
        /// Maximum valid field number
        max: u32,
    },

    /// Nested messages or groups exceeded the configured depth
    #[error("recursion limit of {limit} exceeded")]
    RecursionLimitExceeded {
        /// The configured limit
        limit: u32,
    },

    /// A string field carried bytes that are not valid UTF-8
    #[error("invalid UTF-8 in string field '{field}' at offset {offset}")]
    InvalidUtf8 {
        /// Fully-qualified name of the field
        field: String,
        /// Byte offset of the payload
        offset: usize,
    },

    /// A decoded message lacks required fields
    #[error("message '{type_name}' is missing required fields: {}", .fields.join(", "))]
    MissingRequired {
        /// Fully-qualified name of the decoded message type
        type_name: String,
        /// Paths of the unset fields, e.g. `items[0].name`
        fields: Vec<String>,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new descriptor validation error
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new shape mismatch error
    pub fn shape_mismatch(type_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            type_name: type_name.into(),
            details: details.into(),
        }
    }

    /// Creates a new invalid value error
    pub fn invalid_value(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Creates a new invalid operation error
    pub fn invalid_operation(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidOperation {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Creates a new truncation error
    pub fn truncated(offset: usize, needed: usize, remaining: usize) -> Self {
        Self::Truncated {
            offset,
            needed,
            remaining,
        }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new varint decode error
    pub fn varint_decode(offset: usize) -> Self {
        Self::VarintDecode { offset }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the error was raised while building descriptors
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::UnsupportedSyntax { .. } | Self::DescriptorParse(_)
        )
    }

    /// Returns true if the error was raised by the access layer
    pub fn is_access(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. } | Self::InvalidValue { .. } | Self::InvalidOperation { .. }
        )
    }

    /// Returns true if the error was raised while parsing wire data
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::VarintDecode { .. }
                | Self::InvalidWireFormat { .. }
                | Self::InvalidFieldNumber { .. }
                | Self::RecursionLimitExceeded { .. }
                | Self::InvalidUtf8 { .. }
                | Self::MissingRequired { .. }
        )
    }
}
