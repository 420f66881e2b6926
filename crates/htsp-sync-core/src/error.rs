//! Error types for the HTSP core.

use thiserror::Error;

/// Errors raised while encoding or decoding HTSMSG bodies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated field header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("field at offset {offset} declares {declared} bytes, only {available} remain")]
    TruncatedField {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("fields nested deeper than the limit at offset {offset}")]
    TooDeep { offset: usize },

    #[error("unknown field type {field_type} at offset {offset}")]
    UnknownFieldType { field_type: u8, offset: usize },

    #[error("integer field `{0}` is wider than 8 bytes")]
    IntegerTooWide(String),

    #[error("field name is not valid UTF-8 at offset {0}")]
    InvalidName(usize),

    #[error("string field `{0}` is not valid UTF-8")]
    InvalidString(String),

    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("field name `{0}` longer than 255 bytes")]
    NameTooLong(String),

    #[error("field `{0}` data longer than u32::MAX bytes")]
    DataTooLong(String),
}

/// Errors raised when projecting a message onto a typed model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` has type {actual}, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field `{field}` value {value} out of range")]
    OutOfRange { field: &'static str, value: i64 },
}
