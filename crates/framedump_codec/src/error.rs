//! Error types for codec operations.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input ended before a complete value could be read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// A length prefix exceeds the remaining input.
    ///
    /// Raised instead of allocating unbounded memory from a corrupt prefix.
    #[error("invalid length prefix {len} with only {remaining} bytes remaining")]
    InvalidLength {
        /// The declared length.
        len: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// An unknown wire-type code was encountered.
    #[error("unknown wire code 0x{code:02x} at byte {offset}")]
    UnknownWireCode {
        /// The offending code byte.
        code: u8,
        /// Offset of the code within the input.
        offset: usize,
    },

    /// Nesting exceeded the maximum supported depth.
    ///
    /// Cyclic record graphs are a documented hard limitation; the codec
    /// fails fast rather than exhausting the call stack.
    #[error("nesting depth exceeded maximum of {max}")]
    DepthExceeded {
        /// The configured maximum depth.
        max: usize,
    },

    /// A string field contained invalid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A char field contained an invalid Unicode scalar value.
    #[error("invalid char scalar value 0x{0:08x}")]
    InvalidChar(u32),

    /// A required field was absent from the decoded record.
    #[error("missing field tag {tag}")]
    MissingField {
        /// Tag of the absent field.
        tag: u16,
    },

    /// A field held a value of an unexpected kind.
    #[error("field tag {tag} holds a {actual} value, expected {expected}")]
    UnexpectedKind {
        /// Tag of the field.
        tag: u16,
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind actually present.
        actual: &'static str,
    },

    /// A schema declared duplicate or out-of-order field tags.
    #[error("invalid schema `{schema}`: {message}")]
    InvalidSchema {
        /// Name of the offending schema.
        schema: &'static str,
        /// Description of the violation.
        message: String,
    },
}
