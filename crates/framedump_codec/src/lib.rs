//! # framedump codec
//!
//! Field-tagged binary encoding/decoding for framedump records.
//!
//! Every field of a record carries a stable small integer tag. Encoders
//! write fields in ascending tag order; decoders skip tags they do not
//! know and default tags they never see, which is the schema-evolution
//! contract: tag stability, not type stability.
//!
//! ## Wire format
//!
//! - Record: `([u16 tag][u8 wire code][body])*` + end sentinel
//! - Integers little-endian fixed width; floats IEEE-754 bit-for-bit;
//!   booleans one byte
//! - Strings: `[u32 len][UTF-8]`; dates: 8-byte epoch millis; UUIDs: 16
//!   raw bytes
//! - Collections: `[u32 count]` followed by self-describing elements;
//!   nested records are length-prefixed so unknown ones can be skipped
//!
//! ## Limitations
//!
//! Self-referential record graphs cannot be represented; nesting beyond
//! [`MAX_DEPTH`] fails fast with [`CodecError::DepthExceeded`] rather than
//! overflowing the stack.
//!
//! ## Usage
//!
//! ```
//! use framedump_codec::{encode_record, decode_record_any, FieldValue, RecordValue};
//!
//! let rec = RecordValue::new()
//!     .with(1, FieldValue::I64(42))
//!     .with(2, FieldValue::Str("alice".into()));
//!
//! let bytes = encode_record(&rec).unwrap();
//! let decoded = decode_record_any(&bytes).unwrap();
//! assert_eq!(decoded, rec);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod schema;
mod value;

pub use decoder::{decode_record, decode_record_any, Decoder};
pub use encoder::{encode_record, encode_value, Encoder, END_TAG, MAX_DEPTH};
pub use error::{CodecError, CodecResult};
pub use schema::{FieldDescriptor, FieldKind, Schema};
pub use value::{FieldValue, RecordValue};

/// A record type with a static field descriptor table.
///
/// Implementations expose their schema and convert to/from the dynamic
/// [`RecordValue`] representation the codec and the dump store operate on.
/// The conversion pair is the "accessor" column of the descriptor table:
/// no reflection, no attribute magic.
///
/// # Example
///
/// ```
/// use framedump_codec::{
///     CodecResult, DumpRecord, FieldDescriptor, FieldKind, FieldValue,
///     RecordValue, Schema,
/// };
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// static USER_SCHEMA: Schema = Schema::new(
///     "User",
///     &[
///         FieldDescriptor::new(1, "id", FieldKind::I64),
///         FieldDescriptor::new(2, "name", FieldKind::Str),
///     ],
/// );
///
/// impl DumpRecord for User {
///     fn schema() -> &'static Schema {
///         &USER_SCHEMA
///     }
///
///     fn to_value(&self) -> RecordValue {
///         RecordValue::new()
///             .with(1, FieldValue::I64(self.id))
///             .with(2, FieldValue::Str(self.name.clone()))
///     }
///
///     fn from_value(value: &RecordValue) -> CodecResult<Self> {
///         Ok(Self {
///             id: value.get_i64(1)?,
///             name: value.get_str(2)?.to_owned(),
///         })
///     }
/// }
/// ```
pub trait DumpRecord: Sized {
    /// The static descriptor table for this record type.
    fn schema() -> &'static Schema;

    /// Converts this record into the dynamic representation.
    fn to_value(&self) -> RecordValue;

    /// Reconstructs a record from the dynamic representation.
    ///
    /// Fields the stream never carried are absent from `value`;
    /// implementations choose the defaults for those.
    ///
    /// # Errors
    ///
    /// Fails when a required field is missing or of the wrong kind.
    fn from_value(value: &RecordValue) -> CodecResult<Self>;
}

/// Encodes a typed record to bytes.
///
/// # Errors
///
/// Propagates [`encode_record`] failures.
pub fn encode<R: DumpRecord>(record: &R) -> CodecResult<Vec<u8>> {
    encode_record(&record.to_value())
}

/// Decodes a typed record from bytes, filtering by its schema.
///
/// # Errors
///
/// Propagates decode failures and `from_value` conversion failures.
pub fn decode<R: DumpRecord>(bytes: &[u8]) -> CodecResult<R> {
    R::from_value(&decode_record(bytes, R::schema())?)
}
