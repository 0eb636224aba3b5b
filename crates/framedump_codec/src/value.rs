//! Field values and the dynamic record representation.

use crate::error::{CodecError, CodecResult};
use uuid::Uuid;

/// A single field value of one of the supported semantic types.
///
/// `FieldValue` is the sum type the codec dispatches over. Nullable fields
/// carry [`FieldValue::Null`] when absent; collections and nested records
/// recurse through the same enum.
///
/// The derived `PartialEq` gives floats IEEE semantics (`NaN != NaN`),
/// so there is no `Eq` impl. Index keys therefore compare by encoded
/// bytes, not by `FieldValue`, which does preserve float bits exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value of a nullable field.
    Null,
    /// Boolean, one byte on the wire.
    Bool(bool),
    /// Signed byte.
    Byte(i8),
    /// Unicode scalar value.
    Char(char),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit IEEE-754 float, bit-for-bit.
    F32(f32),
    /// 64-bit IEEE-754 float, bit-for-bit.
    F64(f64),
    /// UTF-8 string.
    Str(String),
    /// Instant as milliseconds since the Unix epoch.
    Date(i64),
    /// 128-bit UUID.
    Uuid(Uuid),
    /// Ordered sequence (array or list) of values.
    List(Vec<FieldValue>),
    /// Unordered collection of values; encoded as its element sequence.
    Set(Vec<FieldValue>),
    /// Nested record.
    Record(RecordValue),
    /// Enum constant, encoded by declared ordinal (not name).
    Enum(u32),
    /// Set of enum constants, encoded as an ordinal list.
    EnumSet(Vec<u32>),
}

impl FieldValue {
    /// Returns a short name for the value's kind, for error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Byte(_) => "byte",
            FieldValue::Char(_) => "char",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::F32(_) => "f32",
            FieldValue::F64(_) => "f64",
            FieldValue::Str(_) => "str",
            FieldValue::Date(_) => "date",
            FieldValue::Uuid(_) => "uuid",
            FieldValue::List(_) => "list",
            FieldValue::Set(_) => "set",
            FieldValue::Record(_) => "record",
            FieldValue::Enum(_) => "enum",
            FieldValue::EnumSet(_) => "enum-set",
        }
    }

    /// Returns `true` for [`FieldValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// A dynamic record: fields sorted by ascending tag.
///
/// `RecordValue` is the codec's working representation. Typed record
/// structs convert to and from it through
/// [`DumpRecord`](crate::DumpRecord); the dump store and index layer
/// operate on it without knowing the concrete Rust type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordValue {
    fields: Vec<(u16, FieldValue)>,
}

impl RecordValue {
    /// Creates an empty record value.
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Creates an empty record value with capacity for `n` fields.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            fields: Vec::with_capacity(n),
        }
    }

    /// Sets a field, replacing any existing value for the same tag.
    ///
    /// The field list stays sorted by tag regardless of call order.
    pub fn set(&mut self, tag: u16, value: FieldValue) -> &mut Self {
        match self.fields.binary_search_by_key(&tag, |(t, _)| *t) {
            Ok(i) => self.fields[i] = (tag, value),
            Err(i) => self.fields.insert(i, (tag, value)),
        }
        self
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, tag: u16, value: FieldValue) -> Self {
        self.set(tag, value);
        self
    }

    /// Returns the value for `tag`, if present in this record.
    #[must_use]
    pub fn get(&self, tag: u16) -> Option<&FieldValue> {
        self.fields
            .binary_search_by_key(&tag, |(t, _)| *t)
            .ok()
            .map(|i| &self.fields[i].1)
    }

    /// Removes and returns the value for `tag`.
    pub fn remove(&mut self, tag: u16) -> Option<FieldValue> {
        match self.fields.binary_search_by_key(&tag, |(t, _)| *t) {
            Ok(i) => Some(self.fields.remove(i).1),
            Err(_) => None,
        }
    }

    /// Iterates the fields in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &FieldValue)> {
        self.fields.iter().map(|(t, v)| (*t, v))
    }

    /// Number of fields present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn expect(&self, tag: u16) -> CodecResult<&FieldValue> {
        self.get(tag).ok_or(CodecError::MissingField { tag })
    }

    fn kind_error(&self, tag: u16, expected: &'static str, actual: &FieldValue) -> CodecError {
        CodecError::UnexpectedKind {
            tag,
            expected,
            actual: actual.kind_name(),
        }
    }

    /// Returns the `bool` at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_bool(&self, tag: u16) -> CodecResult<bool> {
        match self.expect(tag)? {
            FieldValue::Bool(b) => Ok(*b),
            other => Err(self.kind_error(tag, "bool", other)),
        }
    }

    /// Returns the `i32` at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_i32(&self, tag: u16) -> CodecResult<i32> {
        match self.expect(tag)? {
            FieldValue::I32(n) => Ok(*n),
            other => Err(self.kind_error(tag, "i32", other)),
        }
    }

    /// Returns the `i64` at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_i64(&self, tag: u16) -> CodecResult<i64> {
        match self.expect(tag)? {
            FieldValue::I64(n) => Ok(*n),
            other => Err(self.kind_error(tag, "i64", other)),
        }
    }

    /// Returns the `f64` at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_f64(&self, tag: u16) -> CodecResult<f64> {
        match self.expect(tag)? {
            FieldValue::F64(n) => Ok(*n),
            other => Err(self.kind_error(tag, "f64", other)),
        }
    }

    /// Returns the string at `tag` as a `&str`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_str(&self, tag: u16) -> CodecResult<&str> {
        match self.expect(tag)? {
            FieldValue::Str(s) => Ok(s.as_str()),
            other => Err(self.kind_error(tag, "str", other)),
        }
    }

    /// Returns the epoch-millis date at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_date(&self, tag: u16) -> CodecResult<i64> {
        match self.expect(tag)? {
            FieldValue::Date(ms) => Ok(*ms),
            other => Err(self.kind_error(tag, "date", other)),
        }
    }

    /// Returns the UUID at `tag`.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or holds another kind.
    pub fn get_uuid(&self, tag: u16) -> CodecResult<Uuid> {
        match self.expect(tag)? {
            FieldValue::Uuid(u) => Ok(*u),
            other => Err(self.kind_error(tag, "uuid", other)),
        }
    }

    /// Returns the string at `tag`, or `None` if the field is absent or null.
    ///
    /// # Errors
    ///
    /// Fails if the field holds a non-null, non-string value.
    pub fn get_opt_str(&self, tag: u16) -> CodecResult<Option<&str>> {
        match self.get(tag) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Str(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.kind_error(tag, "str", other)),
        }
    }

    /// Returns the `i64` at `tag`, or `None` if the field is absent or null.
    ///
    /// # Errors
    ///
    /// Fails if the field holds a non-null, non-i64 value.
    pub fn get_opt_i64(&self, tag: u16) -> CodecResult<Option<i64>> {
        match self.get(tag) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::I64(n)) => Ok(Some(*n)),
            Some(other) => Err(self.kind_error(tag, "i64", other)),
        }
    }
}
