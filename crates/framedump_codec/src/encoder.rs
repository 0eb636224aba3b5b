//! Field-tagged binary encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::{FieldValue, RecordValue};

/// Maximum nesting depth for records and collections.
///
/// Encoding or decoding deeper than this fails with
/// [`CodecError::DepthExceeded`] instead of exhausting the call stack.
pub const MAX_DEPTH: usize = 64;

/// Sentinel tag terminating a record's field stream.
///
/// Real field tags must be below this value; in-place frame updates may
/// leave zero padding after the sentinel, which decoders never read.
pub const END_TAG: u16 = 0xFFFF;

/// Wire-type codes. One byte follows every field tag and every collection
/// element; the code alone determines how many bytes to consume, which is
/// what lets decoders skip fields their schema does not declare.
pub(crate) mod wire {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const BYTE: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I32: u8 = 0x04;
    pub const I64: u8 = 0x05;
    pub const F32: u8 = 0x06;
    pub const F64: u8 = 0x07;
    pub const STR: u8 = 0x08;
    pub const DATE: u8 = 0x09;
    pub const UUID: u8 = 0x0A;
    pub const LIST: u8 = 0x0B;
    pub const SET: u8 = 0x0C;
    pub const RECORD: u8 = 0x0D;
    pub const ENUM: u8 = 0x0E;
    pub const ENUM_SET: u8 = 0x0F;
}

/// Encodes a record to bytes.
///
/// Fields are written in ascending tag order as
/// `[u16 tag][u8 wire code][body]`, terminated by the [`END_TAG`]
/// sentinel. All multi-byte integers are little-endian; floats are
/// IEEE-754 bit-for-bit.
///
/// # Errors
///
/// Fails if nesting exceeds [`MAX_DEPTH`] or a field uses a reserved tag.
pub fn encode_record(record: &RecordValue) -> CodecResult<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder.record(record)?;
    Ok(encoder.into_bytes())
}

/// Encodes a single field value to its canonical wire bytes.
///
/// The output is `[u8 wire code][body]`, exactly as the value would
/// appear inside a record. Equal values always produce equal bytes,
/// which makes the encoding usable as an index key.
///
/// # Errors
///
/// Fails if nesting exceeds [`MAX_DEPTH`].
pub fn encode_value(value: &FieldValue) -> CodecResult<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder.value(value, 0)?;
    Ok(encoder.into_bytes())
}

/// A reusable encoder over an owned byte buffer.
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates an encoder with the given buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Encodes a full record into the buffer.
    ///
    /// # Errors
    ///
    /// Fails on excessive nesting or a reserved field tag.
    pub fn record(&mut self, record: &RecordValue) -> CodecResult<()> {
        self.record_at_depth(record, 0)
    }

    /// Consumes the encoder and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the bytes encoded so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn record_at_depth(&mut self, record: &RecordValue, depth: usize) -> CodecResult<()> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }

        for (tag, value) in record.iter() {
            if tag == END_TAG {
                return Err(CodecError::InvalidSchema {
                    schema: "<record>",
                    message: format!("field tag {tag} is reserved"),
                });
            }
            self.buf.extend_from_slice(&tag.to_le_bytes());
            self.value(value, depth)?;
        }

        self.buf.extend_from_slice(&END_TAG.to_le_bytes());
        Ok(())
    }

    fn value(&mut self, value: &FieldValue, depth: usize) -> CodecResult<()> {
        match value {
            FieldValue::Null => self.buf.push(wire::NULL),
            FieldValue::Bool(b) => {
                self.buf.push(wire::BOOL);
                self.buf.push(u8::from(*b));
            }
            FieldValue::Byte(b) => {
                self.buf.push(wire::BYTE);
                self.buf.push(*b as u8);
            }
            FieldValue::Char(c) => {
                self.buf.push(wire::CHAR);
                self.buf.extend_from_slice(&u32::from(*c).to_le_bytes());
            }
            FieldValue::I32(n) => {
                self.buf.push(wire::I32);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
            FieldValue::I64(n) => {
                self.buf.push(wire::I64);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
            FieldValue::F32(n) => {
                self.buf.push(wire::F32);
                self.buf.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            FieldValue::F64(n) => {
                self.buf.push(wire::F64);
                self.buf.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            FieldValue::Str(s) => {
                self.buf.push(wire::STR);
                self.length_prefixed(s.as_bytes());
            }
            FieldValue::Date(ms) => {
                self.buf.push(wire::DATE);
                self.buf.extend_from_slice(&ms.to_le_bytes());
            }
            FieldValue::Uuid(u) => {
                self.buf.push(wire::UUID);
                self.buf.extend_from_slice(u.as_bytes());
            }
            FieldValue::List(items) => {
                self.buf.push(wire::LIST);
                self.elements(items, depth)?;
            }
            FieldValue::Set(items) => {
                self.buf.push(wire::SET);
                self.elements(items, depth)?;
            }
            FieldValue::Record(nested) => {
                self.buf.push(wire::RECORD);
                // Length-prefix the nested encoding so decoders can skip
                // an unknown nested field without understanding its schema.
                let len_at = self.buf.len();
                self.buf.extend_from_slice(&0u32.to_le_bytes());
                self.record_at_depth(nested, depth + 1)?;
                let nested_len = (self.buf.len() - len_at - 4) as u32;
                self.buf[len_at..len_at + 4].copy_from_slice(&nested_len.to_le_bytes());
            }
            FieldValue::Enum(ordinal) => {
                self.buf.push(wire::ENUM);
                self.buf.extend_from_slice(&ordinal.to_le_bytes());
            }
            FieldValue::EnumSet(ordinals) => {
                self.buf.push(wire::ENUM_SET);
                self.buf
                    .extend_from_slice(&(ordinals.len() as u32).to_le_bytes());
                for ordinal in ordinals {
                    self.buf.extend_from_slice(&ordinal.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn elements(&mut self, items: &[FieldValue], depth: usize) -> CodecResult<()> {
        if depth + 1 >= MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }
        self.buf
            .extend_from_slice(&(items.len() as u32).to_le_bytes());
        for item in items {
            self.value(item, depth + 1)?;
        }
        Ok(())
    }

    fn length_prefixed(&mut self, bytes: &[u8]) {
        self.buf
            .extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
