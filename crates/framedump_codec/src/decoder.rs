//! Field-tagged binary decoder.
//!
//! The decoder walks `[u16 tag][u8 wire code][body]` fields up to the
//! terminating sentinel. Two evolution cases are handled without ever
//! desynchronizing the stream:
//!
//! - a tag present on the wire but absent from the reader's schema is
//!   skipped wholly, using the wire code's width/length rules;
//! - a tag declared by the schema but absent from the wire simply stays
//!   missing in the resulting [`RecordValue`] (callers observe defaults).

use crate::encoder::{wire, END_TAG, MAX_DEPTH};
use crate::error::{CodecError, CodecResult};
use crate::schema::Schema;
use crate::value::{FieldValue, RecordValue};
use bytes::Buf;
use uuid::Uuid;

/// Decodes a record against a schema.
///
/// Unknown tags are skipped; trailing bytes after the end sentinel
/// (in-place update padding) are ignored.
///
/// # Errors
///
/// Fails on truncated input, invalid length prefixes, unknown wire codes,
/// invalid UTF-8/char payloads, or excessive nesting depth.
pub fn decode_record(bytes: &[u8], schema: &Schema) -> CodecResult<RecordValue> {
    Decoder::new(bytes).record(Some(schema))
}

/// Decodes a record keeping every field, with no schema filtering.
///
/// Used by the repair pass and inspection tooling, which must salvage
/// whatever the wire contains.
///
/// # Errors
///
/// Same failure modes as [`decode_record`].
pub fn decode_record_any(bytes: &[u8]) -> CodecResult<RecordValue> {
    Decoder::new(bytes).record(None)
}

/// A decoder over a borrowed byte slice.
pub struct Decoder<'a> {
    buf: &'a [u8],
    /// Bytes consumed so far, for error reporting.
    consumed: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            buf: bytes,
            consumed: 0,
        }
    }

    /// Decodes one record, filtering by `schema` when given.
    ///
    /// # Errors
    ///
    /// See [`decode_record`].
    pub fn record(&mut self, schema: Option<&Schema>) -> CodecResult<RecordValue> {
        self.record_at_depth(schema, 0)
    }

    fn record_at_depth(
        &mut self,
        schema: Option<&Schema>,
        depth: usize,
    ) -> CodecResult<RecordValue> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }

        let mut record = RecordValue::new();
        loop {
            let tag = self.u16()?;
            if tag == END_TAG {
                break;
            }
            let code = self.u8()?;
            match schema {
                Some(s) if !s.contains(tag) => self.skip_value(code, depth)?,
                _ => {
                    let value = self.value(code, depth)?;
                    record.set(tag, value);
                }
            }
        }
        Ok(record)
    }

    fn value(&mut self, code: u8, depth: usize) -> CodecResult<FieldValue> {
        Ok(match code {
            wire::NULL => FieldValue::Null,
            wire::BOOL => FieldValue::Bool(self.u8()? != 0),
            wire::BYTE => FieldValue::Byte(self.u8()? as i8),
            wire::CHAR => {
                let scalar = self.u32()?;
                let c = char::from_u32(scalar).ok_or(CodecError::InvalidChar(scalar))?;
                FieldValue::Char(c)
            }
            wire::I32 => FieldValue::I32(self.i32()?),
            wire::I64 => FieldValue::I64(self.i64()?),
            wire::F32 => FieldValue::F32(f32::from_bits(self.u32()?)),
            wire::F64 => FieldValue::F64(f64::from_bits(self.u64()?)),
            wire::STR => {
                let bytes = self.length_prefixed()?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                FieldValue::Str(s.to_owned())
            }
            wire::DATE => FieldValue::Date(self.i64()?),
            wire::UUID => {
                let raw = self.take(16)?;
                let mut b = [0u8; 16];
                b.copy_from_slice(raw);
                FieldValue::Uuid(Uuid::from_bytes(b))
            }
            wire::LIST => FieldValue::List(self.elements(depth)?),
            wire::SET => FieldValue::Set(self.elements(depth)?),
            wire::RECORD => {
                let nested = self.length_prefixed()?;
                // Nested records carry no schema filtering; the outer
                // schema's tag decided whether we got here at all.
                let value = Decoder::new(nested).record_at_depth(None, depth + 1)?;
                FieldValue::Record(value)
            }
            wire::ENUM => FieldValue::Enum(self.u32()?),
            wire::ENUM_SET => {
                let count = self.bounded_count(4)?;
                let mut ordinals = Vec::with_capacity(count);
                for _ in 0..count {
                    ordinals.push(self.u32()?);
                }
                FieldValue::EnumSet(ordinals)
            }
            other => {
                return Err(CodecError::UnknownWireCode {
                    code: other,
                    offset: self.consumed.saturating_sub(1),
                })
            }
        })
    }

    /// Consumes a value's bytes without building it.
    fn skip_value(&mut self, code: u8, depth: usize) -> CodecResult<()> {
        match code {
            wire::NULL => {}
            wire::BOOL | wire::BYTE => {
                self.take(1)?;
            }
            wire::CHAR | wire::I32 | wire::F32 | wire::ENUM => {
                self.take(4)?;
            }
            wire::I64 | wire::F64 | wire::DATE => {
                self.take(8)?;
            }
            wire::UUID => {
                self.take(16)?;
            }
            wire::STR | wire::RECORD => {
                self.length_prefixed()?;
            }
            wire::LIST | wire::SET => {
                if depth + 1 >= MAX_DEPTH {
                    return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
                }
                let count = self.bounded_count(1)?;
                for _ in 0..count {
                    let elem_code = self.u8()?;
                    self.skip_value(elem_code, depth + 1)?;
                }
            }
            wire::ENUM_SET => {
                let count = self.bounded_count(4)?;
                self.take(count * 4)?;
            }
            other => {
                return Err(CodecError::UnknownWireCode {
                    code: other,
                    offset: self.consumed.saturating_sub(1),
                })
            }
        }
        Ok(())
    }

    fn elements(&mut self, depth: usize) -> CodecResult<Vec<FieldValue>> {
        if depth + 1 >= MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }
        let count = self.bounded_count(1)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let code = self.u8()?;
            items.push(self.value(code, depth + 1)?);
        }
        Ok(items)
    }

    /// Reads a `u32` element count and rejects counts that can't fit in
    /// the remaining input, so a corrupt prefix never drives allocation.
    fn bounded_count(&mut self, min_elem_size: usize) -> CodecResult<usize> {
        let count = self.u32()? as usize;
        let remaining = self.buf.remaining();
        if count.saturating_mul(min_elem_size) > remaining {
            return Err(CodecError::InvalidLength {
                len: count,
                remaining,
            });
        }
        Ok(count)
    }

    fn length_prefixed(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u32()? as usize;
        let remaining = self.buf.remaining();
        if len > remaining {
            return Err(CodecError::InvalidLength { len, remaining });
        }
        self.take(len)
    }

    fn need(&self, n: usize) -> CodecResult<()> {
        let remaining = self.buf.remaining();
        if remaining < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        self.need(n)?;
        let (out, rest) = self.buf.split_at(n);
        self.buf = rest;
        self.consumed += n;
        Ok(out)
    }

    fn u8(&mut self) -> CodecResult<u8> {
        self.need(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> CodecResult<u16> {
        self.need(2)?;
        self.consumed += 2;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self) -> CodecResult<u32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> CodecResult<u64> {
        self.need(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64_le())
    }

    fn i32(&mut self) -> CodecResult<i32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_i32_le())
    }

    fn i64(&mut self) -> CodecResult<i64> {
        self.need(8)?;
        self.consumed += 8;
        Ok(self.buf.get_i64_le())
    }
}
