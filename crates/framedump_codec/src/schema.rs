//! Static field descriptor tables.
//!
//! Every record type declares an ordered table of `(tag, name, kind)`
//! descriptors. The table replaces runtime reflection: the codec walks it
//! for encoding, the dump stores a fingerprint of it in its meta file, and
//! indexes resolve field names to tags through it.

use crate::error::{CodecError, CodecResult};

/// Semantic type of a field, as declared by the schema.
///
/// Collection and nested kinds borrow their element descriptors with
/// `'static` lifetimes so that schema tables can live in `static` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// Signed byte.
    Byte,
    /// Unicode scalar value.
    Char,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// UTF-8 string.
    Str,
    /// Milliseconds since the Unix epoch.
    Date,
    /// 128-bit UUID.
    Uuid,
    /// Enum constant by ordinal.
    Enum,
    /// Set of enum ordinals.
    EnumSet,
    /// Array or list with the given element kind.
    List(&'static FieldKind),
    /// Set with the given element kind.
    Set(&'static FieldKind),
    /// Nested record following the given schema.
    Record(&'static Schema),
}

impl FieldKind {
    /// Shallow discriminant used in persisted schema fingerprints.
    ///
    /// Element and nested-schema detail is deliberately not part of the
    /// fingerprint; tag stability, not type stability, is the
    /// schema-evolution contract.
    #[must_use]
    pub fn fingerprint_code(&self) -> u8 {
        match self {
            FieldKind::Bool => 1,
            FieldKind::Byte => 2,
            FieldKind::Char => 3,
            FieldKind::I32 => 4,
            FieldKind::I64 => 5,
            FieldKind::F32 => 6,
            FieldKind::F64 => 7,
            FieldKind::Str => 8,
            FieldKind::Date => 9,
            FieldKind::Uuid => 10,
            FieldKind::Enum => 11,
            FieldKind::EnumSet => 12,
            FieldKind::List(_) => 13,
            FieldKind::Set(_) => 14,
            FieldKind::Record(_) => 15,
        }
    }
}

/// Descriptor of a single field: stable tag, display name, semantic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Stable small integer identifying the field across schema versions.
    pub tag: u16,
    /// Field name, used for index file naming and diagnostics.
    pub name: &'static str,
    /// Declared semantic type.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(tag: u16, name: &'static str, kind: FieldKind) -> Self {
        Self { tag, name, kind }
    }
}

/// Static schema of a record type: descriptors in ascending tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Record type name, for diagnostics and the dump meta file.
    pub name: &'static str,
    /// Field descriptors, ascending by tag.
    pub fields: &'static [FieldDescriptor],
}

impl Schema {
    /// Creates a schema.
    ///
    /// Tag ordering is validated lazily via [`validate`](Self::validate)
    /// so that schemas can be built in `const` context.
    #[must_use]
    pub const fn new(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, fields }
    }

    /// Checks that tags are unique and strictly ascending.
    ///
    /// The dump calls this once when a schema first reaches it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSchema`] on duplicate or out-of-order
    /// tags.
    pub fn validate(&self) -> CodecResult<()> {
        for pair in self.fields.windows(2) {
            if pair[1].tag <= pair[0].tag {
                return Err(CodecError::InvalidSchema {
                    schema: self.name,
                    message: format!(
                        "field `{}` tag {} is not greater than `{}` tag {}",
                        pair[1].name, pair[1].tag, pair[0].name, pair[0].tag
                    ),
                });
            }
        }
        Ok(())
    }

    /// Looks up a descriptor by tag.
    #[must_use]
    pub fn field(&self, tag: u16) -> Option<&FieldDescriptor> {
        self.fields
            .binary_search_by_key(&tag, |d| d.tag)
            .ok()
            .map(|i| &self.fields[i])
    }

    /// Looks up a descriptor by field name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|d| d.name == name)
    }

    /// Returns `true` if the schema declares the given tag.
    #[must_use]
    pub fn contains(&self, tag: u16) -> bool {
        self.field(tag).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static GOOD: Schema = Schema::new(
        "good",
        &[
            FieldDescriptor::new(1, "id", FieldKind::I64),
            FieldDescriptor::new(2, "name", FieldKind::Str),
            FieldDescriptor::new(4, "tags", FieldKind::List(&FieldKind::Str)),
        ],
    );

    static BAD: Schema = Schema::new(
        "bad",
        &[
            FieldDescriptor::new(2, "a", FieldKind::I32),
            FieldDescriptor::new(2, "b", FieldKind::I32),
        ],
    );

    #[test]
    fn validate_accepts_ascending_tags() {
        GOOD.validate().unwrap();
    }

    #[test]
    fn validate_rejects_duplicate_tags() {
        assert!(matches!(
            BAD.validate(),
            Err(CodecError::InvalidSchema { schema: "bad", .. })
        ));
    }

    #[test]
    fn lookup_by_tag_and_name() {
        assert_eq!(GOOD.field(2).unwrap().name, "name");
        assert_eq!(GOOD.field_by_name("tags").unwrap().tag, 4);
        assert!(GOOD.field(3).is_none());
        assert!(!GOOD.contains(3));
    }

    #[test]
    fn fingerprint_codes_distinguish_kinds() {
        assert_ne!(
            FieldKind::I32.fingerprint_code(),
            FieldKind::I64.fingerprint_code()
        );
        assert_eq!(
            FieldKind::List(&FieldKind::I32).fingerprint_code(),
            FieldKind::List(&FieldKind::Str).fingerprint_code()
        );
    }
}
