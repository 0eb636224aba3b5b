//! The interface between a dump and its registered indexes.

use framedump_codec::{encode_value, FieldValue, RecordValue};

use crate::dump::DumpStamp;
use crate::error::CoreResult;
use crate::types::{Position, PositionMap};

/// Kind discriminant persisted in index meta files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// One position per key.
    Unique,
    /// A position list per key, positions kept in insertion order.
    Group,
    /// Disk-bucketed group index for key populations that do not fit in
    /// memory.
    Infinite,
}

impl IndexKind {
    /// Stable on-disk discriminant.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            IndexKind::Unique => 1,
            IndexKind::Group => 2,
            IndexKind::Infinite => 3,
        }
    }

    /// Parses the on-disk discriminant.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(IndexKind::Unique),
            2 => Some(IndexKind::Group),
            3 => Some(IndexKind::Infinite),
            _ => None,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Unique => "unique",
            IndexKind::Group => "group",
            IndexKind::Infinite => "infinite",
        }
    }
}

/// A secondary index registered with a dump.
///
/// The dump notifies every registered index synchronously, inside the
/// mutating call, so index state never lags the data file within a
/// session. Methods take `&self`; implementations guard their state
/// internally so index handles stay cloneable while registered.
pub trait PositionIndex: Send + Sync {
    /// Tag of the indexed field.
    fn field_tag(&self) -> u16;

    /// Name of the indexed field, used for side-file naming.
    fn field_name(&self) -> &str;

    /// Index kind, for diagnostics and discovery.
    fn kind(&self) -> IndexKind;

    /// A record was appended at `pos`.
    fn on_add(&self, record: &RecordValue, pos: Position) -> CoreResult<()>;

    /// The record at `pos` was tombstoned.
    fn on_delete(&self, record: &RecordValue, pos: Position) -> CoreResult<()>;

    /// Called before the dump mutates the frame for an update. An
    /// index that cannot represent the change rejects it here, so the
    /// data file never runs ahead of a refusing index.
    fn check_update(&self, old: &RecordValue, new: &RecordValue) -> CoreResult<()> {
        let _ = (old, new);
        Ok(())
    }

    /// The record at `old_pos` was replaced; the replacement lives at
    /// `new_pos`, which equals `old_pos` when the update fit in place.
    fn on_update(
        &self,
        old: &RecordValue,
        old_pos: Position,
        new: &RecordValue,
        new_pos: Position,
    ) -> CoreResult<()>;

    /// The dump was pruned; live positions moved per `map`. Positions
    /// absent from `map` were tombstones and must be dropped.
    fn on_prune(&self, map: &PositionMap) -> CoreResult<()>;

    /// Persists the index, stamped against the dump state it reflects.
    fn flush(&self, stamp: DumpStamp) -> CoreResult<()>;

    /// Number of distinct keys currently indexed.
    fn num_keys(&self) -> usize;
}

/// Canonical key bytes for the indexed field of a record.
///
/// A field the record does not carry keys as `Null`, so records missing
/// the field are still findable.
pub(crate) fn key_bytes(record: &RecordValue, tag: u16) -> CoreResult<Vec<u8>> {
    let value = record.get(tag).unwrap_or(&FieldValue::Null);
    Ok(encode_value(value)?)
}
