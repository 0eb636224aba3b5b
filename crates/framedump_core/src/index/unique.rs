//! Unique index: one position per key.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use framedump_codec::{encode_value, DumpRecord, FieldValue, RecordValue};
use parking_lot::RwLock;
use tracing::debug;

use crate::dump::{Dump, DumpStamp};
use crate::error::{CoreError, CoreResult};
use crate::index::persistence::{read_lookup, write_lookup, IndexMeta};
use crate::index::traits::{key_bytes, IndexKind, PositionIndex};
use crate::types::{Position, PositionMap};

struct UniquePaths {
    meta: PathBuf,
    lookup: PathBuf,
}

struct UniqueInner {
    tag: u16,
    field: String,
    paths: Option<UniquePaths>,
    map: RwLock<HashMap<Vec<u8>, u64>>,
}

/// A unique index over one field of a dump.
///
/// Maps each distinct key to the position of the last record added with
/// it; adding a duplicate key silently replaces the mapping, so lookups
/// are last-writer-wins. The full key table lives in memory.
///
/// The handle stays valid for the lifetime of the dump it was attached
/// to and is cheap to clone.
pub struct UniqueIndex<R: DumpRecord> {
    inner: Arc<UniqueInner>,
    _record: PhantomData<fn() -> R>,
}

impl<R: DumpRecord> Clone for UniqueIndex<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: DumpRecord> UniqueIndex<R> {
    /// Attaches a unique index over `field` to the dump.
    ///
    /// If persisted index files exist and their stamp matches the dump
    /// state, the key table is loaded from them; otherwise it is
    /// rebuilt by scanning every live record. The index then receives
    /// every mutation of the dump until the dump is closed.
    ///
    /// # Errors
    ///
    /// Fails when the schema has no field named `field`, or on I/O and
    /// decode errors during load or rebuild.
    pub fn attach(dump: &mut Dump<R>, field: &str) -> CoreResult<Self> {
        let descriptor = R::schema().field_by_name(field).ok_or_else(|| {
            CoreError::unsupported(format!(
                "schema `{}` has no field named `{field}`",
                R::schema().name
            ))
        })?;
        let tag = descriptor.tag;

        let paths = dump.side_paths(field).map(|(meta, lookup, _)| UniquePaths {
            meta,
            lookup,
        });

        let mut map = HashMap::new();
        let mut loaded = false;
        if let Some(paths) = &paths {
            if let Some(meta) = IndexMeta::load(&paths.meta)? {
                if meta.kind == IndexKind::Unique
                    && meta.tag == tag
                    && meta.stamp == dump.stamp()
                {
                    for (key, positions) in read_lookup(&paths.lookup)? {
                        if let Some(&pos) = positions.last() {
                            map.insert(key, pos);
                        }
                    }
                    loaded = true;
                    debug!(field, keys = map.len(), "loaded unique index");
                }
            }
        }
        if !loaded {
            dump.scan_values(None, |value, pos| {
                map.insert(key_bytes(value, tag)?, pos.as_u64());
                Ok(())
            })?;
            debug!(field, keys = map.len(), "rebuilt unique index");
        }

        let inner = Arc::new(UniqueInner {
            tag,
            field: field.to_string(),
            paths,
            map: RwLock::new(map),
        });
        dump.register_index(inner.clone());
        Ok(Self {
            inner,
            _record: PhantomData,
        })
    }

    /// Position of the record currently mapped to `key`.
    ///
    /// # Errors
    ///
    /// Fails when the key value cannot be encoded.
    pub fn position_of(&self, key: &FieldValue) -> CoreResult<Option<Position>> {
        let key = encode_value(key)?;
        Ok(self.inner.map.read().get(&key).copied().map(Position::new))
    }

    /// Looks up the record mapped to `key`.
    ///
    /// # Errors
    ///
    /// Fails on encode, I/O, or decode errors.
    pub fn lookup(&self, dump: &Dump<R>, key: &FieldValue) -> CoreResult<Option<R>> {
        match self.position_of(key)? {
            Some(pos) => Ok(Some(dump.get(pos)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if a record is mapped to `key`.
    ///
    /// # Errors
    ///
    /// Fails when the key value cannot be encoded.
    pub fn contains(&self, key: &FieldValue) -> CoreResult<bool> {
        Ok(self.position_of(key)?.is_some())
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.inner.map.read().len()
    }
}

impl PositionIndex for UniqueInner {
    fn field_tag(&self) -> u16 {
        self.tag
    }

    fn field_name(&self) -> &str {
        &self.field
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Unique
    }

    fn on_add(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        let key = key_bytes(record, self.tag)?;
        self.map.write().insert(key, pos.as_u64());
        Ok(())
    }

    fn on_delete(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        let key = key_bytes(record, self.tag)?;
        let mut map = self.map.write();
        // A later add may have rebound the key; only drop our mapping.
        if map.get(&key) == Some(&pos.as_u64()) {
            map.remove(&key);
        }
        Ok(())
    }

    fn on_update(
        &self,
        old: &RecordValue,
        old_pos: Position,
        new: &RecordValue,
        new_pos: Position,
    ) -> CoreResult<()> {
        let old_key = key_bytes(old, self.tag)?;
        let new_key = key_bytes(new, self.tag)?;
        let mut map = self.map.write();
        if old_key != new_key && map.get(&old_key) == Some(&old_pos.as_u64()) {
            map.remove(&old_key);
        }
        map.insert(new_key, new_pos.as_u64());
        Ok(())
    }

    fn on_prune(&self, remap: &PositionMap) -> CoreResult<()> {
        let mut map = self.map.write();
        let mut moved = HashMap::with_capacity(map.len());
        for (key, pos) in map.drain() {
            if let Some(new_pos) = remap.lookup(Position::new(pos)) {
                moved.insert(key, new_pos.as_u64());
            }
        }
        *map = moved;
        Ok(())
    }

    fn flush(&self, stamp: DumpStamp) -> CoreResult<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let map = self.map.read();
        let entries: Vec<(Vec<u8>, [u64; 1])> =
            map.iter().map(|(k, &p)| (k.clone(), [p])).collect();
        write_lookup(
            &paths.lookup,
            entries.iter().map(|(k, p)| (k.as_slice(), p.as_slice())),
        )?;
        IndexMeta {
            kind: IndexKind::Unique,
            tag: self.tag,
            field: self.field.clone(),
            stamp,
            bucket_count: 0,
        }
        .save(&paths.meta)
    }

    fn num_keys(&self) -> usize {
        self.map.read().len()
    }
}
