//! Group index: a position list per key.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use framedump_codec::{encode_value, DumpRecord, FieldValue, RecordValue};
use parking_lot::RwLock;
use tracing::debug;

use crate::dump::{Dump, DumpStamp};
use crate::error::{CoreError, CoreResult};
use crate::index::persistence::{
    append_updates, clear_updates, read_lookup, read_updates, write_lookup, IndexMeta,
    UpdateOp,
};
use crate::index::traits::{key_bytes, IndexKind, PositionIndex};
use crate::types::{Position, PositionMap};

/// Above this many unflushed ops, flush rewrites the whole lookup file
/// instead of growing the op log.
const LOG_FLUSH_LIMIT: usize = 1024;

struct GroupPaths {
    meta: PathBuf,
    lookup: PathBuf,
    updates: PathBuf,
}

struct GroupState {
    map: HashMap<Vec<u8>, Vec<u64>>,
    pending: Vec<UpdateOp>,
    /// The lookup file holds a base this session's op log extends.
    base_persisted: bool,
    /// The base was invalidated (prune); next flush must rewrite.
    force_full: bool,
}

/// Per-key position lists stay sorted; insert and remove locate their
/// slot by binary search, and a remove drops exactly one occurrence.
fn apply_op(map: &mut HashMap<Vec<u8>, Vec<u64>>, op: &UpdateOp) {
    match op {
        UpdateOp::Add { key, pos } => {
            let positions = map.entry(key.clone()).or_default();
            let at = positions.binary_search(pos).unwrap_or_else(|at| at);
            positions.insert(at, *pos);
        }
        UpdateOp::Remove { key, pos } => {
            if let Some(positions) = map.get_mut(key) {
                if let Ok(at) = positions.binary_search(pos) {
                    positions.remove(at);
                }
                if positions.is_empty() {
                    map.remove(key);
                }
            }
        }
    }
}

struct GroupInner {
    tag: u16,
    field: String,
    paths: Option<GroupPaths>,
    state: RwLock<GroupState>,
}

/// A group index over one field of a dump.
///
/// Maps each distinct key to the sorted positions of all live records
/// carrying it, oldest first; a record relocated by an update moves to
/// the end of its group. An update that changes the indexed field is
/// rejected with [`CoreError::UnsupportedOperation`] before the dump
/// mutates; delete and re-add to move a record between groups.
/// The full key table lives in memory; at close, small change sets are
/// appended to the `.updates` log rather than rewriting the lookup.
pub struct GroupIndex<R: DumpRecord> {
    inner: Arc<GroupInner>,
    _record: PhantomData<fn() -> R>,
}

impl<R: DumpRecord> Clone for GroupIndex<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: DumpRecord> GroupIndex<R> {
    /// Attaches a group index over `field` to the dump.
    ///
    /// Loads the persisted lookup plus op log when their stamp matches
    /// the dump state, and rebuilds from a full scan otherwise.
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

        let paths = dump
            .side_paths(field)
            .map(|(meta, lookup, updates)| GroupPaths {
                meta,
                lookup,
                updates,
            });

        let mut map: HashMap<Vec<u8>, Vec<u64>> = HashMap::new();
        let mut base_persisted = false;
        if let Some(paths) = &paths {
            if let Some(meta) = IndexMeta::load(&paths.meta)? {
                if meta.kind == IndexKind::Group
                    && meta.tag == tag
                    && meta.stamp == dump.stamp()
                {
                    for (key, positions) in read_lookup(&paths.lookup)? {
                        map.insert(key, positions);
                    }
                    for op in read_updates(&paths.updates)? {
                        apply_op(&mut map, &op);
                    }
                    base_persisted = true;
                    debug!(field, keys = map.len(), "loaded group index");
                }
            }
        }
        if !base_persisted {
            dump.scan_values(None, |value, pos| {
                map.entry(key_bytes(value, tag)?)
                    .or_default()
                    .push(pos.as_u64());
                Ok(())
            })?;
            debug!(field, keys = map.len(), "rebuilt group index");
        }

        let inner = Arc::new(GroupInner {
            tag,
            field: field.to_string(),
            paths,
            state: RwLock::new(GroupState {
                map,
                pending: Vec::new(),
                base_persisted,
                force_full: !base_persisted,
            }),
        });
        dump.register_index(inner.clone());
        Ok(Self {
            inner,
            _record: PhantomData,
        })
    }

    /// Positions of all records carrying `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the key value cannot be encoded.
    pub fn positions_of(&self, key: &FieldValue) -> CoreResult<Vec<Position>> {
        let key = encode_value(key)?;
        let state = self.inner.state.read();
        Ok(state
            .map
            .get(&key)
            .map(|positions| positions.iter().copied().map(Position::new).collect())
            .unwrap_or_default())
    }

    /// Reads all records carrying `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails on encode, I/O, or decode errors.
    pub fn lookup(&self, dump: &Dump<R>, key: &FieldValue) -> CoreResult<Vec<R>> {
        self.positions_of(key)?
            .into_iter()
            .map(|pos| dump.get(pos))
            .collect()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.inner.state.read().map.len()
    }
}

impl PositionIndex for GroupInner {
    fn field_tag(&self) -> u16 {
        self.tag
    }

    fn field_name(&self) -> &str {
        &self.field
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Group
    }

    fn on_add(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        let op = UpdateOp::Add {
            key: key_bytes(record, self.tag)?,
            pos: pos.as_u64(),
        };
        let mut state = self.state.write();
        apply_op(&mut state.map, &op);
        state.pending.push(op);
        Ok(())
    }

    fn on_delete(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        let op = UpdateOp::Remove {
            key: key_bytes(record, self.tag)?,
            pos: pos.as_u64(),
        };
        let mut state = self.state.write();
        apply_op(&mut state.map, &op);
        state.pending.push(op);
        Ok(())
    }

    fn check_update(&self, old: &RecordValue, new: &RecordValue) -> CoreResult<()> {
        if key_bytes(old, self.tag)? != key_bytes(new, self.tag)? {
            return Err(CoreError::unsupported(format!(
                "update changes the `{}` key of a grouped record; delete and re-add instead",
                self.field
            )));
        }
        Ok(())
    }

    fn on_update(
        &self,
        old: &RecordValue,
        old_pos: Position,
        _new: &RecordValue,
        new_pos: Position,
    ) -> CoreResult<()> {
        // check_update rejected any key change, so this is a remap of
        // one position under the same key.
        if old_pos == new_pos {
            return Ok(());
        }
        let key = key_bytes(old, self.tag)?;
        let remove = UpdateOp::Remove {
            key: key.clone(),
            pos: old_pos.as_u64(),
        };
        let add = UpdateOp::Add {
            key,
            pos: new_pos.as_u64(),
        };
        let mut state = self.state.write();
        apply_op(&mut state.map, &remove);
        apply_op(&mut state.map, &add);
        state.pending.push(remove);
        state.pending.push(add);
        Ok(())
    }

    fn on_prune(&self, remap: &PositionMap) -> CoreResult<()> {
        let mut state = self.state.write();
        let mut moved: HashMap<Vec<u8>, Vec<u64>> = HashMap::with_capacity(state.map.len());
        for (key, positions) in state.map.drain() {
            let mapped: Vec<u64> = positions
                .into_iter()
                .filter_map(|p| remap.lookup(Position::new(p)).map(Position::as_u64))
                .collect();
            if !mapped.is_empty() {
                moved.insert(key, mapped);
            }
        }
        state.map = moved;
        // Persisted positions are invalid now; the log cannot express a
        // remap, so the next flush rewrites the lookup.
        state.pending.clear();
        state.force_full = true;
        Ok(())
    }

    fn flush(&self, stamp: DumpStamp) -> CoreResult<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let mut state = self.state.write();
        let log_only = state.base_persisted
            && !state.force_full
            && state.pending.len() <= LOG_FLUSH_LIMIT;
        if log_only {
            append_updates(&paths.updates, &state.pending)?;
        } else {
            write_lookup(
                &paths.lookup,
                state
                    .map
                    .iter()
                    .map(|(k, p)| (k.as_slice(), p.as_slice())),
            )?;
            clear_updates(&paths.updates)?;
            state.base_persisted = true;
            state.force_full = false;
        }
        state.pending.clear();
        IndexMeta {
            kind: IndexKind::Group,
            tag: self.tag,
            field: self.field.clone(),
            stamp,
            bucket_count: 0,
        }
        .save(&paths.meta)
    }

    fn num_keys(&self) -> usize {
        self.state.read().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpConfig;
    use crate::testutil::Event;

    fn label(s: &str) -> FieldValue {
        FieldValue::Str(s.to_string())
    }

    #[test]
    fn groups_records_by_key() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        dump.add(&Event::new(1, "red")).unwrap();
        dump.add(&Event::new(2, "blue")).unwrap();
        dump.add(&Event::new(3, "red")).unwrap();

        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(index.num_keys(), 2);
        assert!(index.lookup(&dump, &label("green")).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_only_that_position() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        let first = dump.add(&Event::new(1, "red")).unwrap();
        dump.add(&Event::new(2, "red")).unwrap();
        dump.delete_at(first).unwrap();

        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn emptied_group_drops_its_key() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        let pos = dump.add(&Event::new(1, "only")).unwrap();
        assert_eq!(index.num_keys(), 1);
        dump.delete_at(pos).unwrap();
        assert_eq!(index.num_keys(), 0);
    }

    #[test]
    fn key_changing_update_is_rejected_before_the_dump_mutates() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        let pos = dump.add(&Event::new(1, "red")).unwrap();
        dump.add(&Event::new(2, "red")).unwrap();

        let err = dump.update(pos, &Event::new(1, "blue")).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedOperation { .. }));

        // Neither the frame nor the index changed.
        assert_eq!(dump.get(pos).unwrap().label, "red");
        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(index.lookup(&dump, &label("blue")).unwrap().is_empty());
    }

    #[test]
    fn same_key_update_in_place_keeps_its_slot() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        let pos = dump.add(&Event::new(1, "red")).unwrap();
        dump.add(&Event::new(2, "red")).unwrap();

        // Same-size replacement rewrites in place; the group is
        // untouched and the record keeps its slot.
        let (_, new_pos) = dump.update(pos, &Event::new(9, "red")).unwrap();
        assert_eq!(new_pos, pos);
        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![9, 2]);
    }

    #[test]
    fn same_key_update_survives_relocation() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "id").unwrap();

        let pos = dump.add(&Event::new(7, "s")).unwrap();
        dump.add(&Event::new(7, "other")).unwrap();

        // A growing replacement relocates the frame but keeps the key;
        // the record moves to the end of its group.
        let (_, new_pos) = dump
            .update(pos, &Event::new(7, "a label far too long to fit"))
            .unwrap();
        assert_ne!(new_pos, pos);

        let sevens = index.lookup(&dump, &FieldValue::I64(7)).unwrap();
        assert_eq!(
            sevens.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(),
            vec!["other", "a label far too long to fit"]
        );
    }

    #[test]
    fn survives_prune() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();

        let doomed = dump.add(&Event::new(1, "red")).unwrap();
        dump.add(&Event::new(2, "red")).unwrap();
        dump.add(&Event::new(3, "blue")).unwrap();
        dump.delete_at(doomed).unwrap();
        dump.prune(None).unwrap();

        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(index.lookup(&dump, &label("blue")).unwrap().len(), 1);
    }

    #[test]
    fn reopen_replays_the_op_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.dump");

        // First session persists a base lookup.
        {
            let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
            let _index = GroupIndex::attach(&mut dump, "label").unwrap();
            dump.add(&Event::new(1, "red")).unwrap();
            dump.close().unwrap();
        }
        // Second session extends the base through the op log.
        {
            let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
            let index = GroupIndex::attach(&mut dump, "label").unwrap();
            assert_eq!(index.num_keys(), 1);
            dump.add(&Event::new(2, "red")).unwrap();
            dump.add(&Event::new(3, "blue")).unwrap();
            dump.close().unwrap();
            assert!(crate::dump::side_path(&path, "label.updates").exists());
        }

        let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();
        let reds = index.lookup(&dump, &label("red")).unwrap();
        assert_eq!(reds.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn stale_files_force_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.dump");

        {
            let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
            let _index = GroupIndex::attach(&mut dump, "label").unwrap();
            dump.add(&Event::new(1, "red")).unwrap();
            dump.close().unwrap();
        }
        {
            let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
            dump.add(&Event::new(2, "red")).unwrap();
            dump.close().unwrap();
        }

        let mut dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();
        assert_eq!(index.lookup(&dump, &label("red")).unwrap().len(), 2);
    }
}
