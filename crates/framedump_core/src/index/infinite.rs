//! Infinite index: a group index whose key table lives on disk.
//!
//! Keys are hashed into a fixed number of buckets persisted in the
//! `.lookup` file; a lookup reads exactly one bucket. Only the
//! unmerged delta since the last bucket-file rewrite is held in
//! memory, so the key population can exceed memory. Rebuilds feed
//! every record through the external sorter, ordered by bucket, and
//! stream the bucket file out sequentially.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use framedump_codec::{
    encode_value, CodecResult, DumpRecord, FieldDescriptor, FieldKind, FieldValue,
    RecordValue, Schema,
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::dump::{Dump, DumpStamp};
use crate::error::{CoreError, CoreResult};
use crate::index::persistence::{
    append_updates, clear_updates, read_updates, IndexMeta, UpdateOp,
};
use crate::index::traits::{key_bytes, IndexKind, PositionIndex};
use crate::sort::ExternalSorter;
use crate::types::{Position, PositionMap};

/// Default bucket count for new infinite indexes.
pub const DEFAULT_BUCKET_COUNT: u32 = 1024;

/// Unmerged delta ops above this count trigger a mid-session merge
/// into the bucket file, bounding memory use.
const MERGE_LIMIT: usize = 65_536;

/// Unmerged ops below this count are flushed to the op log at close
/// instead of rewriting the bucket file.
const LOG_FLUSH_LIMIT: usize = 1024;

/// Decoded buckets kept in memory for repeated lookups.
const BUCKET_CACHE_CAPACITY: usize = 64;

const BUCKET_MAGIC: &[u8; 4] = b"FDBK";
const BUCKET_VERSION: u8 = 1;

/// Stable key hash; must not change across versions or the persisted
/// bucket assignment becomes unreadable.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
enum DeltaOp {
    Add(u64),
    Remove(u64),
}

struct InfPaths {
    meta: PathBuf,
    lookup: PathBuf,
    updates: PathBuf,
}

struct InfState {
    /// Bucket directory of the current `.lookup` file, if one is valid.
    directory: Option<Vec<(u64, u32)>>,
    /// Distinct keys in the bucket file as of the last rewrite.
    base_keys: u64,
    /// Per-key delta ops since the last rewrite, in application order.
    delta: HashMap<Vec<u8>, Vec<DeltaOp>>,
    /// Total ops across `delta`.
    pending_ops: usize,
}

/// Bounded cache of decoded buckets from the current `.lookup` file,
/// evicting the least recently used. Cached content is the base bucket
/// only; the delta overlay is applied on top at lookup time, so delta
/// ops never invalidate entries. A bucket-file rewrite clears it.
struct BucketCache {
    capacity: usize,
    order: Vec<u32>,
    map: HashMap<u32, Vec<(Vec<u8>, Vec<u64>)>>,
}

impl BucketCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Vec::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, bucket: u32) -> Option<&[(Vec<u8>, Vec<u64>)]> {
        if !self.map.contains_key(&bucket) {
            return None;
        }
        if let Some(at) = self.order.iter().position(|b| *b == bucket) {
            self.order.remove(at);
            self.order.push(bucket);
        }
        self.map.get(&bucket).map(Vec::as_slice)
    }

    fn insert(&mut self, bucket: u32, entries: Vec<(Vec<u8>, Vec<u64>)>) {
        if self.map.insert(bucket, entries).is_some() {
            if let Some(at) = self.order.iter().position(|b| *b == bucket) {
                self.order.remove(at);
            }
        } else if self.order.len() >= self.capacity {
            let lru = self.order.remove(0);
            self.map.remove(&lru);
        }
        self.order.push(bucket);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.map.clear();
    }
}

struct InfiniteInner {
    tag: u16,
    field: String,
    bucket_count: u32,
    paths: Option<InfPaths>,
    state: RwLock<InfState>,
    cache: Mutex<BucketCache>,
}

/// A group index whose key table is bucketed on disk.
///
/// Same lookup contract as [`GroupIndex`](crate::index::GroupIndex):
/// each key maps to the positions of all live records carrying it,
/// oldest first. Unlike the group index it never materializes the full
/// key table in memory; a lookup costs one bucket read, absorbed by a
/// small cache of recently read buckets when keys repeat.
pub struct InfiniteIndex<R: DumpRecord> {
    inner: Arc<InfiniteInner>,
    _record: PhantomData<fn() -> R>,
}

impl<R: DumpRecord> Clone for InfiniteIndex<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: DumpRecord> InfiniteIndex<R> {
    /// Attaches with [`DEFAULT_BUCKET_COUNT`] buckets.
    ///
    /// # Errors
    ///
    /// See [`attach_with_buckets`](Self::attach_with_buckets).
    pub fn attach(dump: &mut Dump<R>, field: &str) -> CoreResult<Self> {
        Self::attach_with_buckets(dump, field, DEFAULT_BUCKET_COUNT)
    }

    /// Attaches an infinite index over `field` with the given bucket
    /// count.
    ///
    /// A persisted index is reused when its stamp matches the dump and
    /// its bucket count matches; otherwise the index is rebuilt by
    /// sorting every live record by bucket through the external sorter.
    ///
    /// # Errors
    ///
    /// Fails when the schema has no field named `field`, or on I/O,
    /// decode, or sort errors during load or rebuild.
    pub fn attach_with_buckets(
        dump: &mut Dump<R>,
        field: &str,
        bucket_count: u32,
    ) -> CoreResult<Self> {
        let descriptor = R::schema().field_by_name(field).ok_or_else(|| {
            CoreError::unsupported(format!(
                "schema `{}` has no field named `{field}`",
                R::schema().name
            ))
        })?;
        let tag = descriptor.tag;
        let bucket_count = bucket_count.max(1);

        let paths = dump
            .side_paths(field)
            .map(|(meta, lookup, updates)| InfPaths {
                meta,
                lookup,
                updates,
            });

        let inner = Arc::new(InfiniteInner {
            tag,
            field: field.to_string(),
            bucket_count,
            paths,
            state: RwLock::new(InfState {
                directory: None,
                base_keys: 0,
                delta: HashMap::new(),
                pending_ops: 0,
            }),
            cache: Mutex::new(BucketCache::new(BUCKET_CACHE_CAPACITY)),
        });

        let mut loaded = false;
        if let Some(paths) = &inner.paths {
            if let Some(meta) = IndexMeta::load(&paths.meta)? {
                if meta.kind == IndexKind::Infinite
                    && meta.tag == tag
                    && meta.bucket_count == bucket_count
                    && meta.stamp == dump.stamp()
                {
                    let (directory, base_keys) = read_directory(&paths.lookup)?;
                    let mut state = inner.state.write();
                    state.directory = Some(directory);
                    state.base_keys = base_keys;
                    for op in read_updates(&paths.updates)? {
                        let (key, op) = match op {
                            UpdateOp::Add { key, pos } => (key, DeltaOp::Add(pos)),
                            UpdateOp::Remove { key, pos } => (key, DeltaOp::Remove(pos)),
                        };
                        state.delta.entry(key).or_default().push(op);
                        state.pending_ops += 1;
                    }
                    loaded = true;
                    debug!(field, base_keys, "loaded infinite index");
                }
            }
        }
        if !loaded {
            inner.rebuild(dump)?;
        }

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
    /// Fails on encode or bucket-read errors.
    pub fn positions_of(&self, key: &FieldValue) -> CoreResult<Vec<Position>> {
        let key = encode_value(key)?;
        Ok(self
            .inner
            .positions_for(&key)?
            .into_iter()
            .map(Position::new)
            .collect())
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

    /// Upper bound on the number of distinct keys: keys merged into the
    /// bucket file plus keys touched since, which may overlap. Exact
    /// right after a rebuild or merge.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        PositionIndex::num_keys(&*self.inner)
    }
}

/// Internal record type for sorter-backed rebuilds: one live record's
/// bucket, key, and position.
struct BucketEntry {
    bucket: u32,
    key: Vec<u8>,
    pos: u64,
}

static BUCKET_ENTRY_SCHEMA: Schema = Schema::new(
    "BucketEntry",
    &[
        FieldDescriptor::new(1, "bucket", FieldKind::I64),
        FieldDescriptor::new(2, "key", FieldKind::List(&FieldKind::Byte)),
        FieldDescriptor::new(3, "pos", FieldKind::I64),
    ],
);

impl DumpRecord for BucketEntry {
    fn schema() -> &'static Schema {
        &BUCKET_ENTRY_SCHEMA
    }

    fn to_value(&self) -> RecordValue {
        let key = self.key.iter().map(|&b| FieldValue::Byte(b as i8)).collect();
        RecordValue::new()
            .with(1, FieldValue::I64(i64::from(self.bucket)))
            .with(2, FieldValue::List(key))
            .with(3, FieldValue::I64(self.pos as i64))
    }

    fn from_value(value: &RecordValue) -> CodecResult<Self> {
        let key = match value.get(2) {
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|item| match item {
                    FieldValue::Byte(b) => Ok(*b as u8),
                    other => Err(framedump_codec::CodecError::UnexpectedKind {
                        tag: 2,
                        expected: "byte",
                        actual: other.kind_name(),
                    }),
                })
                .collect::<CodecResult<Vec<u8>>>()?,
            _ => Vec::new(),
        };
        Ok(Self {
            bucket: value.get_i64(1)? as u32,
            key,
            pos: value.get_i64(3)? as u64,
        })
    }
}

impl InfiniteInner {
    fn bucket_of(&self, key: &[u8]) -> u32 {
        (fnv1a(key) % u64::from(self.bucket_count)) as u32
    }

    /// Base positions for `key` from its bucket, with the delta applied.
    fn positions_for(&self, key: &[u8]) -> CoreResult<Vec<u64>> {
        let state = self.state.read();
        let mut positions = Vec::new();
        if state.directory.is_some() {
            let bucket = self.bucket_of(key);
            let mut cache = self.cache.lock();
            let hit = cache.get(bucket).map(|entries| key_positions(entries, key));
            positions = match hit {
                Some(positions) => positions,
                None => {
                    let entries = self.read_bucket(&state, bucket)?;
                    let positions = key_positions(&entries, key);
                    cache.insert(bucket, entries);
                    positions
                }
            };
        }
        if let Some(ops) = state.delta.get(key) {
            for op in ops {
                match op {
                    DeltaOp::Add(pos) => positions.push(*pos),
                    DeltaOp::Remove(pos) => positions.retain(|p| p != pos),
                }
            }
        }
        Ok(positions)
    }

    fn read_bucket(
        &self,
        state: &InfState,
        bucket: u32,
    ) -> CoreResult<Vec<(Vec<u8>, Vec<u64>)>> {
        let Some(directory) = &state.directory else {
            return Ok(Vec::new());
        };
        let (offset, len) = directory[bucket as usize];
        if len == 0 {
            return Ok(Vec::new());
        }
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| CoreError::corruption("bucket directory without a file"))?;
        let mut file = fs::File::open(&paths.lookup)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; len as usize];
        file.read_exact(&mut bytes)?;
        parse_bucket(&bytes)
    }

    /// Records one delta op, merging into the bucket file once the
    /// delta grows past [`MERGE_LIMIT`].
    fn push_op(&self, key: Vec<u8>, op: DeltaOp) -> CoreResult<()> {
        let mut state = self.state.write();
        state.delta.entry(key).or_default().push(op);
        state.pending_ops += 1;
        if state.pending_ops >= MERGE_LIMIT && self.paths.is_some() {
            self.rewrite(&mut state, None)?;
        }
        Ok(())
    }

    /// Rebuilds the index from a full dump scan. File-backed indexes
    /// sort entries by bucket through the external sorter and stream
    /// the bucket file; memory-backed ones fill the delta map directly.
    fn rebuild<R: DumpRecord>(&self, dump: &Dump<R>) -> CoreResult<()> {
        let mut state = self.state.write();
        state.directory = None;
        state.base_keys = 0;
        state.delta.clear();
        state.pending_ops = 0;

        let Some(paths) = &self.paths else {
            dump.scan_values(None, |value, pos| {
                let key = key_bytes(value, self.tag)?;
                state
                    .delta
                    .entry(key)
                    .or_default()
                    .push(DeltaOp::Add(pos.as_u64()));
                state.pending_ops += 1;
                Ok(())
            })?;
            return Ok(());
        };

        let mut sorter = ExternalSorter::new(|a: &BucketEntry, b: &BucketEntry| {
            a.bucket.cmp(&b.bucket).then_with(|| a.key.cmp(&b.key))
        });
        dump.scan_values(None, |value, pos| {
            let key = key_bytes(value, self.tag)?;
            sorter.add(BucketEntry {
                bucket: self.bucket_of(&key),
                key,
                pos: pos.as_u64(),
            })
        })?;
        let total = sorter.len();

        let mut writer = BucketFileWriter::start(self.bucket_count, &paths.lookup)?;
        let mut current: Option<(u32, Vec<u8>, Vec<u64>)> = None;
        for entry in sorter.into_sorted_iter()? {
            let entry = entry?;
            match &mut current {
                Some((bucket, key, positions))
                    if *bucket == entry.bucket && *key == entry.key =>
                {
                    positions.push(entry.pos);
                }
                _ => {
                    if let Some((bucket, key, positions)) = current.take() {
                        writer.entry(bucket, &key, &positions)?;
                    }
                    current = Some((entry.bucket, entry.key, vec![entry.pos]));
                }
            }
        }
        if let Some((bucket, key, positions)) = current.take() {
            writer.entry(bucket, &key, &positions)?;
        }

        let (directory, base_keys) = writer.finish(&paths.lookup)?;
        clear_updates(&paths.updates)?;
        state.directory = Some(directory);
        state.base_keys = base_keys;
        self.cache.lock().clear();
        debug!(
            field = %self.field,
            records = total,
            keys = base_keys,
            "rebuilt infinite index"
        );
        Ok(())
    }

    /// Merges the delta (and an optional position remap) into a fresh
    /// bucket file.
    fn rewrite(&self, state: &mut InfState, remap: Option<&PositionMap>) -> CoreResult<()> {
        let Some(paths) = &self.paths else {
            // Memory-backed: just remap the delta in place.
            if let Some(remap) = remap {
                for ops in state.delta.values_mut() {
                    let mut positions = Vec::new();
                    for op in ops.drain(..) {
                        match op {
                            DeltaOp::Add(pos) => positions.push(pos),
                            DeltaOp::Remove(pos) => positions.retain(|p| *p != pos),
                        }
                    }
                    *ops = positions
                        .into_iter()
                        .filter_map(|p| remap.lookup(Position::new(p)))
                        .map(|p| DeltaOp::Add(p.as_u64()))
                        .collect();
                }
                state.delta.retain(|_, ops| !ops.is_empty());
                state.pending_ops = state.delta.values().map(Vec::len).sum();
            }
            return Ok(());
        };

        let mut delta_by_bucket: Vec<Vec<(&Vec<u8>, &Vec<DeltaOp>)>> =
            (0..self.bucket_count).map(|_| Vec::new()).collect();
        for (key, ops) in &state.delta {
            delta_by_bucket[self.bucket_of(key) as usize].push((key, ops));
        }

        let mut writer = BucketFileWriter::start(self.bucket_count, &paths.lookup)?;
        for bucket in 0..self.bucket_count {
            let mut entries = self.read_bucket(state, bucket)?;
            for (key, ops) in &delta_by_bucket[bucket as usize] {
                let at = match entries.iter().position(|(k, _)| k == *key) {
                    Some(at) => at,
                    None => {
                        entries.push(((*key).clone(), Vec::new()));
                        entries.len() - 1
                    }
                };
                let positions = &mut entries[at].1;
                for op in ops.iter() {
                    match op {
                        DeltaOp::Add(pos) => positions.push(*pos),
                        DeltaOp::Remove(pos) => positions.retain(|p| p != pos),
                    }
                }
            }
            for (key, mut positions) in entries {
                if let Some(remap) = remap {
                    positions = positions
                        .into_iter()
                        .filter_map(|p| remap.lookup(Position::new(p)).map(Position::as_u64))
                        .collect();
                }
                if !positions.is_empty() {
                    writer.entry(bucket, &key, &positions)?;
                }
            }
        }

        let (directory, base_keys) = writer.finish(&paths.lookup)?;
        clear_updates(&paths.updates)?;
        state.directory = Some(directory);
        state.base_keys = base_keys;
        state.delta.clear();
        state.pending_ops = 0;
        self.cache.lock().clear();
        debug!(field = %self.field, keys = base_keys, "merged infinite index delta");
        Ok(())
    }
}

impl PositionIndex for InfiniteInner {
    fn field_tag(&self) -> u16 {
        self.tag
    }

    fn field_name(&self) -> &str {
        &self.field
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Infinite
    }

    fn on_add(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        self.push_op(key_bytes(record, self.tag)?, DeltaOp::Add(pos.as_u64()))
    }

    fn on_delete(&self, record: &RecordValue, pos: Position) -> CoreResult<()> {
        self.push_op(key_bytes(record, self.tag)?, DeltaOp::Remove(pos.as_u64()))
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
        self.push_op(key.clone(), DeltaOp::Remove(old_pos.as_u64()))?;
        self.push_op(key, DeltaOp::Add(new_pos.as_u64()))
    }

    fn on_prune(&self, remap: &PositionMap) -> CoreResult<()> {
        let mut state = self.state.write();
        self.rewrite(&mut state, Some(remap))
    }

    fn flush(&self, stamp: DumpStamp) -> CoreResult<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let mut state = self.state.write();
        if state.directory.is_some() && state.pending_ops <= LOG_FLUSH_LIMIT {
            let mut ops = Vec::with_capacity(state.pending_ops);
            for (key, delta_ops) in &state.delta {
                for op in delta_ops {
                    ops.push(match op {
                        DeltaOp::Add(pos) => UpdateOp::Add {
                            key: key.clone(),
                            pos: *pos,
                        },
                        DeltaOp::Remove(pos) => UpdateOp::Remove {
                            key: key.clone(),
                            pos: *pos,
                        },
                    });
                }
            }
            // The delta holds every op since the last bucket rewrite,
            // including ones replayed from the log at attach, so the
            // log is rewritten rather than appended to.
            clear_updates(&paths.updates)?;
            append_updates(&paths.updates, &ops)?;
        } else {
            self.rewrite(&mut state, None)?;
        }
        IndexMeta {
            kind: IndexKind::Infinite,
            tag: self.tag,
            field: self.field.clone(),
            stamp,
            bucket_count: self.bucket_count,
        }
        .save(&paths.meta)
    }

    fn num_keys(&self) -> usize {
        let state = self.state.read();
        state.base_keys as usize + state.delta.len()
    }
}

fn key_positions(entries: &[(Vec<u8>, Vec<u64>)], key: &[u8]) -> Vec<u64> {
    entries
        .iter()
        .find(|(k, _)| k.as_slice() == key)
        .map(|(_, positions)| positions.clone())
        .unwrap_or_default()
}

fn parse_bucket(bytes: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u64>)>> {
    let truncated = || CoreError::invalid_format("bucket payload truncated");
    let mut cursor = bytes;
    let mut entries = Vec::new();
    while !cursor.is_empty() {
        let mut u32_buf = [0u8; 4];
        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let key_len = u32::from_le_bytes(u32_buf) as usize;
        if cursor.len() < key_len {
            return Err(truncated());
        }
        let (key, rest) = cursor.split_at(key_len);
        let key = key.to_vec();
        cursor = rest;
        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let npos = u32::from_le_bytes(u32_buf) as usize;
        if cursor.len() < npos * 8 {
            return Err(truncated());
        }
        let mut positions = Vec::with_capacity(npos);
        let mut u64_buf = [0u8; 8];
        for _ in 0..npos {
            cursor.read_exact(&mut u64_buf)?;
            positions.push(u64::from_le_bytes(u64_buf));
        }
        entries.push((key, positions));
    }
    Ok(entries)
}

/// Streams a bucket file out in bucket order, then backpatches the
/// directory and atomically replaces the target path.
struct BucketFileWriter {
    file: tempfile::NamedTempFile,
    bucket_count: u32,
    directory: Vec<(u64, u32)>,
    offset: u64,
    current_bucket: Option<u32>,
    bucket_start: u64,
    key_count: u64,
}

impl BucketFileWriter {
    /// Opens a temp file next to `target` so the final rename stays on
    /// one filesystem.
    fn start(bucket_count: u32, target: &std::path::Path) -> CoreResult<Self> {
        let dir = target.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        let header_len = 9 + u64::from(bucket_count) * 12;
        file.write_all(BUCKET_MAGIC)?;
        file.write_all(&[BUCKET_VERSION])?;
        file.write_all(&bucket_count.to_le_bytes())?;
        // Directory placeholder, backpatched in finish().
        file.write_all(&vec![0u8; bucket_count as usize * 12])?;
        Ok(Self {
            file,
            bucket_count,
            directory: vec![(0, 0); bucket_count as usize],
            offset: header_len,
            current_bucket: None,
            bucket_start: header_len,
            key_count: 0,
        })
    }

    /// Appends one key entry. Buckets must arrive in ascending order.
    fn entry(&mut self, bucket: u32, key: &[u8], positions: &[u64]) -> CoreResult<()> {
        debug_assert!(bucket < self.bucket_count);
        if self.current_bucket != Some(bucket) {
            self.close_bucket();
            self.current_bucket = Some(bucket);
            self.bucket_start = self.offset;
        }
        let mut buf = Vec::with_capacity(8 + key.len() + positions.len() * 8);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(positions.len() as u32).to_le_bytes());
        for pos in positions {
            buf.extend_from_slice(&pos.to_le_bytes());
        }
        self.file.write_all(&buf)?;
        self.offset += buf.len() as u64;
        self.key_count += 1;
        Ok(())
    }

    fn close_bucket(&mut self) {
        if let Some(bucket) = self.current_bucket.take() {
            self.directory[bucket as usize] =
                (self.bucket_start, (self.offset - self.bucket_start) as u32);
        }
    }

    fn finish(mut self, target: &std::path::Path) -> CoreResult<(Vec<(u64, u32)>, u64)> {
        self.close_bucket();
        self.file.seek(SeekFrom::Start(9))?;
        let mut dir_bytes = Vec::with_capacity(self.directory.len() * 12);
        for &(offset, len) in &self.directory {
            dir_bytes.extend_from_slice(&offset.to_le_bytes());
            dir_bytes.extend_from_slice(&len.to_le_bytes());
        }
        self.file.write_all(&dir_bytes)?;
        self.file.flush()?;
        self.file
            .persist(target)
            .map_err(|e| CoreError::Io(e.error))?;
        Ok((self.directory, self.key_count))
    }
}

/// Reads the directory of a bucket file, returning it with the key
/// count summed from the buckets.
fn read_directory(path: &std::path::Path) -> CoreResult<(Vec<(u64, u32)>, u64)> {
    let mut file = fs::File::open(path)?;
    let mut header = [0u8; 9];
    file.read_exact(&mut header)
        .map_err(|_| CoreError::invalid_format("bucket file truncated"))?;
    if &header[..4] != BUCKET_MAGIC {
        return Err(CoreError::invalid_format("bad bucket file magic"));
    }
    if header[4] != BUCKET_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported bucket file version {}",
            header[4]
        )));
    }
    let bucket_count = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);

    let mut dir_bytes = vec![0u8; bucket_count as usize * 12];
    file.read_exact(&mut dir_bytes)
        .map_err(|_| CoreError::invalid_format("bucket directory truncated"))?;
    let mut directory = Vec::with_capacity(bucket_count as usize);
    let mut key_count = 0u64;
    for chunk in dir_bytes.chunks_exact(12) {
        let offset = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        let len = u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]);
        directory.push((offset, len));
        if len > 0 {
            file.seek(SeekFrom::Start(offset))?;
            let mut bytes = vec![0u8; len as usize];
            file.read_exact(&mut bytes)?;
            key_count += parse_bucket(&bytes)?.len() as u64;
        }
    }
    Ok((directory, key_count))
}
