//! Multithreaded wrappers over a dump.
//!
//! [`SharedDump`] serializes mutation behind a mutex so many threads
//! can feed one dump. [`read_all_parallel`] splits a full read across
//! worker threads; decoding dominates a bulk read, and decoding is
//! embarrassingly parallel even though the backend serializes the raw
//! I/O underneath.

use std::sync::Arc;

use framedump_codec::DumpRecord;
use parking_lot::Mutex;
use tracing::warn;

use crate::dump::{Dump, DumpStats};
use crate::error::{CoreError, CoreResult};
use crate::types::Position;

/// A cloneable, thread-safe handle over a dump.
///
/// Every operation takes the internal lock for its full duration, so
/// operations from different threads interleave but never overlap.
pub struct SharedDump<R: DumpRecord> {
    inner: Arc<Mutex<Dump<R>>>,
}

impl<R: DumpRecord> Clone for SharedDump<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: DumpRecord> SharedDump<R> {
    /// Wraps a dump for shared use.
    #[must_use]
    pub fn new(dump: Dump<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dump)),
        }
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Dump::add`].
    pub fn add(&self, record: &R) -> CoreResult<Position> {
        self.inner.lock().add(record)
    }

    /// Appends a record, logging instead of returning a failure.
    ///
    /// For producer threads that must not stop on a single bad record,
    /// such as log shippers.
    pub fn add_silently(&self, record: &R) {
        if let Err(err) = self.inner.lock().add(record) {
            warn!(error = %err, "dropping record that failed to append");
        }
    }

    /// Reads the record at `pos`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Dump::get`].
    pub fn get(&self, pos: Position) -> CoreResult<R> {
        self.inner.lock().get(pos)
    }

    /// Tombstones the record at `pos`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Dump::delete_at`].
    pub fn delete_at(&self, pos: Position) -> CoreResult<R> {
        self.inner.lock().delete_at(pos)
    }

    /// Replaces the record at `pos`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Dump::update`].
    pub fn update(&self, pos: Position, record: &R) -> CoreResult<(R, Position)> {
        self.inner.lock().update(pos, record)
    }

    /// Live record count.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.inner.lock().record_count()
    }

    /// Size and tombstone counters.
    #[must_use]
    pub fn stats(&self) -> DumpStats {
        self.inner.lock().stats()
    }

    /// Runs `f` with exclusive access to the dump, for multi-step
    /// operations that must not interleave with other threads.
    pub fn with<T>(&self, f: impl FnOnce(&mut Dump<R>) -> T) -> T {
        f(&mut self.inner.lock())
    }

    /// Unwraps and closes the dump.
    ///
    /// # Errors
    ///
    /// Fails when other handles are still alive, or on close errors.
    pub fn close(self) -> CoreResult<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => Err(CoreError::unsupported(
                "cannot close a shared dump while other handles exist",
            )),
        }
    }
}

/// Reads every live record using `threads` worker threads.
///
/// The result is in position order, the same order a sequential
/// [`Dump::iter`] yields.
///
/// # Errors
///
/// Fails on the first I/O or decode error any worker hits.
pub fn read_all_parallel<R>(dump: &Dump<R>, threads: usize) -> CoreResult<Vec<R>>
where
    R: DumpRecord + Send,
{
    let positions = dump.live_positions()?;
    read_positions_parallel(dump, &positions, threads)
}

/// Reads the records at `positions` using `threads` worker threads,
/// preserving the order of `positions` in the result. Takes an index
/// lookup's position list without forcing a full scan.
///
/// Positions are partitioned into contiguous ranges, one per worker,
/// so each worker reads a mostly-sequential byte range.
///
/// # Errors
///
/// Fails on the first I/O or decode error any worker hits, including
/// a position that no longer refers to a live frame.
pub fn read_positions_parallel<R>(
    dump: &Dump<R>,
    positions: &[Position],
    threads: usize,
) -> CoreResult<Vec<R>>
where
    R: DumpRecord + Send,
{
    if positions.is_empty() {
        return Ok(Vec::new());
    }
    let threads = threads.max(1).min(positions.len());
    let chunk_size = positions.len().div_ceil(threads);

    let mut slots: Vec<Option<R>> = Vec::with_capacity(positions.len());
    slots.resize_with(positions.len(), || None);

    std::thread::scope(|scope| -> CoreResult<()> {
        let mut handles = Vec::with_capacity(threads);
        for (slot_chunk, pos_chunk) in slots
            .chunks_mut(chunk_size)
            .zip(positions.chunks(chunk_size))
        {
            handles.push(scope.spawn(move || -> CoreResult<()> {
                for (slot, &pos) in slot_chunk.iter_mut().zip(pos_chunk) {
                    *slot = Some(dump.get(pos)?);
                }
                Ok(())
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(CoreError::corruption("reader thread panicked")),
            }
        }
        Ok(())
    })?;

    let mut records = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Some(record) => records.push(record),
            None => return Err(CoreError::corruption("reader thread left a gap")),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpConfig;
    use crate::testutil::Event;

    #[test]
    fn threads_append_through_a_shared_handle() {
        let dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let shared = SharedDump::new(dump);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let handle = shared.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        handle.add(&Event::new(t * 100 + i, "w")).unwrap();
                    }
                });
            }
        });

        assert_eq!(shared.record_count(), 100);
        let mut ids: Vec<i64> =
            shared.with(|dump| dump.iter().unwrap().map(|r| r.unwrap().id).collect());
        ids.sort_unstable();
        let mut expected: Vec<i64> =
            (0..4).flat_map(|t| (0..25).map(move |i| t * 100 + i)).collect();
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    #[test]
    fn close_fails_while_cloned() {
        let dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let shared = SharedDump::new(dump);
        let other = shared.clone();
        assert!(shared.close().is_err());
        assert!(other.close().is_ok());
    }

    #[test]
    fn parallel_read_matches_sequential_order() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        for id in 0..200 {
            dump.add(&Event::new(id, "bulk")).unwrap();
        }
        let doomed = dump.live_positions().unwrap()[10];
        dump.delete_at(doomed).unwrap();

        let sequential: Vec<i64> = dump.iter().unwrap().map(|r| r.unwrap().id).collect();
        let parallel: Vec<i64> = read_all_parallel(&dump, 4)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn parallel_read_of_index_positions() {
        use framedump_codec::FieldValue;

        use crate::index::GroupIndex;

        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        let index = GroupIndex::attach(&mut dump, "label").unwrap();
        for id in 0..60 {
            let label = if id % 3 == 0 { "fizz" } else { "plain" };
            dump.add(&Event::new(id, label)).unwrap();
        }

        let key = FieldValue::Str("fizz".into());
        let positions = index.positions_of(&key).unwrap();
        let records = read_positions_parallel(&dump, &positions, 4).unwrap();
        let ids: Vec<i64> = records.iter().map(|e| e.id).collect();
        let expected: Vec<i64> = (0..60).filter(|id| id % 3 == 0).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn parallel_read_of_empty_dump() {
        let dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        assert!(read_all_parallel(&dump, 8).unwrap().is_empty());
    }

    #[test]
    fn more_threads_than_records() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        dump.add(&Event::new(1, "solo")).unwrap();
        let records = read_all_parallel(&dump, 16).unwrap();
        assert_eq!(records.len(), 1);
    }
}
