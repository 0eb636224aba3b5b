//! External merge sort over dump records.
//!
//! Records are accumulated in memory up to a batch limit; each full
//! batch is sorted and spilled to an anonymous temp file as a run of
//! length-prefixed frames. Draining merges the in-memory remainder and
//! every spilled run through a binary heap, yielding records in
//! comparator order regardless of how many fit in memory.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use framedump_codec::{decode, encode, DumpRecord};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::CancelToken;

/// Default number of records held in memory before spilling.
pub const DEFAULT_BATCH_SIZE: usize = 64 * 1024;

type Comparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Sorts arbitrarily many records through temp-file spill.
pub struct ExternalSorter<R: DumpRecord> {
    comparator: Comparator<R>,
    batch_size: usize,
    batch: Vec<R>,
    spills: Vec<File>,
    total: u64,
    cancel: Option<CancelToken>,
}

impl<R: DumpRecord> ExternalSorter<R> {
    /// Creates a sorter with the given record ordering.
    pub fn new(comparator: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            comparator: Arc::new(comparator),
            batch_size: DEFAULT_BATCH_SIZE,
            batch: Vec::new(),
            spills: Vec::new(),
            total: 0,
            cancel: None,
        }
    }

    /// Sets how many records are held in memory before spilling.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Checks this token between records while spilling and merging.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Fails on encode or temp-file I/O errors when a full batch spills,
    /// or when the cancel token fired.
    pub fn add(&mut self, record: R) -> CoreResult<()> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        self.batch.push(record);
        self.total += 1;
        if self.batch.len() >= self.batch_size {
            self.spill()?;
        }
        Ok(())
    }

    /// Total records added.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.total
    }

    /// Returns `true` if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn spill(&mut self) -> CoreResult<()> {
        let comparator = self.comparator.clone();
        self.batch.sort_by(|a, b| comparator(a, b));

        let mut file = tempfile::tempfile()?;
        let mut buf = Vec::new();
        for record in self.batch.drain(..) {
            let payload = encode(&record)?;
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&payload);
        }
        file.write_all(&buf)?;
        file.seek(SeekFrom::Start(0))?;
        debug!(run = self.spills.len(), bytes = buf.len(), "spilled sorted run");
        self.spills.push(file);
        Ok(())
    }

    /// Finishes adding and returns the merged, ordered iterator.
    ///
    /// # Errors
    ///
    /// Fails on I/O or decode errors while priming the merge.
    pub fn into_sorted_iter(mut self) -> CoreResult<SortedIter<R>> {
        let comparator = self.comparator.clone();
        self.batch.sort_by(|a, b| comparator(a, b));

        let mut sources: Vec<Source<R>> = self
            .spills
            .into_iter()
            .map(|file| Source::Run(RunReader::new(file)))
            .collect();
        sources.push(Source::Memory(std::mem::take(&mut self.batch).into_iter()));

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (id, source) in sources.iter_mut().enumerate() {
            if let Some(record) = source.next()? {
                heap.push(Reverse(MergeEntry {
                    record,
                    source: id,
                    comparator: self.comparator.clone(),
                }));
            }
        }

        Ok(SortedIter {
            sources,
            heap,
            comparator: self.comparator,
            cancel: self.cancel,
        })
    }
}

enum Source<R: DumpRecord> {
    Memory(std::vec::IntoIter<R>),
    Run(RunReader),
}

impl<R: DumpRecord> Source<R> {
    fn next(&mut self) -> CoreResult<Option<R>> {
        match self {
            Source::Memory(iter) => Ok(iter.next()),
            Source::Run(reader) => reader.next(),
        }
    }
}

struct RunReader {
    reader: BufReader<File>,
}

impl RunReader {
    fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
        }
    }

    fn next<R: DumpRecord>(&mut self) -> CoreResult<Option<R>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(decode(&payload)?))
    }
}

struct MergeEntry<R> {
    record: R,
    source: usize,
    comparator: Comparator<R>,
}

impl<R> PartialEq for MergeEntry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<R> Eq for MergeEntry<R> {}

impl<R> PartialOrd for MergeEntry<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for MergeEntry<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Source id breaks ties so equal records drain oldest run first.
        (self.comparator)(&self.record, &other.record)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Iterator over the merged, ordered output of an [`ExternalSorter`].
pub struct SortedIter<R: DumpRecord> {
    sources: Vec<Source<R>>,
    heap: BinaryHeap<Reverse<MergeEntry<R>>>,
    comparator: Comparator<R>,
    cancel: Option<CancelToken>,
}

impl<R: DumpRecord> SortedIter<R> {
    fn advance(&mut self) -> CoreResult<Option<R>> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.sources[entry.source].next()? {
            self.heap.push(Reverse(MergeEntry {
                record: next,
                source: entry.source,
                comparator: self.comparator.clone(),
            }));
        }
        Ok(Some(entry.record))
    }
}

impl<R: DumpRecord> Iterator for SortedIter<R> {
    type Item = CoreResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.heap.clear();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Event;

    fn by_id() -> impl Fn(&Event, &Event) -> Ordering + Send + Sync + 'static {
        |a: &Event, b: &Event| a.id.cmp(&b.id)
    }

    fn sorted_ids(sorter: ExternalSorter<Event>) -> Vec<i64> {
        sorter
            .into_sorted_iter()
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect()
    }

    #[test]
    fn sorts_in_memory_batch() {
        let mut sorter = ExternalSorter::new(by_id());
        for id in [5, 1, 4, 2, 3] {
            sorter.add(Event::new(id, "e")).unwrap();
        }
        assert_eq!(sorter.len(), 5);
        assert_eq!(sorted_ids(sorter), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn merges_spilled_runs() {
        // Batch size 8 forces many spills for 100 records.
        let mut sorter = ExternalSorter::new(by_id()).with_batch_size(8);
        for id in (0..100).rev() {
            sorter.add(Event::new(id, "spilled")).unwrap();
        }
        let ids = sorted_ids(sorter);
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn empty_sorter_yields_nothing() {
        let sorter: ExternalSorter<Event> = ExternalSorter::new(by_id());
        assert!(sorter.is_empty());
        assert!(sorted_ids(sorter).is_empty());
    }

    #[test]
    fn equal_records_drain_oldest_run_first() {
        let mut sorter = ExternalSorter::new(by_id()).with_batch_size(2);
        sorter.add(Event::new(1, "run0-a")).unwrap();
        sorter.add(Event::new(1, "run0-b")).unwrap();
        sorter.add(Event::new(1, "run1-a")).unwrap();
        sorter.add(Event::new(1, "run1-b")).unwrap();

        let labels: Vec<_> = sorter
            .into_sorted_iter()
            .unwrap()
            .map(|r| r.unwrap().label)
            .collect();
        assert_eq!(labels, vec!["run0-a", "run0-b", "run1-a", "run1-b"]);
    }

    #[test]
    fn cancel_stops_the_merge() {
        let token = CancelToken::new();
        let mut sorter = ExternalSorter::new(by_id()).with_cancel_token(token.clone());
        for id in 0..10 {
            sorter.add(Event::new(id, "e")).unwrap();
        }
        let mut iter = sorter.into_sorted_iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap().id, 0);
        token.cancel();
        assert!(matches!(iter.next(), Some(Err(CoreError::Cancelled))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn descending_comparator() {
        let mut sorter = ExternalSorter::new(|a: &Event, b: &Event| b.id.cmp(&a.id))
            .with_batch_size(4);
        for id in 0..12 {
            sorter.add(Event::new(id, "e")).unwrap();
        }
        assert_eq!(sorted_ids(sorter), (0..12).rev().collect::<Vec<_>>());
    }
}
