//! Position-order iteration with mutation through the cursor.

use framedump_codec::{decode_record, DumpRecord, RecordValue};

use crate::dump::store::{Dump, HEADER_LEN, TOMBSTONE_FLAG};
use crate::error::{CoreError, CoreResult};
use crate::types::Position;

struct CurrentFrame {
    pos: Position,
    value: RecordValue,
}

/// Iterator over live records in position order.
///
/// Holds the dump mutably so that [`delete_current`] and
/// [`update_current`] can mutate mid-iteration without invalidating the
/// cursor. The data end is snapshotted at construction; records
/// appended through [`update_current`] relocations land past it and are
/// not revisited.
///
/// [`delete_current`]: DumpIter::delete_current
/// [`update_current`]: DumpIter::update_current
pub struct DumpIter<'a, R: DumpRecord> {
    dump: &'a mut Dump<R>,
    next_pos: u64,
    end: u64,
    current: Option<CurrentFrame>,
    failed: bool,
}

impl<'a, R: DumpRecord> DumpIter<'a, R> {
    pub(crate) fn new(dump: &'a mut Dump<R>) -> Self {
        let end = dump.data_end;
        Self {
            dump,
            next_pos: 0,
            end,
            current: None,
            failed: false,
        }
    }

    /// Position of the record most recently yielded by `next`.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.current.as_ref().map(|c| c.pos)
    }

    /// Tombstones the record most recently yielded and returns it.
    ///
    /// # Errors
    ///
    /// Fails when nothing was yielded yet, when the current record was
    /// already deleted, or when the access mode forbids deletes.
    pub fn delete_current(&mut self) -> CoreResult<R> {
        let current = self
            .current
            .take()
            .ok_or_else(|| CoreError::unsupported("iterator has no current record"))?;
        self.dump.delete_at(current.pos)
    }

    /// Replaces the record most recently yielded, returning the prior
    /// value and the resulting position.
    ///
    /// A replacement that no longer fits in place is appended past the
    /// iteration end, so it is not yielded again by this iterator.
    ///
    /// # Errors
    ///
    /// Fails when nothing was yielded yet, when the current record was
    /// already deleted, or when the access mode forbids updates.
    pub fn update_current(&mut self, record: &R) -> CoreResult<(R, Position)> {
        let current = self
            .current
            .take()
            .ok_or_else(|| CoreError::unsupported("iterator has no current record"))?;
        self.dump.update(current.pos, record)
    }

    /// The current record in its dynamic representation.
    #[must_use]
    pub fn current_value(&self) -> Option<&RecordValue> {
        self.current.as_ref().map(|c| &c.value)
    }

    fn next_frame(&mut self) -> CoreResult<Option<(Position, RecordValue)>> {
        while self.next_pos < self.end {
            let pos = self.next_pos;
            let (raw, len) = self.dump.frame_header(pos)?;
            self.next_pos = pos + HEADER_LEN + u64::from(len);
            if raw & TOMBSTONE_FLAG != 0 {
                continue;
            }
            let payload = self
                .dump
                .backend
                .read_at(pos + HEADER_LEN, len as usize)?;
            let value = decode_record(&payload, R::schema())?;
            return Ok(Some((Position::new(pos), value)));
        }
        Ok(None)
    }
}

impl<R: DumpRecord> Iterator for DumpIter<'_, R> {
    type Item = CoreResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_frame() {
            Ok(Some((pos, value))) => match R::from_value(&value) {
                Ok(record) => {
                    self.current = Some(CurrentFrame { pos, value });
                    Some(Ok(record))
                }
                Err(err) => {
                    self.failed = true;
                    Some(Err(err.into()))
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpConfig;
    use crate::testutil::Event;

    fn dump_with(ids: std::ops::Range<i64>) -> Dump<Event> {
        let mut dump = Dump::open_in_memory(DumpConfig::new()).unwrap();
        for id in ids {
            dump.add(&Event::new(id, "e")).unwrap();
        }
        dump
    }

    fn collect_ids(dump: &mut Dump<Event>) -> Vec<i64> {
        dump.iter()
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect()
    }

    #[test]
    fn yields_in_position_order() {
        let mut dump = dump_with(0..5);
        assert_eq!(collect_ids(&mut dump), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn skips_tombstones() {
        let mut dump = dump_with(0..5);
        let positions = dump.live_positions().unwrap();
        dump.delete_at(positions[1]).unwrap();
        dump.delete_at(positions[3]).unwrap();
        assert_eq!(collect_ids(&mut dump), vec![0, 2, 4]);
    }

    #[test]
    fn delete_current_mid_iteration() {
        let mut dump = dump_with(0..6);
        {
            let mut iter = dump.iter().unwrap();
            while let Some(record) = iter.next() {
                if record.unwrap().id % 2 == 0 {
                    iter.delete_current().unwrap();
                }
            }
        }
        assert_eq!(collect_ids(&mut dump), vec![1, 3, 5]);
        assert_eq!(dump.record_count(), 3);
    }

    #[test]
    fn delete_current_before_next_fails() {
        let mut dump = dump_with(0..2);
        let mut iter = dump.iter().unwrap();
        assert!(iter.delete_current().is_err());
        iter.next().unwrap().unwrap();
        iter.delete_current().unwrap();
        // Current is consumed, a second delete needs another next.
        assert!(iter.delete_current().is_err());
    }

    #[test]
    fn update_current_in_place_is_revisited_never() {
        let mut dump = dump_with(0..3);
        {
            let mut iter = dump.iter().unwrap();
            while let Some(record) = iter.next() {
                let record = record.unwrap();
                if record.id == 1 {
                    iter.update_current(&Event::new(10, "e")).unwrap();
                }
            }
        }
        assert_eq!(collect_ids(&mut dump), vec![0, 10, 2]);
    }

    #[test]
    fn relocating_update_is_not_yielded_again() {
        let mut dump = dump_with(0..3);
        {
            let mut iter = dump.iter().unwrap();
            let mut yielded = 0;
            while let Some(record) = iter.next() {
                let record = record.unwrap();
                yielded += 1;
                if record.id == 0 {
                    iter.update_current(&Event::new(0, "a label far too long to fit"))
                        .unwrap();
                }
            }
            assert_eq!(yielded, 3);
        }
        let ids = collect_ids(&mut dump);
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn appends_during_iteration_are_not_yielded() {
        let mut dump = dump_with(0..2);
        let mut seen = 0;
        let mut pending = Vec::new();
        {
            let mut iter = dump.iter().unwrap();
            while let Some(record) = iter.next() {
                let record = record.unwrap();
                seen += 1;
                pending.push(Event::new(record.id + 100, "late"));
            }
        }
        for event in pending {
            dump.add(&event).unwrap();
        }
        assert_eq!(seen, 2);
        assert_eq!(dump.record_count(), 4);
    }

    #[test]
    fn position_tracks_the_yielded_record() {
        let mut dump = dump_with(0..2);
        let positions = dump.live_positions().unwrap();
        let mut iter = dump.iter().unwrap();
        assert!(iter.position().is_none());
        iter.next().unwrap().unwrap();
        assert_eq!(iter.position(), Some(positions[0]));
        iter.next().unwrap().unwrap();
        assert_eq!(iter.position(), Some(positions[1]));
    }
}
