//! Prune: rewriting the dump without its tombstones.

use framedump_codec::DumpRecord;
use tracing::info;

use crate::dump::store::{Dump, HEADER_LEN, TOMBSTONE_FLAG};
use crate::error::CoreResult;
use crate::types::{CancelToken, Operation, Position, PositionMap};

/// Counters reported by a completed prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    /// Live records carried over.
    pub records_kept: u64,
    /// Tombstoned frames dropped.
    pub tombstones_dropped: u64,
    /// Bytes reclaimed from the data file.
    pub bytes_reclaimed: u64,
}

impl<R: DumpRecord> Dump<R> {
    /// Rewrites the data file with live frames only and remaps every
    /// registered index.
    ///
    /// The compacted image is staged in memory first; cancellation is
    /// checked per frame during staging, before the file is touched, so
    /// a cancelled prune leaves the dump untouched.
    ///
    /// # Errors
    ///
    /// Fails when the access mode forbids updates or deletes, when the
    /// cancel token fires, or on I/O errors.
    pub fn prune(&mut self, cancel: Option<&CancelToken>) -> CoreResult<PruneStats> {
        self.check_access(Operation::Update)?;
        self.check_access(Operation::Delete)?;

        let old_size = self.data_end;
        let mut compacted = Vec::new();
        let mut map = PositionMap::new();
        let mut kept = 0u64;
        let mut dropped = 0u64;

        let mut pos = 0u64;
        while pos < old_size {
            if let Some(token) = cancel {
                token.check()?;
            }
            let (raw, len) = self.frame_header(pos)?;
            let frame_len = HEADER_LEN + u64::from(len);
            if raw & TOMBSTONE_FLAG == 0 {
                let frame = self.backend.read_at(pos, frame_len as usize)?;
                map.push(Position::new(pos), Position::new(compacted.len() as u64));
                compacted.extend_from_slice(&frame);
                kept += 1;
            } else {
                dropped += 1;
            }
            pos += frame_len;
        }

        self.invalidate_meta()?;
        self.backend.truncate(0)?;
        self.backend.append(&compacted)?;
        self.backend.sync()?;
        self.data_end = compacted.len() as u64;
        self.deletions.clear();

        for index in &self.indexes {
            index.on_prune(&map)?;
        }

        let stats = PruneStats {
            records_kept: kept,
            tombstones_dropped: dropped,
            bytes_reclaimed: old_size - self.data_end,
        };
        info!(
            kept = stats.records_kept,
            dropped = stats.tombstones_dropped,
            reclaimed = stats.bytes_reclaimed,
            "pruned dump"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpConfig;
    use crate::error::CoreError;
    use crate::testutil::Event;

    #[test]
    fn prune_reclaims_tombstoned_bytes() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        for id in 0..10 {
            dump.add(&Event::new(id, "record")).unwrap();
        }
        let positions = dump.live_positions().unwrap();
        for pos in positions.iter().skip(1).step_by(2) {
            dump.delete_at(*pos).unwrap();
        }
        let size_before = dump.stats().size;

        let stats = dump.prune(None).unwrap();
        assert_eq!(stats.records_kept, 5);
        assert_eq!(stats.tombstones_dropped, 5);
        assert!(stats.bytes_reclaimed > 0);
        assert_eq!(dump.stats().size, size_before - stats.bytes_reclaimed);
        assert_eq!(dump.stats().tombstoned_records, 0);

        let ids: Vec<_> = dump
            .live_positions()
            .unwrap()
            .into_iter()
            .map(|p| dump.get(p).unwrap().id)
            .collect();
        assert_eq!(ids, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn prune_of_clean_dump_is_a_noop_rewrite() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        for id in 0..3 {
            dump.add(&Event::new(id, "r")).unwrap();
        }
        let size = dump.stats().size;
        let stats = dump.prune(None).unwrap();
        assert_eq!(stats.records_kept, 3);
        assert_eq!(stats.bytes_reclaimed, 0);
        assert_eq!(dump.stats().size, size);
    }

    #[test]
    fn cancelled_prune_leaves_dump_untouched() {
        let mut dump: Dump<Event> = Dump::open_in_memory(DumpConfig::new()).unwrap();
        for id in 0..4 {
            dump.add(&Event::new(id, "r")).unwrap();
        }
        let pos = dump.live_positions().unwrap()[0];
        dump.delete_at(pos).unwrap();
        let stats_before = dump.stats();

        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            dump.prune(Some(&token)),
            Err(CoreError::Cancelled)
        ));
        assert_eq!(dump.stats(), stats_before);
    }

    #[test]
    fn read_only_handle_cannot_prune() {
        let mut dump: Dump<Event> = Dump::open_in_memory(
            DumpConfig::new().access(crate::types::AccessMode::READ_ONLY),
        )
        .unwrap();
        assert!(matches!(
            dump.prune(None),
            Err(CoreError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn close_prunes_over_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.dump");

        {
            let mut dump: Dump<Event> =
                Dump::open(&path, DumpConfig::new().prune_threshold(0.3)).unwrap();
            for id in 0..4 {
                dump.add(&Event::new(id, "record")).unwrap();
            }
            let positions = dump.live_positions().unwrap();
            for pos in &positions[..3] {
                dump.delete_at(*pos).unwrap();
            }
            dump.close().unwrap();
        }

        let dump: Dump<Event> = Dump::open(&path, DumpConfig::new()).unwrap();
        assert_eq!(dump.record_count(), 1);
        assert_eq!(dump.stats().tombstoned_records, 0);
    }
}
