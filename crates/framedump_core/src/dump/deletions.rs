//! Tombstone tracking.
//!
//! Deleting a record never rewrites the dump file; the frame's position
//! and full length are recorded here and the bytes are reclaimed by the
//! next prune. The set is persisted to a `.deletions` side file at
//! close. If the process dies before close, the stale meta fingerprint
//! forces a full rescan on reopen, which rebuilds the set from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::types::Position;

const MAGIC: &[u8; 4] = b"FDDL";
const VERSION: u8 = 1;

/// The set of tombstoned frames, keyed by position.
#[derive(Debug, Default, Clone)]
pub struct DeletionSet {
    /// Position to full frame length, length prefix included.
    entries: BTreeMap<u64, u32>,
}

impl DeletionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the frame at `pos` deleted. `frame_len` is the full frame
    /// length including the 4-byte length prefix.
    pub fn insert(&mut self, pos: Position, frame_len: u32) {
        self.entries.insert(pos.as_u64(), frame_len);
    }

    /// Returns `true` if the frame at `pos` is tombstoned.
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        self.entries.contains_key(&pos.as_u64())
    }

    /// Number of tombstoned frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is tombstoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes occupied by tombstoned frames.
    #[must_use]
    pub fn tombstoned_bytes(&self) -> u64 {
        self.entries.values().map(|&len| u64::from(len)).sum()
    }

    /// Discards all tombstones. Called after a prune rewrote the file.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates tombstones in ascending position order.
    pub fn iter(&self) -> impl Iterator<Item = (Position, u32)> + '_ {
        self.entries.iter().map(|(&pos, &len)| (Position::new(pos), len))
    }

    /// Loads the set from a side file. A missing file is an empty set.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut cursor = &bytes[..];
        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| CoreError::invalid_format("deletions file truncated"))?;
        if &magic != MAGIC {
            return Err(CoreError::invalid_format("bad deletions file magic"));
        }
        let mut version = [0u8; 1];
        cursor
            .read_exact(&mut version)
            .map_err(|_| CoreError::invalid_format("deletions file truncated"))?;
        if version[0] != VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported deletions file version {}",
                version[0]
            )));
        }

        let mut count_buf = [0u8; 4];
        cursor
            .read_exact(&mut count_buf)
            .map_err(|_| CoreError::invalid_format("deletions file truncated"))?;
        let count = u32::from_le_bytes(count_buf) as usize;
        if cursor.len() != count * 12 {
            return Err(CoreError::invalid_format(
                "deletions file length does not match entry count",
            ));
        }

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let mut pos_buf = [0u8; 8];
            let mut len_buf = [0u8; 4];
            cursor.read_exact(&mut pos_buf)?;
            cursor.read_exact(&mut len_buf)?;
            entries.insert(u64::from_le_bytes(pos_buf), u32::from_le_bytes(len_buf));
        }
        Ok(Self { entries })
    }

    /// Writes the set to a side file, replacing any previous contents.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let mut buf = Vec::with_capacity(9 + self.entries.len() * 12);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (&pos, &len) in &self.entries {
            buf.extend_from_slice(&pos.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }

        let mut file = fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_tombstoned_bytes() {
        let mut set = DeletionSet::new();
        set.insert(Position::new(0), 20);
        set.insert(Position::new(20), 36);
        assert_eq!(set.len(), 2);
        assert_eq!(set.tombstoned_bytes(), 56);
        assert!(set.contains(Position::new(20)));
        assert!(!set.contains(Position::new(21)));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.deletions");

        let mut set = DeletionSet::new();
        set.insert(Position::new(100), 44);
        set.insert(Position::new(8), 12);
        set.save(&path).unwrap();

        let loaded = DeletionSet::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(Position::new(8)));
        assert_eq!(loaded.tombstoned_bytes(), 56);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = DeletionSet::load(&dir.path().join("nope.deletions")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.deletions");
        fs::write(&path, b"XXXX\x01\x00\x00\x00\x00").unwrap();
        assert!(matches!(
            DeletionSet::load(&path),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn truncated_entries_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.deletions");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]); // only one of two entries
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            DeletionSet::load(&path),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
