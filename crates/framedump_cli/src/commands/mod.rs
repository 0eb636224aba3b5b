//! CLI command implementations.

pub mod inspect;
pub mod prune;
pub mod repair;
pub mod verify;

use std::path::{Path, PathBuf};

/// Frame header length in bytes.
pub(crate) const HEADER_LEN: u64 = 4;
/// High bit of the length prefix marks a tombstoned frame.
pub(crate) const TOMBSTONE_FLAG: u32 = 0x8000_0000;
/// Low 31 bits of the length prefix hold the payload length.
pub(crate) const LEN_MASK: u32 = 0x7FFF_FFFF;
/// Smallest payload an encoded record can have (the end sentinel).
pub(crate) const MIN_PAYLOAD: u32 = 2;

/// Builds the path of a side file, `dump.ext` to `dump.ext.suffix`.
pub(crate) fn side_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Raw statistics collected by a single pass over a dump file's frames.
#[derive(Debug, Default)]
pub(crate) struct FrameScan {
    /// Live frames.
    pub live: u64,
    /// Tombstoned frames.
    pub tombstones: u64,
    /// Bytes held by tombstoned frames, headers included.
    pub tombstoned_bytes: u64,
    /// Bytes after the last plausible frame.
    pub trailing_bytes: u64,
    /// Byte offsets of live frames, in file order.
    pub live_positions: Vec<u64>,
}

/// Walks frame headers without decoding payloads.
pub(crate) fn scan_frames(
    backend: &dyn framedump_storage::StorageBackend,
) -> Result<FrameScan, Box<dyn std::error::Error>> {
    let size = backend.size()?;
    let mut scan = FrameScan::default();
    let mut pos = 0u64;

    while pos + HEADER_LEN <= size {
        let header = backend.read_at(pos, HEADER_LEN as usize)?;
        let raw = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = raw & LEN_MASK;
        if len < MIN_PAYLOAD || pos + HEADER_LEN + u64::from(len) > size {
            scan.trailing_bytes = size - pos;
            break;
        }
        if raw & TOMBSTONE_FLAG != 0 {
            scan.tombstones += 1;
            scan.tombstoned_bytes += HEADER_LEN + u64::from(len);
        } else {
            scan.live += 1;
            scan.live_positions.push(pos);
        }
        pos += HEADER_LEN + u64::from(len);
    }
    if scan.trailing_bytes == 0 && pos < size {
        scan.trailing_bytes = size - pos;
    }

    Ok(scan)
}
