//! Offline salvage of damaged dump files.

use std::fs;
use std::io::Write;
use std::path::Path;

use framedump_codec::decode_record_any;
use tracing::{info, warn};

use crate::dump::store::{HEADER_LEN, LEN_MASK, TOMBSTONE_FLAG};
use crate::error::CoreResult;

/// Outcome of a [`cleanup`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Frames whose headers were walked.
    pub scanned: u64,
    /// Live frames that decoded and were copied out.
    pub salvaged: u64,
    /// Frames dropped: undecodable payloads and tombstones.
    pub skipped: u64,
    /// Bytes abandoned after the first implausible header.
    pub bytes_lost: u64,
}

/// Copies every salvageable record of `src` into a fresh dump at `dst`.
///
/// Runs schema-free: a frame survives if its payload decodes as a
/// well-formed record, whatever fields it carries. Tombstoned frames
/// are dropped. The walk stops at the first implausible length prefix;
/// no attempt is made to resynchronize inside arbitrary bytes, so
/// everything after that point is counted as lost.
///
/// Positions are not preserved. Indexes over the destination must be
/// rebuilt, which the stamp mismatch forces on the next attach.
///
/// # Errors
///
/// Fails on I/O errors reading `src` or writing `dst`.
pub fn cleanup(src: &Path, dst: &Path) -> CoreResult<RepairReport> {
    let bytes = fs::read(src)?;
    let mut out = fs::File::create(dst)?;
    let mut report = RepairReport::default();

    let mut pos = 0usize;
    while pos < bytes.len() {
        if pos + HEADER_LEN as usize > bytes.len() {
            report.bytes_lost = (bytes.len() - pos) as u64;
            break;
        }
        let raw = u32::from_le_bytes([
            bytes[pos],
            bytes[pos + 1],
            bytes[pos + 2],
            bytes[pos + 3],
        ]);
        let len = (raw & LEN_MASK) as usize;
        let payload_at = pos + HEADER_LEN as usize;
        if len < 2 || payload_at + len > bytes.len() {
            report.bytes_lost = (bytes.len() - pos) as u64;
            warn!(
                offset = pos,
                "implausible frame length, abandoning the rest of the file"
            );
            break;
        }

        report.scanned += 1;
        let payload = &bytes[payload_at..payload_at + len];
        if raw & TOMBSTONE_FLAG != 0 {
            report.skipped += 1;
        } else {
            match decode_record_any(payload) {
                Ok(_) => {
                    out.write_all(&(len as u32).to_le_bytes())?;
                    out.write_all(payload)?;
                    report.salvaged += 1;
                }
                Err(err) => {
                    warn!(offset = pos, error = %err, "dropping undecodable frame");
                    report.skipped += 1;
                }
            }
        }
        pos = payload_at + len;
    }

    out.sync_all()?;
    info!(
        salvaged = report.salvaged,
        skipped = report.skipped,
        lost = report.bytes_lost,
        "cleanup finished"
    );
    Ok(report)
}
