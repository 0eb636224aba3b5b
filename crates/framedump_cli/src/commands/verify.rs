//! Verify command implementation.

use framedump_codec::decode_record_any;
use framedump_storage::{FileBackend, StorageBackend};
use std::path::Path;

use super::{scan_frames, HEADER_LEN, LEN_MASK};

/// Runs the verify command.
///
/// Walks every frame, decodes every live payload, and reports the first
/// `limit` problems. Exits with an error when any frame fails.
pub fn run(path: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No dump found at {:?}", path).into());
    }

    let backend = FileBackend::open(path)?;
    let scan = scan_frames(&backend)?;

    let mut errors: Vec<String> = Vec::new();
    for &pos in &scan.live_positions {
        let header = backend.read_at(pos, HEADER_LEN as usize)?;
        let raw = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = (raw & LEN_MASK) as usize;
        let payload = backend.read_at(pos + HEADER_LEN, len)?;
        if let Err(err) = decode_record_any(&payload) {
            if errors.len() < limit {
                errors.push(format!("pos:{}: {}", pos, err));
            } else {
                errors.push(String::new());
                break;
            }
        }
    }
    let truncated = errors.last().is_some_and(|e| e.is_empty());
    if truncated {
        errors.pop();
    }

    println!("Verified {} live frames, {} tombstones", scan.live, scan.tombstones);
    if scan.trailing_bytes > 0 {
        println!("Warning: {} trailing bytes after the last valid frame", scan.trailing_bytes);
    }

    if errors.is_empty() {
        println!("OK: every live payload decodes");
        Ok(())
    } else {
        for error in &errors {
            println!("ERROR {}", error);
        }
        if truncated {
            println!("(more errors suppressed)");
        }
        Err(format!("{} frame(s) failed to decode", errors.len()).into())
    }
}
