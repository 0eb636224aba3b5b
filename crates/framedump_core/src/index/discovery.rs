//! Discovery of persisted indexes next to a dump file.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::dump::DumpStamp;
use crate::error::{CoreError, CoreResult};
use crate::index::persistence::IndexMeta;
use crate::index::IndexKind;

/// A persisted index found next to a dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredIndex {
    /// Name of the indexed field.
    pub field: String,
    /// Index kind.
    pub kind: IndexKind,
    /// Dump stamp the persisted index reflects.
    pub stamp: DumpStamp,
    /// Bucket count for infinite indexes, zero otherwise.
    pub bucket_count: u32,
}

/// Lists the indexes persisted next to `dump_path`, sorted by field.
///
/// Scans the dump's directory for `<dump file name>.<field>.meta`
/// siblings. Unreadable meta files are skipped with a warning; a tool
/// inspecting a half-written directory should still see the rest.
///
/// # Errors
///
/// Fails when the dump path has no parent directory or listing it
/// fails.
pub fn discover(dump_path: &Path) -> CoreResult<Vec<DiscoveredIndex>> {
    let dir = dump_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| CoreError::unsupported("dump path has no parent directory"))?;
    let Some(file_name) = dump_path.file_name().and_then(|n| n.to_str()) else {
        return Err(CoreError::unsupported("dump path has no file name"));
    };
    let prefix = format!("{file_name}.");

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(field) = rest.strip_suffix(".meta") else {
            continue;
        };
        if field.is_empty() || field.contains('.') {
            continue;
        }
        match IndexMeta::load(&entry.path()) {
            Ok(Some(meta)) => found.push(DiscoveredIndex {
                field: meta.field,
                kind: meta.kind,
                stamp: meta.stamp,
                bucket_count: meta.bucket_count,
            }),
            Ok(None) => {}
            Err(err) => {
                warn!(file = name, error = %err, "skipping unreadable index meta");
            }
        }
    }
    found.sort_by(|a, b| a.field.cmp(&b.field));
    Ok(found)
}
