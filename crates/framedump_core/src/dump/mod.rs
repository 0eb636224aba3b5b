//! The append-mostly frame store.
//!
//! A dump is a single file of length-prefixed record frames plus a
//! family of side files that share its path as a prefix:
//!
//! - `X.meta` — record count, size fingerprint, schema snapshot
//! - `X.deletions` — tombstoned frame positions
//! - `X.<field>.meta` / `X.<field>.lookup` / `X.<field>.updates` —
//!   per-field index persistence
//!
//! Side files are caches. Any of them can be deleted; the dump rebuilds
//! them from the data file at the next open or attach.

mod compaction;
mod deletions;
mod iterator;
mod meta;
mod repair;
mod store;

pub use compaction::PruneStats;
pub use deletions::DeletionSet;
pub use iterator::DumpIter;
pub use meta::{DumpMeta, DumpStamp, MetaField};
pub use repair::{cleanup, RepairReport};
pub use store::{Dump, DumpStats};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Appends a dot-separated suffix to a full path, keeping the original
/// extension. `events.dump` + `meta` gives `events.dump.meta`.
pub(crate) fn side_path(base: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = base.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

/// Resolved side-file paths for a file-backed dump.
#[derive(Debug, Clone)]
pub(crate) struct DumpPaths {
    data: PathBuf,
}

impl DumpPaths {
    pub(crate) fn new(data: PathBuf) -> Self {
        Self { data }
    }

    pub(crate) fn data(&self) -> &Path {
        &self.data
    }

    pub(crate) fn meta(&self) -> PathBuf {
        side_path(&self.data, "meta")
    }

    pub(crate) fn deletions(&self) -> PathBuf {
        side_path(&self.data, "deletions")
    }

    pub(crate) fn index_meta(&self, field: &str) -> PathBuf {
        side_path(&self.data, &format!("{field}.meta"))
    }

    pub(crate) fn index_lookup(&self, field: &str) -> PathBuf {
        side_path(&self.data, &format!("{field}.lookup"))
    }

    pub(crate) fn index_updates(&self, field: &str) -> PathBuf {
        side_path(&self.data, &format!("{field}.updates"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_paths_keep_the_data_extension() {
        let paths = DumpPaths::new(PathBuf::from("/tmp/events.dump"));
        assert_eq!(paths.meta(), PathBuf::from("/tmp/events.dump.meta"));
        assert_eq!(
            paths.index_lookup("id"),
            PathBuf::from("/tmp/events.dump.id.lookup")
        );
        assert_eq!(
            paths.index_updates("label"),
            PathBuf::from("/tmp/events.dump.label.updates")
        );
    }
}
