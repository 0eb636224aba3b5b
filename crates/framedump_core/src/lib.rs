//! # framedump core
//!
//! An append-mostly record store in a single file, with secondary
//! indexes, external sorting, and offline repair.
//!
//! The data file is a sequence of length-prefixed frames, each holding
//! one record in the field-tagged encoding of `framedump_codec`.
//! Appends go to the end; deletes set a tombstone bit and reclaim
//! nothing until a prune rewrites the file; updates rewrite in place
//! when the replacement fits and relocate otherwise. Record positions
//! are stable byte offsets, which is what the index layer stores.
//!
//! ## Quick start
//!
//! ```no_run
//! use framedump_core::{Dump, DumpConfig, UniqueIndex};
//! use framedump_codec::{
//!     CodecResult, DumpRecord, FieldDescriptor, FieldKind, FieldValue,
//!     RecordValue, Schema,
//! };
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! static USER_SCHEMA: Schema = Schema::new(
//!     "User",
//!     &[
//!         FieldDescriptor::new(1, "id", FieldKind::I64),
//!         FieldDescriptor::new(2, "name", FieldKind::Str),
//!     ],
//! );
//!
//! impl DumpRecord for User {
//!     fn schema() -> &'static Schema {
//!         &USER_SCHEMA
//!     }
//!     fn to_value(&self) -> RecordValue {
//!         RecordValue::new()
//!             .with(1, FieldValue::I64(self.id))
//!             .with(2, FieldValue::Str(self.name.clone()))
//!     }
//!     fn from_value(value: &RecordValue) -> CodecResult<Self> {
//!         Ok(Self {
//!             id: value.get_i64(1)?,
//!             name: value.get_str(2)?.to_owned(),
//!         })
//!     }
//! }
//!
//! fn main() -> framedump_core::CoreResult<()> {
//!     let mut dump: Dump<User> = Dump::open("users.dump", DumpConfig::new())?;
//!     let by_id = UniqueIndex::attach(&mut dump, "id")?;
//!
//!     dump.add(&User { id: 1, name: "ada".into() })?;
//!     let found = by_id.lookup(&dump, &FieldValue::I64(1))?;
//!     assert!(found.is_some());
//!     dump.close()
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod concurrent;
mod config;
mod dump;
mod error;
mod index;
mod sort;
mod types;

pub use concurrent::{read_all_parallel, read_positions_parallel, SharedDump};
pub use config::DumpConfig;
pub use dump::{
    cleanup, DeletionSet, Dump, DumpIter, DumpMeta, DumpStamp, DumpStats, MetaField,
    PruneStats, RepairReport,
};
pub use error::{CoreError, CoreResult};
pub use index::{
    discover, DiscoveredIndex, GroupIndex, IndexKind, InfiniteIndex, PositionIndex,
    UniqueIndex, DEFAULT_BUCKET_COUNT,
};
pub use sort::{ExternalSorter, SortedIter, DEFAULT_BATCH_SIZE};
pub use types::{AccessMode, CancelToken, Operation, Position, PositionMap};

/// Library version, for tooling banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared test fixtures.

    use framedump_codec::{
        CodecResult, DumpRecord, FieldDescriptor, FieldKind, FieldValue, RecordValue,
        Schema,
    };

    /// The record type the unit tests run against.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Event {
        pub id: i64,
        pub label: String,
    }

    impl Event {
        pub fn new(id: i64, label: &str) -> Self {
            Self {
                id,
                label: label.to_string(),
            }
        }
    }

    static EVENT_SCHEMA: Schema = Schema::new(
        "Event",
        &[
            FieldDescriptor::new(1, "id", FieldKind::I64),
            FieldDescriptor::new(2, "label", FieldKind::Str),
        ],
    );

    impl DumpRecord for Event {
        fn schema() -> &'static Schema {
            &EVENT_SCHEMA
        }

        fn to_value(&self) -> RecordValue {
            RecordValue::new()
                .with(1, FieldValue::I64(self.id))
                .with(2, FieldValue::Str(self.label.clone()))
        }

        fn from_value(value: &RecordValue) -> CodecResult<Self> {
            Ok(Self {
                id: value.get_i64(1)?,
                label: value.get_str(2)?.to_owned(),
            })
        }
    }
}
