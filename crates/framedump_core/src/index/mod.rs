//! Secondary indexes over one field of a dump.
//!
//! Three variants share the [`PositionIndex`] registration contract:
//!
//! - [`UniqueIndex`] — one position per key, last writer wins
//! - [`GroupIndex`] — a position list per key, fully in memory
//! - [`InfiniteIndex`] — a group index bucketed on disk, for key
//!   populations that do not fit in memory
//!
//! Keys are the canonical encoded bytes of the indexed field value, so
//! any field kind can be indexed. Indexes persist next to the dump
//! file, stamped with the dump state they reflect; a stamp mismatch at
//! attach triggers a transparent rebuild.

mod discovery;
mod group;
mod infinite;
mod persistence;
mod traits;
mod unique;

pub use discovery::{discover, DiscoveredIndex};
pub use group::GroupIndex;
pub use infinite::{InfiniteIndex, DEFAULT_BUCKET_COUNT};
pub use traits::{IndexKind, PositionIndex};
pub use unique::UniqueIndex;
