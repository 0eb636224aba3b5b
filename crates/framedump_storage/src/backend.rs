//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath a dump file.
///
/// Backends are **opaque byte stores**: they never interpret frames,
/// deletion sets, or index tables. The dump layer owns all format
/// interpretation.
///
/// # Invariants
///
/// - `append` returns the offset where the data begins
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` overwrites a range that already exists; it never grows the
///   store (in-place frame updates rely on this)
/// - `flush` makes appended and overwritten data durable
/// - Backends must be `Send + Sync` for concurrent readers
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data at the end, returning the offset where it was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites `data.len()` bytes at `offset`.
    ///
    /// The whole range must already lie within the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WritePastEnd`](crate::StorageError::WritePastEnd)
    /// if the range extends past the current size, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the next append offset).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// A stronger guarantee than `flush`: file metadata is durable too.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to discard a torn trailing frame detected on open.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
