//! # framedump storage
//!
//! Storage backend trait and implementations for framedump.
//!
//! This crate provides the lowest-level storage abstraction for the dump
//! store. Backends are **opaque byte stores** — they do not interpret the
//! data they hold.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, overwrite, flush)
//! - No knowledge of frames, deletion sets, or index tables
//! - Must be `Send + Sync` for concurrent readers
//! - The dump layer owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] — for testing and ephemeral dumps
//! - [`FileBackend`] — for persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use framedump_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
