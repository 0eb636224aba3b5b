//! Error types for framedump core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in framedump core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] framedump_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] framedump_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame or side-file is corrupted.
    ///
    /// Fatal to a normal iteration; only the repair pass tolerates it.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The handle's access mode does not permit the operation.
    ///
    /// Never silently downgraded; always surfaced to the caller.
    #[error("operation `{operation}` not permitted by access mode {mode}")]
    PermissionDenied {
        /// The attempted operation.
        operation: &'static str,
        /// The handle's access mode, rendered for diagnostics.
        mode: String,
    },

    /// An operation the target structure explicitly does not support.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the unsupported operation.
        message: String,
    },

    /// A position does not refer to a live frame.
    #[error("invalid position {position}: no live record at this offset")]
    InvalidPosition {
        /// The offending byte offset.
        position: u64,
    },

    /// The dump handle is already closed.
    #[error("dump is closed")]
    DumpClosed,

    /// Another handle holds an exclusive lock on the dump file.
    #[error("dump locked: another handle has exclusive access")]
    DumpLocked,

    /// A persisted meta or lookup file has an invalid format.
    #[error("invalid file format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The operation was cancelled through its cancellation token.
    ///
    /// Writes completed before the cancellation point remain valid.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }
}
