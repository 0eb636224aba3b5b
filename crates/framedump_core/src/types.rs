//! Core type definitions for framedump.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Byte offset of a frame within the dump file.
///
/// A position identifies a record until that record is deleted or the
/// dump is pruned; pruning remaps live positions through a
/// [`PositionMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub u64);

impl Position {
    /// Creates a position from a raw byte offset.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw byte offset.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos:{}", self.0)
    }
}

/// Operations a dump handle may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Decode frames: `get`, `iter`, index lookups.
    Read,
    /// Append new frames.
    Append,
    /// Rewrite or relocate existing frames.
    Update,
    /// Tombstone frames.
    Delete,
}

impl Operation {
    /// Stable name used in permission errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Append => "append",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Operation::Read => 1,
            Operation::Append => 2,
            Operation::Update => 4,
            Operation::Delete => 8,
        }
    }
}

/// The set of operations a dump handle permits.
///
/// Checked on every call; a disallowed operation surfaces
/// [`CoreError::PermissionDenied`](crate::CoreError::PermissionDenied).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode {
    bits: u8,
}

impl AccessMode {
    /// All operations permitted.
    pub const ALL: Self = Self { bits: 0b1111 };
    /// Read-only inspection handle.
    pub const READ_ONLY: Self = Self {
        bits: Operation::Read.bit(),
    };
    /// Read and append, no mutation of existing frames.
    pub const APPEND_ONLY: Self = Self {
        bits: Operation::Read.bit() | Operation::Append.bit(),
    };

    /// Builds a mode from an explicit operation list.
    #[must_use]
    pub fn of(operations: &[Operation]) -> Self {
        let mut bits = 0;
        for op in operations {
            bits |= op.bit();
        }
        Self { bits }
    }

    /// Returns `true` if the mode permits `operation`.
    #[must_use]
    pub const fn allows(self, operation: Operation) -> bool {
        self.bits & operation.bit() != 0
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for op in [
            Operation::Read,
            Operation::Append,
            Operation::Update,
            Operation::Delete,
        ] {
            if self.allows(op) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{}", op.name())?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// Cooperative cancellation signal for long operations.
///
/// Rebuilds, pruning, and sorter merges check the token at iteration
/// boundaries; a cancelled operation stops promptly and leaves all
/// completed frames valid.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once cancellation was signalled.
    ///
    /// # Errors
    ///
    /// [`CoreError::Cancelled`](crate::CoreError::Cancelled) after
    /// [`cancel`](Self::cancel) was called.
    pub fn check(&self) -> crate::CoreResult<()> {
        if self.is_cancelled() {
            Err(crate::CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Mapping from pre-prune to post-prune positions of live frames.
///
/// Built during the prune rewrite and applied to every registered index
/// in one coordinated pass.
#[derive(Debug, Default)]
pub struct PositionMap {
    /// `(old, new)` pairs, ascending by old position.
    entries: Vec<(u64, u64)>,
}

impl PositionMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a relocation. Old positions must be pushed in ascending
    /// order, which the single forward rewrite pass guarantees.
    pub fn push(&mut self, old: Position, new: Position) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |&(prev, _)| prev < old.as_u64()));
        self.entries.push((old.as_u64(), new.as_u64()));
    }

    /// Returns the post-prune position for `old`, if `old` was live.
    #[must_use]
    pub fn lookup(&self, old: Position) -> Option<Position> {
        self.entries
            .binary_search_by_key(&old.as_u64(), |&(o, _)| o)
            .ok()
            .map(|i| Position::new(self.entries[i].1))
    }

    /// Number of relocated frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no frames were relocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_presets() {
        assert!(AccessMode::ALL.allows(Operation::Delete));
        assert!(AccessMode::READ_ONLY.allows(Operation::Read));
        assert!(!AccessMode::READ_ONLY.allows(Operation::Append));
        assert!(AccessMode::APPEND_ONLY.allows(Operation::Append));
        assert!(!AccessMode::APPEND_ONLY.allows(Operation::Update));
    }

    #[test]
    fn access_mode_of_list() {
        let mode = AccessMode::of(&[Operation::Read, Operation::Delete]);
        assert!(mode.allows(Operation::Read));
        assert!(mode.allows(Operation::Delete));
        assert!(!mode.allows(Operation::Append));
    }

    #[test]
    fn access_mode_display() {
        assert_eq!(AccessMode::APPEND_ONLY.to_string(), "read+append");
        assert_eq!(AccessMode::of(&[]).to_string(), "none");
    }

    #[test]
    fn cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn position_map_lookup() {
        let mut map = PositionMap::new();
        map.push(Position::new(0), Position::new(0));
        map.push(Position::new(40), Position::new(20));
        map.push(Position::new(100), Position::new(60));

        assert_eq!(map.lookup(Position::new(40)), Some(Position::new(20)));
        assert_eq!(map.lookup(Position::new(41)), None);
        assert_eq!(map.len(), 3);
    }
}
