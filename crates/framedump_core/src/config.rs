//! Dump configuration.

use crate::types::AccessMode;

/// Tuning and policy knobs for opening a dump.
#[derive(Debug, Clone, Copy)]
pub struct DumpConfig {
    /// Create the dump file if it does not exist.
    pub create_if_missing: bool,
    /// Fraction of tombstoned bytes (over total bytes) above which
    /// close triggers an automatic prune. `1.0` disables it.
    pub prune_threshold: f64,
    /// Open with a shared advisory lock instead of an exclusive one.
    ///
    /// Shared handles are forced read-only; the access mode is
    /// intersected with [`AccessMode::READ_ONLY`] on open.
    pub shared: bool,
    /// Operations this handle is permitted to perform.
    pub access: AccessMode,
}

impl DumpConfig {
    /// Returns the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            create_if_missing: true,
            prune_threshold: 0.5,
            shared: false,
            access: AccessMode::ALL,
        }
    }

    /// Sets whether a missing dump file is created on open.
    #[must_use]
    pub const fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets the tombstone fraction that triggers a prune at close.
    #[must_use]
    pub const fn prune_threshold(mut self, threshold: f64) -> Self {
        self.prune_threshold = threshold;
        self
    }

    /// Opens the dump with a shared lock for concurrent readers.
    #[must_use]
    pub const fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Restricts the operations this handle may perform.
    #[must_use]
    pub const fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;

    #[test]
    fn default_config_allows_everything() {
        let config = DumpConfig::new();
        assert!(config.create_if_missing);
        assert!(!config.shared);
        assert!(config.access.allows(Operation::Delete));
        assert!((config.prune_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_chains() {
        let config = DumpConfig::new()
            .create_if_missing(false)
            .prune_threshold(1.0)
            .shared(true)
            .access(AccessMode::READ_ONLY);
        assert!(!config.create_if_missing);
        assert!(config.shared);
        assert!(!config.access.allows(Operation::Append));
    }
}
