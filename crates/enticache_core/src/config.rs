//! Cache and merge configuration.

use serde::{Deserialize, Serialize};

/// Policy for reconciling an incoming node with an already-cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Fail with a conflict error if the entity is already cached.
    Disallowed,
    /// Leave the cached entity untouched; related entities are still merged.
    SkipMerge,
    /// Server values replace local values and pending changes are discarded.
    OverwriteChanges,
    /// Local changes win; unchanged entities are refreshed.
    #[default]
    PreserveChanges,
}

impl MergeStrategy {
    /// Returns the strategy's name.
    pub const fn name(&self) -> &'static str {
        match self {
            MergeStrategy::Disallowed => "Disallowed",
            MergeStrategy::SkipMerge => "SkipMerge",
            MergeStrategy::OverwriteChanges => "OverwriteChanges",
            MergeStrategy::PreserveChanges => "PreserveChanges",
        }
    }
}

/// Options for one merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Conflict-resolution strategy.
    pub strategy: MergeStrategy,
    /// Whether entities deleted locally are still returned.
    pub include_deleted: bool,
    /// Produce detached values without touching the store.
    pub no_tracking: bool,
}

impl MergeOptions {
    /// Creates options with the default strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets whether locally deleted entities are returned.
    #[must_use]
    pub const fn include_deleted(mut self, value: bool) -> Self {
        self.include_deleted = value;
        self
    }

    /// Sets no-tracking mode.
    #[must_use]
    pub const fn no_tracking(mut self, value: bool) -> Self {
        self.no_tracking = value;
        self
    }
}

/// Configuration for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Options used by merges that do not pass their own.
    pub default_merge_options: MergeOptions,
    /// Number of change events kept for polling.
    pub history_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_merge_options: MergeOptions::default(),
            history_limit: 10_000,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default merge options.
    #[must_use]
    pub const fn default_merge_options(mut self, options: MergeOptions) -> Self {
        self.default_merge_options = options;
        self
    }

    /// Sets the change-event history limit.
    #[must_use]
    pub const fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}
