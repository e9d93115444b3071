//! Entity lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an entity sits in its save lifecycle.
///
/// Transitions are driven by the [`EntityManager`](crate::EntityManager)
/// in response to property writes, merges, and explicit accept/reject calls:
///
/// - write on `Unchanged` → `Modified` (original value captured)
/// - write on `Added`/`Modified`/`Deleted` → no state change
/// - accept changes → `Unchanged`
/// - reject changes on `Added` → `Detached`
/// - reject changes on `Modified`/`Deleted` → `Unchanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not attached to any entity store.
    Detached,
    /// New entity not yet saved.
    Added,
    /// Saved entity with unsaved local changes.
    Modified,
    /// Saved entity marked for deletion.
    Deleted,
    /// Saved entity with no local changes.
    Unchanged,
}

impl EntityState {
    const ALL: [EntityState; 5] = [
        EntityState::Detached,
        EntityState::Added,
        EntityState::Modified,
        EntityState::Deleted,
        EntityState::Unchanged,
    ];

    /// Returns every state.
    pub fn all() -> &'static [EntityState] {
        &Self::ALL
    }

    /// Returns the state's name.
    pub const fn name(&self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
            EntityState::Unchanged => "Unchanged",
        }
    }

    /// Looks up a state by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Returns true for `Added`.
    pub const fn is_added(&self) -> bool {
        matches!(self, EntityState::Added)
    }

    /// Returns true for `Modified`.
    pub const fn is_modified(&self) -> bool {
        matches!(self, EntityState::Modified)
    }

    /// Returns true for `Deleted`.
    pub const fn is_deleted(&self) -> bool {
        matches!(self, EntityState::Deleted)
    }

    /// Returns true for `Unchanged`.
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, EntityState::Unchanged)
    }

    /// Returns true for `Detached`.
    pub const fn is_detached(&self) -> bool {
        matches!(self, EntityState::Detached)
    }

    /// Returns true if the entity has changes that a save would send.
    pub const fn is_added_modified_or_deleted(&self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Returns true if the entity exists on the server and is not being deleted.
    pub const fn is_unchanged_or_modified(&self) -> bool {
        matches!(self, EntityState::Unchanged | EntityState::Modified)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
