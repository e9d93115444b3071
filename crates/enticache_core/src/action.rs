//! Change actions that tag why an entity changed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a lifecycle transition or merge happened.
///
/// Subscribers classify actions through [`is_attach`](Self::is_attach),
/// [`is_detach`](Self::is_detach) and [`is_modification`](Self::is_modification)
/// instead of enumerating every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityAction {
    /// Entity attached by the application.
    Attach,
    /// Entity attached while merging query results.
    AttachOnQuery,
    /// Entity attached while importing.
    AttachOnImport,
    /// Entity detached.
    Detach,
    /// Cached entity merged with query results.
    MergeOnQuery,
    /// Cached entity merged with imported data.
    MergeOnImport,
    /// Cached entity merged with save results.
    MergeOnSave,
    /// A single property changed.
    PropertyChange,
    /// Lifecycle state changed.
    EntityStateChange,
    /// Pending changes were accepted.
    AcceptChanges,
    /// Pending changes were rejected.
    RejectChanges,
    /// The store was cleared.
    Clear,
}

impl EntityAction {
    const ALL: [EntityAction; 12] = [
        EntityAction::Attach,
        EntityAction::AttachOnQuery,
        EntityAction::AttachOnImport,
        EntityAction::Detach,
        EntityAction::MergeOnQuery,
        EntityAction::MergeOnImport,
        EntityAction::MergeOnSave,
        EntityAction::PropertyChange,
        EntityAction::EntityStateChange,
        EntityAction::AcceptChanges,
        EntityAction::RejectChanges,
        EntityAction::Clear,
    ];

    /// Returns every action.
    pub fn all() -> &'static [EntityAction] {
        &Self::ALL
    }

    /// Returns the action's name.
    pub const fn name(&self) -> &'static str {
        match self {
            EntityAction::Attach => "Attach",
            EntityAction::AttachOnQuery => "AttachOnQuery",
            EntityAction::AttachOnImport => "AttachOnImport",
            EntityAction::Detach => "Detach",
            EntityAction::MergeOnQuery => "MergeOnQuery",
            EntityAction::MergeOnImport => "MergeOnImport",
            EntityAction::MergeOnSave => "MergeOnSave",
            EntityAction::PropertyChange => "PropertyChange",
            EntityAction::EntityStateChange => "EntityStateChange",
            EntityAction::AcceptChanges => "AcceptChanges",
            EntityAction::RejectChanges => "RejectChanges",
            EntityAction::Clear => "Clear",
        }
    }

    /// Looks up an action by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// Returns true if the action added the entity to a store.
    pub const fn is_attach(&self) -> bool {
        matches!(
            self,
            EntityAction::Attach | EntityAction::AttachOnQuery | EntityAction::AttachOnImport
        )
    }

    /// Returns true if the action removed the entity from a store.
    pub const fn is_detach(&self) -> bool {
        matches!(self, EntityAction::Detach | EntityAction::Clear)
    }

    /// Returns true if the action changed the entity's data or state.
    pub const fn is_modification(&self) -> bool {
        matches!(
            self,
            EntityAction::MergeOnQuery
                | EntityAction::MergeOnImport
                | EntityAction::MergeOnSave
                | EntityAction::PropertyChange
                | EntityAction::EntityStateChange
                | EntityAction::AcceptChanges
                | EntityAction::RejectChanges
        )
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_has_exactly_one_class() {
        for action in EntityAction::all() {
            let classes = [
                action.is_attach(),
                action.is_detach(),
                action.is_modification(),
            ];
            assert_eq!(
                classes.iter().filter(|c| **c).count(),
                1,
                "{action} should belong to one class"
            );
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            EntityAction::from_name("MergeOnSave"),
            Some(EntityAction::MergeOnSave)
        );
        assert_eq!(EntityAction::from_name("Merge"), None);
        assert_eq!(EntityAction::all().len(), 12);
    }
}
