//! Values produced by a merge.

use crate::action::EntityAction;
use crate::entity::{ComplexValue, Entity};
use crate::key::EntityHandle;
use serde_json::Value;
use std::collections::BTreeMap;

/// Why a merge is happening; selects the change action raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeKind {
    /// Query results.
    #[default]
    Query,
    /// Data imported from another cache.
    Import,
    /// Entities echoed by a save.
    Save,
}

impl MergeKind {
    /// Action raised when a node creates a new entity.
    pub const fn attach_action(&self) -> EntityAction {
        match self {
            MergeKind::Import => EntityAction::AttachOnImport,
            MergeKind::Query | MergeKind::Save => EntityAction::AttachOnQuery,
        }
    }

    /// Action raised when a node overwrites a cached entity.
    pub const fn merge_action(&self) -> EntityAction {
        match self {
            MergeKind::Query => EntityAction::MergeOnQuery,
            MergeKind::Import => EntityAction::MergeOnImport,
            MergeKind::Save => EntityAction::MergeOnSave,
        }
    }
}

/// One merged node.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedValue {
    /// Ignored node, null, or an entity hidden by its Deleted state.
    Null,
    /// Scalar or passed-through node.
    Scalar(Value),
    /// Tracked entity.
    Entity(EntityHandle),
    /// Entity detached by the merge (a confirmed delete).
    Detached(Entity),
    /// Complex value.
    Complex(ComplexValue),
    /// Entity materialized without touching the store.
    Untracked {
        /// The detached entity.
        entity: Entity,
        /// Merged navigation values by client name.
        navigation: BTreeMap<String, MergedValue>,
    },
    /// Anonymous structure with client-named properties.
    Object(BTreeMap<String, MergedValue>),
    /// Array of merged values.
    Array(Vec<MergedValue>),
}

impl MergedValue {
    /// Returns the tracked entity handle, if any.
    pub fn as_entity(&self) -> Option<EntityHandle> {
        match self {
            MergedValue::Entity(h) => Some(*h),
            _ => None,
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, MergedValue::Null)
    }

    /// Looks up a property of an `Object` or `Untracked` navigation.
    pub fn get(&self, name: &str) -> Option<&MergedValue> {
        match self {
            MergedValue::Object(map) => map.get(name),
            MergedValue::Untracked { navigation, .. } => navigation.get(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_selects_actions() {
        assert_eq!(MergeKind::Query.attach_action(), EntityAction::AttachOnQuery);
        assert_eq!(MergeKind::Import.attach_action(), EntityAction::AttachOnImport);
        assert_eq!(MergeKind::Save.merge_action(), EntityAction::MergeOnSave);
        assert_eq!(MergeKind::Import.merge_action(), EntityAction::MergeOnImport);
    }

    #[test]
    fn accessors() {
        let h = EntityHandle::new(3);
        assert_eq!(MergedValue::Entity(h).as_entity(), Some(h));
        assert!(MergedValue::Null.is_null());
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), MergedValue::Entity(h));
        assert_eq!(MergedValue::Object(map).get("x"), Some(&MergedValue::Entity(h)));
    }
}
