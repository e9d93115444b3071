//! Per-entity change-tracking state.

use crate::key::{EntityHandle, EntityKey};
use crate::state::EntityState;
use serde_json::Value;
use std::collections::BTreeMap;

/// Change-tracking state attached to every entity.
///
/// An entity has exactly one aspect and belongs to at most one store;
/// detached entities have no handle.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAspect {
    pub(crate) state: EntityState,
    pub(crate) key: Option<EntityKey>,
    pub(crate) original_values: BTreeMap<String, Value>,
    pub(crate) was_loaded: bool,
    pub(crate) extra_metadata: Option<Value>,
    pub(crate) is_being_saved: bool,
    pub(crate) handle: Option<EntityHandle>,
}

impl EntityAspect {
    pub(crate) fn detached() -> Self {
        Self {
            state: EntityState::Detached,
            key: None,
            original_values: BTreeMap::new(),
            was_loaded: false,
            extra_metadata: None,
            is_being_saved: false,
            handle: None,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Identity key, once known.
    pub fn key(&self) -> Option<&EntityKey> {
        self.key.as_ref()
    }

    /// Values as they were before the first local change, keyed by client name.
    pub fn original_values(&self) -> &BTreeMap<String, Value> {
        &self.original_values
    }

    /// True if the entity was materialized from server data.
    pub fn was_loaded(&self) -> bool {
        self.was_loaded
    }

    /// Adapter-supplied metadata copied from the last merged node.
    pub fn extra_metadata(&self) -> Option<&Value> {
        self.extra_metadata.as_ref()
    }

    /// True while a save containing this entity is in flight.
    pub fn is_being_saved(&self) -> bool {
        self.is_being_saved
    }

    /// Store handle, if attached.
    pub fn handle(&self) -> Option<EntityHandle> {
        self.handle
    }
}
