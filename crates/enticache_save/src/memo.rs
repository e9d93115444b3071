//! Save memos: edits made while a save is in flight.
//!
//! A memo records, per entity, the values a caller changed after the save
//! that carries the entity was dispatched. Once the server confirms the save
//! the echoed entity overwrites the cached one, and the memo is replayed on
//! top of it so those edits survive as pending changes.

use crate::bundle::KeyMapping;
use enticache_core::{
    CacheResult, Entity, EntityHandle, EntityKey, EntityManager, EntityState, EntityType,
    MetadataStore,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Uncommitted edits of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityMemo {
    /// Changed values by client name.
    pub pending_changes: BTreeMap<String, Value>,
    /// The entity was deleted locally.
    pub is_deleted: bool,
}

impl EntityMemo {
    /// Records the uncommitted edits of an entity relative to its original values.
    ///
    /// Added entities that were never snapshotted count every non-key value.
    pub fn capture(entity: &Entity, et: &EntityType) -> Option<Self> {
        if entity.state().is_deleted() {
            return Some(Self::deleted());
        }
        let originals = entity.aspect().original_values();
        let mut pending_changes = BTreeMap::new();
        for (name, value) in entity.values() {
            if et.is_key_property(name) {
                continue;
            }
            let changed = match originals.get(name) {
                Some(original) => original != value,
                None => entity.state().is_added() && originals.is_empty() && !value.is_null(),
            };
            if changed {
                pending_changes.insert(name.clone(), value.clone());
            }
        }
        (!pending_changes.is_empty()).then_some(Self {
            pending_changes,
            is_deleted: false,
        })
    }

    fn deleted() -> Self {
        Self {
            pending_changes: BTreeMap::new(),
            is_deleted: true,
        }
    }
}

/// The values of one entity as they were sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentEntity {
    pub(crate) handle: EntityHandle,
    pub(crate) type_name: String,
    pub(crate) state: EntityState,
    pub(crate) values: BTreeMap<String, Value>,
}

impl SentEntity {
    pub(crate) fn new(handle: EntityHandle, entity: &Entity) -> Self {
        Self {
            handle,
            type_name: entity.type_name().to_string(),
            state: entity.state(),
            values: entity.values().clone(),
        }
    }
}

/// Memos for one save round plus the entities queued for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveMemo {
    /// Memo per entity key.
    pub entity_memos: HashMap<EntityKey, EntityMemo>,
    /// Entities requested for the round, in request order.
    pub queued_changes: Vec<EntityHandle>,
}

impl SaveMemo {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no entity is queued or memoized.
    pub fn is_empty(&self) -> bool {
        self.entity_memos.is_empty() && self.queued_changes.is_empty()
    }

    /// Queues an entity and records its current edits.
    pub fn record(&mut self, handle: EntityHandle, entity: &Entity, et: &EntityType) {
        if !self.queued_changes.contains(&handle) {
            self.queued_changes.push(handle);
        }
        let Some(key) = entity.key() else {
            return;
        };
        match EntityMemo::capture(entity, et) {
            Some(memo) => {
                self.entity_memos.insert(key.clone(), memo);
            }
            None => {
                self.entity_memos.remove(key);
            }
        }
    }

    /// Diffs in-flight entities against the values that were sent.
    ///
    /// `sent` must already have had the round's key mappings applied, so a
    /// foreign key rewritten from a temporary to a real key is not mistaken
    /// for a local edit.
    pub(crate) fn capture_in_flight(manager: &EntityManager, sent: &[SentEntity]) -> CacheResult<Self> {
        let metadata = manager.metadata();
        let mut memo = Self::new();
        for snapshot in sent {
            let Some(entity) = manager.entity(snapshot.handle) else {
                continue;
            };
            let Some(key) = entity.key() else {
                continue;
            };
            if entity.state().is_deleted() && !snapshot.state.is_deleted() {
                memo.entity_memos.insert(key.clone(), EntityMemo::deleted());
                continue;
            }
            let et = metadata.entity_type(entity.type_name())?;
            let pending_changes: BTreeMap<_, _> = entity
                .values()
                .iter()
                .filter(|(name, value)| {
                    !et.is_key_property(name) && snapshot.values.get(*name) != Some(*value)
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if !pending_changes.is_empty() {
                memo.entity_memos.insert(
                    key.clone(),
                    EntityMemo {
                        pending_changes,
                        is_deleted: false,
                    },
                );
            }
        }
        Ok(memo)
    }

    /// Rewrites temporary keys, in memo keys and in foreign-key values, to real ones.
    pub fn pk_fixup(&mut self, metadata: &MetadataStore, mappings: &[KeyMapping]) {
        if mappings.is_empty() {
            return;
        }
        let memos = std::mem::take(&mut self.entity_memos);
        for (key, mut memo) in memos {
            let key = mappings
                .iter()
                .find(|m| key == m.temp_entity_key())
                .map(KeyMapping::real_entity_key)
                .unwrap_or(key);
            if let Ok(et) = metadata.entity_type(&key.type_name) {
                fixup_values(et, &mut memo.pending_changes, mappings);
            }
            self.entity_memos.insert(key, memo);
        }
    }

    /// Replays memoized edits onto entities confirmed by the server.
    ///
    /// Returns the entities that picked up pending changes. A replay that
    /// fails is logged and skipped so the remaining entities still get theirs.
    pub fn apply_to_saved_entities(
        &self,
        manager: &mut EntityManager,
        saved: &[EntityHandle],
    ) -> Vec<EntityHandle> {
        let mut replayed = Vec::new();
        for &handle in saved {
            let Some(key) = manager.entity(handle).and_then(Entity::key).cloned() else {
                continue;
            };
            let Some(memo) = self.entity_memos.get(&key) else {
                continue;
            };
            let result = if memo.is_deleted {
                manager.set_deleted(handle)
            } else {
                replay(manager, handle, &memo.pending_changes)
            };
            match result {
                Ok(()) => {
                    tracing::debug!(%key, "replayed in-flight edits");
                    replayed.push(handle);
                }
                Err(err) => tracing::warn!(%key, error = %err, "could not replay in-flight edits"),
            }
        }
        replayed
    }
}

fn replay(
    manager: &mut EntityManager,
    handle: EntityHandle,
    changes: &BTreeMap<String, Value>,
) -> CacheResult<()> {
    for (name, value) in changes {
        manager.set_value(handle, name, value.clone())?;
    }
    Ok(())
}

/// Applies key mappings to the key and foreign-key values of one entity.
pub(crate) fn fixup_values(
    et: &EntityType,
    values: &mut BTreeMap<String, Value>,
    mappings: &[KeyMapping],
) {
    for (name, value) in values.iter_mut() {
        let target = if et.is_key_property(name) {
            Some(et.name.as_str())
        } else {
            et.navigations_for_foreign_key(name)
                .next()
                .map(|nav| nav.target_type.as_str())
        };
        let Some(target) = target else {
            continue;
        };
        if let Some(real) = mappings.iter().find_map(|m| m.translate(target, value)) {
            *value = real;
        }
    }
}
