//! The in-memory entity store.
//!
//! The [`EntityManager`] owns every tracked [`Entity`], indexes them by
//! identity key, enforces the lifecycle rules and publishes change events.
//! Property writes go through the interceptor (see `interceptor.rs`), which
//! keeps foreign keys, scalar navigations and inverse collections in sync.

mod change_feed;
mod interceptor;

pub use change_feed::{CacheEvent, ChangeEvent, ChangeFeed};

use crate::action::EntityAction;
use crate::config::CacheConfig;
use crate::entity::{Entity, NavValue};
use crate::error::{CacheError, CacheResult};
use crate::key::{EntityHandle, EntityKey, KeyValue};
use crate::metadata::{
    resolve_type_name, DataProperty, EntityType, KeyGenerator, MetadataStore,
};
use crate::state::EntityState;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// An entity manager shared between tasks.
///
/// The merge session assumes exclusive access for the length of a batch; the
/// mutex makes that precondition explicit.
pub type SharedManager = Arc<Mutex<EntityManager>>;

/// Everything a transaction has to roll back.
#[derive(Debug)]
struct StoreState {
    entities: HashMap<EntityHandle, Entity>,
    index: HashMap<EntityKey, EntityHandle>,
    next_handle: u64,
    dirty: usize,
    has_changes: bool,
    /// Children whose foreign key names a principal that is not attached yet.
    unattached_children: HashMap<EntityKey, Vec<(EntityHandle, String)>>,
    key_generator: KeyGenerator,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            index: HashMap::new(),
            next_handle: 1,
            dirty: 0,
            has_changes: false,
            unattached_children: HashMap::new(),
            key_generator: KeyGenerator::new(),
        }
    }
}

/// Before-images recorded while a transaction is open.
///
/// An entity or index slot is copied the first time the transaction touches
/// it, so rolling back costs what the transaction changed.
#[derive(Debug)]
struct Journal {
    entities: HashMap<EntityHandle, Option<Entity>>,
    index: HashMap<EntityKey, Option<EntityHandle>>,
    next_handle: u64,
    dirty: usize,
    has_changes: bool,
    unattached_children: HashMap<EntityKey, Vec<(EntityHandle, String)>>,
    key_generator: KeyGenerator,
}

impl Journal {
    fn open(store: &StoreState) -> Self {
        Self {
            entities: HashMap::new(),
            index: HashMap::new(),
            next_handle: store.next_handle,
            dirty: store.dirty,
            has_changes: store.has_changes,
            unattached_children: store.unattached_children.clone(),
            key_generator: store.key_generator.clone(),
        }
    }

    /// Folds a committed nested journal into this one, keeping the older images.
    fn absorb(&mut self, nested: Journal) {
        for (handle, before) in nested.entities {
            self.entities.entry(handle).or_insert(before);
        }
        for (key, before) in nested.index {
            self.index.entry(key).or_insert(before);
        }
    }

    fn roll_back(self, store: &mut StoreState) {
        for (handle, before) in self.entities {
            match before {
                Some(entity) => {
                    store.entities.insert(handle, entity);
                }
                None => {
                    store.entities.remove(&handle);
                }
            }
        }
        for (key, before) in self.index {
            match before {
                Some(handle) => {
                    store.index.insert(key, handle);
                }
                None => {
                    store.index.remove(&key);
                }
            }
        }
        store.next_handle = self.next_handle;
        store.dirty = self.dirty;
        store.has_changes = self.has_changes;
        store.unattached_children = self.unattached_children;
        store.key_generator = self.key_generator;
    }
}

/// Change-tracked store of entities.
///
/// # Example
///
/// ```rust,ignore
/// use enticache_core::{EntityManager, EntityState, MetadataStore};
/// use serde_json::json;
///
/// let mut manager = EntityManager::new(metadata);
/// let customer = manager.add_entity("Customer", [("name", json!("ACME"))])?;
/// assert_eq!(manager.get_entity(customer)?.state(), EntityState::Added);
/// ```
pub struct EntityManager {
    metadata: Arc<MetadataStore>,
    config: CacheConfig,
    feed: Arc<ChangeFeed>,
    store: StoreState,
    journals: Vec<Journal>,
    pending_events: Option<Vec<CacheEvent>>,
    loading: bool,
}

impl EntityManager {
    /// Creates an empty manager with the default configuration.
    pub fn new(metadata: MetadataStore) -> Self {
        Self::with_config(Arc::new(metadata), CacheConfig::default())
    }

    /// Creates an empty manager.
    pub fn with_config(metadata: Arc<MetadataStore>, config: CacheConfig) -> Self {
        let feed = Arc::new(ChangeFeed::with_max_history(config.history_limit));
        Self {
            metadata,
            config,
            feed,
            store: StoreState::default(),
            journals: Vec::new(),
            pending_events: None,
            loading: false,
        }
    }

    /// Wraps the manager for sharing with a save coordinator.
    pub fn into_shared(self) -> SharedManager {
        Arc::new(Mutex::new(self))
    }

    /// Returns the type registry.
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the change feed.
    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Subscribes to change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Number of attached entities.
    pub fn len(&self) -> usize {
        self.store.entities.len()
    }

    /// True if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.store.entities.is_empty()
    }

    /// True while a merge is populating entities.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns an attached entity.
    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.store.entities.get(&handle)
    }

    /// Returns an attached entity or an `EntityNotFound` error.
    pub fn get_entity(&self, handle: EntityHandle) -> CacheResult<&Entity> {
        self.store
            .entities
            .get(&handle)
            .ok_or(CacheError::EntityNotFound { handle })
    }

    pub(crate) fn entity_mut(&mut self, handle: EntityHandle) -> CacheResult<&mut Entity> {
        self.record_entity(handle);
        self.store
            .entities
            .get_mut(&handle)
            .ok_or(CacheError::EntityNotFound { handle })
    }

    /// Finds the entity with an identity key.
    pub fn find_by_key(&self, key: &EntityKey) -> Option<EntityHandle> {
        self.store.index.get(key).copied()
    }

    /// Finds the entity with an identity key and returns it.
    pub fn entity_by_key(&self, key: &EntityKey) -> Option<&Entity> {
        self.find_by_key(key).and_then(|h| self.entity(h))
    }

    /// Handles of every attached entity of a type, in attach order.
    pub fn entities_of_type(&self, type_name: &str) -> Vec<EntityHandle> {
        let short = crate::metadata::resolve_type_name(type_name);
        self.sorted_handles(|e| e.type_name == short)
    }

    /// Handles of every attached entity in one of `states`, in attach order.
    pub fn get_entities(&self, states: &[EntityState]) -> Vec<EntityHandle> {
        self.sorted_handles(|e| states.contains(&e.aspect.state))
    }

    /// Handles of every Added, Modified or Deleted entity, in attach order.
    pub fn get_changes(&self) -> Vec<EntityHandle> {
        self.sorted_handles(|e| e.aspect.state.is_added_modified_or_deleted())
    }

    fn sorted_handles(&self, filter: impl Fn(&Entity) -> bool) -> Vec<EntityHandle> {
        let mut handles: Vec<_> = self
            .store
            .entities
            .iter()
            .filter(|(_, e)| filter(e))
            .map(|(h, _)| *h)
            .collect();
        handles.sort_unstable();
        handles
    }

    /// True if any entity has unsaved changes.
    pub fn has_changes(&self) -> bool {
        self.store.has_changes
    }

    // ========================================================================
    // Creation and attachment
    // ========================================================================

    /// Creates a detached entity with metadata defaults applied.
    pub fn create_entity<I, K>(&self, type_name: &str, values: I) -> CacheResult<Entity>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let et = self.metadata.entity_type(type_name)?;
        let mut entity = Entity::new(et.name.clone());
        for property in &et.data_properties {
            let value = self.default_value(property)?;
            entity.values.insert(property.name.clone(), value);
        }
        for (name, value) in values {
            let name = name.into();
            if et.data_property(&name).is_none() {
                return Err(CacheError::unknown_property(&et.name, name));
            }
            entity.values.insert(name, value);
        }
        Ok(entity)
    }

    fn default_value(&self, property: &DataProperty) -> CacheResult<Value> {
        if let Some(value) = &property.default_value {
            return Ok(value.clone());
        }
        match &property.complex_type {
            Some(name) => {
                let ct = self.metadata.complex_type(name)?;
                let mut object = Map::new();
                for nested in &ct.data_properties {
                    object.insert(nested.name.clone(), self.default_value(nested)?);
                }
                Ok(Value::Object(object))
            }
            None => Ok(Value::Null),
        }
    }

    /// Creates an entity and attaches it as Added.
    pub fn add_entity<I, K>(&mut self, type_name: &str, values: I) -> CacheResult<EntityHandle>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let entity = self.create_entity(type_name, values)?;
        self.attach(entity, EntityState::Added)
    }

    /// Attaches a detached entity in the given state.
    ///
    /// Added entities of types with server-generated keys receive a temporary
    /// key when theirs is unset. Scalar navigations are linked from foreign
    /// keys, and children already waiting for this entity's key are linked to it.
    pub fn attach(&mut self, entity: Entity, state: EntityState) -> CacheResult<EntityHandle> {
        self.attach_with_action(entity, state, EntityAction::Attach)
    }

    pub(crate) fn attach_with_action(
        &mut self,
        mut entity: Entity,
        state: EntityState,
        action: EntityAction,
    ) -> CacheResult<EntityHandle> {
        if entity.aspect.handle.is_some() {
            return Err(CacheError::invalid_operation("entity is already attached"));
        }
        if state.is_detached() {
            return Err(CacheError::invalid_operation(
                "cannot attach an entity in the Detached state",
            ));
        }
        let metadata = Arc::clone(&self.metadata);
        let et = metadata.entity_type(&entity.type_name)?;
        entity.type_name = et.name.clone();

        if state.is_added() && et.auto_generated_keys && !has_assigned_key(et, &entity) {
            for (name, value) in self.store.key_generator.generate_key(et)? {
                entity.values.insert(name, value);
            }
        }
        let key = et.key_from_values(&entity.values)?;
        if self.store.index.contains_key(&key) {
            return Err(CacheError::invalid_operation(format!(
                "an entity with key {key} is already attached"
            )));
        }

        let handle = EntityHandle::new(self.store.next_handle);
        self.store.next_handle += 1;
        entity.navigation = et
            .navigation_properties
            .iter()
            .map(|np| {
                let empty = if np.is_scalar {
                    NavValue::Scalar(None)
                } else {
                    NavValue::Collection(Vec::new())
                };
                (np.name.clone(), empty)
            })
            .collect();
        entity.aspect.handle = Some(handle);
        entity.aspect.key = Some(key.clone());
        entity.aspect.state = state;
        if state.is_added() || state.is_unchanged() {
            entity.aspect.original_values.clear();
        }
        if state.is_added_modified_or_deleted() {
            self.store.dirty += 1;
        }
        self.record_index(&key);
        self.record_entity(handle);
        self.store.index.insert(key.clone(), handle);
        self.store.entities.insert(handle, entity);

        for nav in et
            .navigation_properties
            .iter()
            .filter(|np| np.is_scalar && !np.foreign_key_names.is_empty())
        {
            self.sync_navigation_from_foreign_key(handle, et, nav)?;
        }
        self.drain_unattached_children(&key, handle)?;

        tracing::trace!(%key, %handle, state = state.name(), "attached entity");
        self.emit_entity(action, handle, None);
        self.refresh_has_changes();
        Ok(handle)
    }

    /// Removes an entity from the store and returns it detached.
    ///
    /// Links from other entities are removed; children whose foreign key
    /// still names the detached entity relink if it is attached again.
    pub fn detach(&mut self, handle: EntityHandle) -> CacheResult<Entity> {
        self.record_entity(handle);
        let mut entity = self
            .store
            .entities
            .remove(&handle)
            .ok_or(CacheError::EntityNotFound { handle })?;
        let key = entity.aspect.key.clone();
        if let Some(key) = &key {
            self.record_index(key);
            self.store.index.remove(key);
        }
        if entity.aspect.state.is_added_modified_or_deleted() {
            self.store.dirty = self.store.dirty.saturating_sub(1);
        }
        self.forget_unattached(handle, None);

        let mut orphans = Vec::new();
        for other in self.link_holders(&entity) {
            let Ok(candidate) = self.entity_mut(other) else {
                continue;
            };
            for (name, value) in candidate.navigation.iter_mut() {
                match value {
                    NavValue::Scalar(target) if *target == Some(handle) => {
                        *target = None;
                        orphans.push((other, candidate.type_name.clone(), name.clone()));
                    }
                    NavValue::Collection(items) => items.retain(|h| *h != handle),
                    NavValue::Scalar(_) => {}
                }
            }
        }
        if let Some(key) = &key {
            let metadata = Arc::clone(&self.metadata);
            for (child, type_name, nav_name) in orphans {
                let uses_foreign_key = metadata
                    .entity_type(&type_name)
                    .ok()
                    .and_then(|et| et.navigation_property(&nav_name))
                    .is_some_and(|np| !np.foreign_key_names.is_empty());
                if uses_foreign_key {
                    self.store
                        .unattached_children
                        .entry(key.clone())
                        .or_default()
                        .push((child, nav_name));
                }
            }
        }

        entity.aspect.handle = None;
        entity.aspect.state = EntityState::Detached;
        entity.aspect.original_values.clear();
        entity.aspect.is_being_saved = false;
        entity.navigation.clear();

        self.emit(CacheEvent::EntityChanged {
            action: EntityAction::Detach,
            handle,
            key,
            property: None,
        });
        self.refresh_has_changes();
        Ok(entity)
    }

    /// Detaches every entity.
    pub fn clear(&mut self) {
        let handles = self.sorted_handles(|_| true);
        if !self.journals.is_empty() {
            let keys: Vec<EntityKey> = self.store.index.keys().cloned().collect();
            for key in &keys {
                self.record_index(key);
            }
            for handle in &handles {
                self.record_entity(*handle);
            }
        }
        let next_handle = self.store.next_handle;
        let key_generator = self.store.key_generator.clone();
        let has_changes = self.store.has_changes;
        self.store = StoreState {
            next_handle,
            has_changes,
            key_generator,
            ..StoreState::default()
        };
        for handle in handles {
            self.emit(CacheEvent::EntityChanged {
                action: EntityAction::Clear,
                handle,
                key: None,
                property: None,
            });
        }
        self.set_has_pending_changes(false);
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Publishes a property-changed event; `None` means several properties changed.
    pub fn notify_property_changed(&mut self, handle: EntityHandle, property: Option<&str>) {
        self.emit_entity(EntityAction::PropertyChange, handle, property);
    }

    /// Publishes a change-action event.
    pub fn notify_change_action(&mut self, action: EntityAction, handle: EntityHandle) {
        self.emit_entity(action, handle, None);
    }

    /// Sets the store-wide "has changes" flag, publishing an event if it flipped.
    pub fn set_has_pending_changes(&mut self, value: bool) {
        if self.store.has_changes != value {
            self.store.has_changes = value;
            self.emit(CacheEvent::HasChangesChanged { has_changes: value });
        }
    }

    pub(crate) fn refresh_has_changes(&mut self) {
        let value = self.store.dirty > 0;
        self.set_has_pending_changes(value);
    }

    pub(crate) fn emit_entity(
        &mut self,
        action: EntityAction,
        handle: EntityHandle,
        property: Option<&str>,
    ) {
        let key = self
            .store
            .entities
            .get(&handle)
            .and_then(|e| e.aspect.key.clone());
        self.emit(CacheEvent::EntityChanged {
            action,
            handle,
            key,
            property: property.map(str::to_string),
        });
    }

    fn emit(&mut self, event: CacheEvent) {
        match &mut self.pending_events {
            Some(buffer) => buffer.push(event),
            None => self.feed.emit(event),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Sets the lifecycle state and returns the previous one.
    pub(crate) fn change_state(
        &mut self,
        handle: EntityHandle,
        state: EntityState,
    ) -> CacheResult<EntityState> {
        let entity = self.entity_mut(handle)?;
        let previous = entity.aspect.state;
        entity.aspect.state = state;
        match (
            previous.is_added_modified_or_deleted(),
            state.is_added_modified_or_deleted(),
        ) {
            (false, true) => self.store.dirty += 1,
            (true, false) => self.store.dirty = self.store.dirty.saturating_sub(1),
            _ => {}
        }
        self.refresh_has_changes();
        Ok(previous)
    }

    /// Commits local changes: the entity becomes Unchanged and its original values are cleared.
    ///
    /// A Deleted entity is detached instead.
    pub fn accept_changes(&mut self, handle: EntityHandle) -> CacheResult<()> {
        if self.get_entity(handle)?.state().is_deleted() {
            self.detach(handle)?;
            return Ok(());
        }
        self.entity_mut(handle)?.aspect.original_values.clear();
        self.change_state(handle, EntityState::Unchanged)?;
        self.emit_entity(EntityAction::AcceptChanges, handle, None);
        Ok(())
    }

    /// Discards local changes.
    ///
    /// Added entities are detached; Modified and Deleted entities get their
    /// original values back and become Unchanged.
    pub fn reject_changes(&mut self, handle: EntityHandle) -> CacheResult<()> {
        let entity = self.get_entity(handle)?;
        if entity.state().is_added() {
            self.emit_entity(EntityAction::RejectChanges, handle, None);
            self.detach(handle)?;
            return Ok(());
        }
        let metadata = Arc::clone(&self.metadata);
        let et = metadata.entity_type(entity.type_name())?;
        let originals = std::mem::take(&mut self.entity_mut(handle)?.aspect.original_values);
        let restores_key = originals.keys().any(|name| et.is_key_property(name));
        for (name, value) in originals {
            self.entity_mut(handle)?.values.insert(name.clone(), value);
            for nav in et.navigations_for_foreign_key(&name) {
                self.sync_navigation_from_foreign_key(handle, et, nav)?;
            }
        }
        if restores_key {
            let key = et.key_from_values(&self.get_entity(handle)?.values)?;
            self.rekey(handle, key)?;
        }
        self.change_state(handle, EntityState::Unchanged)?;
        self.emit_entity(EntityAction::RejectChanges, handle, None);
        Ok(())
    }

    /// Marks an entity for deletion. Added entities are detached instead.
    ///
    /// An Added entity whose save is in flight may already exist on the
    /// server, so it is marked Deleted like any other.
    pub fn set_deleted(&mut self, handle: EntityHandle) -> CacheResult<()> {
        let entity = self.get_entity(handle)?;
        match entity.state() {
            EntityState::Added if !entity.aspect.is_being_saved => {
                self.detach(handle)?;
            }
            EntityState::Deleted => {}
            _ => {
                self.change_state(handle, EntityState::Deleted)?;
                self.emit_entity(EntityAction::EntityStateChange, handle, None);
            }
        }
        Ok(())
    }

    /// Takes back a deletion: a Deleted entity becomes Unchanged with its
    /// current values, and its original values are dropped.
    ///
    /// The save pipeline uses this on entities deleted while their save was
    /// in flight, before the server's copy is merged over them.
    pub fn undelete(&mut self, handle: EntityHandle) -> CacheResult<()> {
        if !self.get_entity(handle)?.state().is_deleted() {
            return Ok(());
        }
        self.entity_mut(handle)?.aspect.original_values.clear();
        self.change_state(handle, EntityState::Unchanged)?;
        self.emit_entity(EntityAction::EntityStateChange, handle, None);
        Ok(())
    }

    /// Forces an entity into the Modified state.
    pub fn set_modified(&mut self, handle: EntityHandle) -> CacheResult<()> {
        match self.get_entity(handle)?.state() {
            EntityState::Added => Err(CacheError::invalid_operation(
                "an Added entity cannot be marked Modified",
            )),
            EntityState::Modified => Ok(()),
            _ => {
                self.change_state(handle, EntityState::Modified)?;
                self.emit_entity(EntityAction::EntityStateChange, handle, None);
                Ok(())
            }
        }
    }

    /// Flags an entity as part of an in-flight save.
    pub fn set_being_saved(&mut self, handle: EntityHandle, value: bool) -> CacheResult<()> {
        self.entity_mut(handle)?.aspect.is_being_saved = value;
        Ok(())
    }

    /// Replaces the original-values map with a snapshot of the current values.
    ///
    /// Used on Added entities once their save is dispatched, so edits made
    /// while the save is in flight show up as changes.
    pub fn capture_original_values(&mut self, handle: EntityHandle) -> CacheResult<()> {
        let entity = self.entity_mut(handle)?;
        entity.aspect.original_values = entity.values.clone();
        Ok(())
    }

    /// Drops the snapshot taken by [`capture_original_values`](Self::capture_original_values).
    ///
    /// Only Added entities are affected; their original values carry no
    /// meaning once the save that needed them has failed.
    pub fn discard_original_values(&mut self, handle: EntityHandle) -> CacheResult<()> {
        let entity = self.entity_mut(handle)?;
        if entity.aspect.state.is_added() {
            entity.aspect.original_values.clear();
        }
        Ok(())
    }

    // ========================================================================
    // Transactions and loading mode
    // ========================================================================

    /// Runs `f` against the store atomically.
    ///
    /// Events raised inside `f` are published only if it returns `Ok`. On
    /// `Err` the store is restored to its state before the call and the
    /// buffered events are discarded. Nested calls join the outer transaction
    /// but still roll back their own changes on failure.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let outermost = self.pending_events.is_none();
        self.journals.push(Journal::open(&self.store));
        let loading = self.loading;
        let mark = match &self.pending_events {
            Some(buffer) => buffer.len(),
            None => {
                self.pending_events = Some(Vec::new());
                0
            }
        };

        match f(self) {
            Ok(value) => {
                if let Some(journal) = self.journals.pop() {
                    if let Some(outer) = self.journals.last_mut() {
                        outer.absorb(journal);
                    }
                }
                if outermost {
                    if let Some(events) = self.pending_events.take() {
                        self.feed.emit_batch(events);
                    }
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(journal) = self.journals.pop() {
                    journal.roll_back(&mut self.store);
                }
                self.loading = loading;
                if outermost {
                    self.pending_events = None;
                } else if let Some(buffer) = &mut self.pending_events {
                    buffer.truncate(mark);
                }
                tracing::debug!("store transaction rolled back");
                Err(err)
            }
        }
    }

    /// Copies an entity into the open journal before its first change.
    fn record_entity(&mut self, handle: EntityHandle) {
        let Some(journal) = self.journals.last_mut() else {
            return;
        };
        if !journal.entities.contains_key(&handle) {
            journal
                .entities
                .insert(handle, self.store.entities.get(&handle).cloned());
        }
    }

    /// Copies an index slot into the open journal before its first change.
    pub(crate) fn record_index(&mut self, key: &EntityKey) {
        let Some(journal) = self.journals.last_mut() else {
            return;
        };
        if !journal.index.contains_key(key) {
            journal
                .index
                .insert(key.clone(), self.store.index.get(key).copied());
        }
    }

    /// Entities that may hold a navigation link to `entity`.
    ///
    /// A link through a one-to-many navigation pair is mirrored on the
    /// target, so the target's own navigations name every holder. Types
    /// reachable through any other navigation need a full scan.
    pub(crate) fn link_holders(&self, entity: &Entity) -> Vec<EntityHandle> {
        let metadata = &self.metadata;
        let unmirrored = metadata
            .entity_types()
            .flat_map(|et| et.navigation_properties.iter())
            .any(|nav| {
                resolve_type_name(&nav.target_type) == entity.type_name
                    && !metadata
                        .inverse_of(nav)
                        .is_some_and(|inverse| nav.is_scalar != inverse.is_scalar)
            });
        let mut holders: Vec<EntityHandle> = if unmirrored {
            self.store.entities.keys().copied().collect()
        } else {
            entity
                .navigation
                .values()
                .flat_map(|value| match value {
                    NavValue::Scalar(target) => target.iter().copied().collect::<Vec<_>>(),
                    NavValue::Collection(items) => items.clone(),
                })
                .collect()
        };
        holders.sort();
        holders.dedup();
        holders
    }

    /// Enters or leaves loading mode and returns the previous setting.
    ///
    /// In loading mode writes record no original values, change no lifecycle
    /// state and raise no property-change events.
    pub(crate) fn set_loading(&mut self, loading: bool) -> bool {
        std::mem::replace(&mut self.loading, loading)
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.store.entities.len())
            .field("has_changes", &self.store.has_changes)
            .field("loading", &self.loading)
            .finish_non_exhaustive()
    }
}

/// True if every key property holds a non-default value.
fn has_assigned_key(et: &EntityType, entity: &Entity) -> bool {
    et.key_properties().all(|p| {
        let value = entity.values.get(&p.name).unwrap_or(&Value::Null);
        match p.data_type.key_value(value) {
            Some(KeyValue::Int(0)) | None => false,
            Some(KeyValue::Text(s)) => !s.is_empty(),
            Some(KeyValue::Guid(g)) => !g.is_nil(),
            Some(KeyValue::Int(_)) => true,
        }
    })
}
