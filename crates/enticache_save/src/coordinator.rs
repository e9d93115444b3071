//! Save coordinator state machine.
//!
//! At most one save round is in flight per cache. Requests that arrive while
//! a round is in flight are queued: their entities are collected into one
//! follow-up round, their current edits are memoized, and every queued caller
//! is answered when that follow-up round finishes.
//!
//! A round runs as follows:
//! 1. validate (optional) and serialize the entities into a [`SaveBundle`]
//! 2. flag the entities as being saved and snapshot Added entities
//! 3. await the transport
//! 4. apply key mappings, diff in-flight edits against what was sent
//! 5. merge the echoed entities, detach deleted ones, accept the rest
//! 6. replay the in-flight edits as pending changes

use crate::bundle::{KeyMapping, SaveBundle};
use crate::config::{SaveConfig, SaveOptions};
use crate::error::{FailureCause, QueuedSaveFailure, SaveError, SaveResult};
use crate::memo::{fixup_values, SaveMemo, SentEntity};
use crate::transport::SaveTransport;
use crate::validator::EntityValidator;
use enticache_core::{
    CacheError, CacheResult, EntityHandle, EntityKey, EntityManager, JsonResultsAdapter,
    MergeKind, MergeOptions, NodeClassifier, SharedManager,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// No save in flight.
    Idle,
    /// A round is in flight.
    Saving,
    /// A round is in flight and requests are queued behind it.
    SavingWithQueue,
}

impl SaveState {
    /// Returns true while a round is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(self, SaveState::Idle)
    }
}

/// Statistics about save rounds.
#[derive(Debug, Clone, Default)]
pub struct SaveStats {
    /// Rounds that completed successfully.
    pub rounds_completed: u64,
    /// Rounds that failed.
    pub rounds_failed: u64,
    /// Rounds started from queued requests.
    pub follow_up_rounds: u64,
    /// Requests that were queued behind an in-flight round.
    pub requests_queued: u64,
    /// Entities confirmed by the server.
    pub entities_saved: u64,
    /// Entities whose in-flight edits were replayed.
    pub edits_replayed: u64,
    /// Last completed round.
    pub last_save_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a save round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOutcome {
    /// Entities echoed by the server, as merged into the cache.
    pub entities: Vec<EntityHandle>,
    /// Temporary-to-real key replacements applied.
    pub key_mappings: Vec<KeyMapping>,
    /// Entities that picked up edits made while the round was in flight.
    pub replayed: Vec<EntityHandle>,
}

type Waiter = oneshot::Sender<SaveResult<SaveOutcome>>;

#[derive(Default)]
struct SaveQueue {
    saving: bool,
    follow_ups: u32,
    /// Memos of the requests the in-flight round was started for.
    active: SaveMemo,
    active_waiters: Vec<Waiter>,
    /// Requests collected for the next round.
    next: SaveMemo,
    next_waiters: Vec<Waiter>,
    next_options: Option<SaveOptions>,
}

impl SaveQueue {
    fn reset(&mut self) {
        self.saving = false;
        self.follow_ups = 0;
        self.active = SaveMemo::default();
        self.next = SaveMemo::default();
        self.next_options = None;
    }
}

enum Ticket {
    Done(SaveOutcome),
    Wait(oneshot::Receiver<SaveResult<SaveOutcome>>),
}

/// Serializes saves against one entity cache.
///
/// Cloning is cheap; clones share the same queue.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());
/// let outcome = coordinator.request_save(None, SaveOptions::default()).await?;
/// ```
pub struct SaveCoordinator<T: SaveTransport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: SaveTransport + 'static> Clone for SaveCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    manager: SharedManager,
    transport: T,
    config: RwLock<SaveConfig>,
    classifier: RwLock<Arc<dyn NodeClassifier>>,
    validator: RwLock<Option<Arc<dyn EntityValidator>>>,
    queue: Mutex<SaveQueue>,
    stats: RwLock<SaveStats>,
}

impl<T: SaveTransport + 'static> SaveCoordinator<T> {
    /// Creates a coordinator for a shared cache.
    pub fn new(manager: SharedManager, transport: T, config: SaveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                transport,
                config: RwLock::new(config),
                classifier: RwLock::new(Arc::new(JsonResultsAdapter::new())),
                validator: RwLock::new(None),
                queue: Mutex::new(SaveQueue::default()),
                stats: RwLock::new(SaveStats::default()),
            }),
        }
    }

    /// The cache this coordinator saves.
    pub fn manager(&self) -> &SharedManager {
        &self.inner.manager
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Current state.
    pub fn state(&self) -> SaveState {
        let queue = self.inner.queue.lock();
        if !queue.saving {
            SaveState::Idle
        } else if queue.next_waiters.is_empty() {
            SaveState::Saving
        } else {
            SaveState::SavingWithQueue
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> SaveStats {
        self.inner.stats.read().clone()
    }

    /// Current configuration.
    pub fn config(&self) -> SaveConfig {
        self.inner.config.read().clone()
    }

    /// Turns queuing of concurrent requests on or off.
    pub fn enable_queuing(&self, enabled: bool) {
        self.inner.config.write().queuing_enabled = enabled;
    }

    /// Sets the validator consulted before each round.
    pub fn set_validator(&self, validator: impl EntityValidator + 'static) {
        *self.inner.validator.write() = Some(Arc::new(validator));
    }

    /// Sets the classifier used to merge echoed entities.
    pub fn set_classifier(&self, classifier: impl NodeClassifier + 'static) {
        *self.inner.classifier.write() = Arc::new(classifier);
    }

    /// Memos queued for the next round.
    pub fn queued_memo(&self) -> SaveMemo {
        self.inner.queue.lock().next.clone()
    }

    /// Saves entities, or every pending change when `entities` is `None`.
    ///
    /// While another round is in flight the request is queued and answered
    /// when the follow-up round it joins completes.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::ConcurrentSave`] if a round is in flight and
    /// queuing is disabled, a validation error if the validator rejects an
    /// entity, and transport errors from the server. Callers that were queued
    /// get [`SaveError::QueuedSave`] carrying the memos of the failed round.
    pub async fn request_save(
        &self,
        entities: Option<Vec<EntityHandle>>,
        options: SaveOptions,
    ) -> SaveResult<SaveOutcome> {
        match self.inner.enqueue(entities, options)? {
            Ticket::Done(outcome) => Ok(outcome),
            Ticket::Wait(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(SaveError::Cancelled)),
        }
    }

    /// Saves every pending change.
    pub async fn save_all(&self) -> SaveResult<SaveOutcome> {
        self.request_save(None, SaveOptions::default()).await
    }
}

impl<T: SaveTransport + 'static> Inner<T> {
    fn enqueue(
        self: &Arc<Self>,
        entities: Option<Vec<EntityHandle>>,
        options: SaveOptions,
    ) -> SaveResult<Ticket> {
        let mut queue = self.queue.lock();
        let handles = resolve_targets(&self.manager.lock(), entities);

        if !queue.saving {
            if handles.is_empty() {
                return Ok(Ticket::Done(SaveOutcome::default()));
            }
            queue.saving = true;
            queue.follow_ups = 0;
            let (tx, rx) = oneshot::channel();
            queue.active_waiters.push(tx);
            drop(queue);
            tracing::debug!(entities = handles.len(), "save requested");
            Self::spawn_round(Arc::clone(self), handles, options);
            return Ok(Ticket::Wait(rx));
        }

        if !self.config.read().queuing_enabled {
            return Err(SaveError::ConcurrentSave);
        }
        {
            let manager = self.manager.lock();
            let metadata = Arc::clone(manager.metadata());
            for &handle in &handles {
                if let Some(entity) = manager.entity(handle) {
                    let et = metadata.entity_type(entity.type_name())?;
                    queue.next.record(handle, entity, et);
                }
            }
        }
        queue.next_options.get_or_insert(options);
        let (tx, rx) = oneshot::channel();
        queue.next_waiters.push(tx);
        self.stats.write().requests_queued += 1;
        tracing::debug!(
            entities = handles.len(),
            queued = queue.next_waiters.len(),
            "save queued behind in-flight round"
        );
        Ok(Ticket::Wait(rx))
    }

    fn spawn_round(inner: Arc<Self>, handles: Vec<EntityHandle>, options: SaveOptions) {
        tokio::spawn(async move {
            let result = inner.save_round(&handles, &options).await;
            Self::finish_round(&inner, result);
        });
    }

    async fn save_round(
        &self,
        handles: &[EntityHandle],
        options: &SaveOptions,
    ) -> SaveResult<SaveOutcome> {
        let (bundle, sent) = {
            let mut manager = self.manager.lock();
            self.prepare(&mut manager, handles, options)?
        };
        tracing::debug!(entities = bundle.len(), "dispatching save");
        let response = self.transport.save_changes(bundle).await;

        let mut manager = self.manager.lock();
        let result = match response {
            Ok(response) => self.complete(&mut manager, &sent, response),
            Err(err) => Err(err),
        };
        if result.is_err() {
            release(&mut manager, &sent)?;
        }
        result
    }

    fn prepare(
        &self,
        manager: &mut EntityManager,
        handles: &[EntityHandle],
        options: &SaveOptions,
    ) -> SaveResult<(SaveBundle, Vec<SentEntity>)> {
        let handles: Vec<_> = handles
            .iter()
            .copied()
            .filter(|h| manager.entity(*h).is_some())
            .collect();
        let metadata = Arc::clone(manager.metadata());

        let validate = self.config.read().validate_before_save;
        let validator = self.validator.read().clone();
        if let (true, Some(validator)) = (validate, validator) {
            for &handle in &handles {
                let entity = manager.get_entity(handle)?;
                let et = metadata.entity_type(entity.type_name())?;
                let errors = validator.validate(entity, et);
                if !errors.is_empty() {
                    let key = entity
                        .key()
                        .cloned()
                        .unwrap_or_else(|| EntityKey::new(et.name.clone(), Vec::new()));
                    tracing::debug!(%key, "save blocked by validation");
                    return Err(CacheError::validation(key, errors).into());
                }
            }
        }

        let bundle = SaveBundle::build(manager, &handles, options)?;
        let mut sent = Vec::with_capacity(handles.len());
        for &handle in &handles {
            let entity = manager.get_entity(handle)?;
            let added = entity.state().is_added();
            sent.push(SentEntity::new(handle, entity));
            manager.set_being_saved(handle, true)?;
            if added {
                manager.capture_original_values(handle)?;
            }
        }
        Ok((bundle, sent))
    }

    fn complete(
        &self,
        manager: &mut EntityManager,
        sent: &[SentEntity],
        response: crate::bundle::RawSaveResponse,
    ) -> SaveResult<SaveOutcome> {
        let strategy = self.config.read().merge_strategy_on_save;
        let classifier = Arc::clone(&*self.classifier.read());
        let metadata = Arc::clone(manager.metadata());
        let mappings = response.key_mappings;

        let outcome = manager.transaction(|m: &mut EntityManager| -> CacheResult<SaveOutcome> {
            for mapping in &mappings {
                if let Some(handle) = m.find_by_key(&mapping.temp_entity_key()) {
                    m.change_key(handle, mapping.real_entity_key())?;
                }
            }
            let mut sent = sent.to_vec();
            for snapshot in &mut sent {
                let et = metadata.entity_type(&snapshot.type_name)?;
                fixup_values(et, &mut snapshot.values, &mappings);
            }
            let in_flight = SaveMemo::capture_in_flight(m, &sent)?;

            // A delete made while the round was in flight was never sent. The
            // entity takes the server's copy first and is deleted again on replay.
            for snapshot in &sent {
                let deleted_in_flight = m
                    .entity(snapshot.handle)
                    .and_then(|e| e.key())
                    .and_then(|key| in_flight.entity_memos.get(key))
                    .is_some_and(|memo| memo.is_deleted);
                if deleted_in_flight {
                    m.undelete(snapshot.handle)?;
                }
            }

            let merged = m.merge_nodes(
                &response.entities,
                classifier.as_ref(),
                MergeOptions::new().with_strategy(strategy),
                MergeKind::Save,
            )?;
            let saved = merged.entities();
            for key in &response.deleted_keys {
                if let Some(handle) = m.find_by_key(key) {
                    m.detach(handle)?;
                }
            }

            let mut confirmed = Vec::with_capacity(sent.len());
            for snapshot in &sent {
                let Some(entity) = m.entity(snapshot.handle) else {
                    continue;
                };
                if !saved.contains(&snapshot.handle) && entity.state().is_added_modified_or_deleted() {
                    // The server confirmed what was sent, not what is cached now.
                    let pending = entity
                        .key()
                        .and_then(|key| in_flight.entity_memos.get(key))
                        .map(|memo| memo.pending_changes.keys().cloned().collect::<Vec<_>>())
                        .unwrap_or_default();
                    for name in pending {
                        if let Some(value) = snapshot.values.get(&name) {
                            m.set_value(snapshot.handle, &name, value.clone())?;
                        }
                    }
                    m.accept_changes(snapshot.handle)?;
                }
                if m.entity(snapshot.handle).is_some() {
                    m.set_being_saved(snapshot.handle, false)?;
                    confirmed.push(snapshot.handle);
                }
            }

            let replayed = in_flight.apply_to_saved_entities(m, &confirmed);
            Ok(SaveOutcome {
                entities: saved,
                key_mappings: mappings.clone(),
                replayed,
            })
        })?;
        Ok(outcome)
    }

    fn finish_round(self: &Arc<Self>, result: SaveResult<SaveOutcome>) {
        let mut queue = self.queue.lock();
        let waiters = std::mem::take(&mut queue.active_waiters);
        let failed_round = std::mem::take(&mut queue.active);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                {
                    let mut stats = self.stats.write();
                    stats.rounds_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                tracing::warn!(error = %err, "save round failed");
                let queued_waiters = std::mem::take(&mut queue.next_waiters);
                let queued = std::mem::take(&mut queue.next);
                let was_follow_up = queue.follow_ups > 0;
                queue.reset();
                drop(queue);

                if !was_follow_up && queued_waiters.is_empty() {
                    if let Some(waiter) = waiters.into_iter().next() {
                        let _ = waiter.send(Err(err));
                    }
                    return;
                }
                let failure = QueuedSaveFailure {
                    cause: FailureCause::from(&err),
                    failed_round,
                    queued,
                };
                for waiter in waiters.into_iter().chain(queued_waiters) {
                    let _ = waiter.send(Err(SaveError::QueuedSave(Box::new(failure.clone()))));
                }
                return;
            }
        };

        {
            let mut stats = self.stats.write();
            stats.rounds_completed += 1;
            stats.entities_saved += outcome.entities.len() as u64;
            stats.edits_replayed += outcome.replayed.len() as u64;
            stats.last_save_time = Some(Instant::now());
        }
        tracing::info!(
            saved = outcome.entities.len(),
            replayed = outcome.replayed.len(),
            key_mappings = outcome.key_mappings.len(),
            "save round completed"
        );
        for waiter in waiters {
            let _ = waiter.send(Ok(outcome.clone()));
        }

        let follow_up: Vec<EntityHandle> = {
            let manager = self.manager.lock();
            queue.next.pk_fixup(manager.metadata(), &outcome.key_mappings);
            queue
                .next
                .queued_changes
                .iter()
                .copied()
                .filter(|h| {
                    manager
                        .entity(*h)
                        .is_some_and(|e| e.state().is_added_modified_or_deleted())
                })
                .collect()
        };

        if follow_up.is_empty() {
            let waiters = std::mem::take(&mut queue.next_waiters);
            queue.reset();
            drop(queue);
            for waiter in waiters {
                let _ = waiter.send(Ok(SaveOutcome::default()));
            }
            return;
        }

        let limit = self.config.read().max_follow_up_rounds;
        if queue.follow_ups >= limit {
            tracing::warn!(limit, "follow-up save limit reached");
            let waiters = std::mem::take(&mut queue.next_waiters);
            queue.reset();
            drop(queue);
            for waiter in waiters {
                let _ = waiter.send(Err(SaveError::FollowUpLimit { rounds: limit }));
            }
            return;
        }

        queue.follow_ups += 1;
        queue.active = std::mem::take(&mut queue.next);
        queue.active_waiters = std::mem::take(&mut queue.next_waiters);
        let options = queue.next_options.take().unwrap_or_default();
        drop(queue);
        self.stats.write().follow_up_rounds += 1;
        tracing::debug!(entities = follow_up.len(), "starting follow-up save");
        Self::spawn_round(Arc::clone(self), follow_up, options);
    }
}

/// Entities a request covers: the given ones that have changes, or every change.
fn resolve_targets(manager: &EntityManager, entities: Option<Vec<EntityHandle>>) -> Vec<EntityHandle> {
    let Some(requested) = entities else {
        return manager.get_changes();
    };
    let mut handles = Vec::with_capacity(requested.len());
    for handle in requested {
        let dirty = manager
            .entity(handle)
            .is_some_and(|e| e.state().is_added_modified_or_deleted());
        if dirty && !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    handles
}

/// Undoes the dispatch bookkeeping after a failed round.
fn release(manager: &mut EntityManager, sent: &[SentEntity]) -> CacheResult<()> {
    for snapshot in sent {
        let Some(entity) = manager.entity(snapshot.handle) else {
            continue;
        };
        let deleted = entity.state().is_deleted();
        manager.set_being_saved(snapshot.handle, false)?;
        if snapshot.state.is_added() {
            if deleted {
                // Never stored by the server, so there is nothing left to delete.
                manager.detach(snapshot.handle)?;
            } else {
                manager.discard_original_values(snapshot.handle)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::RawSaveResponse;
    use crate::transport::MockTransport;
    use enticache_core::{DataProperty, DataType, EntityState, EntityType, MetadataStore};
    use serde_json::json;

    fn shared() -> SharedManager {
        let mut metadata = MetadataStore::new();
        metadata
            .add_entity_type(
                EntityType::new("Customer")
                    .with_auto_generated_keys()
                    .with_data(DataProperty::key("id", DataType::Int64))
                    .with_data(DataProperty::new("name", DataType::String)),
            )
            .unwrap();
        EntityManager::new(metadata).into_shared()
    }

    #[tokio::test]
    async fn nothing_to_save() {
        let coordinator = SaveCoordinator::new(shared(), MockTransport::new(), SaveConfig::default());
        let outcome = coordinator.save_all().await.unwrap();
        assert_eq!(outcome, SaveOutcome::default());
        assert_eq!(coordinator.transport().save_count(), 0);
        assert_eq!(coordinator.state(), SaveState::Idle);
    }

    #[tokio::test]
    async fn added_entity_gets_real_key() {
        let manager = shared();
        let c = manager
            .lock()
            .add_entity("Customer", [("name", json!("ACME"))])
            .unwrap();
        let transport = MockTransport::new();
        transport.push_response(RawSaveResponse {
            entities: vec![json!({"$type": "Customer", "id": 7, "name": "ACME"})],
            key_mappings: vec![KeyMapping::new("Customer", -1, 7)],
            deleted_keys: Vec::new(),
        });
        let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());

        let outcome = coordinator.save_all().await.unwrap();
        assert_eq!(outcome.entities, vec![c]);
        let guard = manager.lock();
        let entity = guard.get_entity(c).unwrap();
        assert_eq!(entity.state(), EntityState::Unchanged);
        assert_eq!(entity.key(), Some(&EntityKey::single("Customer", 7)));
        assert!(!entity.aspect().is_being_saved());
        assert!(!guard.has_changes());
        assert_eq!(coordinator.stats().rounds_completed, 1);
    }

    #[tokio::test]
    async fn failure_restores_bookkeeping() {
        let manager = shared();
        let c = manager
            .lock()
            .add_entity("Customer", [("name", json!("ACME"))])
            .unwrap();
        let transport = MockTransport::new();
        transport.push_error(SaveError::transport_retryable("offline"));
        let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());

        let err = coordinator.save_all().await.unwrap_err();
        assert!(matches!(err, SaveError::Transport { retryable: true, .. }));
        let guard = manager.lock();
        let entity = guard.get_entity(c).unwrap();
        assert_eq!(entity.state(), EntityState::Added);
        assert!(!entity.aspect().is_being_saved());
        assert!(entity.aspect().original_values().is_empty());
        assert_eq!(coordinator.state(), SaveState::Idle);
        assert_eq!(coordinator.stats().last_error.as_deref(), Some("transport error: offline"));
    }

    #[tokio::test]
    async fn unmergeable_response_restores_bookkeeping() {
        let manager = shared();
        let c = manager
            .lock()
            .add_entity("Customer", [("name", json!("ACME"))])
            .unwrap();
        let transport = MockTransport::new();
        transport.push_response(RawSaveResponse {
            entities: vec![json!({"$type": "NoSuchType", "id": 7})],
            key_mappings: vec![KeyMapping::new("Customer", -1, 7)],
            deleted_keys: Vec::new(),
        });
        transport.push_response(RawSaveResponse {
            entities: vec![json!({"$type": "Customer", "id": 7, "name": "ACME"})],
            key_mappings: vec![KeyMapping::new("Customer", -1, 7)],
            deleted_keys: Vec::new(),
        });
        let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());

        assert!(coordinator.save_all().await.is_err());
        {
            let guard = manager.lock();
            let entity = guard.get_entity(c).unwrap();
            assert_eq!(entity.state(), EntityState::Added);
            assert_eq!(entity.key(), Some(&EntityKey::single("Customer", -1)));
            assert!(!entity.aspect().is_being_saved());
            assert!(entity.aspect().original_values().is_empty());
        }
        assert_eq!(coordinator.state(), SaveState::Idle);

        coordinator.save_all().await.unwrap();
        assert_eq!(
            manager.lock().get_entity(c).unwrap().key(),
            Some(&EntityKey::single("Customer", 7))
        );
    }

    #[tokio::test]
    async fn unechoed_entities_are_accepted() {
        let manager = shared();
        let c = {
            let mut guard = manager.lock();
            let entity = guard
                .create_entity("Customer", [("id", json!(3)), ("name", json!("A"))])
                .unwrap();
            let c = guard.attach(entity, EntityState::Unchanged).unwrap();
            guard.set_value(c, "name", json!("B")).unwrap();
            c
        };
        let transport = MockTransport::new();
        transport.push_response(RawSaveResponse::default());
        let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());
        coordinator.request_save(Some(vec![c, c]), SaveOptions::new()).await.unwrap();

        let bundles = coordinator.transport().bundles();
        assert_eq!(bundles[0].len(), 1);
        let guard = manager.lock();
        assert_eq!(guard.get_entity(c).unwrap().state(), EntityState::Unchanged);
        assert_eq!(guard.get_entity(c).unwrap().get("name"), Some(&json!("B")));
    }
}
