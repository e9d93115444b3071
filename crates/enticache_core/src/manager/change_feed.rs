//! Change feed for observing entity changes.
//!
//! The feed distributes entity events to subscribers, enabling:
//! - Dirty tracking in UI layers
//! - Save coordination
//! - Audit logging
//!
//! Events raised inside an [`EntityManager::transaction`](crate::EntityManager::transaction)
//! are buffered and reach the feed only if the transaction succeeds.

use crate::action::EntityAction;
use crate::key::{EntityHandle, EntityKey};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An entity was attached, detached, merged or modified.
    EntityChanged {
        /// Why it changed.
        action: EntityAction,
        /// The entity.
        handle: EntityHandle,
        /// Its key at the time of the change.
        key: Option<EntityKey>,
        /// Changed property; `None` means several properties may have changed.
        property: Option<String>,
    },
    /// The store-wide "has unsaved changes" flag flipped.
    HasChangesChanged {
        /// New value of the flag.
        has_changes: bool,
    },
}

impl CacheEvent {
    /// Returns the action for entity events.
    pub fn action(&self) -> Option<EntityAction> {
        match self {
            CacheEvent::EntityChanged { action, .. } => Some(*action),
            CacheEvent::HasChangesChanged { .. } => None,
        }
    }
}

/// A published event with its feed sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Monotonic sequence number, starting at 1.
    pub sequence: u64,
    /// The event.
    pub event: CacheEvent,
}

/// Distributes published events to subscribers.
///
/// The change feed:
/// - Preserves publish order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
/// - Is thread-safe
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<VecDeque<ChangeEvent>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a feed with the default history limit.
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes one event.
    pub fn emit(&self, event: CacheEvent) {
        let event = ChangeEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            event,
        };
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publishes several events in order.
    pub fn emit_batch(&self, events: Vec<CacheEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Returns events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest published sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("latest_sequence", &self.latest_sequence())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(n: u64) -> CacheEvent {
        CacheEvent::EntityChanged {
            action: EntityAction::PropertyChange,
            handle: EntityHandle::new(n),
            key: None,
            property: Some("name".into()),
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        feed.emit_batch(vec![changed(1), changed(2)]);
        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.event.action(), Some(EntityAction::PropertyChange));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        drop(rx);
        feed.emit(changed(1));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_respects_history_limit() {
        let feed = ChangeFeed::with_max_history(2);
        for n in 0..5 {
            feed.emit(changed(n));
        }
        let events = feed.poll(0, 10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 4);
        assert_eq!(feed.latest_sequence(), 5);
        assert!(feed.poll(5, 10).is_empty());
    }
}
