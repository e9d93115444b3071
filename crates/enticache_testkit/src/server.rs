//! In-memory save servers.
//!
//! [`EchoTransport`] answers every save the way a typical server would:
//! temporary integer keys get real ones, foreign keys follow, saved entities
//! are echoed back and deleted ones are reported by key.
//!
//! [`ChannelTransport`] hands each save to the test instead, so the test
//! decides when, and with what, the save completes. That is what it takes to
//! edit entities while a save is in flight.

use async_trait::async_trait;
use enticache_core::{resolve_type_name, EntityKey, KeyValue, MetadataStore};
use enticache_save::{KeyMapping, RawSaveResponse, SaveBundle, SaveError, SaveResult, SaveTransport};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Echo server
// ============================================================================

/// A transport that simulates a server in memory.
#[derive(Debug)]
pub struct EchoTransport {
    metadata: Arc<MetadataStore>,
    next_id: Mutex<i64>,
    failures: Mutex<VecDeque<SaveError>>,
    bundles: Mutex<Vec<SaveBundle>>,
}

impl EchoTransport {
    /// Creates a server for a model; the first real key it assigns is 1.
    pub fn new(metadata: MetadataStore) -> Self {
        Self {
            metadata: Arc::new(metadata),
            next_id: Mutex::new(1),
            failures: Mutex::new(VecDeque::new()),
            bundles: Mutex::new(Vec::new()),
        }
    }

    /// Sets the next real key to assign.
    pub fn with_next_id(self, id: i64) -> Self {
        *self.next_id.lock() = id;
        self
    }

    /// Makes the next save fail with `error`.
    pub fn fail_next(&self, error: SaveError) {
        self.failures.lock().push_back(error);
    }

    /// Bundles received so far.
    pub fn bundles(&self) -> Vec<SaveBundle> {
        self.bundles.lock().clone()
    }

    /// Number of saves performed.
    pub fn save_count(&self) -> usize {
        self.bundles.lock().len()
    }

    /// Computes the response to a bundle without recording it.
    pub fn respond_to(&self, bundle: &SaveBundle) -> SaveResult<RawSaveResponse> {
        let convention = self.metadata.naming_convention();
        let mut response = RawSaveResponse::default();

        for entry in bundle.entries() {
            if !entry.state.is_added() {
                continue;
            }
            let Some(property) = entry.auto_generated_key() else {
                continue;
            };
            let Some(KeyValue::Int(temp)) = entry.node.get(property).and_then(KeyValue::from_json) else {
                continue;
            };
            if temp < 0 {
                let mut next_id = self.next_id.lock();
                response
                    .key_mappings
                    .push(KeyMapping::new(entry.type_name, temp, *next_id));
                *next_id += 1;
            }
        }

        for entry in bundle.entries() {
            let et = self.metadata.entity_type(resolve_type_name(entry.type_name))?;
            let mut node: Map<String, Value> = entry
                .node
                .iter()
                .filter(|(name, _)| name.as_str() != "entityAspect")
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            for property in &et.data_properties {
                let target = if property.is_part_of_key {
                    Some(et.name.as_str())
                } else {
                    et.navigations_for_foreign_key(&property.name)
                        .next()
                        .map(|nav| nav.target_type.as_str())
                };
                let Some(target) = target else {
                    continue;
                };
                let server_name = property.server_name(convention);
                let real = node.get(&server_name).and_then(|value| {
                    response
                        .key_mappings
                        .iter()
                        .find_map(|m| m.translate(target, value))
                });
                if let Some(real) = real {
                    node.insert(server_name, real);
                }
            }

            let node = Value::Object(node);
            if entry.state.is_deleted() {
                let key: EntityKey = et.key_from_raw(&node, convention)?;
                response.deleted_keys.push(key);
            } else {
                let mut node = node;
                node["$type"] = json!(entry.type_name);
                response.entities.push(node);
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl SaveTransport for EchoTransport {
    async fn save_changes(&self, bundle: SaveBundle) -> SaveResult<RawSaveResponse> {
        let failure = self.failures.lock().pop_front();
        let result = match failure {
            Some(err) => Err(err),
            None => self.respond_to(&bundle),
        };
        self.bundles.lock().push(bundle);
        tokio::task::yield_now().await;
        result
    }
}

// ============================================================================
// Hand-driven server
// ============================================================================

/// A save waiting for the test to answer it.
#[derive(Debug)]
pub struct PendingSave {
    /// The bundle the coordinator sent.
    pub bundle: SaveBundle,
    responder: oneshot::Sender<SaveResult<RawSaveResponse>>,
}

impl PendingSave {
    /// Completes the save.
    pub fn respond(self, result: SaveResult<RawSaveResponse>) {
        let _ = self.responder.send(result);
    }

    /// Completes the save successfully.
    pub fn succeed(self, response: RawSaveResponse) {
        self.respond(Ok(response));
    }

    /// Fails the save.
    pub fn fail(self, error: SaveError) {
        self.respond(Err(error));
    }
}

/// A transport that forwards each save to a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<PendingSave>,
}

impl ChannelTransport {
    /// Creates the transport and the receiving end the test drives.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingSave>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl SaveTransport for ChannelTransport {
    async fn save_changes(&self, bundle: SaveBundle) -> SaveResult<RawSaveResponse> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(PendingSave { bundle, responder })
            .map_err(|_| SaveError::transport_fatal("server channel closed"))?;
        response
            .await
            .unwrap_or_else(|_| Err(SaveError::transport_fatal("save abandoned by server")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_customer, add_order, shop_manager, shop_metadata};
    use enticache_save::SaveOptions;

    #[test]
    fn echo_assigns_keys_and_rewrites_foreign_keys() {
        let manager = shop_manager();
        let c = add_customer(&manager, "ACME");
        let o = add_order(&manager, c, 10.0);
        let bundle = SaveBundle::build(&manager.lock(), &[c, o], &SaveOptions::new()).unwrap();

        let server = EchoTransport::new(shop_metadata()).with_next_id(7);
        let response = server.respond_to(&bundle).unwrap();
        assert_eq!(
            response.key_mappings,
            vec![KeyMapping::new("Customer", -1, 7), KeyMapping::new("Order", -2, 8)]
        );
        assert_eq!(response.entities[0]["id"], json!(7));
        assert_eq!(response.entities[1]["customerId"], json!(7));
        assert_eq!(response.entities[1]["$type"], json!("Order"));
        assert!(response.entities[1].get("entityAspect").is_none());
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let (transport, mut server) = ChannelTransport::new();
        let save = tokio::spawn(async move { transport.save_changes(SaveBundle::default()).await });
        let pending = server.recv().await.unwrap();
        assert!(pending.bundle.is_empty());
        pending.succeed(RawSaveResponse::default());
        assert!(save.await.unwrap().is_ok());
    }
}
