//! Merging server payloads into the entity store.
//!
//! The entry point for most callers is [`EntityManager::merge_nodes`]; use a
//! [`MergeSession`] directly when node ids must resolve across batches.

mod classifier;
mod session;
mod value;

pub use classifier::{
    JsonResultsAdapter, NodeClassifier, NodeContext, NodeDescriptor, NodeKind, TypedClassifier,
};
pub use session::{MergeOutcome, MergeSession};
pub use value::{MergeKind, MergedValue};

use crate::config::MergeOptions;
use crate::error::CacheResult;
use crate::manager::EntityManager;
use serde_json::Value;

impl EntityManager {
    /// Merges raw nodes into the store in one atomic batch.
    ///
    /// Returns one merged value per node, in input order. A conflict or any
    /// other error leaves the store untouched.
    pub fn merge_nodes(
        &mut self,
        nodes: &[Value],
        classifier: &dyn NodeClassifier,
        options: MergeOptions,
        kind: MergeKind,
    ) -> CacheResult<MergeOutcome> {
        MergeSession::new(classifier, options, kind).merge(self, nodes)
    }

    /// Merges query results with the configured default options.
    pub fn merge_query_results(
        &mut self,
        nodes: &[Value],
        classifier: &dyn NodeClassifier,
    ) -> CacheResult<MergeOutcome> {
        let options = self.config().default_merge_options;
        self.merge_nodes(nodes, classifier, options, MergeKind::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::EntityAction;
    use crate::config::MergeStrategy;
    use crate::error::CacheError;
    use crate::fixtures;
    use crate::key::EntityKey;
    use crate::manager::CacheEvent;
    use crate::state::EntityState;
    use serde_json::json;

    fn manager() -> EntityManager {
        EntityManager::new(fixtures::metadata())
    }

    fn merge(manager: &mut EntityManager, nodes: Value, strategy: MergeStrategy) -> MergeOutcome {
        let adapter = JsonResultsAdapter::new();
        let nodes = nodes.as_array().cloned().unwrap();
        manager
            .merge_nodes(
                &nodes,
                &adapter,
                MergeOptions::new().with_strategy(strategy),
                MergeKind::Query,
            )
            .unwrap()
    }

    fn customer_key(id: i64) -> EntityKey {
        EntityKey::single("Customer", id)
    }

    #[test]
    fn new_entities_attach_unchanged() {
        let mut manager = manager();
        let rx = manager.subscribe();
        let outcome = merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "ACME"}]),
            MergeStrategy::PreserveChanges,
        );
        let h = outcome.values[0].as_entity().unwrap();
        let entity = manager.get_entity(h).unwrap();
        assert_eq!(entity.state(), EntityState::Unchanged);
        assert!(entity.aspect().was_loaded());
        assert_eq!(entity.get("name"), Some(&json!("ACME")));
        assert!(!manager.has_changes());
        let actions: Vec<_> = rx.try_iter().filter_map(|e| e.event.action()).collect();
        assert_eq!(actions, vec![EntityAction::AttachOnQuery]);
    }

    #[test]
    fn nested_children_are_linked_both_ways() {
        let mut manager = manager();
        let outcome = merge(
            &mut manager,
            json!([{
                "$type": "Customer", "id": 1, "name": "ACME",
                "orders": [
                    {"id": 10, "customerId": 1},
                    {"id": 11}
                ]
            }]),
            MergeStrategy::PreserveChanges,
        );
        let c = outcome.values[0].as_entity().unwrap();
        let orders = manager.get_entity(c).unwrap().collection("orders").to_vec();
        assert_eq!(orders.len(), 2);
        for o in orders {
            let order = manager.get_entity(o).unwrap();
            assert_eq!(order.scalar("customer"), Some(c));
            assert_eq!(order.get("customerId"), Some(&json!(1)));
            assert_eq!(order.state(), EntityState::Unchanged);
        }
    }

    #[test]
    fn forward_reference_resolves_after_traversal() {
        let mut manager = manager();
        let outcome = merge(
            &mut manager,
            json!([
                {"$type": "Order", "$id": "1", "id": 10, "customer": {"$ref": "2"}},
                {"$type": "Customer", "$id": "2", "id": 1}
            ]),
            MergeStrategy::PreserveChanges,
        );
        assert!(outcome.unresolved_refs.is_empty());
        let o = outcome.values[0].as_entity().unwrap();
        let c = outcome.values[1].as_entity().unwrap();
        assert_eq!(manager.get_entity(o).unwrap().scalar("customer"), Some(c));
        assert_eq!(manager.get_entity(c).unwrap().collection("orders"), &[o]);
    }

    #[test]
    fn anonymous_structures_keep_references() {
        let mut manager = manager();
        let outcome = merge(
            &mut manager,
            json!([{
                "best": {"$ref": "c1"},
                "all": [{"$type": "Customer", "$id": "c1", "id": 1}],
                "count": 1
            }]),
            MergeStrategy::PreserveChanges,
        );
        let value = &outcome.values[0];
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        assert_eq!(value.get("best"), Some(&MergedValue::Entity(c)));
        assert_eq!(value.get("count"), Some(&MergedValue::Scalar(json!(1))));
        assert_eq!(
            value.get("all"),
            Some(&MergedValue::Array(vec![MergedValue::Entity(c)]))
        );
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut manager = manager();
        let outcome = merge(
            &mut manager,
            json!([
                {"$type": "Order", "id": 10, "customer": {"$ref": "missing"}},
                {"$ref": "missing"}
            ]),
            MergeStrategy::PreserveChanges,
        );
        assert_eq!(outcome.unresolved_refs, vec!["missing".to_string()]);
        assert!(outcome.values[1].is_null());
        let o = outcome.values[0].as_entity().unwrap();
        assert_eq!(manager.get_entity(o).unwrap().scalar("customer"), None);
    }

    #[test]
    fn complex_values_are_converted() {
        let mut manager = manager();
        let outcome = merge(
            &mut manager,
            json!([
                {"$type": "Customer", "id": 1, "address": {"street": "Main", "city": "Oslo"}},
                {"$type": "Address", "street": "Side", "city": "Bergen"}
            ]),
            MergeStrategy::PreserveChanges,
        );
        let c = outcome.values[0].as_entity().unwrap();
        assert_eq!(
            manager.get_entity(c).unwrap().get("address"),
            Some(&json!({"street": "Main", "city": "Oslo"}))
        );
        match &outcome.values[1] {
            MergedValue::Complex(value) => {
                assert_eq!(value.type_name, "Address");
                assert_eq!(value.values.get("city"), Some(&json!("Bergen")));
            }
            other => panic!("expected complex value, got {other:?}"),
        }
    }

    #[test]
    fn complex_properties_go_through_the_classifier() {
        let mut manager = manager();
        let seen = std::sync::Mutex::new(Vec::new());
        let adapter = JsonResultsAdapter::new();
        let classifier = TypedClassifier::new(|node: &Value, context: &NodeContext| {
            if context.kind == NodeKind::ComplexProperty {
                seen.lock().unwrap().push((
                    context.parent_type.clone(),
                    context.property_name.clone(),
                    context.target_type.clone(),
                ));
                if node.get("hidden").is_some() {
                    return NodeDescriptor::ignored();
                }
            }
            adapter.visit(node, context)
        });
        let nodes = vec![
            json!({"$type": "Customer", "id": 1, "address": {"street": "Main", "city": "Oslo"}}),
            json!({"$type": "Customer", "id": 2, "address": {"street": "x", "hidden": true}}),
        ];
        let outcome = manager
            .merge_nodes(&nodes, &classifier, MergeOptions::new(), MergeKind::Query)
            .unwrap();

        let first = outcome.values[0].as_entity().unwrap();
        let second = outcome.values[1].as_entity().unwrap();
        assert_eq!(
            manager.get_entity(first).unwrap().get("address"),
            Some(&json!({"street": "Main", "city": "Oslo"}))
        );
        assert_eq!(
            manager.get_entity(second).unwrap().get("address"),
            Some(&json!({"street": null, "city": null}))
        );
        let context = (
            Some("Customer".to_string()),
            Some("address".to_string()),
            Some("Address".to_string()),
        );
        assert_eq!(*seen.lock().unwrap(), vec![context.clone(), context]);
    }

    #[test]
    fn preserve_keeps_local_edits() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "A"}]),
            MergeStrategy::PreserveChanges,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        manager.set_value(c, "name", json!("local")).unwrap();

        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "server"}]),
            MergeStrategy::PreserveChanges,
        );
        let entity = manager.get_entity(c).unwrap();
        assert_eq!(entity.get("name"), Some(&json!("local")));
        assert_eq!(entity.state(), EntityState::Modified);

        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "server"}]),
            MergeStrategy::OverwriteChanges,
        );
        let entity = manager.get_entity(c).unwrap();
        assert_eq!(entity.get("name"), Some(&json!("server")));
        assert_eq!(entity.state(), EntityState::Unchanged);
        assert!(entity.aspect().original_values().is_empty());
        assert!(!manager.has_changes());
    }

    #[test]
    fn preserve_does_not_relink_redirected_child() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([
                {"$type": "Customer", "id": 1, "orders": [{"id": 10, "customerId": 1}]},
                {"$type": "Customer", "id": 2}
            ]),
            MergeStrategy::PreserveChanges,
        );
        let c1 = manager.find_by_key(&customer_key(1)).unwrap();
        let c2 = manager.find_by_key(&customer_key(2)).unwrap();
        let o = manager.find_by_key(&EntityKey::single("Order", 10)).unwrap();
        manager.set_value(o, "customerId", json!(2)).unwrap();

        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "orders": [{"id": 10, "customerId": 1}]}]),
            MergeStrategy::PreserveChanges,
        );
        assert_eq!(manager.get_entity(o).unwrap().scalar("customer"), Some(c2));
        assert!(manager.get_entity(c1).unwrap().collection("orders").is_empty());
        assert_eq!(manager.get_entity(o).unwrap().get("customerId"), Some(&json!(2)));
    }

    #[test]
    fn skip_merge_leaves_entity_but_merges_children() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "A"}]),
            MergeStrategy::PreserveChanges,
        );
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "B", "orders": [{"id": 10, "customerId": 1}]}]),
            MergeStrategy::SkipMerge,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        assert_eq!(manager.get_entity(c).unwrap().get("name"), Some(&json!("A")));
        let o = manager.find_by_key(&EntityKey::single("Order", 10)).unwrap();
        assert_eq!(manager.get_entity(o).unwrap().scalar("customer"), Some(c));
    }

    #[test]
    fn disallowed_conflict_rolls_back_batch() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "A"}]),
            MergeStrategy::PreserveChanges,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        manager.set_value(c, "name", json!("local")).unwrap();
        let rx = manager.subscribe();

        let adapter = JsonResultsAdapter::new();
        let nodes = vec![
            json!({"$type": "Customer", "id": 2, "name": "new"}),
            json!({"$type": "Customer", "id": 1, "name": "server"}),
        ];
        let err = manager
            .merge_nodes(
                &nodes,
                &adapter,
                MergeOptions::new().with_strategy(MergeStrategy::Disallowed),
                MergeKind::Query,
            )
            .unwrap_err();
        assert!(matches!(&err, CacheError::Conflict { key } if *key == customer_key(1)));
        assert!(manager.find_by_key(&customer_key(2)).is_none());
        let entity = manager.get_entity(c).unwrap();
        assert_eq!(entity.get("name"), Some(&json!("local")));
        assert_eq!(entity.state(), EntityState::Modified);
        assert!(rx.try_recv().is_err());
        assert!(!manager.is_loading());
    }

    #[test]
    fn deleted_entities_hidden_unless_requested() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1}]),
            MergeStrategy::PreserveChanges,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        manager.set_deleted(c).unwrap();

        let hidden = merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1}]),
            MergeStrategy::PreserveChanges,
        );
        assert!(hidden.values[0].is_null());

        let adapter = JsonResultsAdapter::new();
        let shown = manager
            .merge_nodes(
                &[json!({"$type": "Customer", "id": 1})],
                &adapter,
                MergeOptions::new().include_deleted(true),
                MergeKind::Query,
            )
            .unwrap();
        assert_eq!(shown.values[0].as_entity(), Some(c));
        assert_eq!(manager.get_entity(c).unwrap().state(), EntityState::Deleted);
    }

    #[test]
    fn save_merge_detaches_deleted() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1}]),
            MergeStrategy::PreserveChanges,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        manager.set_deleted(c).unwrap();
        let adapter = JsonResultsAdapter::new();
        let outcome = manager
            .merge_nodes(
                &[json!({"$type": "Customer", "id": 1})],
                &adapter,
                MergeOptions::new().with_strategy(MergeStrategy::OverwriteChanges),
                MergeKind::Save,
            )
            .unwrap();
        assert!(matches!(&outcome.values[0], MergedValue::Detached(e) if e.key() == Some(&customer_key(1))));
        assert!(manager.entity(c).is_none());
        assert!(!manager.has_changes());
    }

    #[test]
    fn overwrite_of_modified_flips_has_changes() {
        let mut manager = manager();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "A"}]),
            MergeStrategy::PreserveChanges,
        );
        let c = manager.find_by_key(&customer_key(1)).unwrap();
        manager.set_value(c, "name", json!("B")).unwrap();
        let rx = manager.subscribe();
        merge(
            &mut manager,
            json!([{"$type": "Customer", "id": 1, "name": "C"}]),
            MergeStrategy::OverwriteChanges,
        );
        let events: Vec<_> = rx.try_iter().map(|e| e.event).collect();
        assert!(events.contains(&CacheEvent::HasChangesChanged { has_changes: false }));
        assert!(events
            .iter()
            .any(|e| e.action() == Some(EntityAction::MergeOnQuery)));
        assert!(events.iter().any(|e| matches!(
            e,
            CacheEvent::EntityChanged { action: EntityAction::PropertyChange, property: None, .. }
        )));
    }

    #[test]
    fn no_tracking_leaves_store_empty() {
        let mut manager = manager();
        let adapter = JsonResultsAdapter::new();
        let nodes = vec![json!({
            "$type": "Customer", "$id": "1", "id": 1,
            "orders": [{"id": 10, "customer": {"$ref": "1"}}]
        })];
        let outcome = manager
            .merge_nodes(&nodes, &adapter, MergeOptions::new().no_tracking(true), MergeKind::Query)
            .unwrap();
        assert!(manager.is_empty());
        let MergedValue::Untracked { entity, navigation } = &outcome.values[0] else {
            panic!("expected untracked value");
        };
        assert_eq!(entity.key(), Some(&customer_key(1)));
        let MergedValue::Array(orders) = &navigation["orders"] else {
            panic!("expected order array");
        };
        let order_customer = orders[0].get("customer").unwrap();
        assert!(matches!(order_customer, MergedValue::Untracked { entity, .. } if entity.key() == Some(&customer_key(1))));
    }

    #[test]
    fn camel_case_payloads() {
        let mut manager = EntityManager::new(fixtures::camel_case_metadata());
        let adapter = JsonResultsAdapter::new();
        let outcome = manager
            .merge_nodes(
                &[json!({"$type": "Customer:#Shop", "Id": "5", "Name": "ACME", "Extra": {"Note": 1}})],
                &adapter,
                MergeOptions::default(),
                MergeKind::Query,
            )
            .unwrap();
        let c = outcome.values[0].as_entity().unwrap();
        let entity = manager.get_entity(c).unwrap();
        assert_eq!(entity.key(), Some(&customer_key(5)));
        assert_eq!(entity.get("name"), Some(&json!("ACME")));
    }

    #[test]
    fn unknown_type_fails() {
        let mut manager = manager();
        let adapter = JsonResultsAdapter::new();
        let err = manager
            .merge_nodes(
                &[json!({"$type": "Nope", "id": 1})],
                &adapter,
                MergeOptions::default(),
                MergeKind::Query,
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownType { .. }));
    }

    #[test]
    fn session_resolves_across_batches() {
        let mut manager = manager();
        let adapter = JsonResultsAdapter::new();
        let mut session = MergeSession::new(&adapter, MergeOptions::default(), MergeKind::Query);
        session
            .merge(&mut manager, &[json!({"$type": "Customer", "$id": "c", "id": 1})])
            .unwrap();
        let outcome = session
            .merge(&mut manager, &[json!({"$type": "Order", "id": 10, "customer": {"$ref": "c"}})])
            .unwrap();
        let c = session.resolve("c").and_then(MergedValue::as_entity).unwrap();
        let o = outcome.values[0].as_entity().unwrap();
        assert_eq!(manager.get_entity(o).unwrap().scalar("customer"), Some(c));
    }
}
