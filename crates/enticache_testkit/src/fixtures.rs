//! Test fixtures and manager helpers.
//!
//! Provides a small shop model (customers, orders, order lines and an
//! address complex type) and helpers for populating a manager with it.

use enticache_core::{
    ComplexType, DataProperty, DataType, EntityHandle, EntityManager, EntityState, EntityType,
    JsonResultsAdapter, MetadataStore, NamingConvention, NavigationProperty, SharedManager,
};
use serde_json::{json, Value};
use std::sync::Once;

/// Metadata of the shop model.
///
/// Every entity type has an auto-generated `Int64` key named `id`.
pub fn shop_metadata() -> MetadataStore {
    shop_metadata_with(NamingConvention::None)
}

/// Metadata of the shop model under a naming convention.
pub fn shop_metadata_with(convention: NamingConvention) -> MetadataStore {
    let mut store = MetadataStore::with_naming_convention(convention);
    store
        .add_complex_type(
            ComplexType::new("Address")
                .with_data(DataProperty::new("street", DataType::String))
                .with_data(DataProperty::new("city", DataType::String)),
        )
        .expect("Failed to add Address");
    store
        .add_entity_type(
            EntityType::new("Customer")
                .with_auto_generated_keys()
                .with_data(DataProperty::key("id", DataType::Int64))
                .with_data(DataProperty::new("name", DataType::String))
                .with_data(DataProperty::complex("address", "Address"))
                .with_navigation(
                    NavigationProperty::collection("orders", "Order").with_inverse("customer"),
                ),
        )
        .expect("Failed to add Customer");
    store
        .add_entity_type(
            EntityType::new("Order")
                .with_auto_generated_keys()
                .with_data(DataProperty::key("id", DataType::Int64))
                .with_data(DataProperty::new("customerId", DataType::Int64))
                .with_data(DataProperty::new("total", DataType::Decimal))
                .with_navigation(
                    NavigationProperty::scalar("customer", "Customer")
                        .with_foreign_keys(["customerId"])
                        .with_inverse("orders"),
                )
                .with_navigation(
                    NavigationProperty::collection("lines", "OrderLine").with_inverse("order"),
                ),
        )
        .expect("Failed to add Order");
    store
        .add_entity_type(
            EntityType::new("OrderLine")
                .with_auto_generated_keys()
                .with_data(DataProperty::key("id", DataType::Int64))
                .with_data(DataProperty::new("orderId", DataType::Int64))
                .with_data(DataProperty::new("product", DataType::String))
                .with_navigation(
                    NavigationProperty::scalar("order", "Order")
                        .with_foreign_keys(["orderId"])
                        .with_inverse("lines"),
                ),
        )
        .expect("Failed to add OrderLine");
    store.validate().expect("Invalid shop metadata");
    store
}

/// A shared manager over the shop model.
pub fn shop_manager() -> SharedManager {
    EntityManager::new(shop_metadata()).into_shared()
}

/// Adds a new customer with a temporary key.
pub fn add_customer(manager: &SharedManager, name: &str) -> EntityHandle {
    manager
        .lock()
        .add_entity("Customer", [("name", json!(name))])
        .expect("Failed to add customer")
}

/// Adds a new order for a customer.
pub fn add_order(manager: &SharedManager, customer: EntityHandle, total: f64) -> EntityHandle {
    let mut guard = manager.lock();
    let order = guard
        .add_entity("Order", [("total", json!(total))])
        .expect("Failed to add order");
    guard
        .set_navigation(order, "customer", Some(customer))
        .expect("Failed to link order");
    order
}

/// Loads server nodes as query results and returns the top-level entities.
pub fn load(manager: &SharedManager, nodes: &[Value]) -> Vec<EntityHandle> {
    manager
        .lock()
        .merge_query_results(nodes, &JsonResultsAdapter::new())
        .expect("Failed to merge query results")
        .entities()
}

/// Loads an Unchanged customer.
pub fn load_customer(manager: &SharedManager, id: i64, name: &str) -> EntityHandle {
    load(manager, &[json!({"$type": "Customer", "id": id, "name": name})])[0]
}

/// State of an entity, `Detached` if it is no longer tracked.
pub fn state_of(manager: &SharedManager, handle: EntityHandle) -> EntityState {
    manager
        .lock()
        .entity(handle)
        .map_or(EntityState::Detached, |e| e.state())
}

/// Installs a test-writer tracing subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_with_order() {
        let manager = shop_manager();
        let c = add_customer(&manager, "ACME");
        let o = add_order(&manager, c, 12.5);
        let guard = manager.lock();
        assert_eq!(guard.get_entity(o).unwrap().get("customerId"), Some(&json!(-1)));
        assert_eq!(guard.get_entity(c).unwrap().collection("orders"), &[o]);
    }

    #[test]
    fn load_is_unchanged() {
        let manager = shop_manager();
        let c = load_customer(&manager, 3, "ACME");
        assert_eq!(state_of(&manager, c), EntityState::Unchanged);
    }
}
