//! Shared test model: customers, orders and order lines.

use crate::metadata::{
    ComplexType, DataProperty, DataType, EntityType, MetadataStore, NamingConvention,
    NavigationProperty,
};
use serde_json::json;

pub(crate) fn metadata() -> MetadataStore {
    let mut store = MetadataStore::with_naming_convention(NamingConvention::None);
    store
        .add_complex_type(
            ComplexType::new("Address")
                .with_data(DataProperty::new("street", DataType::String))
                .with_data(DataProperty::new("city", DataType::String)),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Customer")
                .with_auto_generated_keys()
                .with_data(DataProperty::key("id", DataType::Int64))
                .with_data(DataProperty::new("name", DataType::String))
                .with_data(DataProperty::new("rating", DataType::Int32).with_default(json!(3)))
                .with_data(DataProperty::complex("address", "Address"))
                .with_navigation(
                    NavigationProperty::collection("orders", "Order").with_inverse("customer"),
                ),
        )
        .unwrap();
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
        .unwrap();
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
        .unwrap();
    store.validate().unwrap();
    store
}

/// PascalCase server names, camelCase client names.
pub(crate) fn camel_case_metadata() -> MetadataStore {
    let mut store = MetadataStore::with_naming_convention(NamingConvention::CamelCase);
    store
        .add_entity_type(
            EntityType::new("Customer")
                .with_namespace("Shop")
                .with_data(DataProperty::key("id", DataType::Int64))
                .with_data(DataProperty::new("name", DataType::String)),
        )
        .unwrap();
    store
}
