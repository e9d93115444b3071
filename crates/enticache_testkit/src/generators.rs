//! Property-based test generators using proptest.
//!
//! Strategies produce server-shaped nodes for the shop model in
//! [`fixtures`](crate::fixtures): plain nodes, nested graphs, and graphs
//! that use `$id`/`$ref` references.

use enticache_core::MergeStrategy;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for customer names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}").expect("Invalid regex")
}

/// Strategy for merge strategies.
pub fn merge_strategy_strategy() -> impl Strategy<Value = MergeStrategy> {
    prop_oneof![
        Just(MergeStrategy::PreserveChanges),
        Just(MergeStrategy::OverwriteChanges),
        Just(MergeStrategy::SkipMerge),
    ]
}

/// Strategy for a flat customer node.
pub fn customer_node_strategy() -> impl Strategy<Value = Value> {
    (1i64..50, name_strategy())
        .prop_map(|(id, name)| json!({"$type": "Customer", "id": id, "name": name}))
}

/// Strategy for a customer with nested orders and lines.
///
/// Order ids are derived from the customer id so nested keys never collide
/// across customers.
pub fn customer_graph_strategy() -> impl Strategy<Value = Value> {
    (
        1i64..20,
        name_strategy(),
        prop::collection::vec(prop::collection::vec(name_strategy(), 0..3), 0..4),
    )
        .prop_map(|(id, name, orders)| {
            let orders: Vec<Value> = orders
                .into_iter()
                .enumerate()
                .map(|(i, products)| {
                    let order_id = id * 100 + i as i64;
                    let lines: Vec<Value> = products
                        .into_iter()
                        .enumerate()
                        .map(|(j, product)| {
                            json!({
                                "$type": "OrderLine",
                                "id": order_id * 100 + j as i64,
                                "orderId": order_id,
                                "product": product,
                            })
                        })
                        .collect();
                    json!({
                        "$type": "Order",
                        "id": order_id,
                        "customerId": id,
                        "total": (i as f64) * 10.0,
                        "lines": lines,
                    })
                })
                .collect();
            json!({"$type": "Customer", "id": id, "name": name, "orders": orders})
        })
}

/// Strategy for a batch of order nodes that reference customers via `$id`/`$ref`.
///
/// The first node mentioning a customer carries the full customer with an
/// `$id`; later ones carry a `$ref`. Node order is shuffled, so a `$ref` may
/// precede the node that defines it.
pub fn referencing_batch_strategy() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_map(1i64..40, 1i64..6, 1..12)
        .prop_map(|orders| {
            let mut seen = std::collections::BTreeSet::new();
            orders
                .into_iter()
                .map(|(order_id, customer_id)| {
                    let customer = if seen.insert(customer_id) {
                        json!({
                            "$id": customer_id.to_string(),
                            "$type": "Customer",
                            "id": customer_id,
                            "name": format!("Customer {customer_id}"),
                        })
                    } else {
                        json!({"$ref": customer_id.to_string()})
                    };
                    json!({
                        "$type": "Order",
                        "id": order_id,
                        "customerId": customer_id,
                        "customer": customer,
                    })
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}
