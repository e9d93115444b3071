//! Benchmark utilities.
//!
//! Payload builders for the shop model used by the merge benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use serde_json::{json, Value};

/// Generate a random product name.
pub fn random_name(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// Generate flat customer nodes with ids `1..=count`.
pub fn customer_nodes(count: usize) -> Vec<Value> {
    (1..=count as i64)
        .map(|id| json!({"$type": "Customer", "id": id, "name": random_name(12)}))
        .collect()
}

/// Generate customers, each with `orders` orders of `lines` lines.
pub fn customer_graphs(count: usize, orders: usize, lines: usize) -> Vec<Value> {
    (1..=count as i64)
        .map(|id| {
            let orders: Vec<Value> = (0..orders as i64)
                .map(|o| {
                    let order_id = id * 1_000 + o;
                    let lines: Vec<Value> = (0..lines as i64)
                        .map(|l| {
                            json!({
                                "$type": "OrderLine",
                                "id": order_id * 1_000 + l,
                                "orderId": order_id,
                                "product": random_name(8),
                            })
                        })
                        .collect();
                    json!({
                        "$type": "Order",
                        "id": order_id,
                        "customerId": id,
                        "total": 10.5,
                        "lines": lines,
                    })
                })
                .collect();
            json!({"$type": "Customer", "id": id, "name": random_name(12), "orders": orders})
        })
        .collect()
}

/// Generate order nodes that share `customers` customers through `$id`/`$ref`.
pub fn referencing_orders(count: usize, customers: usize) -> Vec<Value> {
    let customers = customers.max(1) as i64;
    (0..count as i64)
        .map(|o| {
            let customer_id = o % customers + 1;
            let customer = if o < customers {
                json!({
                    "$id": customer_id.to_string(),
                    "$type": "Customer",
                    "id": customer_id,
                    "name": random_name(12),
                })
            } else {
                json!({"$ref": customer_id.to_string()})
            };
            json!({
                "$type": "Order",
                "id": o + 1,
                "customerId": customer_id,
                "customer": customer,
            })
        })
        .collect()
}
