//! # EntiCache Core
//!
//! Client-side entity cache with change tracking and graph merging.
//!
//! This crate provides:
//! - Metadata describing entity types, complex types and relationships
//! - An identity-keyed entity store with lifecycle states
//! - Property interception that keeps foreign keys and navigations in sync
//! - A change feed publishing every entity action
//! - Merging of server-shaped JSON graphs under a choice of strategies
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enticache_core::{EntityManager, JsonResultsAdapter, MetadataStore};
//! use serde_json::json;
//!
//! let mut manager = EntityManager::new(MetadataStore::from_json(METADATA)?);
//! let adapter = JsonResultsAdapter::new();
//! let outcome = manager.merge_query_results(
//!     &[json!({"$type": "Customer", "id": 1, "name": "ACME"})],
//!     &adapter,
//! )?;
//! let customer = outcome.entities()[0];
//! manager.set_value(customer, "name", json!("ACME Corp"))?;
//! assert!(manager.has_changes());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod config;
mod entity;
mod error;
mod key;
mod manager;
mod merge;
mod metadata;
mod state;

#[cfg(test)]
mod fixtures;

pub use action::EntityAction;
pub use config::{CacheConfig, MergeOptions, MergeStrategy};
pub use entity::{ComplexValue, Entity, EntityAspect, NavValue};
pub use error::{CacheError, CacheResult};
pub use key::{EntityHandle, EntityKey, KeyValue};
pub use manager::{CacheEvent, ChangeEvent, ChangeFeed, EntityManager, SharedManager};
pub use merge::{
    JsonResultsAdapter, MergeKind, MergeOutcome, MergeSession, MergedValue, NodeClassifier,
    NodeContext, NodeDescriptor, NodeKind, TypedClassifier,
};
pub use metadata::{
    resolve_type_name, ComplexType, DataProperty, DataType, EntityType, KeyGenerator,
    MetadataStore, NamingConvention, NavigationProperty, StructuralType,
};
pub use state::EntityState;
