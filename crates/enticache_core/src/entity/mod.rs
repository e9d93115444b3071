//! Entities, navigation values and complex values.

mod aspect;

pub use aspect::EntityAspect;

use crate::key::{EntityHandle, EntityKey};
use crate::state::EntityState;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Value of a navigation property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavValue {
    /// Single reference.
    Scalar(Option<EntityHandle>),
    /// Collection of references, in insertion order.
    Collection(Vec<EntityHandle>),
}

impl NavValue {
    /// Returns the scalar target, if this is a scalar navigation.
    pub fn as_scalar(&self) -> Option<EntityHandle> {
        match self {
            NavValue::Scalar(h) => *h,
            NavValue::Collection(_) => None,
        }
    }

    /// Returns the collection members, or an empty slice for scalars.
    pub fn as_collection(&self) -> &[EntityHandle] {
        match self {
            NavValue::Collection(items) => items,
            NavValue::Scalar(_) => &[],
        }
    }

    /// Returns true if `handle` is referenced.
    pub fn contains(&self, handle: EntityHandle) -> bool {
        match self {
            NavValue::Scalar(h) => *h == Some(handle),
            NavValue::Collection(items) => items.contains(&handle),
        }
    }
}

/// A mutable record of named properties plus its change-tracking aspect.
///
/// Data values are keyed by client property name. Complex-valued properties
/// hold a JSON object of their own client-named values.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) type_name: String,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) navigation: BTreeMap<String, NavValue>,
    pub(crate) aspect: EntityAspect,
}

impl Entity {
    /// Creates a detached, empty entity.
    ///
    /// Prefer [`EntityManager::create_entity`](crate::EntityManager::create_entity),
    /// which applies metadata defaults.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: BTreeMap::new(),
            navigation: BTreeMap::new(),
            aspect: EntityAspect::detached(),
        }
    }

    /// Sets a value while building a detached entity.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Sets a value directly. Only detached entities may be written this way.
    pub fn set_detached_value(&mut self, name: impl Into<String>, value: Value) -> bool {
        if !self.aspect.state.is_detached() {
            return false;
        }
        self.values.insert(name.into(), value);
        true
    }

    /// Entity type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Reads a data value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// All data values.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Reads a navigation value.
    pub fn navigation(&self, name: &str) -> Option<&NavValue> {
        self.navigation.get(name)
    }

    /// Scalar navigation target.
    pub fn scalar(&self, name: &str) -> Option<EntityHandle> {
        self.navigation.get(name).and_then(NavValue::as_scalar)
    }

    /// Collection navigation members.
    pub fn collection(&self, name: &str) -> &[EntityHandle] {
        self.navigation
            .get(name)
            .map(NavValue::as_collection)
            .unwrap_or(&[])
    }

    /// Change-tracking aspect.
    pub fn aspect(&self) -> &EntityAspect {
        &self.aspect
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntityState {
        self.aspect.state
    }

    /// Identity key, once known.
    pub fn key(&self) -> Option<&EntityKey> {
        self.aspect.key.as_ref()
    }

    /// Store handle, if attached.
    pub fn handle(&self) -> Option<EntityHandle> {
        self.aspect.handle
    }

    /// True if `name` has an uncommitted local change.
    pub fn is_property_modified(&self, name: &str) -> bool {
        self.aspect.original_values.contains_key(name)
    }

    /// Serializes the data values as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

/// An owned structured value with no identity of its own.
///
/// Its modification status is derived from the owning entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexValue {
    /// Complex type name.
    pub type_name: String,
    /// Client-named values; nested complex values are JSON objects.
    pub values: BTreeMap<String, Value>,
}

impl ComplexValue {
    /// Creates an empty complex value.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Converts to the JSON object stored on the owning entity.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detached_entity_accepts_direct_writes() {
        let mut e = Entity::new("Customer").with_value("name", json!("ACME"));
        assert!(e.set_detached_value("name", json!("ACME Corp")));
        assert_eq!(e.get("name"), Some(&json!("ACME Corp")));
        assert_eq!(e.state(), EntityState::Detached);
        assert!(e.handle().is_none());
    }

    #[test]
    fn nav_value_membership() {
        let a = EntityHandle::new(1);
        let b = EntityHandle::new(2);
        let nav = NavValue::Collection(vec![a]);
        assert!(nav.contains(a));
        assert!(!nav.contains(b));
        assert_eq!(NavValue::Scalar(Some(b)).as_scalar(), Some(b));
        assert!(NavValue::Scalar(None).as_collection().is_empty());
    }

    #[test]
    fn complex_to_json() {
        let mut c = ComplexValue::new("Address");
        c.values.insert("city".into(), json!("Oslo"));
        assert_eq!(c.to_json(), json!({"city": "Oslo"}));
    }
}
