//! Type descriptors: entity types, complex types and their properties.

use crate::error::{CacheError, CacheResult};
use crate::key::{EntityKey, KeyValue};
use crate::metadata::NamingConvention;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Data type of a scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 text.
    #[default]
    String,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Floating point.
    Double,
    /// Decimal, carried as a JSON number.
    Decimal,
    /// Boolean.
    Boolean,
    /// ISO-8601 timestamp, carried as text.
    DateTime,
    /// GUID.
    Guid,
    /// Untyped; values pass through unchanged.
    Undefined,
}

impl DataType {
    /// Returns true for integer types.
    pub const fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Normalizes a raw server value into the client representation.
    ///
    /// Servers commonly send 64-bit integers and decimals as strings; those are
    /// converted to JSON numbers when they parse. Anything else is kept as-is.
    pub fn parse_raw(&self, raw: &Value) -> Value {
        match (self, raw) {
            (DataType::Int32 | DataType::Int64, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| raw.clone()),
            (DataType::Double | DataType::Decimal, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .unwrap_or_else(|| raw.clone()),
            (DataType::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => raw.clone(),
            },
            (DataType::Guid, Value::String(s)) => Value::String(s.to_ascii_lowercase()),
            _ => raw.clone(),
        }
    }

    /// Converts a raw value into a key component of this type.
    pub fn key_value(&self, raw: &Value) -> Option<KeyValue> {
        let value = KeyValue::from_json(raw)?;
        Some(match (self, value) {
            (DataType::Int32 | DataType::Int64, KeyValue::Text(s)) => match s.parse::<i64>() {
                Ok(i) => KeyValue::Int(i),
                Err(_) => KeyValue::Text(s),
            },
            (DataType::Guid, KeyValue::Text(s)) => match Uuid::parse_str(&s) {
                Ok(g) => KeyValue::Guid(g),
                Err(_) => KeyValue::Text(s),
            },
            (DataType::String, KeyValue::Int(i)) => KeyValue::Text(i.to_string()),
            (_, other) => other,
        })
    }
}

fn default_true() -> bool {
    true
}

/// A scalar or complex-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProperty {
    /// Client-side name.
    pub name: String,
    /// Server-side name, when it differs from the naming convention.
    #[serde(default)]
    pub name_on_server: Option<String>,
    /// Data type.
    #[serde(default)]
    pub data_type: DataType,
    /// Whether the property is part of the identity key.
    #[serde(default)]
    pub is_part_of_key: bool,
    /// Complex type name for complex-valued properties.
    #[serde(default)]
    pub complex_type: Option<String>,
    /// Value assigned to new instances.
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Whether null is a legal value.
    #[serde(default = "default_true")]
    pub is_nullable: bool,
}

impl DataProperty {
    /// Creates a data property.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            name_on_server: None,
            data_type,
            is_part_of_key: false,
            complex_type: None,
            default_value: None,
            is_nullable: true,
        }
    }

    /// Creates a key property.
    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_part_of_key: true,
            is_nullable: false,
            ..Self::new(name, data_type)
        }
    }

    /// Creates a complex-valued property.
    pub fn complex(name: impl Into<String>, complex_type: impl Into<String>) -> Self {
        Self {
            complex_type: Some(complex_type.into()),
            ..Self::new(name, DataType::Undefined)
        }
    }

    /// Sets the server-side name.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.name_on_server = Some(name.into());
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Returns true if the property holds a complex value.
    pub fn is_complex(&self) -> bool {
        self.complex_type.is_some()
    }

    /// Returns the server-side name under a naming convention.
    pub fn server_name(&self, convention: NamingConvention) -> String {
        self.name_on_server
            .clone()
            .unwrap_or_else(|| convention.client_to_server(&self.name))
    }
}

/// A navigation property linking two entity types.
///
/// Scalar navigations on the dependent side carry the foreign-key property
/// names; the principal side usually declares a collection with an inverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationProperty {
    /// Client-side name.
    pub name: String,
    /// Server-side name, when it differs from the naming convention.
    #[serde(default)]
    pub name_on_server: Option<String>,
    /// Related entity type.
    pub target_type: String,
    /// True for a single reference, false for a collection.
    pub is_scalar: bool,
    /// Name of the inverse navigation on the target type.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Foreign-key properties on this type (scalar side only).
    #[serde(default)]
    pub foreign_key_names: Vec<String>,
}

impl NavigationProperty {
    /// Creates a scalar navigation.
    pub fn scalar(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_on_server: None,
            target_type: target_type.into(),
            is_scalar: true,
            inverse: None,
            foreign_key_names: Vec::new(),
        }
    }

    /// Creates a collection navigation.
    pub fn collection(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            is_scalar: false,
            ..Self::scalar(name, target_type)
        }
    }

    /// Sets the inverse navigation name.
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Sets the foreign-key property names.
    #[must_use]
    pub fn with_foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the server-side name.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.name_on_server = Some(name.into());
        self
    }

    /// Returns the server-side name under a naming convention.
    pub fn server_name(&self, convention: NamingConvention) -> String {
        self.name_on_server
            .clone()
            .unwrap_or_else(|| convention.client_to_server(&self.name))
    }
}

/// Descriptor of an identity-bearing entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    /// Short type name.
    pub name: String,
    /// Server namespace, if any.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Data properties, key properties included.
    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
    /// Navigation properties.
    #[serde(default)]
    pub navigation_properties: Vec<NavigationProperty>,
    /// Whether the server assigns key values.
    #[serde(default)]
    pub auto_generated_keys: bool,
    /// Default resource name used for saves.
    #[serde(default)]
    pub default_resource_name: Option<String>,
}

impl EntityType {
    /// Creates an empty entity type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
            auto_generated_keys: false,
            default_resource_name: None,
        }
    }

    /// Adds a data property.
    #[must_use]
    pub fn with_data(mut self, property: DataProperty) -> Self {
        self.data_properties.push(property);
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn with_navigation(mut self, property: NavigationProperty) -> Self {
        self.navigation_properties.push(property);
        self
    }

    /// Marks keys as server-generated.
    #[must_use]
    pub fn with_auto_generated_keys(mut self) -> Self {
        self.auto_generated_keys = true;
        self
    }

    /// Sets the server namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Returns the key properties in key order.
    pub fn key_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.data_properties.iter().filter(|p| p.is_part_of_key)
    }

    /// Looks up a data property by client name.
    pub fn data_property(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name == name)
    }

    /// Looks up a navigation property by client name.
    pub fn navigation_property(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }

    /// Returns true if `name` is a key property.
    pub fn is_key_property(&self, name: &str) -> bool {
        self.data_property(name).is_some_and(|p| p.is_part_of_key)
    }

    /// Returns the scalar navigations that use `fk_name` as a foreign key.
    pub fn navigations_for_foreign_key<'a>(
        &'a self,
        fk_name: &'a str,
    ) -> impl Iterator<Item = &'a NavigationProperty> + 'a {
        self.navigation_properties
            .iter()
            .filter(move |np| np.is_scalar && np.foreign_key_names.iter().any(|n| n == fk_name))
    }

    /// Returns true if `name` is a foreign-key property.
    pub fn is_foreign_key(&self, name: &str) -> bool {
        self.navigations_for_foreign_key(name).next().is_some()
    }

    /// Extracts the identity key from a raw server node, reading server names.
    pub fn key_from_raw(&self, node: &Value, convention: NamingConvention) -> CacheResult<EntityKey> {
        let mut values = Vec::new();
        for property in self.key_properties() {
            let server_name = property.server_name(convention);
            let raw = node.get(&server_name).unwrap_or(&Value::Null);
            let value = property.data_type.key_value(raw).ok_or_else(|| {
                CacheError::invalid_key(
                    &self.name,
                    format!("missing or invalid key property {server_name}"),
                )
            })?;
            values.push(value);
        }
        if values.is_empty() {
            return Err(CacheError::invalid_key(&self.name, "type declares no key"));
        }
        Ok(EntityKey::new(&self.name, values))
    }

    /// Extracts the identity key from client-named values.
    pub fn key_from_values(&self, values: &BTreeMap<String, Value>) -> CacheResult<EntityKey> {
        let mut key = Vec::new();
        for property in self.key_properties() {
            let raw = values.get(&property.name).unwrap_or(&Value::Null);
            let value = property.data_type.key_value(raw).ok_or_else(|| {
                CacheError::invalid_key(&self.name, format!("key property {} is not set", property.name))
            })?;
            key.push(value);
        }
        if key.is_empty() {
            return Err(CacheError::invalid_key(&self.name, "type declares no key"));
        }
        Ok(EntityKey::new(&self.name, key))
    }

    /// Builds the key of the entity a scalar navigation points at, from foreign-key values.
    ///
    /// Returns `None` when any foreign key is null.
    pub fn foreign_key_target(
        &self,
        navigation: &NavigationProperty,
        target: &EntityType,
        values: &BTreeMap<String, Value>,
    ) -> Option<EntityKey> {
        if navigation.foreign_key_names.is_empty() {
            return None;
        }
        let key_types: Vec<DataType> = target.key_properties().map(|p| p.data_type).collect();
        let mut key = Vec::with_capacity(navigation.foreign_key_names.len());
        for (i, fk) in navigation.foreign_key_names.iter().enumerate() {
            let raw = values.get(fk)?;
            let data_type = key_types.get(i).copied().unwrap_or(DataType::Undefined);
            key.push(data_type.key_value(raw)?);
        }
        Some(EntityKey::new(&target.name, key))
    }
}

/// Descriptor of a complex (owned, identity-less) type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexType {
    /// Type name.
    pub name: String,
    /// Properties; may themselves be complex.
    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
}

impl ComplexType {
    /// Creates an empty complex type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_properties: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_data(mut self, property: DataProperty) -> Self {
        self.data_properties.push(property);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer() -> EntityType {
        EntityType::new("Customer")
            .with_data(DataProperty::key("id", DataType::Int64))
            .with_data(DataProperty::new("name", DataType::String))
    }

    #[test]
    fn key_from_raw_reads_server_names() {
        let et = customer();
        let key = et
            .key_from_raw(&json!({"Id": "42", "Name": "ACME"}), NamingConvention::CamelCase)
            .unwrap();
        assert_eq!(key, EntityKey::single("Customer", 42));
    }

    #[test]
    fn key_from_raw_missing_key() {
        let et = customer();
        let err = et
            .key_from_raw(&json!({"name": "ACME"}), NamingConvention::None)
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey { .. }));
    }

    #[test]
    fn temp_text_key_on_integer_type() {
        let key = DataType::Int64.key_value(&json!("temp-1")).unwrap();
        assert_eq!(key, KeyValue::Text("temp-1".into()));
    }

    #[test]
    fn parse_raw_normalizes_numbers() {
        assert_eq!(DataType::Int64.parse_raw(&json!("12")), json!(12));
        assert_eq!(DataType::Decimal.parse_raw(&json!("1.5")), json!(1.5));
        assert_eq!(DataType::String.parse_raw(&json!("12")), json!("12"));
        assert_eq!(DataType::Boolean.parse_raw(&json!("true")), json!(true));
    }

    #[test]
    fn foreign_key_target() {
        let order = EntityType::new("Order")
            .with_data(DataProperty::key("id", DataType::Int64))
            .with_data(DataProperty::new("customerId", DataType::Int64))
            .with_navigation(
                NavigationProperty::scalar("customer", "Customer").with_foreign_keys(["customerId"]),
            );
        let nav = order.navigation_property("customer").unwrap();
        let mut values = BTreeMap::new();
        values.insert("customerId".to_string(), json!(3));
        assert_eq!(
            order.foreign_key_target(nav, &customer(), &values),
            Some(EntityKey::single("Customer", 3))
        );
        values.insert("customerId".to_string(), Value::Null);
        assert_eq!(order.foreign_key_target(nav, &customer(), &values), None);
        assert!(order.is_foreign_key("customerId"));
        assert!(!order.is_foreign_key("id"));
    }
}
