//! Wire types exchanged with the save transport.

use crate::config::SaveOptions;
use enticache_core::{
    CacheResult, DataProperty, Entity, EntityHandle, EntityKey, EntityManager, EntityState,
    EntityType, KeyValue, MetadataStore,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Serialized batch of entities handed to the transport.
///
/// Each entity is an object of server-named data values plus an
/// `entityAspect` member carrying its type, state and original values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBundle {
    /// Serialized entities.
    pub entities: Vec<Value>,
    /// Server resource that receives the save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Request options.
    #[serde(default)]
    pub save_options: SaveOptions,
}

/// Read-only view of one bundle entry.
#[derive(Debug, Clone, Copy)]
pub struct BundleEntity<'a> {
    /// Entity type name as sent, possibly namespaced.
    pub type_name: &'a str,
    /// Lifecycle state at dispatch.
    pub state: EntityState,
    /// Server-named values, `entityAspect` included.
    pub node: &'a Map<String, Value>,
}

impl BundleEntity<'_> {
    /// Server name of the auto-generated key property, if the server assigns keys.
    pub fn auto_generated_key(&self) -> Option<&str> {
        self.node
            .get("entityAspect")?
            .get("autoGeneratedKey")?
            .get("propertyName")?
            .as_str()
    }

    /// Original values by server name.
    pub fn original_values(&self) -> Option<&Map<String, Value>> {
        self.node.get("entityAspect")?.get("originalValuesMap")?.as_object()
    }
}

impl SaveBundle {
    /// Serializes the given entities.
    pub fn build(
        manager: &EntityManager,
        handles: &[EntityHandle],
        options: &SaveOptions,
    ) -> CacheResult<Self> {
        let metadata = manager.metadata();
        let mut entities = Vec::with_capacity(handles.len());
        let mut default_resource = None;
        for &handle in handles {
            let entity = manager.get_entity(handle)?;
            let et = metadata.entity_type(entity.type_name())?;
            if default_resource.is_none() {
                default_resource = et.default_resource_name.clone();
            }
            entities.push(entity_payload(metadata, et, entity)?);
        }
        Ok(Self {
            entities,
            resource_name: options.resource_name.clone().or(default_resource),
            save_options: options.clone(),
        })
    }

    /// Number of serialized entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the bundle carries no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates over well-formed entries.
    pub fn entries(&self) -> impl Iterator<Item = BundleEntity<'_>> {
        self.entities.iter().filter_map(|value| {
            let node = value.as_object()?;
            let aspect = node.get("entityAspect")?;
            Some(BundleEntity {
                type_name: aspect.get("entityTypeName")?.as_str()?,
                state: EntityState::from_name(aspect.get("entityState")?.as_str()?)?,
                node,
            })
        })
    }
}

fn entity_payload(metadata: &MetadataStore, et: &EntityType, entity: &Entity) -> CacheResult<Value> {
    let convention = metadata.naming_convention();
    let mut node = Map::new();
    for property in &et.data_properties {
        let value = entity.get(&property.name).cloned().unwrap_or(Value::Null);
        node.insert(
            property.server_name(convention),
            server_value(metadata, property, value)?,
        );
    }

    let mut originals = Map::new();
    for (name, value) in entity.aspect().original_values() {
        if let Some(property) = et.data_property(name) {
            originals.insert(
                property.server_name(convention),
                server_value(metadata, property, value.clone())?,
            );
        }
    }

    let type_name = match &et.namespace {
        Some(ns) => format!("{}:#{ns}", et.name),
        None => et.name.clone(),
    };
    let mut aspect = Map::new();
    aspect.insert("entityTypeName".into(), json!(type_name));
    aspect.insert("entityState".into(), json!(entity.state().name()));
    aspect.insert("originalValuesMap".into(), Value::Object(originals));
    if et.auto_generated_keys {
        if let Some(key) = et.key_properties().next() {
            aspect.insert(
                "autoGeneratedKey".into(),
                json!({"propertyName": key.server_name(convention)}),
            );
        }
    }
    node.insert("entityAspect".into(), Value::Object(aspect));
    Ok(Value::Object(node))
}

/// Renames the members of complex values to server names.
fn server_value(metadata: &MetadataStore, property: &DataProperty, value: Value) -> CacheResult<Value> {
    let (Some(type_name), Value::Object(mut members)) = (&property.complex_type, value.clone()) else {
        return Ok(value);
    };
    let ct = metadata.complex_type(type_name)?;
    let convention = metadata.naming_convention();
    let mut out = Map::new();
    for nested in &ct.data_properties {
        let v = members.remove(&nested.name).unwrap_or(Value::Null);
        out.insert(nested.server_name(convention), server_value(metadata, nested, v)?);
    }
    Ok(Value::Object(out))
}

/// A server-assigned key replacing a temporary one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    /// Entity type name.
    pub type_name: String,
    /// Temporary key used by the client.
    pub temp_key: KeyValue,
    /// Permanent key assigned by the server.
    pub real_key: KeyValue,
}

impl KeyMapping {
    /// Creates a mapping.
    pub fn new(
        type_name: impl Into<String>,
        temp_key: impl Into<KeyValue>,
        real_key: impl Into<KeyValue>,
    ) -> Self {
        Self {
            type_name: enticache_core::resolve_type_name(&type_name.into()).to_string(),
            temp_key: temp_key.into(),
            real_key: real_key.into(),
        }
    }

    /// Identity key the entity had before the save.
    pub fn temp_entity_key(&self) -> EntityKey {
        EntityKey::single(&self.type_name, self.temp_key.clone())
    }

    /// Identity key the entity has after the save.
    pub fn real_entity_key(&self) -> EntityKey {
        EntityKey::single(&self.type_name, self.real_key.clone())
    }

    /// Returns the real key if `value` is this mapping's temporary key for `type_name`.
    pub fn translate(&self, type_name: &str, value: &Value) -> Option<Value> {
        if self.type_name != type_name {
            return None;
        }
        (KeyValue::from_json(value).as_ref() == Some(&self.temp_key)).then(|| self.real_key.to_json())
    }
}

/// What the transport returns for a successful save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSaveResponse {
    /// Saved entities as server-shaped nodes.
    #[serde(default)]
    pub entities: Vec<Value>,
    /// Temporary-to-real key replacements.
    #[serde(default)]
    pub key_mappings: Vec<KeyMapping>,
    /// Keys of entities the server deleted.
    #[serde(default)]
    pub deleted_keys: Vec<EntityKey>,
}
