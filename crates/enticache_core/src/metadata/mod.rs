//! Type descriptor lookup.
//!
//! The [`MetadataStore`] is an explicit registry handed to the entity manager
//! at construction; there is no process-wide type registration.

mod key_generator;
mod naming;
mod types;

pub use key_generator::KeyGenerator;
pub use naming::NamingConvention;
pub use types::{ComplexType, DataProperty, DataType, EntityType, NavigationProperty};

use crate::error::{CacheError, CacheResult};
use serde::Deserialize;
use std::collections::HashMap;

/// Either kind of structural type.
#[derive(Debug, Clone, Copy)]
pub enum StructuralType<'a> {
    /// Identity-bearing entity type.
    Entity(&'a EntityType),
    /// Complex value type.
    Complex(&'a ComplexType),
}

/// Registry of entity and complex type descriptors.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    naming_convention: NamingConvention,
    entity_types: HashMap<String, EntityType>,
    complex_types: HashMap<String, ComplexType>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    #[serde(default)]
    naming_convention: NamingConvention,
    #[serde(default)]
    entity_types: Vec<EntityType>,
    #[serde(default)]
    complex_types: Vec<ComplexType>,
}

impl MetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with a naming convention.
    pub fn with_naming_convention(naming_convention: NamingConvention) -> Self {
        Self {
            naming_convention,
            ..Self::default()
        }
    }

    /// Loads a metadata document and validates it.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let doc: MetadataDocument = serde_json::from_str(json)?;
        let mut store = Self::with_naming_convention(doc.naming_convention);
        for ct in doc.complex_types {
            store.add_complex_type(ct)?;
        }
        for et in doc.entity_types {
            store.add_entity_type(et)?;
        }
        store.validate()?;
        Ok(store)
    }

    /// Returns the naming convention.
    pub fn naming_convention(&self) -> NamingConvention {
        self.naming_convention
    }

    /// Registers an entity type.
    pub fn add_entity_type(&mut self, entity_type: EntityType) -> CacheResult<()> {
        if self.entity_types.contains_key(&entity_type.name)
            || self.complex_types.contains_key(&entity_type.name)
        {
            return Err(CacheError::metadata(format!(
                "type already registered: {}",
                entity_type.name
            )));
        }
        if entity_type.key_properties().next().is_none() {
            return Err(CacheError::metadata(format!(
                "entity type {} declares no key",
                entity_type.name
            )));
        }
        self.entity_types.insert(entity_type.name.clone(), entity_type);
        Ok(())
    }

    /// Registers a complex type.
    pub fn add_complex_type(&mut self, complex_type: ComplexType) -> CacheResult<()> {
        if self.entity_types.contains_key(&complex_type.name)
            || self.complex_types.contains_key(&complex_type.name)
        {
            return Err(CacheError::metadata(format!(
                "type already registered: {}",
                complex_type.name
            )));
        }
        self.complex_types
            .insert(complex_type.name.clone(), complex_type);
        Ok(())
    }

    /// Checks that every referenced type and inverse exists.
    pub fn validate(&self) -> CacheResult<()> {
        for et in self.entity_types.values() {
            for dp in &et.data_properties {
                if let Some(ct) = &dp.complex_type {
                    if !self.complex_types.contains_key(ct) {
                        return Err(CacheError::metadata(format!(
                            "{}.{} references unknown complex type {ct}",
                            et.name, dp.name
                        )));
                    }
                }
            }
            for np in &et.navigation_properties {
                let target = self.entity_type(&np.target_type).map_err(|_| {
                    CacheError::metadata(format!(
                        "{}.{} targets unknown type {}",
                        et.name, np.name, np.target_type
                    ))
                })?;
                if let Some(inverse) = &np.inverse {
                    if target.navigation_property(inverse).is_none() {
                        return Err(CacheError::metadata(format!(
                            "{}.{} declares missing inverse {}.{inverse}",
                            et.name, np.name, target.name
                        )));
                    }
                }
                for fk in &np.foreign_key_names {
                    if et.data_property(fk).is_none() {
                        return Err(CacheError::metadata(format!(
                            "{}.{} uses missing foreign key {fk}",
                            et.name, np.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up an entity type.
    pub fn entity_type(&self, name: &str) -> CacheResult<&EntityType> {
        self.entity_types
            .get(resolve_type_name(name))
            .ok_or_else(|| CacheError::unknown_type(name))
    }

    /// Looks up a complex type.
    pub fn complex_type(&self, name: &str) -> CacheResult<&ComplexType> {
        self.complex_types
            .get(resolve_type_name(name))
            .ok_or_else(|| CacheError::unknown_type(name))
    }

    /// Looks up either kind of type.
    pub fn structural_type(&self, name: &str) -> Option<StructuralType<'_>> {
        let short = resolve_type_name(name);
        if let Some(et) = self.entity_types.get(short) {
            return Some(StructuralType::Entity(et));
        }
        self.complex_types.get(short).map(StructuralType::Complex)
    }

    /// Returns the inverse of a navigation property, if declared.
    pub fn inverse_of(&self, navigation: &NavigationProperty) -> Option<&NavigationProperty> {
        let inverse = navigation.inverse.as_deref()?;
        self.entity_types
            .get(&navigation.target_type)?
            .navigation_property(inverse)
    }

    /// Iterates over registered entity types.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }
}

/// Strips server decorations from a type name.
///
/// `Customer:#Northwind.Models` and `Northwind.Models.Customer` both resolve
/// to `Customer`.
pub fn resolve_type_name(name: &str) -> &str {
    let without_ns = name.split(":#").next().unwrap_or(name);
    without_ns.rsplit('.').next().unwrap_or(without_ns)
}
