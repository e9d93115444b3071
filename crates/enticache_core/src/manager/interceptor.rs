//! Property-write interceptor.
//!
//! Three kinds of write touch a relationship: setting a scalar navigation,
//! appending to a collection navigation, and setting a foreign key. Each of
//! them brings the other two in line:
//!
//! | write                  | foreign key          | scalar navigation | inverse collection       |
//! |------------------------|----------------------|-------------------|--------------------------|
//! | scalar-nav-set         | copied from target   | -                 | moved to new principal   |
//! | collection-nav-append  | copied from owner    | set to owner      | -                        |
//! | fk-set                 | -                    | resolved by key   | moved to new principal   |
//!
//! A foreign key naming an entity that is not attached yet parks the child
//! until an entity with that key is attached or re-keyed.

use super::EntityManager;
use crate::action::EntityAction;
use crate::entity::NavValue;
use crate::error::{CacheError, CacheResult};
use crate::key::{EntityHandle, EntityKey};
use crate::metadata::{EntityType, MetadataStore, NavigationProperty};
use crate::state::EntityState;
use serde_json::Value;
use std::sync::Arc;

impl EntityManager {
    /// Reads a data value by client name.
    pub fn get_value(&self, handle: EntityHandle, name: &str) -> CacheResult<Value> {
        let entity = self.get_entity(handle)?;
        let et = self.metadata.entity_type(entity.type_name())?;
        if et.data_property(name).is_none() {
            return Err(CacheError::unknown_property(&et.name, name));
        }
        Ok(entity.get(name).cloned().unwrap_or(Value::Null))
    }

    /// Writes a data value.
    ///
    /// The first write of a property records its original value; an
    /// Unchanged entity becomes Modified. Foreign-key writes relink the
    /// matching scalar navigation, and key writes re-index the entity.
    pub fn set_value(&mut self, handle: EntityHandle, name: &str, value: Value) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let et = metadata.entity_type(self.get_entity(handle)?.type_name())?;
        let Some(property) = et.data_property(name) else {
            if et.navigation_property(name).is_some() {
                return Err(CacheError::invalid_operation(format!(
                    "{}.{name} is a navigation property",
                    et.name
                )));
            }
            return Err(CacheError::unknown_property(&et.name, name));
        };

        if property.is_part_of_key {
            let mut values = self.get_entity(handle)?.values.clone();
            values.insert(name.to_string(), value.clone());
            let new_key = et.key_from_values(&values)?;
            if let Some(other) = self.find_by_key(&new_key) {
                if other != handle {
                    return Err(CacheError::invalid_operation(format!(
                        "an entity with key {new_key} is already attached"
                    )));
                }
            }
            if self.write_value(handle, name, value)? {
                self.rekey(handle, new_key)?;
            }
            return Ok(());
        }

        if self.write_value(handle, name, value)? {
            for nav in et.navigations_for_foreign_key(name) {
                self.sync_navigation_from_foreign_key(handle, et, nav)?;
            }
        }
        Ok(())
    }

    /// Points a scalar navigation at `target` (or clears it).
    ///
    /// Foreign keys are copied from the target's key, and the entity moves
    /// between the inverse collections of the old and new principals.
    pub fn set_navigation(
        &mut self,
        handle: EntityHandle,
        name: &str,
        target: Option<EntityHandle>,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let et = metadata.entity_type(self.get_entity(handle)?.type_name())?;
        let nav = et
            .navigation_property(name)
            .ok_or_else(|| CacheError::unknown_property(&et.name, name))?;
        if !nav.is_scalar {
            return Err(CacheError::invalid_operation(format!(
                "{}.{name} is a collection; use add_to_collection",
                et.name
            )));
        }
        if let Some(target) = target {
            self.check_target_type(nav, target)?;
        }
        if self.get_entity(handle)?.scalar(name) == target {
            return Ok(());
        }

        match target {
            Some(parent) => self.connect(handle, nav, parent)?,
            None => self.disconnect(handle, nav)?,
        }
        self.forget_unattached(handle, Some(name));
        self.write_foreign_keys(handle, nav, target)?;
        if !self.loading {
            self.emit_entity(EntityAction::PropertyChange, handle, Some(name));
        }
        Ok(())
    }

    /// Appends `member` to a collection navigation of `owner`.
    ///
    /// When the collection has a scalar inverse this is the same write as
    /// pointing the member's inverse navigation at the owner.
    pub fn add_to_collection(
        &mut self,
        owner: EntityHandle,
        name: &str,
        member: EntityHandle,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let nav = self.collection_navigation(&metadata, owner, name)?;
        self.check_target_type(nav, member)?;
        match metadata.inverse_of(nav) {
            Some(inverse) if inverse.is_scalar => {
                self.set_navigation(member, &inverse.name, Some(owner))
            }
            _ => {
                if self.push_member(owner, name, member)? && !self.loading {
                    self.emit_entity(EntityAction::PropertyChange, owner, Some(name));
                }
                Ok(())
            }
        }
    }

    /// Removes `member` from a collection navigation of `owner`.
    pub fn remove_from_collection(
        &mut self,
        owner: EntityHandle,
        name: &str,
        member: EntityHandle,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let nav = self.collection_navigation(&metadata, owner, name)?;
        match metadata.inverse_of(nav) {
            Some(inverse) if inverse.is_scalar => {
                if self.get_entity(member)?.scalar(&inverse.name) == Some(owner) {
                    self.set_navigation(member, &inverse.name, None)?;
                }
                Ok(())
            }
            _ => {
                if let NavValue::Collection(items) = self.nav_slot(owner, name)? {
                    items.retain(|h| *h != member);
                }
                if !self.loading {
                    self.emit_entity(EntityAction::PropertyChange, owner, Some(name));
                }
                Ok(())
            }
        }
    }

    /// Replaces an entity's identity key without change tracking.
    ///
    /// Foreign keys of dependents linked to the entity are rewritten and
    /// children parked on the new key are linked. Used to swap temporary
    /// keys for server-assigned ones.
    pub fn change_key(&mut self, handle: EntityHandle, new_key: EntityKey) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let et = metadata.entity_type(self.get_entity(handle)?.type_name())?;
        let names: Vec<&str> = et.key_properties().map(|p| p.name.as_str()).collect();
        if names.len() != new_key.values.len() {
            return Err(CacheError::invalid_key(
                &et.name,
                format!("expected {} key values, got {}", names.len(), new_key.values.len()),
            ));
        }
        if let Some(other) = self.find_by_key(&new_key) {
            if other != handle {
                return Err(CacheError::invalid_operation(format!(
                    "an entity with key {new_key} is already attached"
                )));
            }
        }
        let new_key = EntityKey::new(&et.name, new_key.values);
        let entity = self.entity_mut(handle)?;
        for (name, value) in names.iter().zip(new_key.json_values()) {
            entity.values.insert((*name).to_string(), value);
        }
        tracing::debug!(%handle, %new_key, "changed entity key");
        self.rekey(handle, new_key)
    }

    // ========================================================================
    // Relationship plumbing shared with the merge session
    // ========================================================================

    /// Writes a value, tracking it unless the store is loading.
    ///
    /// Returns false when the value did not change.
    pub(crate) fn write_value(
        &mut self,
        handle: EntityHandle,
        name: &str,
        value: Value,
    ) -> CacheResult<bool> {
        let loading = self.loading;
        let entity = self.entity_mut(handle)?;
        let old = entity.values.get(name).cloned().unwrap_or(Value::Null);
        if old == value {
            return Ok(false);
        }
        let state = entity.aspect.state;
        if !loading && !state.is_detached() {
            entity
                .aspect
                .original_values
                .entry(name.to_string())
                .or_insert(old);
        }
        entity.values.insert(name.to_string(), value);
        if !loading {
            if state.is_unchanged() {
                self.change_state(handle, EntityState::Modified)?;
            }
            self.emit_entity(EntityAction::PropertyChange, handle, Some(name));
        }
        Ok(true)
    }

    /// Links `child` to `parent` through a scalar navigation and copies the
    /// parent's key into the foreign keys.
    pub(crate) fn link_scalar(
        &mut self,
        child: EntityHandle,
        nav: &NavigationProperty,
        parent: EntityHandle,
    ) -> CacheResult<()> {
        if self.get_entity(child)?.scalar(&nav.name) != Some(parent) {
            self.connect(child, nav, parent)?;
            self.forget_unattached(child, Some(&nav.name));
        }
        self.write_foreign_keys(child, nav, Some(parent))
    }

    /// Adds `member` to a collection navigation of `owner`, pointing the
    /// member's inverse back at the owner.
    pub(crate) fn link_collection_member(
        &mut self,
        owner: EntityHandle,
        nav: &NavigationProperty,
        member: EntityHandle,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        match metadata.inverse_of(nav) {
            Some(inverse) if inverse.is_scalar => self.link_scalar(member, inverse, owner),
            _ => self.push_member(owner, &nav.name, member).map(|_| ()),
        }
    }

    /// Resolves a scalar navigation from the entity's foreign-key values.
    pub(crate) fn sync_navigation_from_foreign_key(
        &mut self,
        handle: EntityHandle,
        et: &EntityType,
        nav: &NavigationProperty,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let target_et = metadata.entity_type(&nav.target_type)?;
        let target_key = et.foreign_key_target(nav, target_et, &self.get_entity(handle)?.values);
        self.forget_unattached(handle, Some(&nav.name));
        match target_key {
            None => self.disconnect(handle, nav),
            Some(key) => match self.find_by_key(&key) {
                Some(parent) => self.connect(handle, nav, parent),
                None => {
                    self.disconnect(handle, nav)?;
                    self.store
                        .unattached_children
                        .entry(key)
                        .or_default()
                        .push((handle, nav.name.clone()));
                    Ok(())
                }
            },
        }
    }

    /// Re-indexes an entity under a new key.
    pub(crate) fn rekey(&mut self, handle: EntityHandle, new_key: EntityKey) -> CacheResult<()> {
        let old_key = self.get_entity(handle)?.key().cloned();
        if old_key.as_ref() == Some(&new_key) {
            return Ok(());
        }
        if let Some(old_key) = &old_key {
            self.record_index(old_key);
            self.store.index.remove(old_key);
        }
        self.record_index(&new_key);
        self.store.index.insert(new_key.clone(), handle);
        self.entity_mut(handle)?.aspect.key = Some(new_key.clone());
        self.rewrite_dependent_foreign_keys(handle, &new_key)?;
        self.drain_unattached_children(&new_key, handle)
    }

    /// Links children that were waiting for an entity with `key`.
    pub(crate) fn drain_unattached_children(
        &mut self,
        key: &EntityKey,
        parent: EntityHandle,
    ) -> CacheResult<()> {
        let Some(waiting) = self.store.unattached_children.remove(key) else {
            return Ok(());
        };
        let metadata = Arc::clone(&self.metadata);
        for (child, nav_name) in waiting {
            let Some(entity) = self.entity(child) else {
                continue;
            };
            let et = metadata.entity_type(entity.type_name())?;
            let Some(nav) = et.navigation_property(&nav_name) else {
                continue;
            };
            let target_et = metadata.entity_type(&nav.target_type)?;
            if et.foreign_key_target(nav, target_et, &entity.values).as_ref() == Some(key) {
                self.connect(child, nav, parent)?;
            }
        }
        Ok(())
    }

    /// Drops parked entries for `handle`, optionally only for one navigation.
    pub(crate) fn forget_unattached(&mut self, handle: EntityHandle, nav_name: Option<&str>) {
        self.store.unattached_children.retain(|_, waiting| {
            waiting.retain(|(h, n)| !(*h == handle && nav_name.map_or(true, |name| name == n.as_str())));
            !waiting.is_empty()
        });
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Sets the scalar slot and maintains both inverse sides.
    fn connect(
        &mut self,
        child: EntityHandle,
        nav: &NavigationProperty,
        parent: EntityHandle,
    ) -> CacheResult<()> {
        self.get_entity(parent)?;
        let previous = self.set_scalar_slot(child, &nav.name, Some(parent))?;
        let metadata = Arc::clone(&self.metadata);
        if let Some(inverse) = metadata.inverse_of(nav) {
            if let Some(old) = previous.filter(|old| *old != parent) {
                self.remove_inverse(old, inverse, child);
            }
            self.add_inverse(parent, inverse, child);
        }
        Ok(())
    }

    fn disconnect(&mut self, child: EntityHandle, nav: &NavigationProperty) -> CacheResult<()> {
        let previous = self.set_scalar_slot(child, &nav.name, None)?;
        let metadata = Arc::clone(&self.metadata);
        if let (Some(old), Some(inverse)) = (previous, metadata.inverse_of(nav)) {
            self.remove_inverse(old, inverse, child);
        }
        Ok(())
    }

    fn set_scalar_slot(
        &mut self,
        handle: EntityHandle,
        name: &str,
        target: Option<EntityHandle>,
    ) -> CacheResult<Option<EntityHandle>> {
        let slot = self.nav_slot(handle, name)?;
        let previous = slot.as_scalar();
        *slot = NavValue::Scalar(target);
        Ok(previous)
    }

    fn add_inverse(&mut self, owner: EntityHandle, inverse: &NavigationProperty, member: EntityHandle) {
        let Ok(slot) = self.nav_slot(owner, &inverse.name) else {
            return;
        };
        match slot {
            NavValue::Collection(items) => {
                if !items.contains(&member) {
                    items.push(member);
                }
            }
            NavValue::Scalar(target) => *target = Some(member),
        }
    }

    fn remove_inverse(
        &mut self,
        owner: EntityHandle,
        inverse: &NavigationProperty,
        member: EntityHandle,
    ) {
        let Ok(slot) = self.nav_slot(owner, &inverse.name) else {
            return;
        };
        match slot {
            NavValue::Collection(items) => items.retain(|h| *h != member),
            NavValue::Scalar(target) => {
                if *target == Some(member) {
                    *target = None;
                }
            }
        }
    }

    fn push_member(&mut self, owner: EntityHandle, name: &str, member: EntityHandle) -> CacheResult<bool> {
        match self.nav_slot(owner, name)? {
            NavValue::Collection(items) if !items.contains(&member) => {
                items.push(member);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn nav_slot(&mut self, handle: EntityHandle, name: &str) -> CacheResult<&mut NavValue> {
        let entity = self.entity_mut(handle)?;
        let type_name = entity.type_name.clone();
        entity
            .navigation
            .get_mut(name)
            .ok_or_else(|| CacheError::unknown_property(type_name, name))
    }

    fn write_foreign_keys(
        &mut self,
        handle: EntityHandle,
        nav: &NavigationProperty,
        target: Option<EntityHandle>,
    ) -> CacheResult<()> {
        if nav.foreign_key_names.is_empty() {
            return Ok(());
        }
        let values = match target {
            Some(parent) => self
                .get_entity(parent)?
                .key()
                .map(EntityKey::json_values)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        for (i, fk) in nav.foreign_key_names.iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or(Value::Null);
            self.write_value(handle, fk, value)?;
        }
        Ok(())
    }

    fn rewrite_dependent_foreign_keys(
        &mut self,
        parent: EntityHandle,
        key: &EntityKey,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let mut dependents = Vec::new();
        for child in self.link_holders(self.get_entity(parent)?) {
            let Some(entity) = self.entity(child) else {
                continue;
            };
            let Ok(et) = metadata.entity_type(&entity.type_name) else {
                continue;
            };
            for nav in &et.navigation_properties {
                if nav.is_scalar
                    && !nav.foreign_key_names.is_empty()
                    && entity.scalar(&nav.name) == Some(parent)
                {
                    dependents.push((child, nav.foreign_key_names.clone()));
                }
            }
        }
        let values = key.json_values();
        for (child, foreign_keys) in dependents {
            let entity = self.entity_mut(child)?;
            for (fk, value) in foreign_keys.iter().zip(values.iter()) {
                entity.values.insert(fk.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn collection_navigation<'m>(
        &self,
        metadata: &'m MetadataStore,
        owner: EntityHandle,
        name: &str,
    ) -> CacheResult<&'m NavigationProperty> {
        let et = metadata.entity_type(self.get_entity(owner)?.type_name())?;
        let nav = et
            .navigation_property(name)
            .ok_or_else(|| CacheError::unknown_property(&et.name, name))?;
        if nav.is_scalar {
            return Err(CacheError::invalid_operation(format!(
                "{}.{name} is a scalar navigation; use set_navigation",
                et.name
            )));
        }
        Ok(nav)
    }

    fn check_target_type(&self, nav: &NavigationProperty, target: EntityHandle) -> CacheResult<()> {
        let target_type = self.get_entity(target)?.type_name();
        if target_type != crate::metadata::resolve_type_name(&nav.target_type) {
            return Err(CacheError::invalid_operation(format!(
                "{} expects {}, got {target_type}",
                nav.name, nav.target_type
            )));
        }
        Ok(())
    }
}
