//! The graph-merge algorithm.
//!
//! A [`MergeSession`] walks server-shaped JSON, classifies every node and
//! reconciles entity nodes with the store according to the merge strategy.
//!
//! References are resolved through an explicit table keyed by node id. A
//! reference to a node that has not been visited yet becomes a pending slot;
//! when it sits in a navigation property a link callback is queued instead.
//! Queued callbacks run in registration order once the whole batch has been
//! traversed, while the store is still in loading mode.

use super::classifier::{NodeClassifier, NodeContext, NodeDescriptor};
use super::value::{MergeKind, MergedValue};
use crate::config::{MergeOptions, MergeStrategy};
use crate::entity::{ComplexValue, Entity};
use crate::error::{CacheError, CacheResult};
use crate::key::{EntityHandle, EntityKey};
use crate::manager::EntityManager;
use crate::metadata::{DataProperty, EntityType, MetadataStore, NavigationProperty, StructuralType};
use crate::state::EntityState;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Result of merging a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// One merged value per input node, in input order.
    pub values: Vec<MergedValue>,
    /// Reference ids that matched no node; their slots are `Null`.
    pub unresolved_refs: Vec<String>,
}

impl MergeOutcome {
    /// Tracked entities among the top-level values.
    pub fn entities(&self) -> Vec<EntityHandle> {
        self.values.iter().filter_map(MergedValue::as_entity).collect()
    }
}

/// A node under construction; pending slots are filled in after the batch.
enum Draft {
    Ready(MergedValue),
    Pending(String),
    Object(BTreeMap<String, Draft>),
    Array(Vec<Draft>),
    Untracked {
        entity: Entity,
        navigation: BTreeMap<String, Draft>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkMode {
    /// Visit related nodes but leave relationships alone.
    Skip,
    /// Link every related entity.
    Always,
    /// Link unless a pending local foreign-key edit says otherwise.
    PreserveLocal,
}

type LinkFn = Box<dyn FnOnce(&mut EntityManager, &MergedValue) -> CacheResult<()>>;

struct Deferred {
    ref_id: String,
    apply: LinkFn,
}

/// A merge session.
///
/// The reference table survives across [`merge`](Self::merge) calls, so a
/// later batch may refer to nodes of an earlier one.
pub struct MergeSession<'c> {
    classifier: &'c dyn NodeClassifier,
    options: MergeOptions,
    kind: MergeKind,
    ref_map: HashMap<String, MergedValue>,
    untracked: HashMap<EntityKey, MergedValue>,
    deferred: Vec<Deferred>,
    unresolved: Vec<String>,
}

impl<'c> MergeSession<'c> {
    /// Creates a session.
    pub fn new(classifier: &'c dyn NodeClassifier, options: MergeOptions, kind: MergeKind) -> Self {
        Self {
            classifier,
            options,
            kind,
            ref_map: HashMap::new(),
            untracked: HashMap::new(),
            deferred: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Merge options in effect.
    pub fn options(&self) -> MergeOptions {
        self.options
    }

    /// Merge kind in effect.
    pub fn kind(&self) -> MergeKind {
        self.kind
    }

    /// Looks up the value registered for a node id.
    pub fn resolve(&self, node_id: &str) -> Option<&MergedValue> {
        self.ref_map.get(node_id)
    }

    /// Merges a batch of raw nodes into the store.
    ///
    /// The batch is atomic: if any node fails (for example a conflict under
    /// [`MergeStrategy::Disallowed`]) the store is left as it was.
    pub fn merge(
        &mut self,
        manager: &mut EntityManager,
        nodes: &[Value],
    ) -> CacheResult<MergeOutcome> {
        tracing::debug!(
            nodes = nodes.len(),
            strategy = self.options.strategy.name(),
            kind = ?self.kind,
            "merging batch"
        );
        let ref_map = self.ref_map.clone();
        let untracked = self.untracked.clone();
        let result = manager.transaction(|m| {
            let was_loading = m.set_loading(true);
            let result = self.traverse(m, nodes);
            m.set_loading(was_loading);
            result
        });
        if let Err(err) = &result {
            tracing::debug!(error = %err, "merge batch rejected");
            self.ref_map = ref_map;
            self.untracked = untracked;
            self.deferred.clear();
            self.unresolved.clear();
        }
        result
    }

    fn traverse(&mut self, manager: &mut EntityManager, nodes: &[Value]) -> CacheResult<MergeOutcome> {
        let root = NodeContext::root();
        let mut drafts = Vec::with_capacity(nodes.len());
        for node in nodes {
            drafts.push(self.visit(manager, node, &root)?);
        }
        self.drain_deferred(manager)?;
        let values = drafts.into_iter().map(|d| self.finish(d)).collect();

        let mut unresolved_refs = Vec::new();
        for id in self.unresolved.drain(..) {
            if !unresolved_refs.contains(&id) {
                unresolved_refs.push(id);
            }
        }
        Ok(MergeOutcome {
            values,
            unresolved_refs,
        })
    }

    fn drain_deferred(&mut self, manager: &mut EntityManager) -> CacheResult<()> {
        let deferred = std::mem::take(&mut self.deferred);
        for Deferred { ref_id, apply } in deferred {
            match self.ref_map.get(&ref_id).cloned() {
                Some(value) => apply(manager, &value)?,
                None => self.note_unresolved(ref_id),
            }
        }
        Ok(())
    }

    fn note_unresolved(&mut self, ref_id: String) {
        tracing::warn!(ref_id = %ref_id, "reference matched no node in the batch");
        self.unresolved.push(ref_id);
    }

    fn register(&mut self, descriptor: &NodeDescriptor, value: &MergedValue) {
        if let Some(id) = &descriptor.node_id {
            self.ref_map.insert(id.clone(), value.clone());
        }
    }

    fn finish(&mut self, draft: Draft) -> MergedValue {
        match draft {
            Draft::Ready(value) => value,
            Draft::Pending(id) => match self.ref_map.get(&id) {
                Some(value) => value.clone(),
                None => {
                    self.note_unresolved(id);
                    MergedValue::Null
                }
            },
            Draft::Object(fields) => MergedValue::Object(
                fields
                    .into_iter()
                    .map(|(name, d)| (name, self.finish(d)))
                    .collect(),
            ),
            Draft::Array(items) => {
                MergedValue::Array(items.into_iter().map(|d| self.finish(d)).collect())
            }
            Draft::Untracked { entity, navigation } => MergedValue::Untracked {
                entity,
                navigation: navigation
                    .into_iter()
                    .map(|(name, d)| (name, self.finish(d)))
                    .collect(),
            },
        }
    }

    // ========================================================================
    // Node dispatch
    // ========================================================================

    fn visit(
        &mut self,
        manager: &mut EntityManager,
        node: &Value,
        context: &NodeContext,
    ) -> CacheResult<Draft> {
        let descriptor = self.classifier.visit(node, context);
        if descriptor.ignore {
            return Ok(Draft::Ready(MergedValue::Null));
        }
        if let Some(ref_id) = &descriptor.node_ref_id {
            return Ok(match self.ref_map.get(ref_id) {
                Some(value) => Draft::Ready(value.clone()),
                None => Draft::Pending(ref_id.clone()),
            });
        }
        if descriptor.pass_through {
            return Ok(Draft::Ready(MergedValue::Scalar(node.clone())));
        }

        let metadata = Arc::clone(manager.metadata());
        if let Some(type_name) = &descriptor.entity_type {
            return match metadata.structural_type(type_name) {
                Some(StructuralType::Entity(et)) => {
                    self.merge_entity(manager, &metadata, et, node, &descriptor)
                }
                Some(StructuralType::Complex(ct)) => {
                    let value = MergedValue::Complex(complex_value(
                        self.classifier,
                        &metadata,
                        &ct.name,
                        node,
                    )?);
                    self.register(&descriptor, &value);
                    Ok(Draft::Ready(value))
                }
                None => Err(CacheError::unknown_type(type_name.as_str())),
            };
        }

        match node {
            Value::Object(map) => {
                let convention = metadata.naming_convention();
                let mut fields = BTreeMap::new();
                for (name, value) in map {
                    if name.starts_with('$') {
                        continue;
                    }
                    let client = convention.server_to_client(name);
                    let draft = self.visit(manager, value, &NodeContext::anonymous(&client))?;
                    fields.insert(client, draft);
                }
                Ok(Draft::Object(fields))
            }
            Value::Array(items) => {
                let mut drafts = Vec::with_capacity(items.len());
                for item in items {
                    drafts.push(self.visit(manager, item, context)?);
                }
                Ok(Draft::Array(drafts))
            }
            Value::Null => Ok(Draft::Ready(MergedValue::Null)),
            other => Ok(Draft::Ready(MergedValue::Scalar(other.clone()))),
        }
    }

    // ========================================================================
    // Entity merge
    // ========================================================================

    fn merge_entity(
        &mut self,
        manager: &mut EntityManager,
        metadata: &MetadataStore,
        et: &EntityType,
        node: &Value,
        descriptor: &NodeDescriptor,
    ) -> CacheResult<Draft> {
        let key = et.key_from_raw(node, metadata.naming_convention())?;
        if self.options.no_tracking {
            return self.merge_untracked(manager, metadata, et, node, descriptor, key);
        }
        tracing::trace!(%key, "merging entity node");

        let Some(handle) = manager.find_by_key(&key) else {
            return self.attach_new(manager, metadata, et, node, descriptor);
        };
        let state = manager.get_entity(handle)?.state();

        if self.kind == MergeKind::Save && state.is_deleted() {
            let entity = manager.detach(handle)?;
            let value = MergedValue::Detached(entity);
            self.register(descriptor, &value);
            return Ok(Draft::Ready(value));
        }

        let value = MergedValue::Entity(handle);
        match self.options.strategy {
            MergeStrategy::Disallowed => Err(CacheError::conflict(key)),
            MergeStrategy::SkipMerge => {
                self.register(descriptor, &value);
                self.merge_navigations(manager, metadata, et, handle, node, LinkMode::Skip)?;
                Ok(Draft::Ready(value))
            }
            MergeStrategy::OverwriteChanges => {
                self.overwrite(manager, metadata, et, handle, node, descriptor)
            }
            MergeStrategy::PreserveChanges if state.is_unchanged() => {
                self.overwrite(manager, metadata, et, handle, node, descriptor)
            }
            MergeStrategy::PreserveChanges => {
                self.register(descriptor, &value);
                self.merge_navigations(manager, metadata, et, handle, node, LinkMode::PreserveLocal)?;
                if state.is_deleted() && !self.options.include_deleted {
                    Ok(Draft::Ready(MergedValue::Null))
                } else {
                    Ok(Draft::Ready(value))
                }
            }
        }
    }

    fn attach_new(
        &mut self,
        manager: &mut EntityManager,
        metadata: &MetadataStore,
        et: &EntityType,
        node: &Value,
        descriptor: &NodeDescriptor,
    ) -> CacheResult<Draft> {
        let values = read_values(self.classifier, metadata, et, node)?;
        let mut entity = manager.create_entity(&et.name, values)?;
        entity.aspect.was_loaded = true;
        entity.aspect.extra_metadata = descriptor.extra_metadata.clone();
        let handle =
            manager.attach_with_action(entity, EntityState::Unchanged, self.kind.attach_action())?;
        let value = MergedValue::Entity(handle);
        self.register(descriptor, &value);
        self.merge_navigations(manager, metadata, et, handle, node, self.link_mode())?;
        Ok(Draft::Ready(value))
    }

    fn overwrite(
        &mut self,
        manager: &mut EntityManager,
        metadata: &MetadataStore,
        et: &EntityType,
        handle: EntityHandle,
        node: &Value,
        descriptor: &NodeDescriptor,
    ) -> CacheResult<Draft> {
        let value = MergedValue::Entity(handle);
        self.register(descriptor, &value);

        let mut foreign_keys_changed = false;
        for (name, incoming) in read_values(self.classifier, metadata, et, node)? {
            if et.is_key_property(&name) {
                continue;
            }
            let is_foreign_key = et.is_foreign_key(&name);
            if manager.write_value(handle, &name, incoming)? && is_foreign_key {
                foreign_keys_changed = true;
            }
        }
        if foreign_keys_changed {
            for nav in et
                .navigation_properties
                .iter()
                .filter(|np| np.is_scalar && !np.foreign_key_names.is_empty())
            {
                manager.sync_navigation_from_foreign_key(handle, et, nav)?;
            }
        }
        self.merge_navigations(manager, metadata, et, handle, node, self.link_mode())?;

        let entity = manager.entity_mut(handle)?;
        entity.aspect.was_loaded = true;
        if let Some(extra) = &descriptor.extra_metadata {
            entity.aspect.extra_metadata = Some(extra.clone());
        }
        entity.aspect.original_values.clear();
        let previous = manager.change_state(handle, EntityState::Unchanged)?;
        manager.notify_property_changed(handle, None);
        manager.notify_change_action(self.kind.merge_action(), handle);
        if !previous.is_unchanged() {
            manager.refresh_has_changes();
        }
        Ok(Draft::Ready(value))
    }

    fn merge_untracked(
        &mut self,
        manager: &mut EntityManager,
        metadata: &MetadataStore,
        et: &EntityType,
        node: &Value,
        descriptor: &NodeDescriptor,
        key: EntityKey,
    ) -> CacheResult<Draft> {
        if let Some(existing) = self.untracked.get(&key).cloned() {
            self.register(descriptor, &existing);
            return Ok(Draft::Ready(existing));
        }
        let values = read_values(self.classifier, metadata, et, node)?;
        let mut entity = manager.create_entity(&et.name, values)?;
        entity.aspect.key = Some(key.clone());
        entity.aspect.was_loaded = true;
        entity.aspect.extra_metadata = descriptor.extra_metadata.clone();

        let shallow = MergedValue::Untracked {
            entity: entity.clone(),
            navigation: BTreeMap::new(),
        };
        self.untracked.insert(key, shallow.clone());
        self.register(descriptor, &shallow);

        let convention = metadata.naming_convention();
        let mut navigation = BTreeMap::new();
        for nav in &et.navigation_properties {
            let Some(raw) = node.get(nav.server_name(convention)) else {
                continue;
            };
            let context = NodeContext::navigation(&et.name, nav);
            let draft = match raw {
                Value::Array(items) if !nav.is_scalar => {
                    let mut drafts = Vec::with_capacity(items.len());
                    for item in items {
                        drafts.push(self.visit(manager, item, &context)?);
                    }
                    Draft::Array(drafts)
                }
                Value::Null => Draft::Ready(MergedValue::Null),
                other => self.visit(manager, other, &context)?,
            };
            navigation.insert(nav.name.clone(), draft);
        }
        Ok(Draft::Untracked { entity, navigation })
    }

    // ========================================================================
    // Relationship fixup
    // ========================================================================

    fn link_mode(&self) -> LinkMode {
        match self.options.strategy {
            MergeStrategy::PreserveChanges => LinkMode::PreserveLocal,
            _ => LinkMode::Always,
        }
    }

    fn merge_navigations(
        &mut self,
        manager: &mut EntityManager,
        metadata: &MetadataStore,
        et: &EntityType,
        owner: EntityHandle,
        node: &Value,
        mode: LinkMode,
    ) -> CacheResult<()> {
        let convention = metadata.naming_convention();
        for nav in &et.navigation_properties {
            let Some(raw) = node.get(nav.server_name(convention)) else {
                continue;
            };
            if raw.is_null() {
                continue;
            }
            let context = NodeContext::navigation(&et.name, nav);
            if nav.is_scalar {
                let draft = self.visit(manager, raw, &context)?;
                self.link(manager, owner, nav, draft, mode)?;
            } else if let Some(items) = raw.as_array() {
                for item in items {
                    let draft = self.visit(manager, item, &context)?;
                    self.link(manager, owner, nav, draft, mode)?;
                }
            }
        }
        Ok(())
    }

    fn link(
        &mut self,
        manager: &mut EntityManager,
        owner: EntityHandle,
        nav: &NavigationProperty,
        draft: Draft,
        mode: LinkMode,
    ) -> CacheResult<()> {
        if mode == LinkMode::Skip {
            return Ok(());
        }
        match draft {
            Draft::Ready(MergedValue::Entity(related)) => {
                link_related(manager, owner, nav, related, mode)
            }
            Draft::Pending(ref_id) => {
                let nav = nav.clone();
                self.deferred.push(Deferred {
                    ref_id,
                    apply: Box::new(move |manager: &mut EntityManager, value: &MergedValue| {
                        match value.as_entity() {
                            Some(related) => link_related(manager, owner, &nav, related, mode),
                            None => Ok(()),
                        }
                    }),
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for MergeSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSession")
            .field("options", &self.options)
            .field("kind", &self.kind)
            .field("registered", &self.ref_map.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

/// Links `related` to `owner` through `nav`.
///
/// Under [`LinkMode::PreserveLocal`] a link is skipped when the dependent
/// side has an uncommitted foreign-key edit for it.
fn link_related(
    manager: &mut EntityManager,
    owner: EntityHandle,
    nav: &NavigationProperty,
    related: EntityHandle,
    mode: LinkMode,
) -> CacheResult<()> {
    if nav.is_scalar {
        if mode == LinkMode::PreserveLocal && has_pending_foreign_key(manager.get_entity(owner)?, nav) {
            return Ok(());
        }
        return manager.link_scalar(owner, nav, related);
    }
    if mode == LinkMode::PreserveLocal {
        let metadata = Arc::clone(manager.metadata());
        if let Some(inverse) = metadata.inverse_of(nav) {
            if inverse.is_scalar && has_pending_foreign_key(manager.get_entity(related)?, inverse) {
                tracing::trace!(%owner, %related, nav = %nav.name, "kept local foreign key");
                return Ok(());
            }
        }
    }
    manager.link_collection_member(owner, nav, related)
}

fn has_pending_foreign_key(entity: &Entity, nav: &NavigationProperty) -> bool {
    nav.foreign_key_names
        .iter()
        .any(|fk| entity.is_property_modified(fk))
}

/// Reads the data values present on a raw node, keyed by client name.
///
/// A complex-typed property the classifier ignores is left out.
fn read_values(
    classifier: &dyn NodeClassifier,
    metadata: &MetadataStore,
    et: &EntityType,
    node: &Value,
) -> CacheResult<Vec<(String, Value)>> {
    let convention = metadata.naming_convention();
    let mut values = Vec::new();
    for property in &et.data_properties {
        let Some(raw) = node.get(property.server_name(convention)) else {
            continue;
        };
        if let Some(value) = data_value(classifier, metadata, &et.name, property, raw)? {
            values.push((property.name.clone(), value));
        }
    }
    Ok(values)
}

fn data_value(
    classifier: &dyn NodeClassifier,
    metadata: &MetadataStore,
    owner: &str,
    property: &DataProperty,
    raw: &Value,
) -> CacheResult<Option<Value>> {
    let Some(declared) = &property.complex_type else {
        return Ok(Some(property.data_type.parse_raw(raw)));
    };
    if raw.is_null() {
        return Ok(Some(Value::Null));
    }
    let context = NodeContext::complex(owner, &property.name, declared);
    let descriptor = classifier.visit(raw, &context);
    if descriptor.ignore {
        return Ok(None);
    }
    if descriptor.pass_through {
        return Ok(Some(raw.clone()));
    }
    let type_name = descriptor.entity_type.as_deref().unwrap_or(declared);
    Ok(Some(complex_value(classifier, metadata, type_name, raw)?.to_json()))
}

fn complex_value(
    classifier: &dyn NodeClassifier,
    metadata: &MetadataStore,
    type_name: &str,
    raw: &Value,
) -> CacheResult<ComplexValue> {
    let ct = metadata.complex_type(type_name)?;
    let convention = metadata.naming_convention();
    let mut value = ComplexValue::new(ct.name.clone());
    for property in &ct.data_properties {
        let nested = raw
            .get(property.server_name(convention))
            .unwrap_or(&Value::Null);
        let converted = data_value(classifier, metadata, &ct.name, property, nested)?;
        value
            .values
            .insert(property.name.clone(), converted.unwrap_or(Value::Null));
    }
    Ok(value)
}
