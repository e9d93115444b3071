//! Node classification.
//!
//! A [`NodeClassifier`] tells the merge session what each raw node is:
//! an entity, a complex value, a reference to another node, or a plain
//! structure. Classifiers are chosen per payload shape and passed in
//! explicitly; there is no global adapter registry.

use crate::metadata::{resolve_type_name, NavigationProperty};
use serde_json::Value;
use std::fmt;

/// Where a node sits in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Top-level result node.
    Root,
    /// Value of a navigation property.
    NavigationProperty,
    /// Value of a complex-typed data property.
    ComplexProperty,
    /// Property of an anonymous structure.
    AnonymousProperty,
}

/// Position of a node, handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    /// Kind of position.
    pub kind: NodeKind,
    /// Client name of the property holding the node, if any.
    pub property_name: Option<String>,
    /// Type owning that property, if any.
    pub parent_type: Option<String>,
    /// Type the property is declared to hold, if known.
    pub target_type: Option<String>,
}

impl NodeContext {
    /// Context for a top-level node.
    pub fn root() -> Self {
        Self {
            kind: NodeKind::Root,
            property_name: None,
            parent_type: None,
            target_type: None,
        }
    }

    /// Context for the value of a navigation property.
    pub fn navigation(parent_type: &str, navigation: &NavigationProperty) -> Self {
        Self {
            kind: NodeKind::NavigationProperty,
            property_name: Some(navigation.name.clone()),
            parent_type: Some(parent_type.to_string()),
            target_type: Some(navigation.target_type.clone()),
        }
    }

    /// Context for the value of a complex-typed property.
    pub fn complex(parent_type: &str, property_name: &str, complex_type: &str) -> Self {
        Self {
            kind: NodeKind::ComplexProperty,
            property_name: Some(property_name.to_string()),
            parent_type: Some(parent_type.to_string()),
            target_type: Some(complex_type.to_string()),
        }
    }

    /// Context for a property of an anonymous structure.
    pub fn anonymous(property_name: &str) -> Self {
        Self {
            kind: NodeKind::AnonymousProperty,
            property_name: Some(property_name.to_string()),
            parent_type: None,
            target_type: None,
        }
    }
}

/// What the classifier decided about a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDescriptor {
    /// Drop the node; it merges to null.
    pub ignore: bool,
    /// Return the node unchanged.
    pub pass_through: bool,
    /// Entity or complex type of the node.
    pub entity_type: Option<String>,
    /// Id other nodes use to refer to this one.
    pub node_id: Option<String>,
    /// The node is a reference to the node with this id.
    pub node_ref_id: Option<String>,
    /// Adapter data copied onto the merged entity's aspect.
    pub extra_metadata: Option<Value>,
}

impl NodeDescriptor {
    /// A node to drop.
    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    /// A node to return as-is.
    pub fn passed_through() -> Self {
        Self {
            pass_through: true,
            ..Self::default()
        }
    }

    /// A node of a known type.
    pub fn typed(type_name: impl Into<String>) -> Self {
        Self {
            entity_type: Some(type_name.into()),
            ..Self::default()
        }
    }

    /// A reference to another node.
    pub fn reference(ref_id: impl Into<String>) -> Self {
        Self {
            node_ref_id: Some(ref_id.into()),
            ..Self::default()
        }
    }

    /// Sets the node id.
    #[must_use]
    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Sets the extra metadata.
    #[must_use]
    pub fn with_extra_metadata(mut self, metadata: Value) -> Self {
        self.extra_metadata = Some(metadata);
        self
    }
}

/// Classifies raw nodes for a merge session.
pub trait NodeClassifier: Send + Sync {
    /// Describes one node.
    fn visit(&self, node: &Value, context: &NodeContext) -> NodeDescriptor;
}

/// Classifier for JSON payloads that use `$id`, `$ref` and `$type` markers.
///
/// Type names may carry a namespace (`Customer:#Shop.Models`). Nodes without
/// a type marker take the declared type of the property that holds them, or
/// the default root type at the top level.
#[derive(Debug, Clone)]
pub struct JsonResultsAdapter {
    id_property: String,
    ref_property: String,
    type_property: String,
    default_root_type: Option<String>,
    metadata_property: Option<String>,
}

impl JsonResultsAdapter {
    /// Creates an adapter with the `$id`/`$ref`/`$type` convention.
    pub fn new() -> Self {
        Self {
            id_property: "$id".into(),
            ref_property: "$ref".into(),
            type_property: "$type".into(),
            default_root_type: None,
            metadata_property: None,
        }
    }

    /// Sets the type assumed for untyped top-level nodes.
    #[must_use]
    pub fn with_default_root_type(mut self, type_name: impl Into<String>) -> Self {
        self.default_root_type = Some(type_name.into());
        self
    }

    /// Renames the id/ref/type markers.
    #[must_use]
    pub fn with_markers(
        mut self,
        id_property: impl Into<String>,
        ref_property: impl Into<String>,
        type_property: impl Into<String>,
    ) -> Self {
        self.id_property = id_property.into();
        self.ref_property = ref_property.into();
        self.type_property = type_property.into();
        self
    }

    /// Copies the named node property into the entity's extra metadata.
    #[must_use]
    pub fn with_metadata_property(mut self, name: impl Into<String>) -> Self {
        self.metadata_property = Some(name.into());
        self
    }
}

impl Default for JsonResultsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn marker_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl NodeClassifier for JsonResultsAdapter {
    fn visit(&self, node: &Value, context: &NodeContext) -> NodeDescriptor {
        let Value::Object(map) = node else {
            return NodeDescriptor::default();
        };
        if let Some(ref_id) = map.get(&self.ref_property).and_then(marker_text) {
            return NodeDescriptor::reference(ref_id);
        }

        let declared = map
            .get(&self.type_property)
            .and_then(Value::as_str)
            .map(|t| resolve_type_name(t).to_string());
        let entity_type = declared.or_else(|| match context.kind {
            NodeKind::Root => self.default_root_type.clone(),
            NodeKind::NavigationProperty | NodeKind::ComplexProperty => {
                context.target_type.clone()
            }
            NodeKind::AnonymousProperty => None,
        });

        NodeDescriptor {
            entity_type,
            node_id: map.get(&self.id_property).and_then(marker_text),
            extra_metadata: self
                .metadata_property
                .as_ref()
                .and_then(|name| map.get(name))
                .cloned(),
            ..NodeDescriptor::default()
        }
    }
}

/// Classifier backed by a closure.
pub struct TypedClassifier<F> {
    visit: F,
}

impl<F> TypedClassifier<F>
where
    F: Fn(&Value, &NodeContext) -> NodeDescriptor + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(visit: F) -> Self {
        Self { visit }
    }
}

impl<F> NodeClassifier for TypedClassifier<F>
where
    F: Fn(&Value, &NodeContext) -> NodeDescriptor + Send + Sync,
{
    fn visit(&self, node: &Value, context: &NodeContext) -> NodeDescriptor {
        (self.visit)(node, context)
    }
}

impl<F> fmt::Debug for TypedClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedClassifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_wins() {
        let adapter = JsonResultsAdapter::new();
        let d = adapter.visit(&json!({"$ref": "3", "$type": "Customer"}), &NodeContext::root());
        assert_eq!(d, NodeDescriptor::reference("3"));
    }

    #[test]
    fn type_marker_is_resolved() {
        let adapter = JsonResultsAdapter::new();
        let d = adapter.visit(
            &json!({"$id": 1, "$type": "Customer:#Shop.Models", "Id": 1}),
            &NodeContext::root(),
        );
        assert_eq!(d.entity_type.as_deref(), Some("Customer"));
        assert_eq!(d.node_id.as_deref(), Some("1"));
    }

    #[test]
    fn untyped_nodes_use_context() {
        let adapter = JsonResultsAdapter::new().with_default_root_type("Order");
        assert_eq!(
            adapter.visit(&json!({"id": 1}), &NodeContext::root()).entity_type.as_deref(),
            Some("Order")
        );
        let nav = NavigationProperty::scalar("customer", "Customer");
        assert_eq!(
            adapter
                .visit(&json!({"id": 1}), &NodeContext::navigation("Order", &nav))
                .entity_type
                .as_deref(),
            Some("Customer")
        );
        assert_eq!(
            adapter.visit(&json!({"x": 1}), &NodeContext::anonymous("stats")),
            NodeDescriptor::default()
        );
    }

    #[test]
    fn scalars_are_not_classified() {
        let adapter = JsonResultsAdapter::new().with_default_root_type("Order");
        assert_eq!(adapter.visit(&json!(5), &NodeContext::root()), NodeDescriptor::default());
    }

    #[test]
    fn custom_markers_and_metadata() {
        let adapter = JsonResultsAdapter::new()
            .with_markers("@id", "@ref", "@type")
            .with_metadata_property("__meta");
        let d = adapter.visit(
            &json!({"@id": "a", "@type": "Customer", "__meta": {"etag": "x"}}),
            &NodeContext::root(),
        );
        assert_eq!(d.node_id.as_deref(), Some("a"));
        assert_eq!(d.extra_metadata, Some(json!({"etag": "x"})));
    }

    #[test]
    fn closure_classifier() {
        let classifier = TypedClassifier::new(|node: &Value, _: &NodeContext| {
            if node.get("skip").is_some() {
                NodeDescriptor::ignored()
            } else {
                NodeDescriptor::typed("Customer")
            }
        });
        assert!(classifier.visit(&json!({"skip": true}), &NodeContext::root()).ignore);
        assert_eq!(
            classifier.visit(&json!({}), &NodeContext::root()).entity_type.as_deref(),
            Some("Customer")
        );
    }
}
