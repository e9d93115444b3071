//! Error types for the entity cache.

use crate::key::EntityKey;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in entity cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A merge under `MergeStrategy::Disallowed` hit an entity that is already cached.
    #[error("merge conflict: entity {key} is already in the cache")]
    Conflict {
        /// Key of the cached entity.
        key: EntityKey,
    },

    /// An external validator rejected an entity.
    #[error("validation failed for {key}: {}", errors.join("; "))]
    Validation {
        /// Key of the invalid entity.
        key: EntityKey,
        /// Validation messages.
        errors: Vec<String>,
    },

    /// Type name not found in the metadata store.
    #[error("unknown type: {name}")]
    UnknownType {
        /// The type name that was looked up.
        name: String,
    },

    /// Property not declared on a type.
    #[error("unknown property {property} on type {type_name}")]
    UnknownProperty {
        /// Type that was searched.
        type_name: String,
        /// Property name that was not found.
        property: String,
    },

    /// An identity key could not be built.
    #[error("invalid key for {type_name}: {message}")]
    InvalidKey {
        /// Type whose key was being built.
        type_name: String,
        /// Description of the problem.
        message: String,
    },

    /// Entity handle is not tracked by the store.
    #[error("entity not found: {handle}")]
    EntityNotFound {
        /// The stale handle.
        handle: crate::key::EntityHandle,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Metadata is malformed.
    #[error("metadata error: {message}")]
    Metadata {
        /// Description of the problem.
        message: String,
    },

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Creates a merge conflict error.
    pub fn conflict(key: EntityKey) -> Self {
        Self::Conflict { key }
    }

    /// Creates a validation error.
    pub fn validation(key: EntityKey, errors: Vec<String>) -> Self {
        Self::Validation { key, errors }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Returns true if this is a merge conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyValue;

    #[test]
    fn conflict_names_the_key() {
        let err = CacheError::conflict(EntityKey::single("Customer", KeyValue::Int(7)));
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "merge conflict: entity Customer(7) is already in the cache"
        );
    }

    #[test]
    fn validation_joins_messages() {
        let err = CacheError::validation(
            EntityKey::single("Customer", KeyValue::Int(1)),
            vec!["name is required".into(), "name too long".into()],
        );
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("name is required; name too long"));
    }
}
