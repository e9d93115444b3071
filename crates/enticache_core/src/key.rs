//! Identity keys and store handles.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One component of an identity key.
///
/// JSON numbers that are integral compare equal regardless of how the server
/// encoded them (`7`, `7.0`), so `KeyValue::from_json` normalizes them to `Int`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// Integer key.
    Int(i64),
    /// GUID key.
    Guid(Uuid),
    /// Text key.
    Text(String),
}

impl KeyValue {
    /// Converts a raw JSON value into a key component.
    ///
    /// Returns `None` for null, booleans, non-integral numbers, arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(KeyValue::Int(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| KeyValue::Int(f as i64))
                }
            }
            Value::String(s) => Some(KeyValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts back to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Int(i) => Value::from(*i),
            KeyValue::Guid(g) => Value::String(g.to_string()),
            KeyValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Guid(g) => write!(f, "{g}"),
            KeyValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        KeyValue::Guid(value)
    }
}

/// Identity of a tracked entity: type name plus ordered key values.
///
/// Two entities with equal keys are the same logical entity; the store
/// enforces uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type name.
    pub type_name: String,
    /// Ordered primary-key values.
    pub values: Vec<KeyValue>,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(type_name: impl Into<String>, values: Vec<KeyValue>) -> Self {
        Self {
            type_name: type_name.into(),
            values,
        }
    }

    /// Creates a single-valued key.
    pub fn single(type_name: impl Into<String>, value: impl Into<KeyValue>) -> Self {
        Self::new(type_name, vec![value.into()])
    }

    /// Returns the key values as JSON.
    pub fn json_values(&self) -> Vec<Value> {
        self.values.iter().map(KeyValue::to_json).collect()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Stable identifier of an entity inside one [`EntityManager`](crate::EntityManager).
///
/// Navigation properties hold handles rather than keys, so a key change
/// (temporary key replaced by a server-assigned one) never breaks a link.
/// Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    /// Creates a handle.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next handle.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_numbers_are_equivalent() {
        assert_eq!(KeyValue::from_json(&json!(7)), Some(KeyValue::Int(7)));
        assert_eq!(KeyValue::from_json(&json!(7.0)), Some(KeyValue::Int(7)));
        assert_eq!(KeyValue::from_json(&json!(7.5)), None);
        assert_eq!(KeyValue::from_json(&json!(null)), None);
    }

    #[test]
    fn key_equality_uses_type_and_values() {
        let a = EntityKey::single("Customer", 7);
        let b = EntityKey::single("Customer", 7);
        let c = EntityKey::single("Order", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_display() {
        let key = EntityKey::new("OrderLine", vec![KeyValue::Int(1), KeyValue::from("x")]);
        assert_eq!(key.to_string(), "OrderLine(1, x)");
    }

    #[test]
    fn handle_next() {
        let h = EntityHandle::new(4);
        assert_eq!(h.next().as_u64(), 5);
        assert_eq!(format!("{h}"), "entity:4");
    }
}
