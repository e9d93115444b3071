//! Temporary key generation for new entities.

use crate::error::{CacheError, CacheResult};
use crate::metadata::{DataType, EntityType};
use serde_json::Value;
use uuid::Uuid;

/// Produces temporary key values for entities whose keys the server assigns.
///
/// Integer keys count downwards from -1 so they never collide with
/// server-assigned ids; text keys use a `temp-N` sequence; GUID keys are random.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    next_int: i64,
    next_text: u64,
}

impl KeyGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self {
            next_int: -1,
            next_text: 1,
        }
    }

    /// Generates a temporary value for a single key property type.
    pub fn generate(&mut self, data_type: DataType) -> Value {
        match data_type {
            DataType::Int32 | DataType::Int64 => {
                let v = self.next_int;
                self.next_int -= 1;
                Value::from(v)
            }
            DataType::Guid => Value::String(Uuid::new_v4().to_string()),
            _ => {
                let v = self.next_text;
                self.next_text += 1;
                Value::String(format!("temp-{v}"))
            }
        }
    }

    /// Generates temporary values for every key property of `entity_type`.
    ///
    /// Only single-property keys can be server-generated.
    pub fn generate_key(&mut self, entity_type: &EntityType) -> CacheResult<Vec<(String, Value)>> {
        let keys: Vec<_> = entity_type.key_properties().collect();
        match keys.as_slice() {
            [only] => Ok(vec![(only.name.clone(), self.generate(only.data_type))]),
            _ => Err(CacheError::invalid_key(
                &entity_type.name,
                "auto-generated keys need exactly one key property",
            )),
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
