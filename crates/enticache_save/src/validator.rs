//! Validation hook consulted before a save round is dispatched.

use enticache_core::{Entity, EntityType};

/// Checks an entity before it is sent.
///
/// Returns the list of problems; an empty list means the entity is valid.
pub trait EntityValidator: Send + Sync {
    /// Validates one entity.
    fn validate(&self, entity: &Entity, entity_type: &EntityType) -> Vec<String>;
}

impl<F> EntityValidator for F
where
    F: Fn(&Entity, &EntityType) -> Vec<String> + Send + Sync,
{
    fn validate(&self, entity: &Entity, entity_type: &EntityType) -> Vec<String> {
        self(entity, entity_type)
    }
}

/// Rejects null values in properties declared non-nullable.
///
/// Key properties of Added entities are skipped; the server assigns them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredPropertiesValidator;

impl EntityValidator for RequiredPropertiesValidator {
    fn validate(&self, entity: &Entity, entity_type: &EntityType) -> Vec<String> {
        entity_type
            .data_properties
            .iter()
            .filter(|p| !p.is_nullable)
            .filter(|p| !(p.is_part_of_key && entity.state().is_added()))
            .filter(|p| entity.get(&p.name).map_or(true, |v| v.is_null()))
            .map(|p| format!("{} is required", p.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enticache_core::{DataProperty, DataType};
    use serde_json::{json, Value};

    fn customer_type() -> EntityType {
        let mut name = DataProperty::new("name", DataType::String);
        name.is_nullable = false;
        EntityType::new("Customer")
            .with_data(DataProperty::key("id", DataType::Int64))
            .with_data(name)
    }

    #[test]
    fn required_properties() {
        let et = customer_type();
        let missing = Entity::new("Customer")
            .with_value("id", json!(1))
            .with_value("name", Value::Null);
        assert_eq!(
            RequiredPropertiesValidator.validate(&missing, &et),
            vec!["name is required".to_string()]
        );
        let present = Entity::new("Customer")
            .with_value("id", json!(1))
            .with_value("name", json!("ACME"));
        assert!(RequiredPropertiesValidator.validate(&present, &et).is_empty());
        let keyless = Entity::new("Customer").with_value("name", json!("ACME"));
        assert_eq!(
            RequiredPropertiesValidator.validate(&keyless, &et),
            vec!["id is required".to_string()]
        );
    }

    #[test]
    fn closures_are_validators() {
        let validator = |entity: &Entity, _: &EntityType| {
            if entity.get("name") == Some(&json!("bad")) {
                vec!["bad name".to_string()]
            } else {
                Vec::new()
            }
        };
        let et = customer_type();
        let entity = Entity::new("Customer").with_value("name", json!("bad"));
        assert_eq!(validator.validate(&entity, &et), vec!["bad name".to_string()]);
    }
}
