//! Configuration for the save coordinator.

use enticache_core::MergeStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct SaveConfig {
    /// Queue requests that arrive while a save is in flight.
    pub queuing_enabled: bool,
    /// Strategy used to merge entities echoed by the server.
    pub merge_strategy_on_save: MergeStrategy,
    /// Maximum number of back-to-back follow-up rounds.
    pub max_follow_up_rounds: u32,
    /// Consult the validator before every dispatched round.
    pub validate_before_save: bool,
}

impl SaveConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            queuing_enabled: true,
            merge_strategy_on_save: MergeStrategy::OverwriteChanges,
            max_follow_up_rounds: 16,
            validate_before_save: true,
        }
    }

    /// Enables or disables queuing.
    #[must_use]
    pub const fn with_queuing(mut self, enabled: bool) -> Self {
        self.queuing_enabled = enabled;
        self
    }

    /// Sets the strategy used for echoed entities.
    #[must_use]
    pub const fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy_on_save = strategy;
        self
    }

    /// Sets the follow-up round limit.
    #[must_use]
    pub const fn with_max_follow_up_rounds(mut self, rounds: u32) -> Self {
        self.max_follow_up_rounds = rounds;
        self
    }

    /// Enables or disables validation.
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_before_save = enabled;
        self
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request options, forwarded to the server with the bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    /// Server resource that receives the save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Opaque data passed through to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Value>,
}

impl SaveOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource name.
    #[must_use]
    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Sets the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Value) -> Self {
        self.tag = Some(tag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let config = SaveConfig::default();
        assert!(config.queuing_enabled);
        assert!(config.validate_before_save);
        assert_eq!(config.merge_strategy_on_save, MergeStrategy::OverwriteChanges);
        assert_eq!(config.max_follow_up_rounds, 16);
    }

    #[test]
    fn builder_pattern() {
        let config = SaveConfig::new()
            .with_queuing(false)
            .with_max_follow_up_rounds(2)
            .with_validation(false);
        assert!(!config.queuing_enabled);
        assert_eq!(config.max_follow_up_rounds, 2);
        assert!(!config.validate_before_save);
    }

    #[test]
    fn options_serialize_camel_case() {
        let options = SaveOptions::new().with_resource_name("SaveChanges").with_tag(json!(1));
        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!({"resourceName": "SaveChanges", "tag": 1})
        );
        assert_eq!(serde_json::to_value(SaveOptions::new()).unwrap(), json!({}));
    }
}
