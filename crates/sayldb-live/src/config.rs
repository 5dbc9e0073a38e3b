//! Live sync configuration.

use serde::{Deserialize, Serialize};

/// Tunables for live sync sessions. Deserializable so a host can embed this
/// in its own configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSyncConfig {
    /// Page size used when a paginated find does not specify one.
    pub default_items_per_page: usize,
    /// Maximum number of sort criteria accepted from a client; deeper
    /// orderings are truncated.
    pub max_sort_fields: usize,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            default_items_per_page: 50,
            max_sort_fields: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LiveSyncConfig::default();
        assert_eq!(config.default_items_per_page, 50);
        assert_eq!(config.max_sort_fields, 8);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: LiveSyncConfig =
            serde_json::from_str(r#"{"default_items_per_page": 10}"#).unwrap();
        assert_eq!(config.default_items_per_page, 10);
        assert_eq!(config.max_sort_fields, 8);
    }
}
