//! Scope Configuration
//!
//! Settings that shape how a scope's store manages cells. The struct is
//! deserializable so hosts can keep it next to the rest of their settings.

use serde::{Deserialize, Serialize};

/// When unobserved cells are removed from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict a non-keep-alive cell as soon as it has no subscribers.
    #[default]
    OnRelease,

    /// Never evict. Every cell stays cached for the scope's lifetime.
    Retain,
}

/// Configuration for a single [`Scope`](crate::Scope).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Human readable name, used in logs and snapshots.
    pub label: Option<String>,

    /// Cell eviction behavior.
    pub eviction: EvictionPolicy,
}

impl ScopeConfig {
    /// Config with the given label and default settings otherwise.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_evict_on_release() {
        let config = ScopeConfig::default();
        assert_eq!(config.eviction, EvictionPolicy::OnRelease);
        assert!(config.label.is_none());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ScopeConfig = serde_json::from_str(r#"{ "eviction": "retain" }"#).unwrap();
        assert_eq!(config.eviction, EvictionPolicy::Retain);
        assert!(config.label.is_none());

        let config: ScopeConfig = serde_json::from_str(r#"{ "label": "editor" }"#).unwrap();
        assert_eq!(config, ScopeConfig::labeled("editor"));
    }
}
