//! Component registry: the voting configuration of every component.
//!
//! The registry is built once from the component catalog and never mutated
//! afterwards. Operations take an `Arc` snapshot of a component's
//! configuration when they start and use it for their whole duration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::auth::{Capability, StaticAuthorizer};
use crate::error::ReviewError;
use crate::model::ComponentKey;

/// Voting settings of a single component.
///
/// Only constructible through [`ComponentVotingConfig::new`], so every
/// instance satisfies:
/// - `threshold >= 1`
/// - auto-accept implies voting
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawVotingConfig")]
pub struct ComponentVotingConfig {
    voting_enabled: bool,
    auto_accept_enabled: bool,
    threshold: u32,
}

#[derive(Deserialize)]
struct RawVotingConfig {
    #[serde(default)]
    voting_enabled: bool,
    #[serde(default)]
    auto_accept_enabled: bool,
    #[serde(default = "default_threshold")]
    threshold: u32,
}

fn default_threshold() -> u32 {
    1
}

impl TryFrom<RawVotingConfig> for ComponentVotingConfig {
    type Error = ReviewError;

    fn try_from(raw: RawVotingConfig) -> Result<Self, Self::Error> {
        Self::new(raw.voting_enabled, raw.auto_accept_enabled, raw.threshold)
    }
}

impl ComponentVotingConfig {
    pub fn new(
        voting_enabled: bool,
        auto_accept_enabled: bool,
        threshold: u32,
    ) -> Result<Self, ReviewError> {
        if threshold < 1 {
            return Err(ReviewError::InvalidThreshold { threshold });
        }
        if auto_accept_enabled && !voting_enabled {
            return Err(ReviewError::InvalidConfiguration(
                "automatic acceptance requires voting to be enabled".to_string(),
            ));
        }
        Ok(Self {
            voting_enabled,
            auto_accept_enabled,
            threshold,
        })
    }

    /// Voting off, auto-accept off
    pub fn disabled() -> Self {
        Self {
            voting_enabled: false,
            auto_accept_enabled: false,
            threshold: 1,
        }
    }

    pub fn voting_enabled(&self) -> bool {
        self.voting_enabled
    }

    pub fn auto_accept_enabled(&self) -> bool {
        self.auto_accept_enabled
    }

    /// Supporting votes needed for automatic acceptance (inclusive)
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Immutable map of component configurations.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    components: HashMap<ComponentKey, Arc<ComponentVotingConfig>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, key: ComponentKey, config: ComponentVotingConfig) -> Self {
        self.components.insert(key, Arc::new(config));
        self
    }

    /// Snapshot of a component's configuration
    pub fn get(&self, key: &ComponentKey) -> Option<Arc<ComponentVotingConfig>> {
        self.components.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    components: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    project: String,
    component: String,
    #[serde(flatten)]
    voting: ComponentVotingConfig,
    #[serde(default)]
    grants: HashMap<String, Vec<Capability>>,
}

/// Component configurations plus the grant table, as loaded from the catalog.
#[derive(Debug, Clone)]
pub struct ComponentCatalog {
    pub registry: ComponentRegistry,
    pub authorizer: StaticAuthorizer,
}

impl ComponentCatalog {
    /// Parse and validate a JSON catalog.
    ///
    /// Any invalid component rejects the whole catalog.
    pub fn from_json(json: &str) -> Result<Self, ReviewError> {
        let file: CatalogFile = serde_json::from_str(json)
            .map_err(|e| ReviewError::InvalidConfiguration(e.to_string()))?;

        let mut registry = ComponentRegistry::new();
        let mut authorizer = StaticAuthorizer::new();

        for entry in file.components {
            let key = ComponentKey::new(entry.project, entry.component);
            if registry.components.contains_key(&key) {
                return Err(ReviewError::InvalidConfiguration(format!(
                    "component {} is defined twice",
                    key
                )));
            }
            for (user, capabilities) in &entry.grants {
                for capability in capabilities {
                    authorizer.grant(&key, user, *capability);
                }
            }
            registry = registry.with_component(key, entry.voting);
        }

        Ok(Self {
            registry,
            authorizer,
        })
    }

    /// Load the catalog from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read component catalog {}", path.display()))?;
        let catalog = Self::from_json(&content)
            .context(format!("Invalid component catalog {}", path.display()))?;

        info!(
            "Loaded {} components from {}",
            catalog.registry.len(),
            path.display()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authorizer;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CATALOG: &str = r#"{
        "components": [
            {
                "project": "demo",
                "component": "ui",
                "voting_enabled": true,
                "auto_accept_enabled": true,
                "threshold": 2,
                "grants": {
                    "alice": ["vote", "save_direct"],
                    "root": ["override_suggestion_state"]
                }
            },
            {
                "project": "demo",
                "component": "docs"
            }
        ]
    }"#;

    // ==================== ComponentVotingConfig Tests ====================

    #[test]
    fn test_zero_threshold_rejected() {
        assert_eq!(
            ComponentVotingConfig::new(true, true, 0),
            Err(ReviewError::InvalidThreshold { threshold: 0 })
        );
    }

    #[test]
    fn test_auto_accept_without_voting_rejected() {
        assert!(matches!(
            ComponentVotingConfig::new(false, true, 1),
            Err(ReviewError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_valid_config() {
        let config = ComponentVotingConfig::new(true, false, 3).unwrap();
        assert!(config.voting_enabled());
        assert!(!config.auto_accept_enabled());
        assert_eq!(config.threshold(), 3);
    }

    #[test]
    fn test_deserialization_validates() {
        let result: Result<ComponentVotingConfig, _> =
            serde_json::from_str(r#"{"voting_enabled": true, "threshold": 0}"#);
        assert!(result.is_err());
    }

    // ==================== Catalog Tests ====================

    #[test]
    fn test_catalog_from_json() {
        let catalog = ComponentCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.registry.len(), 2);

        let ui = catalog
            .registry
            .get(&ComponentKey::new("demo", "ui"))
            .unwrap();
        assert!(ui.auto_accept_enabled());
        assert_eq!(ui.threshold(), 2);

        let docs = catalog
            .registry
            .get(&ComponentKey::new("demo", "docs"))
            .unwrap();
        assert_eq!(*docs, ComponentVotingConfig::disabled());

        let key = ComponentKey::new("demo", "ui");
        assert!(catalog
            .authorizer
            .has_permission("alice", &key, Capability::SaveDirect));
        assert!(catalog
            .authorizer
            .has_permission("root", &key, Capability::OverrideSuggestionState));
        assert!(!catalog
            .authorizer
            .has_permission("root", &key, Capability::Vote));
    }

    #[test]
    fn test_catalog_rejects_invalid_component() {
        let json = r#"{"components": [
            {"project": "p", "component": "c", "voting_enabled": false, "auto_accept_enabled": true}
        ]}"#;
        assert!(ComponentCatalog::from_json(json).is_err());
    }

    #[test]
    fn test_catalog_rejects_duplicate_component() {
        let json = r#"{"components": [
            {"project": "p", "component": "c"},
            {"project": "p", "component": "c"}
        ]}"#;
        let err = ComponentCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_catalog_rejects_unknown_capability() {
        let json = r#"{"components": [
            {"project": "p", "component": "c", "grants": {"bob": ["fly"]}}
        ]}"#;
        assert!(ComponentCatalog::from_json(json).is_err());
    }

    #[test]
    fn test_catalog_load_from_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(CATALOG.as_bytes()).expect("write");

        let catalog = ComponentCatalog::load(file.path()).expect("Should load");
        assert_eq!(catalog.registry.len(), 2);
    }

    #[test]
    fn test_catalog_load_missing_file() {
        assert!(ComponentCatalog::load("/non/existent/components.json").is_err());
    }

    #[test]
    fn test_registry_unknown_component() {
        let registry = ComponentRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(&ComponentKey::new("x", "y")).is_none());
    }
}
