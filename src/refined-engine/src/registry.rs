//! Feature registry.

use indexmap::IndexMap;
use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::features::{FeatureDescriptor, FeatureValue};

/// Ordered table of available features. Declaration order is the order of
/// the active set, the marker attribute and the compiled stylesheet.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    features: IndexMap<String, FeatureDescriptor>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors in declaration order.
    pub fn from_features(features: impl IntoIterator<Item = FeatureDescriptor>) -> Result<Self> {
        let mut registry = Self::new();
        for feature in features {
            registry.register(feature)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Register a feature.
    pub fn register(&mut self, feature: FeatureDescriptor) -> Result<()> {
        if !is_token(&feature.name) {
            return Err(EngineError::InvalidRegistry(format!(
                "feature name '{}' must be a non-empty token of letters, digits, '-' or '_'",
                feature.name
            )));
        }
        if self.features.contains_key(&feature.name) {
            return Err(EngineError::InvalidRegistry(format!(
                "feature '{}' registered twice",
                feature.name
            )));
        }
        self.features.insert(feature.name.clone(), feature);
        Ok(())
    }

    /// Check cross references between features.
    pub fn validate(&self) -> Result<()> {
        for feature in self.features.values() {
            for target in &feature.affects {
                if target == &feature.name {
                    return Err(EngineError::InvalidRegistry(format!(
                        "feature '{}' cannot affect itself",
                        feature.name
                    )));
                }
                if !self.features.contains_key(target) {
                    return Err(EngineError::InvalidRegistry(format!(
                        "feature '{}' affects unknown feature '{}'",
                        feature.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureDescriptor> {
        self.features.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Features in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Default value of every feature.
    pub fn defaults(&self) -> IndexMap<String, FeatureValue> {
        self.features
            .values()
            .map(|f| (f.name.clone(), f.default_value.clone()))
            .collect()
    }

    /// Whether some feature lists `name` in its `affects` set.
    pub fn is_affected(&self, name: &str) -> bool {
        self.features.values().any(|f| f.affects.contains(name))
    }

    /// Names suppressed by the given active features, in registry order.
    pub fn suppressed_by<'a>(&self, active: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let targets: BTreeSet<&str> = active
            .into_iter()
            .filter_map(|name| self.features.get(name))
            .flat_map(|f| f.affects.iter().map(String::as_str))
            .collect();

        self.features
            .keys()
            .filter(|name| targets.contains(name.as_str()))
            .cloned()
            .collect()
    }
}

/// Names end up inside attribute selectors and space-separated marker
/// lists, so only plain identifier characters are allowed.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
