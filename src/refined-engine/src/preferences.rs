//! Persisted feature preferences.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::features::FeatureValue;
use crate::registry::FeatureRegistry;
use crate::storage::Storage;

/// Feature name to value, in registry order.
pub type Preferences = IndexMap<String, FeatureValue>;

/// Read the raw stored object. Absent, unreadable or malformed data yields
/// an empty map.
pub fn load(storage: &dyn Storage, key: &str) -> Map<String, Value> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Map::new(),
        Err(e) => {
            warn!(key, error = %e, "Failed to read stored preferences, using defaults");
            return Map::new();
        }
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(key, found = %json_kind(&other), "Stored preferences are not an object, using defaults");
            Map::new()
        }
        Err(e) => {
            warn!(key, error = %e, "Stored preferences are malformed, using defaults");
            Map::new()
        }
    }
}

/// One entry per registered feature: the stored value when it has the same
/// kind as the default, otherwise the default.
pub fn merge(registry: &FeatureRegistry, stored: &Map<String, Value>) -> Preferences {
    registry
        .iter()
        .map(|feature| {
            let value = stored
                .get(&feature.name)
                .and_then(|raw| {
                    let parsed = FeatureValue::from_json(raw);
                    match parsed {
                        Some(v) if v.kind() == feature.default_value.kind() => Some(v),
                        _ => {
                            debug!(
                                feature = %feature.name,
                                expected = %feature.default_value.kind(),
                                "Ignoring incompatible stored value"
                            );
                            None
                        }
                    }
                })
                .unwrap_or_else(|| feature.default_value.clone());
            (feature.name.clone(), value)
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Owner of the in-memory preferences. `update` is the only mutation path
/// and always persists.
pub struct PreferenceStore {
    storage: Arc<dyn Storage>,
    key: String,
    defaults: Preferences,
    current: Preferences,
}

impl PreferenceStore {
    /// Load stored preferences for `registry` from `storage`.
    pub fn open(registry: &FeatureRegistry, storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        let key = key.into();
        let stored = load(storage.as_ref(), &key);
        let current = merge(registry, &stored);
        debug!(key = %key, features = current.len(), "Loaded preferences");
        Self {
            storage,
            key,
            defaults: registry.defaults(),
            current,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Copy of the current preferences.
    pub fn snapshot(&self) -> Preferences {
        self.current.clone()
    }

    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.current.get(name).cloned()
    }

    pub(crate) fn current(&self) -> &Preferences {
        &self.current
    }

    /// Write the current preferences.
    pub fn save(&self) -> Result<()> {
        let object: Map<String, Value> = self
            .current
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        let raw = serde_json::to_string(&Value::Object(object))?;
        self.storage.set(&self.key, &raw)?;
        Ok(())
    }

    /// Merge `partial` into the current preferences and persist. Unknown
    /// names and values of the wrong kind are skipped. Returns the names
    /// whose value changed.
    pub fn update(&mut self, partial: Preferences) -> Result<Vec<String>> {
        let mut changed = Vec::new();
        for (name, value) in partial {
            let Some(slot) = self.current.get_mut(&name) else {
                warn!(feature = %name, "Ignoring preference for unknown feature");
                continue;
            };
            if slot.kind() != value.kind() {
                warn!(
                    feature = %name,
                    expected = %slot.kind(),
                    found = %value.kind(),
                    "Ignoring preference of the wrong kind"
                );
                continue;
            }
            if let FeatureValue::Number(n) = value
                && !n.is_finite()
            {
                warn!(feature = %name, value = n, "Ignoring non-finite number");
                continue;
            }
            if *slot != value {
                *slot = value;
                changed.push(name);
            }
        }
        self.save()?;
        Ok(changed)
    }

    /// Restore one feature to its default.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        let default = self
            .defaults
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownFeature(name.to_string()))?;
        self.current.insert(name.to_string(), default);
        self.save()
    }

    /// Restore every feature to its default.
    pub fn reset_all(&mut self) -> Result<()> {
        self.current = self.defaults.clone();
        self.save()
    }
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("key", &self.key)
            .field("current", &self.current)
            .finish()
    }
}
