//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Default persistence key for feature preferences.
pub const DEFAULT_STORAGE_KEY: &str = "refined-lite:features";

/// Default root attribute listing active features.
pub const DEFAULT_MARKER_ATTRIBUTE: &str = "data-refined-features";

/// Default root attribute listing visually suppressed features.
pub const DEFAULT_OVERRIDE_ATTRIBUTE: &str = "data-refined-override";

/// Default id of the injected stylesheet.
pub const DEFAULT_STYLESHEET_ID: &str = "refined-lite-style";

/// Configuration for the feature engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key under which preferences are persisted.
    pub storage_key: String,
    /// Root attribute reflecting the active set.
    pub marker_attribute: String,
    /// Root attribute reflecting suppressed visual effects.
    pub override_attribute: String,
    /// Id of the compiled stylesheet.
    pub stylesheet_id: String,
    /// Element polling used by behaviors.
    pub poll: PollConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            marker_attribute: DEFAULT_MARKER_ATTRIBUTE.to_string(),
            override_attribute: DEFAULT_OVERRIDE_ATTRIBUTE.to_string(),
            stylesheet_id: DEFAULT_STYLESHEET_ID.to_string(),
            poll: PollConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file. The settings live in an `[engine]` table; a
    /// file without one yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse the `[engine]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse()?;

        match table.get("engine") {
            Some(engine) => {
                let config: EngineConfig = engine.clone().try_into()?;
                config.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Render as a TOML document with an `[engine]` table.
    pub fn to_toml_string(&self) -> Result<String> {
        let mut table = toml::Table::new();
        let engine =
            toml::Value::try_from(self).map_err(|e| EngineError::Serialization(e.to_string()))?;
        table.insert("engine".to_string(), engine);
        toml::to_string_pretty(&table).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Reject settings the engine can't work with.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("storage_key", &self.storage_key),
            ("marker_attribute", &self.marker_attribute),
            ("override_attribute", &self.override_attribute),
            ("stylesheet_id", &self.stylesheet_id),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::Config(format!("{field} must not be empty")));
            }
        }
        if self.marker_attribute == self.override_attribute {
            return Err(EngineError::Config(
                "marker_attribute and override_attribute must differ".to_string(),
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(EngineError::Config(
                "poll.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry settings for element polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubled delay.
    pub max_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl PollConfig {
    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}
