//! Feature definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::context::NavigationContext;
use crate::document::Document;

/// Value of a feature preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Plain on/off switch.
    Flag(bool),
    /// Numeric setting such as a delay.
    Number(f64),
    /// Free-form text setting.
    Text(String),
    /// List setting such as a time window.
    List(Vec<String>),
}

/// Basic kind of a [`FeatureValue`], used to reject stale stored shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Flag,
    Number,
    Text,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => write!(f, "flag"),
            Self::Number => write!(f, "number"),
            Self::Text => write!(f, "text"),
            Self::List => write!(f, "list"),
        }
    }
}

impl FeatureValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Flag(_) => ValueKind::Flag,
            Self::Number(_) => ValueKind::Number,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
        }
    }

    /// Whether the value enables its feature.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Flag(enabled) => *enabled,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Convert a JSON value. Returns `None` for shapes a preference can't take.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Flag(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for FeatureValue {
    fn from(value: [&str; N]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Eligibility check evaluated on every resolution.
pub type Predicate =
    Arc<dyn Fn(&NavigationContext, &FeatureValue) -> anyhow::Result<bool> + Send + Sync>;

/// Everything a behavior gets when its feature becomes active.
#[derive(Clone)]
pub struct Activation {
    /// Name of the activated feature.
    pub feature: String,
    /// Current preference value.
    pub value: FeatureValue,
    /// Navigation that triggered the cycle.
    pub context: NavigationContext,
    /// The decorated page.
    pub document: Arc<dyn Document>,
    /// Cancelled before the feature's handle is stopped.
    pub cancel: CancellationToken,
    /// Polling limits for element lookups.
    pub poll: PollConfig,
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("feature", &self.feature)
            .field("value", &self.value)
            .field("context", &self.context)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Imperative side of a feature.
///
/// `start` runs each time the feature enters the active set and must hand
/// back a [`FeatureHandle`]; returning an error is a configuration fault of
/// the feature and leaves it without a handle for this cycle.
pub trait Behavior: Send + Sync {
    fn start(&self, activation: Activation) -> anyhow::Result<Box<dyn FeatureHandle>>;
}

impl<F> Behavior for F
where
    F: Fn(Activation) -> anyhow::Result<Box<dyn FeatureHandle>> + Send + Sync,
{
    fn start(&self, activation: Activation) -> anyhow::Result<Box<dyn FeatureHandle>> {
        self(activation)
    }
}

/// Running instance of a behavior. Consumed by `stop`, so a start is
/// undone at most once.
pub trait FeatureHandle: Send {
    fn stop(self: Box<Self>) -> anyhow::Result<()>;
}

struct FnHandle<F>(F);

impl<F> FeatureHandle for FnHandle<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send,
{
    fn stop(self: Box<Self>) -> anyhow::Result<()> {
        (self.0)()
    }
}

/// Wrap a teardown closure as a handle.
pub fn handle_fn<F>(stop: F) -> Box<dyn FeatureHandle>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    Box::new(FnHandle(stop))
}

/// Handle with nothing to undo.
pub fn noop_handle() -> Box<dyn FeatureHandle> {
    handle_fn(|| Ok(()))
}

/// A feature that can be enabled/disabled.
#[derive(Clone)]
pub struct FeatureDescriptor {
    /// Unique, stable name.
    pub name: String,
    /// Description shown in feature listings.
    pub description: String,
    /// Value used when nothing usable is stored.
    pub default_value: FeatureValue,
    /// Optional eligibility check.
    pub predicate: Option<Predicate>,
    /// Optional imperative behavior.
    pub behavior: Option<Arc<dyn Behavior>>,
    /// CSS rules scoped under the feature's marker.
    pub style_rules: Vec<String>,
    /// Features whose visual effect this one suppresses while active.
    pub affects: BTreeSet<String>,
}

impl FeatureDescriptor {
    pub fn new(name: impl Into<String>, default_value: impl Into<FeatureValue>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default_value: default_value.into(),
            predicate: None,
            behavior: None,
            style_rules: Vec::new(),
            affects: BTreeSet::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Gate on an infallible condition.
    pub fn when<F>(self, predicate: F) -> Self
    where
        F: Fn(&NavigationContext) -> bool + Send + Sync + 'static,
    {
        self.when_value(move |ctx, _| Ok(predicate(ctx)))
    }

    /// Gate on a condition that also sees the current value and may fail.
    pub fn when_value<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NavigationContext, &FeatureValue) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn behavior(mut self, behavior: impl Behavior + 'static) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// Closure form of [`FeatureDescriptor::behavior`].
    pub fn on_activate<F>(self, start: F) -> Self
    where
        F: Fn(Activation) -> anyhow::Result<Box<dyn FeatureHandle>> + Send + Sync + 'static,
    {
        self.behavior(start)
    }

    pub fn style(mut self, rule: impl Into<String>) -> Self {
        self.style_rules.push(rule.into());
        self
    }

    pub fn affects(mut self, feature: impl Into<String>) -> Self {
        self.affects.insert(feature.into());
        self
    }

    pub fn has_behavior(&self) -> bool {
        self.behavior.is_some()
    }
}

impl fmt::Debug for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDescriptor")
            .field("name", &self.name)
            .field("default_value", &self.default_value)
            .field("predicate", &self.predicate.is_some())
            .field("behavior", &self.behavior.is_some())
            .field("style_rules", &self.style_rules.len())
            .field("affects", &self.affects)
            .finish()
    }
}

/// Information about a feature's current state.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureInfo {
    pub name: String,
    pub description: String,
    pub value: FeatureValue,
    /// Whether the feature is in the current active set.
    pub active: bool,
    /// Whether its behavior holds a live handle.
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(FeatureValue::Flag(true).is_truthy());
        assert!(!FeatureValue::Flag(false).is_truthy());
        assert!(FeatureValue::Number(300.0).is_truthy());
        assert!(!FeatureValue::Number(0.0).is_truthy());
        assert!(!FeatureValue::Text(String::new()).is_truthy());
        assert!(FeatureValue::from(["22:00", "07:00"]).is_truthy());
        assert!(!FeatureValue::List(Vec::new()).is_truthy());
    }

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(FeatureValue::from_json(&json!(true)), Some(FeatureValue::Flag(true)));
        assert_eq!(FeatureValue::from_json(&json!(5)), Some(FeatureValue::Number(5.0)));
        assert_eq!(
            FeatureValue::from_json(&json!(["a", "b"])),
            Some(FeatureValue::from(["a", "b"]))
        );
        assert_eq!(FeatureValue::from_json(&json!({"nested": true})), None);
        assert_eq!(FeatureValue::from_json(&json!([1, 2])), None);
        assert_eq!(FeatureValue::from_json(&json!(null)), None);
    }

    #[test]
    fn test_builder() {
        let feature = FeatureDescriptor::new("singleColumn", true)
            .description("One column layout")
            .when(|ctx| ctx.path() != "/settings")
            .style("main { display: block }")
            .affects("hideAvatars");

        assert_eq!(feature.name, "singleColumn");
        assert!(feature.predicate.is_some());
        assert!(!feature.has_behavior());
        assert_eq!(feature.style_rules.len(), 1);
        assert!(feature.affects.contains("hideAvatars"));
    }

    #[test]
    fn test_handle_fn_runs_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let handle = handle_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        handle.stop().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
