//! The feature engine.
//!
//! [`Engine`] owns the registry, the preferences and the running behaviors
//! and performs resolution cycles synchronously. [`EngineRuntime`] drives an
//! engine from navigation events, bridge messages and [`EngineHandle`]
//! commands on a single task, so cycles never interleave.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bridge::{BridgeMessage, Envelope, Subscription};
use crate::config::EngineConfig;
use crate::context::{NavigationContext, parse_url};
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::features::{FeatureInfo, FeatureValue};
use crate::lifecycle::{ApplyEnv, ApplyReport, LifecycleManager};
use crate::navigation::{NavigationEvent, NavigationReceiver};
use crate::preferences::{PreferenceStore, Preferences};
use crate::registry::FeatureRegistry;
use crate::resolve::{ActiveSet, resolve};
use crate::storage::Storage;
use crate::style::StyleProjector;

/// A preference change requested through the public surface.
pub enum FeatureUpdate {
    /// Values to merge over the current preferences.
    Partial(Preferences),
    /// Computes the values to merge from the current preferences.
    Updater(Box<dyn FnOnce(&Preferences) -> Preferences + Send>),
}

impl FeatureUpdate {
    pub fn set(name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        Self::Partial(Preferences::from([(name.into(), value.into())]))
    }

    pub fn updater<F>(f: F) -> Self
    where
        F: FnOnce(&Preferences) -> Preferences + Send + 'static,
    {
        Self::Updater(Box::new(f))
    }
}

impl From<Preferences> for FeatureUpdate {
    fn from(partial: Preferences) -> Self {
        Self::Partial(partial)
    }
}

impl fmt::Debug for FeatureUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial(partial) => f.debug_tuple("Partial").field(partial).finish(),
            Self::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

/// Outcome of one resolution cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// URL the cycle resolved for.
    pub url: Url,
    /// Resolved active set.
    pub active: ActiveSet,
    /// Predicate and persistence failures.
    pub errors: Vec<EngineError>,
    /// Lifecycle details, including behaviors that failed to start.
    pub lifecycle: ApplyReport,
}

impl CycleReport {
    /// Errors that identify misdefined features.
    pub fn configuration_errors(&self) -> impl Iterator<Item = &EngineError> {
        self.errors
            .iter()
            .chain(&self.lifecycle.failed)
            .filter(|e| e.is_configuration())
    }
}

/// Snapshot of the engine's observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    /// URL of the last cycle.
    pub url: Option<Url>,
    pub active: ActiveSet,
    /// Features holding a live handle.
    pub running: Vec<String>,
    pub preferences: Preferences,
    /// Completed cycles since startup.
    pub cycles: u64,
}

/// Explicitly owned feature engine.
pub struct Engine {
    registry: FeatureRegistry,
    preferences: PreferenceStore,
    lifecycle: LifecycleManager,
    document: Arc<dyn Document>,
    config: EngineConfig,
    context: Option<NavigationContext>,
    active: ActiveSet,
    cycles: u64,
    cancel: CancellationToken,
}

impl Engine {
    /// Build an engine, load preferences and inject the compiled stylesheet.
    pub fn new(
        registry: FeatureRegistry,
        storage: Arc<dyn Storage>,
        document: Arc<dyn Document>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        registry.validate()?;

        let preferences = PreferenceStore::open(&registry, storage, config.storage_key.clone());
        let stylesheet = StyleProjector::from_config(&config).compile(&registry);
        document.inject_stylesheet(&config.stylesheet_id, &stylesheet);

        let cancel = CancellationToken::new();
        info!(
            features = registry.len(),
            stylesheet_bytes = stylesheet.len(),
            "Feature engine ready"
        );

        Ok(Self {
            registry,
            preferences,
            lifecycle: LifecycleManager::with_token(cancel.clone()),
            document,
            config,
            context: None,
            active: ActiveSet::new(),
            cycles: 0,
            cancel,
        })
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Context of the last cycle.
    pub fn location(&self) -> Option<&NavigationContext> {
        self.context.as_ref()
    }

    /// Current active set.
    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// Copy of the current preferences.
    pub fn preferences(&self) -> Preferences {
        self.preferences.snapshot()
    }

    pub fn state(&self) -> EngineState {
        EngineState {
            url: self.context.as_ref().map(|ctx| ctx.url().clone()),
            active: self.active.clone(),
            running: self.lifecycle.running(),
            preferences: self.preferences.snapshot(),
            cycles: self.cycles,
        }
    }

    /// Per-feature listing in registry order.
    pub fn features(&self) -> Vec<FeatureInfo> {
        self.registry
            .iter()
            .map(|feature| FeatureInfo {
                name: feature.name.clone(),
                description: feature.description.clone(),
                value: self
                    .preferences
                    .get(&feature.name)
                    .unwrap_or_else(|| feature.default_value.clone()),
                active: self.active.contains(&feature.name),
                running: self.lifecycle.is_running(&feature.name),
            })
            .collect()
    }

    /// Run a full cycle for a navigation.
    pub fn navigate(&mut self, context: NavigationContext) -> CycleReport {
        let resolution = resolve(&self.registry, self.preferences.current(), &context);

        let env = ApplyEnv {
            context: &context,
            preferences: self.preferences.current(),
            document: self.document.clone(),
            poll: self.config.poll,
        };
        let lifecycle = self.lifecycle.apply(&resolution.active, &self.registry, &env);

        self.document
            .set_root_attribute(&self.config.marker_attribute, &resolution.active.join(" "));
        let suppressed = self
            .registry
            .suppressed_by(resolution.active.iter().map(String::as_str));
        self.document
            .set_root_attribute(&self.config.override_attribute, &suppressed.join(" "));

        self.cycles += 1;
        self.active = resolution.active.clone();

        info!(
            url = %context.url(),
            active = %self.active.join(" "),
            cycle = self.cycles,
            "Resolved features"
        );

        let report = CycleReport {
            url: context.url().clone(),
            active: resolution.active,
            errors: resolution.errors,
            lifecycle,
        };
        self.context = Some(context);
        report
    }

    /// Re-resolve for `url`, resolved against the current location, or for
    /// the current location when `None`.
    pub fn refresh(&mut self, url: Option<&str>) -> Result<CycleReport> {
        let base = self.base_url()?;
        let context = match url {
            Some(url) => {
                let target = match base.join(url) {
                    Ok(target) => target,
                    Err(_) => parse_url(url)?,
                };
                NavigationContext::new(target, self.document.title())
            }
            None => {
                let title = self
                    .context
                    .as_ref()
                    .map(|ctx| ctx.title().to_string())
                    .unwrap_or_else(|| self.document.title());
                NavigationContext::new(base, title)
            }
        };
        Ok(self.navigate(context))
    }

    /// Merge and persist preferences, then re-resolve. A persistence
    /// failure is reported in the cycle but doesn't stop it.
    pub fn set_features(&mut self, update: FeatureUpdate) -> Result<CycleReport> {
        let partial = match update {
            FeatureUpdate::Partial(partial) => partial,
            FeatureUpdate::Updater(updater) => updater(&self.preferences.snapshot()),
        };

        let persist_error = match self.preferences.update(partial) {
            Ok(changed) => {
                debug!(changed = ?changed, "Preferences updated");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist preferences");
                Some(e)
            }
        };

        let mut report = self.refresh(None)?;
        report.errors.extend(persist_error);
        Ok(report)
    }

    /// Restore one feature, or all of them, to the registry default and
    /// re-resolve.
    pub fn reset(&mut self, name: Option<&str>) -> Result<CycleReport> {
        match name {
            Some(name) => self.preferences.reset(name)?,
            None => self.preferences.reset_all()?,
        }
        self.refresh(None)
    }

    /// Handle a decoded bridge message.
    pub fn handle_message(&mut self, message: BridgeMessage) -> Result<CycleReport> {
        match message {
            BridgeMessage::SetFeatures(partial) => {
                self.set_features(FeatureUpdate::Partial(self.decode_partial(partial)))
            }
            BridgeMessage::Refresh { url } => self.refresh(url.as_deref()),
        }
    }

    /// Decode and handle a raw envelope. Unknown kinds and bad payloads are
    /// logged and ignored.
    pub fn handle_envelope(&mut self, envelope: Envelope) -> Option<CycleReport> {
        let kind = envelope.kind.clone();
        let message = match BridgeMessage::try_from(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Ignoring bridge message");
                return None;
            }
        };

        match self.handle_message(message) {
            Ok(report) => Some(report),
            Err(e) => {
                error!(kind = %kind, error = %e, "Bridge message failed");
                None
            }
        }
    }

    /// Stop every running behavior and cancel outstanding polls.
    pub fn shutdown(&mut self) -> ApplyReport {
        self.cancel.cancel();
        let report = self.lifecycle.shutdown();
        info!(stopped = report.stopped.len(), "Feature engine stopped");
        report
    }

    fn base_url(&self) -> Result<Url> {
        match &self.context {
            Some(ctx) => Ok(ctx.url().clone()),
            None => parse_url(&self.document.current_url()),
        }
    }

    fn decode_partial(&self, partial: indexmap::IndexMap<String, Value>) -> Preferences {
        partial
            .into_iter()
            .filter_map(|(name, raw)| match FeatureValue::from_json(&raw) {
                Some(value) => Some((name, value)),
                None => {
                    warn!(feature = %name, value = %raw, "Ignoring unusable preference value");
                    None
                }
            })
            .collect()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("features", &self.registry.len())
            .field("active", &self.active)
            .field("cycles", &self.cycles)
            .finish()
    }
}

enum Command {
    SetFeatures(FeatureUpdate, oneshot::Sender<Result<CycleReport>>),
    Refresh(Option<String>, oneshot::Sender<Result<CycleReport>>),
    State(oneshot::Sender<EngineState>),
    Shutdown(oneshot::Sender<ApplyReport>),
}

/// Public control surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Merge and persist preferences, then re-resolve.
    pub async fn set_features(&self, update: impl Into<FeatureUpdate>) -> Result<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetFeatures(update.into(), reply))?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Force re-resolution.
    pub async fn refresh(&self, url: Option<String>) -> Result<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh(url, reply))?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn state(&self) -> Result<EngineState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State(reply))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stop the loop and every running behavior.
    pub async fn shutdown(&self) -> Result<ApplyReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| EngineError::Closed)
    }
}

/// Drives an [`Engine`] on a tokio task.
pub struct EngineRuntime {
    handle: EngineHandle,
    task: JoinHandle<Engine>,
}

impl EngineRuntime {
    /// Run the initial cycle for the latest known location (or the
    /// document's), then process input until shutdown or until every handle
    /// is dropped. Pending navigation is handled before bridge messages, and
    /// both before handle commands.
    pub fn spawn(
        mut engine: Engine,
        mut navigation: NavigationReceiver,
        bridge: Option<Subscription>,
    ) -> Self {
        let (tx, mut commands) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let initial = navigation.take_latest();
            run_initial(&mut engine, initial);
            record_location(&engine, &mut navigation);

            let mut bridge = bridge;
            let mut navigation_open = true;

            loop {
                tokio::select! {
                    biased;

                    event = navigation.next(), if navigation_open => match event {
                        Some(event) => {
                            if engine.location().is_some_and(|ctx| ctx.url() == &event.url) {
                                debug!(url = %event.url, "Navigation returned to the current location");
                            } else {
                                engine.navigate(event.context());
                            }
                        }
                        None => {
                            debug!("Navigation sources closed");
                            navigation_open = false;
                        }
                    },

                    envelope = next_envelope(&mut bridge), if bridge.is_some() => match envelope {
                        Some(envelope) => {
                            engine.handle_envelope(envelope);
                            record_location(&engine, &mut navigation);
                        }
                        None => {
                            debug!("Bridge channel closed");
                            bridge = None;
                        }
                    },

                    command = commands.recv() => match command {
                        Some(Command::Shutdown(reply)) => {
                            let _ = reply.send(engine.shutdown());
                            break;
                        }
                        Some(command) => {
                            handle_command(&mut engine, command);
                            record_location(&engine, &mut navigation);
                        }
                        None => {
                            engine.shutdown();
                            break;
                        }
                    },
                }
            }
            engine
        });

        Self {
            handle: EngineHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Wait for the loop to finish and take the engine back.
    pub async fn join(self) -> Result<Engine> {
        drop(self.handle);
        self.task.await.map_err(|e| {
            error!(error = %e, "Engine task failed");
            EngineError::Closed
        })
    }
}

fn run_initial(engine: &mut Engine, initial: Option<NavigationEvent>) {
    match initial {
        Some(event) => {
            engine.navigate(event.context());
        }
        None => {
            if let Err(e) = engine.refresh(None) {
                warn!(error = %e, "Initial resolution skipped");
            }
        }
    }
}

/// Make the engine's location the reference the navigation sinks
/// deduplicate against.
fn record_location(engine: &Engine, navigation: &mut NavigationReceiver) {
    if let Some(ctx) = engine.location() {
        navigation.record(ctx.url(), ctx.title());
    }
}

fn handle_command(engine: &mut Engine, command: Command) {
    match command {
        Command::SetFeatures(update, reply) => {
            let _ = reply.send(engine.set_features(update));
        }
        Command::Refresh(url, reply) => {
            let _ = reply.send(engine.refresh(url.as_deref()));
        }
        Command::State(reply) => {
            let _ = reply.send(engine.state());
        }
        Command::Shutdown(reply) => {
            let _ = reply.send(engine.shutdown());
        }
    }
}

async fn next_envelope(bridge: &mut Option<Subscription>) -> Option<Envelope> {
    match bridge {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use crate::features::FeatureDescriptor;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn registry() -> FeatureRegistry {
        FeatureRegistry::from_features([
            FeatureDescriptor::new("singleColumn", true)
                .when(|ctx| !matches!(ctx.path(), "/messages" | "/settings"))
                .style("main > div { flex-direction: row-reverse }"),
            FeatureDescriptor::new("hideAvatars", false).style("img { display: none }"),
        ])
        .unwrap()
    }

    fn engine(document: Arc<MemoryDocument>) -> Engine {
        Engine::new(
            registry(),
            Arc::new(MemoryStorage::new()),
            document,
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_stylesheet_injected_once_at_startup() {
        let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
        let mut engine = engine(document.clone());
        let sheet = document.stylesheet(crate::config::DEFAULT_STYLESHEET_ID).unwrap();
        assert!(sheet.contains(":root[data-refined-features~=\"singleColumn\"] main > div"));

        engine.refresh(Some("/messages")).unwrap();
        assert_eq!(document.stylesheet_count(), 1);
        assert_eq!(document.stylesheet(crate::config::DEFAULT_STYLESHEET_ID).unwrap(), sheet);
    }

    #[test]
    fn test_marker_attribute_tracks_active_set() {
        let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
        let mut engine = engine(document.clone());

        engine.refresh(None).unwrap();
        assert_eq!(
            document.root_attribute("data-refined-features").as_deref(),
            Some("singleColumn")
        );

        engine.set_features(FeatureUpdate::set("hideAvatars", true)).unwrap();
        assert_eq!(
            document.root_attribute("data-refined-features").as_deref(),
            Some("singleColumn hideAvatars")
        );

        engine.refresh(Some("/settings")).unwrap();
        assert_eq!(
            document.root_attribute("data-refined-features").as_deref(),
            Some("hideAvatars")
        );
        assert_eq!(engine.state().url.unwrap().path(), "/settings");
    }

    #[test]
    fn test_updater_sees_current_preferences() {
        let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
        let mut engine = engine(document);

        let report = engine
            .set_features(FeatureUpdate::updater(|current| {
                let toggled = !current["hideAvatars"].is_truthy();
                Preferences::from([("hideAvatars".to_string(), FeatureValue::Flag(toggled))])
            }))
            .unwrap();
        assert_eq!(report.active, vec!["singleColumn", "hideAvatars"]);
    }

    #[test]
    fn test_unknown_envelope_is_ignored() {
        let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
        let mut engine = engine(document);
        assert!(engine
            .handle_envelope(Envelope::new("reboot", Value::Null))
            .is_none());
        assert_eq!(engine.state().cycles, 0);
    }

    #[test]
    fn test_feature_listing() {
        let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
        let mut engine = engine(document);
        engine.refresh(None).unwrap();

        let listing = engine.features();
        assert_eq!(listing.len(), 2);
        assert!(listing[0].active);
        assert!(!listing[1].active);
        assert_eq!(listing[1].value, FeatureValue::Flag(false));
    }
}
