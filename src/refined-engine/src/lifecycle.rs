//! Behavior lifecycle management.
//!
//! Every apply cycle stops all running handles (newest first) and then
//! starts the behaviors of the new active set in registry order. Applying
//! the same set twice restarts everything; callers that want to avoid the
//! churn short-circuit before calling [`LifecycleManager::apply`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::context::NavigationContext;
use crate::document::Document;
use crate::error::EngineError;
use crate::features::{Activation, FeatureHandle};
use crate::preferences::Preferences;
use crate::registry::FeatureRegistry;

/// Inputs shared by every behavior started in one cycle.
pub struct ApplyEnv<'a> {
    pub context: &'a NavigationContext,
    pub preferences: &'a Preferences,
    pub document: Arc<dyn Document>,
    pub poll: PollConfig,
}

/// What happened during one apply cycle.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Handles stopped, in stop order.
    pub stopped: Vec<String>,
    /// Behaviors started, in start order.
    pub started: Vec<String>,
    /// Behaviors that failed to start.
    pub failed: Vec<EngineError>,
    /// Handles that reported an error while stopping.
    pub stop_failures: Vec<EngineError>,
}

struct RunningFeature {
    name: String,
    handle: Box<dyn FeatureHandle>,
    cancel: CancellationToken,
}

/// Sole owner of the running feature handles.
pub struct LifecycleManager {
    running: Vec<RunningFeature>,
    root: CancellationToken,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Manager whose activation tokens are children of `root`.
    pub fn with_token(root: CancellationToken) -> Self {
        Self {
            running: Vec::new(),
            root,
        }
    }

    /// Names with a live handle, in start order.
    pub fn running(&self) -> Vec<String> {
        self.running.iter().map(|r| r.name.clone()).collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.iter().any(|r| r.name == name)
    }

    /// Stop everything, then start the behaviors of `active`.
    pub fn apply(
        &mut self,
        active: &[String],
        registry: &FeatureRegistry,
        env: &ApplyEnv<'_>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.stop_all(&mut report);

        for name in active {
            let Some(feature) = registry.get(name) else {
                warn!(feature = %name, "Active feature is not registered");
                continue;
            };
            let Some(behavior) = &feature.behavior else {
                continue;
            };

            let cancel = self.root.child_token();
            let activation = Activation {
                feature: name.clone(),
                value: env
                    .preferences
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| feature.default_value.clone()),
                context: env.context.clone(),
                document: env.document.clone(),
                cancel: cancel.clone(),
                poll: env.poll,
            };

            match behavior.start(activation) {
                Ok(handle) => {
                    debug!(feature = %name, "Started feature");
                    self.running.push(RunningFeature {
                        name: name.clone(),
                        handle,
                        cancel,
                    });
                    report.started.push(name.clone());
                }
                Err(e) => {
                    cancel.cancel();
                    error!(feature = %name, error = %e, "Feature failed to start");
                    report.failed.push(EngineError::start(name, format!("{e:#}")));
                }
            }
        }

        info!(
            stopped = report.stopped.len(),
            started = report.started.len(),
            failed = report.failed.len(),
            "Applied active set"
        );
        report
    }

    /// Stop every running handle.
    pub fn shutdown(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.stop_all(&mut report);
        report
    }

    fn stop_all(&mut self, report: &mut ApplyReport) {
        while let Some(running) = self.running.pop() {
            running.cancel.cancel();
            match running.handle.stop() {
                Ok(()) => debug!(feature = %running.name, "Stopped feature"),
                Err(e) => {
                    warn!(feature = %running.name, error = %e, "Feature failed to stop cleanly");
                    report
                        .stop_failures
                        .push(EngineError::stop(&running.name, format!("{e:#}")));
                }
            }
            report.stopped.push(running.name);
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if !self.running.is_empty() {
            let mut report = ApplyReport::default();
            self.stop_all(&mut report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use crate::features::{FeatureDescriptor, handle_fn};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    type Log = Arc<Mutex<Vec<String>>>;

    fn tracked(name: &'static str, log: &Log) -> FeatureDescriptor {
        let log = log.clone();
        FeatureDescriptor::new(name, true).on_activate(move |_activation: Activation| {
            log.lock().push(format!("start {name}"));
            let log = log.clone();
            Ok(handle_fn(move || {
                log.lock().push(format!("stop {name}"));
                Ok(())
            }))
        })
    }

    fn env_for<'a>(ctx: &'a NavigationContext, prefs: &'a Preferences) -> ApplyEnv<'a> {
        ApplyEnv {
            context: ctx,
            preferences: prefs,
            document: Arc::new(MemoryDocument::default()),
            poll: PollConfig::default(),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stop_before_start_in_reverse_order() {
        let log: Log = Arc::default();
        let registry = FeatureRegistry::from_features([
            tracked("a", &log),
            tracked("b", &log),
            FeatureDescriptor::new("css-only", true),
            tracked("c", &log),
        ])
        .unwrap();
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home", "").unwrap();
        let prefs = registry.defaults();
        let env = env_for(&ctx, &prefs);
        let mut manager = LifecycleManager::new();

        manager.apply(&names(&["a", "b", "css-only"]), &registry, &env);
        assert_eq!(manager.running(), names(&["a", "b"]));

        log.lock().clear();
        let report = manager.apply(&names(&["b", "c"]), &registry, &env);
        assert_eq!(
            *log.lock(),
            names(&["stop b", "stop a", "start b", "start c"])
        );
        assert_eq!(report.stopped, names(&["b", "a"]));
        assert_eq!(report.started, names(&["b", "c"]));
        assert_eq!(manager.running(), names(&["b", "c"]));
    }

    #[test]
    fn test_same_set_restarts() {
        let log: Log = Arc::default();
        let registry = FeatureRegistry::from_features([tracked("a", &log)]).unwrap();
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home", "").unwrap();
        let prefs = registry.defaults();
        let env = env_for(&ctx, &prefs);
        let mut manager = LifecycleManager::new();

        manager.apply(&names(&["a"]), &registry, &env);
        manager.apply(&names(&["a"]), &registry, &env);
        assert_eq!(*log.lock(), names(&["start a", "stop a", "start a"]));
    }

    #[test]
    fn test_failed_start_does_not_block_others() {
        let log: Log = Arc::default();
        let registry = FeatureRegistry::from_features([
            tracked("a", &log),
            FeatureDescriptor::new("broken", true)
                .on_activate(|_| anyhow::bail!("element table not initialised")),
            tracked("c", &log),
        ])
        .unwrap();
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home", "").unwrap();
        let prefs = registry.defaults();
        let env = env_for(&ctx, &prefs);
        let mut manager = LifecycleManager::new();

        let report = manager.apply(&names(&["a", "broken", "c"]), &registry, &env);
        assert_eq!(report.started, names(&["a", "c"]));
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].is_configuration());
        assert_eq!(manager.running(), names(&["a", "c"]));
    }

    #[test]
    fn test_stop_failure_does_not_block_other_stops() {
        let log: Log = Arc::default();
        let registry = FeatureRegistry::from_features([
            tracked("a", &log),
            FeatureDescriptor::new("flaky", true).on_activate(|_: Activation| {
                Ok(handle_fn(|| Err(anyhow::anyhow!("node already detached"))))
            }),
        ])
        .unwrap();
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home", "").unwrap();
        let prefs = registry.defaults();
        let env = env_for(&ctx, &prefs);
        let mut manager = LifecycleManager::new();

        manager.apply(&names(&["a", "flaky"]), &registry, &env);
        let report = manager.shutdown();
        assert_eq!(report.stopped, names(&["flaky", "a"]));
        assert_eq!(report.stop_failures.len(), 1);
        assert!(log.lock().contains(&"stop a".to_string()));
        assert!(manager.running().is_empty());
    }

    #[test]
    fn test_activation_token_cancelled_on_stop() {
        let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
        let slot = seen.clone();
        let registry = FeatureRegistry::from_features([FeatureDescriptor::new("poller", true)
            .on_activate(move |activation: Activation| {
                *slot.lock() = Some(activation.cancel.clone());
                Ok(crate::features::noop_handle())
            })])
        .unwrap();
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home", "").unwrap();
        let prefs = registry.defaults();
        let env = env_for(&ctx, &prefs);
        let mut manager = LifecycleManager::new();

        manager.apply(&names(&["poller"]), &registry, &env);
        let token = seen.lock().clone().unwrap();
        assert!(!token.is_cancelled());
        manager.apply(&[], &registry, &env);
        assert!(token.is_cancelled());
    }
}
