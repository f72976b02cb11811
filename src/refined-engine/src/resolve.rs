//! Active set resolution.

use tracing::{debug, error};

use crate::context::NavigationContext;
use crate::error::EngineError;
use crate::preferences::Preferences;
use crate::registry::FeatureRegistry;

/// Ordered names of the currently enabled features.
pub type ActiveSet = Vec<String>;

/// Outcome of one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Enabled features in registry order.
    pub active: ActiveSet,
    /// Features excluded because their predicate failed.
    pub errors: Vec<EngineError>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compute the active set for `context`.
///
/// A feature is active when its value is truthy and it has no predicate or
/// the predicate holds. A failing predicate excludes only its own feature
/// and is reported in [`Resolution::errors`].
pub fn resolve(
    registry: &FeatureRegistry,
    preferences: &Preferences,
    context: &NavigationContext,
) -> Resolution {
    let mut resolution = Resolution::default();

    for feature in registry.iter() {
        let value = preferences
            .get(&feature.name)
            .unwrap_or(&feature.default_value);

        if !value.is_truthy() {
            continue;
        }

        let eligible = match &feature.predicate {
            None => true,
            Some(predicate) => match predicate(context, value) {
                Ok(eligible) => eligible,
                Err(e) => {
                    error!(
                        feature = %feature.name,
                        url = %context.url(),
                        error = %e,
                        "Feature predicate is misconfigured"
                    );
                    resolution
                        .errors
                        .push(EngineError::predicate(&feature.name, format!("{e:#}")));
                    continue;
                }
            },
        };

        if eligible {
            resolution.active.push(feature.name.clone());
        } else {
            debug!(feature = %feature.name, path = context.path(), "Feature not eligible");
        }
    }

    resolution
}
