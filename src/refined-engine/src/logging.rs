//! Tracing subscriber setup for hosts embedding the engine.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{EngineError, Result};

/// Environment variable consulted before the supplied default filter.
pub const LOG_ENV: &str = "REFINED_LOG";

/// Install a global subscriber. `RUST_LOG`-style directives are read from
/// [`LOG_ENV`] and fall back to `default_filter`. Fails if a subscriber is
/// already installed.
pub fn init_logging(default_filter: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| EngineError::Config(format!("invalid log filter: {e}")))?,
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
    };

    installed.map_err(|e| EngineError::Config(format!("logging already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        // The first call may race other tests for the global slot.
        let _ = init_logging("refined_engine=debug", false);
        assert!(init_logging("info", true).is_err());
    }

    #[test]
    fn test_invalid_filter() {
        if std::env::var(LOG_ENV).is_err() {
            let err = init_logging("refined_engine=loud", false).unwrap_err();
            assert!(err.to_string().contains("invalid log filter"));
        }
    }
}
