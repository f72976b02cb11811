//! Engine error types.

use thiserror::Error;

/// Errors raised by a [`Storage`](crate::storage::Storage) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error while reading or writing a backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the write.
    #[error("Storage write rejected for key '{key}': {message}")]
    WriteRejected { key: String, message: String },

    /// No usable data directory on this platform.
    #[error("Could not determine data directory")]
    DataDirNotFound,
}

/// Errors raised while decoding cross-context messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The envelope named a message kind the engine does not handle.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// The payload did not match the shape of its kind.
    #[error("Invalid payload for '{kind}': {message}")]
    InvalidPayload { kind: String, message: String },

    /// The envelope could not be decoded at all.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Every receiver of the channel is gone.
    #[error("Channel closed")]
    Closed,
}

/// Feature engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A predicate failed while being evaluated.
    #[error("Predicate of feature '{feature}' failed: {message}")]
    Predicate { feature: String, message: String },

    /// A behavior failed to start and produced no handle.
    #[error("Feature '{feature}' failed to start: {message}")]
    Start { feature: String, message: String },

    /// A handle failed while stopping.
    #[error("Feature '{feature}' failed to stop: {message}")]
    Stop { feature: String, message: String },

    /// The registry definition is inconsistent.
    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    /// A name does not belong to the registry.
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cross-context message failure.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// A navigation target could not be parsed as a URL.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The engine loop is no longer running.
    #[error("Engine is not running")]
    Closed,
}

impl EngineError {
    /// Create a predicate error.
    pub fn predicate(feature: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Predicate {
            feature: feature.into(),
            message: message.to_string(),
        }
    }

    /// Create a start error.
    pub fn start(feature: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Start {
            feature: feature.into(),
            message: message.to_string(),
        }
    }

    /// Create a stop error.
    pub fn stop(feature: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Stop {
            feature: feature.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error points at a wrong feature definition rather than
    /// an environmental condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Predicate { .. } | Self::Start { .. } | Self::InvalidRegistry(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownFeature("hideAvatars".to_string());
        assert_eq!(err.to_string(), "Unknown feature: hideAvatars");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(EngineError::predicate("singleColumn", "boom").is_configuration());
        assert!(EngineError::start("quietHours", "no handle").is_configuration());
        assert!(!EngineError::Closed.is_configuration());
        assert!(!EngineError::Bridge(BridgeError::UnknownKind("x".into())).is_configuration());
    }

    #[test]
    fn test_from_storage_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: EngineError = StorageError::from(io_err).into();
        assert!(matches!(err, EngineError::Storage(StorageError::Io(_))));
    }
}
