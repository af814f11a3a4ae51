//! Error types for the port orchestration engine
//!
//! Provides structured error types for the registry, the port engine,
//! the use-cases and the persistence layer.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Unregistered model: {model_name}")]
    UnregisteredModel { model_name: String },

    #[error("Unregistered model event: {event_type} {model_name}")]
    UnregisteredEvent {
        event_type: String,
        model_name: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Registry is sealed, cannot register {0}")]
    RegistrySealed(String),

    // =========================================================================
    // Model Errors
    // =========================================================================
    #[error("No such id: {id}")]
    NotFound { id: String },

    #[error("Port not found: {model_name}.{port_name}")]
    PortNotFound {
        model_name: String,
        port_name: String,
    },

    #[error("Model {id} is not bound to a specification")]
    UnboundModel { id: String },

    // =========================================================================
    // Port Errors
    // =========================================================================
    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Port {port_name} timed out after {after:?}")]
    PortTimeout { port_name: String, after: Duration },

    #[error("Port {port_name} failed after retries: {reason}")]
    PortExhausted { port_name: String, reason: String },

    // =========================================================================
    // Command Errors
    // =========================================================================
    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    // =========================================================================
    // Persistence & Notification Errors
    // =========================================================================
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Listener for {event_name} failed: {reason}")]
    Listener { event_name: String, reason: String },

    #[error("Serializer error: {0}")]
    Serializer(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    // =========================================================================
    // IO & Metrics Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Check if a port invocation failing with this error may be retried
    /// until the port's retry deadline
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidArgument(_)
                | Error::UnregisteredModel { .. }
                | Error::UnregisteredEvent { .. }
                | Error::PortNotFound { .. }
                | Error::UnboundModel { .. }
                | Error::PortExhausted { .. }
        )
    }

    /// Check if this error must be returned to the caller as a hard failure
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::UnregisteredModel { .. }
                | Error::UnregisteredEvent { .. }
                | Error::Persistence(_)
                | Error::Io(_)
        )
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let transient = Error::Adapter("payment gateway unavailable".into());
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let config_err = Error::Configuration("retryTimeout < timeout".into());
        assert!(!config_err.is_retryable());

        let timeout = Error::PortTimeout {
            port_name: "reserve".into(),
            after: Duration::from_secs(60),
        };
        assert!(timeout.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        let err = Error::NotFound { id: "1".into() };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "No such id: 1");

        let err = Error::UnregisteredModel {
            model_name: "ORDER".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }
}
