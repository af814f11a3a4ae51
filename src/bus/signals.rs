//! Engine Signals
//!
//! Side-channel notifications broadcast by the engine for monitoring and
//! observability. Signals are fire-and-forget; nobody awaits them.

use crate::domain::model::Model;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Signals emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    /// Port configuration cannot be honoured (retryTimeout < timeout)
    ConfigError {
        model_name: String,
        port_name: String,
        description: String,
    },

    /// An attempt outlived the port timeout
    PortTimeout {
        model_name: String,
        model_id: String,
        port_name: String,
        attempt: u32,
        timeout_secs: u64,
    },

    /// A port gave up retrying
    PortExhausted {
        model_name: String,
        model_id: String,
        port_name: String,
        error: String,
    },

    /// Command missing or not allowed for the caller
    UnauthorizedCommand {
        model_name: String,
        model_id: String,
        command: String,
    },

    /// Port invocation not allowed for the caller
    UnauthorizedPort {
        model_name: String,
        model_id: String,
        port_name: String,
    },

    /// A bus listener returned an error
    ListenerFailed { event_name: String, error: String },

    /// An interrupted workflow was picked up again
    WorkflowResumed {
        model_name: String,
        model_id: String,
        port_name: String,
    },

    /// Every completed port was undone
    CompensationCompleted {
        model_name: String,
        model_id: String,
        ports: Vec<String>,
    },

    /// A compensator failed; the model stays compensating
    CompensationFailed {
        model_name: String,
        model_id: String,
        port_name: String,
        error: String,
    },
}

impl Signal {
    pub fn config_error(model: &Model, port_name: &str, description: impl Into<String>) -> Self {
        Signal::ConfigError {
            model_name: model.name().to_string(),
            port_name: port_name.to_string(),
            description: description.into(),
        }
    }

    pub fn port_timeout(model: &Model, port_name: &str, attempt: u32, timeout_secs: u64) -> Self {
        Signal::PortTimeout {
            model_name: model.name().to_string(),
            model_id: model.id().to_string(),
            port_name: port_name.to_string(),
            attempt,
            timeout_secs,
        }
    }

    pub fn port_exhausted(model: &Model, port_name: &str, error: &Error) -> Self {
        Signal::PortExhausted {
            model_name: model.name().to_string(),
            model_id: model.id().to_string(),
            port_name: port_name.to_string(),
            error: error.to_string(),
        }
    }

    pub fn unauthorized_command(model: &Model, command: &str) -> Self {
        Signal::UnauthorizedCommand {
            model_name: model.name().to_string(),
            model_id: model.id().to_string(),
            command: command.to_string(),
        }
    }

    pub fn unauthorized_port(model: &Model, port_name: &str) -> Self {
        Signal::UnauthorizedPort {
            model_name: model.name().to_string(),
            model_id: model.id().to_string(),
            port_name: port_name.to_string(),
        }
    }

    pub fn workflow_resumed(model: &Model, port_name: &str) -> Self {
        Signal::WorkflowResumed {
            model_name: model.name().to_string(),
            model_id: model.id().to_string(),
            port_name: port_name.to_string(),
        }
    }

    /// Short name used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::ConfigError { .. } => "configError",
            Signal::PortTimeout { .. } => "portTimeout",
            Signal::PortExhausted { .. } => "portExhausted",
            Signal::UnauthorizedCommand { .. } => "unauthorizedCommand",
            Signal::UnauthorizedPort { .. } => "unauthorizedPort",
            Signal::ListenerFailed { .. } => "listenerFailed",
            Signal::WorkflowResumed { .. } => "workflowResumed",
            Signal::CompensationCompleted { .. } => "compensationCompleted",
            Signal::CompensationFailed { .. } => "compensationFailed",
        }
    }

    /// Model type the signal concerns, if any
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Signal::ConfigError { model_name, .. }
            | Signal::PortTimeout { model_name, .. }
            | Signal::PortExhausted { model_name, .. }
            | Signal::UnauthorizedCommand { model_name, .. }
            | Signal::UnauthorizedPort { model_name, .. }
            | Signal::WorkflowResumed { model_name, .. }
            | Signal::CompensationCompleted { model_name, .. }
            | Signal::CompensationFailed { model_name, .. } => Some(model_name),
            Signal::ListenerFailed { .. } => None,
        }
    }

    /// Check if the signal reports a failure
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Signal::WorkflowResumed { .. } | Signal::CompensationCompleted { .. }
        )
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::ConfigError {
                model_name,
                port_name,
                description,
            } => write!(f, "{}.{}: {}", model_name, port_name, description),
            Signal::PortTimeout {
                model_name,
                port_name,
                attempt,
                timeout_secs,
                ..
            } => write!(
                f,
                "{}.{} timed out after {}s (attempt {})",
                model_name, port_name, timeout_secs, attempt
            ),
            Signal::PortExhausted {
                model_name,
                port_name,
                error,
                ..
            } => write!(f, "{}.{} exhausted: {}", model_name, port_name, error),
            Signal::UnauthorizedCommand {
                model_name,
                command,
                ..
            } => write!(f, "{} command {} not authorized", model_name, command),
            Signal::UnauthorizedPort {
                model_name,
                port_name,
                ..
            } => write!(f, "{} port {} not authorized", model_name, port_name),
            Signal::ListenerFailed { event_name, error } => {
                write!(f, "listener for {} failed: {}", event_name, error)
            }
            Signal::WorkflowResumed {
                model_name,
                model_id,
                port_name,
            } => write!(f, "{} {} resumed after {}", model_name, model_id, port_name),
            Signal::CompensationCompleted {
                model_name,
                model_id,
                ports,
            } => write!(
                f,
                "{} {} compensated [{}]",
                model_name,
                model_id,
                ports.join(", ")
            ),
            Signal::CompensationFailed {
                model_name,
                port_name,
                error,
                ..
            } => write!(
                f,
                "{} compensation failed at {}: {}",
                model_name, port_name, error
            ),
        }
    }
}
