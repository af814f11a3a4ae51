//! Timeout and error callbacks
//!
//! The defaults implement retry-until-deadline: a timed out attempt is
//! retried under the same invocation chain until the port's retry window is
//! spent, then the chain escalates to the error callback.

use crate::domain::model::Model;
use crate::domain::spec::{ErrorCallback, PortConfig, TimeoutCallback};
use crate::engine::binding::BoundPort;
use crate::engine::invocation::{InvocationState, PortOutcome};
use crate::error::Error;
use futures::FutureExt;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Handle to re-run the port of a timed out attempt
#[derive(Clone)]
pub(crate) struct Retrier {
    port: Weak<BoundPort>,
    args: Vec<Value>,
    state: Arc<InvocationState>,
}

impl Retrier {
    pub(crate) fn new(port: Weak<BoundPort>, args: Vec<Value>, state: Arc<InvocationState>) -> Self {
        Self { port, args, state }
    }
}

/// Passed to a port's timeout callback
pub struct TimeoutContext {
    pub model: Model,
    pub port_name: String,
    pub port_conf: Arc<PortConfig>,
    /// Attempt that timed out
    pub attempt: u32,
    /// Time since the first attempt of the chain
    pub elapsed: Duration,
    retrier: Retrier,
}

impl TimeoutContext {
    pub(crate) fn new(
        model: Model,
        port_name: String,
        port_conf: Arc<PortConfig>,
        attempt: u32,
        retrier: Retrier,
    ) -> Self {
        Self {
            model,
            port_name,
            port_conf,
            attempt,
            elapsed: retrier.state.elapsed(),
            retrier,
        }
    }

    /// Whether the retry window is spent
    pub fn retry_budget_spent(&self) -> bool {
        self.retrier.state.deadline_passed()
    }

    /// Whether another attempt of this chain already settled it
    pub fn is_settled(&self) -> bool {
        !self.retrier.state.is_running()
    }

    /// Run the port again under the same invocation chain
    pub async fn retry(self) -> PortOutcome {
        match self.retrier.port.upgrade() {
            Some(port) => {
                port.attempt(self.model, self.retrier.args, self.retrier.state)
                    .await
            }
            None => PortOutcome::Skipped,
        }
    }

    /// Stop retrying and run the error callback
    pub async fn give_up(self) -> PortOutcome {
        let error = Error::PortTimeout {
            port_name: self.port_name.clone(),
            after: Duration::from_secs(self.port_conf.timeout),
        };
        let reason = error.to_string();
        if let Some(port) = self.retrier.port.upgrade() {
            if self.port_conf.is_misconfigured() {
                port.report_misconfiguration(&self.model);
            }
            port.escalate(self.model, error, &self.retrier.state).await;
        }
        PortOutcome::Exhausted { error: reason }
    }
}

impl std::fmt::Debug for TimeoutContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutContext")
            .field("model", self.model.id())
            .field("port_name", &self.port_name)
            .field("attempt", &self.attempt)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// Passed to a port's error callback
#[derive(Debug)]
pub struct ErrorContext {
    pub model: Model,
    pub error: Error,
    pub port_name: String,
    pub port_conf: Arc<PortConfig>,
    pub attempts: u32,
}

/// Default timeout callback: retry while the window is open
pub fn retry_callback() -> TimeoutCallback {
    Arc::new(|ctx: TimeoutContext| {
        async move {
            if ctx.is_settled() {
                debug!(port = %ctx.port_name, attempt = ctx.attempt, "chain already settled, not retrying");
                return;
            }
            if ctx.retry_budget_spent() {
                warn!(
                    model = %ctx.model.name(),
                    port = %ctx.port_name,
                    elapsed = ?ctx.elapsed,
                    "retry window spent, giving up"
                );
                ctx.give_up().await;
                return;
            }
            debug!(port = %ctx.port_name, attempt = ctx.attempt, "retrying port");
            ctx.retry().await;
        }
        .boxed()
    })
}

/// Default error callback: log the failure
pub fn error_callback() -> ErrorCallback {
    Arc::new(|ctx: ErrorContext| {
        async move {
            error!(
                model = %ctx.model.name(),
                id = %ctx.model.id(),
                port = %ctx.port_name,
                attempts = ctx.attempts,
                error = %ctx.error,
                "port failed, no more retries"
            );
        }
        .boxed()
    })
}
