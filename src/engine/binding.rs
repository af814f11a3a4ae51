//! Port binding and invocation
//!
//! `PortEngine::bind` turns a specification's port declarations into a
//! `PortTable` of `BoundPort`s for one event bus. Enabled ports that consume
//! an event get a bus listener; those are the recordable ports whose
//! completions are appended to the model's port flow.

use crate::bus::{EventBus, EventHandler, EventPayload, Signal, SubscriptionId};
use crate::domain::event::EventName;
use crate::domain::model::Model;
use crate::domain::ports::{PortAdapterRef, PortRequest};
use crate::domain::spec::{ModelSpecification, PortConfig};
use crate::engine::callbacks::{self, ErrorContext, Retrier, TimeoutContext};
use crate::engine::invocation::{InvocationPhase, InvocationState, PortOutcome, PortTimer};
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// Bound Port
// =============================================================================

/// A port wired to its adapter, bus and metrics
pub struct BoundPort {
    name: String,
    model_name: String,
    config: Arc<PortConfig>,
    adapter: Option<PortAdapterRef>,
    recordable: bool,
    bus: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
    this: Weak<BoundPort>,
}

impl std::fmt::Debug for BoundPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundPort")
            .field("name", &self.name)
            .field("model_name", &self.model_name)
            .field("enabled", &self.is_enabled())
            .field("recordable", &self.recordable)
            .finish()
    }
}

impl BoundPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<PortConfig> {
        &self.config
    }

    /// Has an adapter and is not disabled
    pub fn is_enabled(&self) -> bool {
        self.adapter.is_some() && !self.config.disabled
    }

    /// Completions are recorded in the port flow
    pub fn is_recordable(&self) -> bool {
        self.recordable
    }

    /// Start a new invocation chain
    pub async fn invoke(&self, model: Model, args: Vec<Value>) -> PortOutcome {
        let state = InvocationState::new(self.config.retry_deadline());
        self.attempt(model, args, state).await
    }

    /// Run one attempt of the chain tracked by `state`
    pub(crate) async fn attempt(
        &self,
        model: Model,
        args: Vec<Value>,
        state: Arc<InvocationState>,
    ) -> PortOutcome {
        let adapter = match &self.adapter {
            Some(adapter) if !self.config.disabled => Arc::clone(adapter),
            _ => {
                debug!(model = %self.model_name, port = %self.name, "port disabled or unbound, skipping");
                self.metrics
                    .record_invocation(&self.model_name, &self.name, "skipped");
                return PortOutcome::Skipped;
            }
        };

        let attempt = state.begin_attempt();
        let timer = self.arm_timer(&model, &args, &state, attempt);
        let started = Instant::now();

        debug!(model = %self.model_name, id = %model.id(), port = %self.name, attempt, "invoking port");
        let result = adapter
            .invoke(PortRequest {
                model: model.clone(),
                args,
            })
            .await;
        self.metrics
            .observe_duration(&self.model_name, &self.name, started.elapsed());

        let outcome = match result {
            Ok(updated) => {
                if let Some(timer) = &timer {
                    timer.cancel();
                }
                if state.complete() {
                    self.complete(&model, updated, true)
                } else {
                    warn!(
                        model = %self.model_name,
                        id = %model.id(),
                        port = %self.name,
                        attempt,
                        phase = ?state.phase(),
                        "chain already settled, not publishing"
                    );
                    self.complete(&model, updated, false)
                }
            }
            Err(error) => {
                error!(
                    model = %self.model_name,
                    id = %model.id(),
                    port = %self.name,
                    attempt,
                    error = %error,
                    "port operation failed"
                );
                if state.phase() == InvocationPhase::Completed {
                    if let Some(timer) = &timer {
                        timer.cancel();
                    }
                    debug!(port = %self.name, attempt, "chain completed by another attempt");
                    PortOutcome::Retrying {
                        attempt,
                        error: error.to_string(),
                    }
                } else if self.should_give_up(&model, &state, &error) {
                    if let Some(timer) = &timer {
                        timer.cancel();
                    }
                    let reason = error.to_string();
                    self.escalate(model, error, &state).await;
                    PortOutcome::Exhausted { error: reason }
                } else {
                    PortOutcome::Retrying {
                        attempt,
                        error: error.to_string(),
                    }
                }
            }
        };

        self.metrics
            .record_invocation(&self.model_name, &self.name, outcome.label());
        outcome
    }

    /// Record the port on the updated model; only the attempt settling the
    /// chain publishes the produced event
    fn complete(&self, input: &Model, updated: Model, publish: bool) -> PortOutcome {
        let mut updated = updated.rebind_from(input);
        if self.recordable {
            updated = updated.with_port_recorded(&self.name);
        }

        if publish && self.recordable && !updated.is_compensating() {
            if let Some(event) = &self.config.produces_event {
                debug!(port = %self.name, event = %event, "publishing produced event");
                self.bus.publish(
                    EventName::new(event.clone()),
                    EventPayload::Model(updated.clone()),
                );
            }
        }

        info!(model = %self.model_name, id = %updated.id(), port = %self.name, "port completed");
        PortOutcome::Completed(updated)
    }

    /// Without a timer nothing re-runs a failed attempt, so a failure with
    /// `timeout = 0` ends the chain at once
    fn should_give_up(&self, model: &Model, state: &InvocationState, error: &Error) -> bool {
        if self.config.is_misconfigured() {
            self.report_misconfiguration(model);
            return true;
        }
        if self.config.timeout_duration().is_none() {
            debug!(model = %self.model_name, port = %self.name, "no timer armed, not retrying");
            return true;
        }
        !error.is_retryable()
            || state.deadline_passed()
            || state.phase() == InvocationPhase::Exhausted
    }

    pub(crate) fn report_misconfiguration(&self, model: &Model) {
        warn!(
            model = %self.model_name,
            port = %self.name,
            timeout = self.config.timeout,
            retry_timeout = self.config.retry_timeout,
            "config error: retryTimeout < timeout"
        );
        self.bus.emit(Signal::config_error(
            model,
            &self.name,
            "retryTimeout < timeout",
        ));
    }

    /// Run the error callback, at most once per chain
    pub(crate) async fn escalate(&self, model: Model, error: Error, state: &InvocationState) {
        if !state.try_exhaust() {
            debug!(port = %self.name, "chain already settled, error callback skipped");
            return;
        }
        self.bus
            .emit(Signal::port_exhausted(&model, &self.name, &error));
        let callback = self
            .config
            .error_callback
            .clone()
            .unwrap_or_else(callbacks::error_callback);
        callback(ErrorContext {
            model,
            error,
            port_name: self.name.clone(),
            port_conf: Arc::clone(&self.config),
            attempts: state.attempts(),
        })
        .await;
    }

    fn arm_timer(
        &self,
        model: &Model,
        args: &[Value],
        state: &Arc<InvocationState>,
        attempt: u32,
    ) -> Option<PortTimer> {
        let after = self.config.timeout_duration()?;
        let port = self.this.clone();
        let model = model.clone();
        let args = args.to_vec();
        let state = Arc::clone(state);
        Some(PortTimer::arm(after, async move {
            if let Some(port) = port.upgrade() {
                port.on_timeout(model, args, state, attempt).await;
            }
        }))
    }

    async fn on_timeout(
        &self,
        model: Model,
        args: Vec<Value>,
        state: Arc<InvocationState>,
        attempt: u32,
    ) {
        let timeouts = state.record_timeout();
        error!(
            model = %self.model_name,
            id = %model.id(),
            port = %self.name,
            attempt,
            timeouts,
            "port operation timed out"
        );
        self.metrics.record_timeout(&self.model_name, &self.name);
        self.bus.emit(Signal::port_timeout(
            &model,
            &self.name,
            attempt,
            self.config.timeout,
        ));

        let callback = self
            .config
            .timeout_callback
            .clone()
            .unwrap_or_else(callbacks::retry_callback);
        let retrier = Retrier::new(self.this.clone(), args, state);
        callback(TimeoutContext::new(
            model,
            self.name.clone(),
            Arc::clone(&self.config),
            attempt,
            retrier,
        ))
        .await;
    }
}

// =============================================================================
// Event Trigger
// =============================================================================

/// Bus listener invoking a port on the model carried by the event
struct PortTrigger {
    port: Weak<BoundPort>,
}

#[async_trait]
impl EventHandler for PortTrigger {
    async fn handle(&self, event_name: &EventName, payload: EventPayload) -> Result<()> {
        let Some(port) = self.port.upgrade() else {
            return Ok(());
        };
        let model = payload.model().cloned().ok_or_else(|| {
            Error::InvalidArgument(format!("event {} carries no model", event_name))
        })?;
        if model.name() != port.model_name {
            debug!(event = %event_name, port = %port.name, model = %model.name(), "event for another model type");
            return Ok(());
        }

        debug!(event = %event_name, port = %port.name, id = %model.id(), "event triggered port");
        let args = port.config.callback.clone().into_iter().collect();
        match port.invoke(model, args).await {
            PortOutcome::Exhausted { error } => Err(Error::PortExhausted {
                port_name: port.name.clone(),
                reason: error,
            }),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Port Table
// =============================================================================

/// Bound ports of one model type on one bus, in declaration order
#[derive(Debug, Default)]
pub struct PortTable {
    ports: IndexMap<String, Arc<BoundPort>>,
    subscriptions: Vec<SubscriptionId>,
}

impl PortTable {
    pub fn get(&self, name: &str) -> Option<&Arc<BoundPort>> {
        self.ports.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BoundPort>> {
        self.ports.values()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Listener subscriptions held on the bus
    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }
}

/// Binds specifications to an event bus
pub struct PortEngine;

impl PortEngine {
    pub fn bind(
        spec: &ModelSpecification,
        bus: &Arc<EventBus>,
        metrics: &Arc<EngineMetrics>,
    ) -> PortTable {
        let mut table = PortTable::default();

        for (name, config) in spec.ports() {
            let adapter = spec.adapter(name).cloned();
            let enabled = adapter.is_some() && !config.disabled;
            let trigger = config.consumes_event.clone().filter(|_| enabled);

            let port = Arc::new_cyclic(|this| BoundPort {
                name: name.clone(),
                model_name: spec.model_name().to_string(),
                config: Arc::clone(config),
                adapter,
                recordable: trigger.is_some(),
                bus: Arc::clone(bus),
                metrics: Arc::clone(metrics),
                this: this.clone(),
            });

            if let Some(event) = trigger {
                let id = bus.on(
                    EventName::new(event),
                    Arc::new(PortTrigger {
                        port: Arc::downgrade(&port),
                    }),
                    false,
                );
                table.subscriptions.push(id);
            } else if !enabled {
                debug!(model = %spec.model_name(), port = %name, "port disabled or unbound");
            }

            table.ports.insert(name.clone(), port);
        }

        info!(
            model = %spec.model_name(),
            ports = table.len(),
            listeners = table.subscriptions.len(),
            "ports bound"
        );
        table
    }
}
