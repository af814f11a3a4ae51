//! Event bus
//!
//! Named topics with awaited handlers, plus a broadcast side channel for
//! fire-and-forget [`Signal`]s.
//!
//! `notify` runs the handlers of a topic one after another in registration
//! order. A failing handler does not stop the others; the first error is
//! returned to the caller once every handler has run.

pub mod signals;

pub use signals::Signal;

use crate::domain::event::{DomainEvent, EditRequest, EventName};
use crate::domain::model::Model;
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Default signal channel capacity
pub const DEFAULT_SIGNAL_CAPACITY: usize = 1024;

/// What travels on a topic
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A model that completed a port
    Model(Model),
    /// A lifecycle event
    Event(DomainEvent),
    /// An inbound edit request
    Edit(EditRequest),
}

impl EventPayload {
    /// The model carried by the payload, if any
    pub fn model(&self) -> Option<&Model> {
        match self {
            EventPayload::Model(model) => Some(model),
            EventPayload::Event(event) => event.model.as_ref(),
            EventPayload::Edit(_) => None,
        }
    }
}

/// Topic handler
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event_name: &EventName, payload: EventPayload) -> Result<()>;
}

pub type EventHandlerRef = Arc<dyn EventHandler>;

/// Handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventName, EventPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event_name: &EventName, payload: EventPayload) -> Result<()> {
        (self.f)(event_name.clone(), payload).await
    }
}

/// Wrap an async closure as an event handler
pub fn handler_fn<F, Fut>(f: F) -> EventHandlerRef
where
    F: Fn(EventName, EventPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handle returned by [`EventBus::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: EventHandlerRef,
    once: bool,
}

/// In-process event bus
pub struct EventBus {
    id: Uuid,
    topics: RwLock<HashMap<EventName, Vec<Subscription>>>,
    signal_tx: broadcast::Sender<Signal>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl EventBus {
    /// Create a bus with the default signal capacity
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_capacity(signal_capacity: usize) -> Arc<Self> {
        Self::build(signal_capacity, None)
    }

    /// Create a bus that counts emitted signals
    pub fn with_metrics(signal_capacity: usize, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Self::build(signal_capacity, Some(metrics))
    }

    fn build(signal_capacity: usize, metrics: Option<Arc<EngineMetrics>>) -> Arc<Self> {
        let (signal_tx, _) = broadcast::channel(signal_capacity.max(1));
        Arc::new(Self {
            id: Uuid::new_v4(),
            topics: RwLock::new(HashMap::new()),
            signal_tx,
            metrics,
        })
    }

    /// Unique id of this bus
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe `handler` to `event_name`; `once` handlers are removed after
    /// their first delivery
    pub fn on(
        &self,
        event_name: impl Into<EventName>,
        handler: EventHandlerRef,
        once: bool,
    ) -> SubscriptionId {
        let event_name = event_name.into();
        let id = SubscriptionId(Uuid::new_v4());
        debug!(event = %event_name, subscription = %id, once, "listener registered");
        self.topics
            .write()
            .entry(event_name)
            .or_default()
            .push(Subscription { id, handler, once });
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut removed = false;
        for subscriptions in topics.values_mut() {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            removed |= subscriptions.len() != before;
        }
        topics.retain(|_, subscriptions| !subscriptions.is_empty());
        removed
    }

    /// Number of handlers subscribed to `event_name`
    pub fn listener_count(&self, event_name: &EventName) -> usize {
        self.topics.read().get(event_name).map_or(0, Vec::len)
    }

    /// Deliver `payload` to every handler of `event_name`
    pub async fn notify(&self, event_name: &EventName, payload: EventPayload) -> Result<()> {
        let subscriptions = {
            let mut topics = self.topics.write();
            match topics.get_mut(event_name) {
                Some(subscriptions) => {
                    let snapshot = subscriptions.clone();
                    subscriptions.retain(|s| !s.once);
                    snapshot
                }
                None => {
                    debug!(event = %event_name, "no listeners");
                    return Ok(());
                }
            }
        };

        let mut first_error = None;
        for subscription in subscriptions {
            if let Err(e) = subscription.handler.handle(event_name, payload.clone()).await {
                error!(event = %event_name, subscription = %subscription.id, error = %e, "event listener failed");
                self.emit(Signal::ListenerFailed {
                    event_name: event_name.to_string(),
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(Error::Listener {
                event_name: event_name.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Notify on a spawned task without awaiting the handlers
    pub fn publish(self: &Arc<Self>, event_name: EventName, payload: EventPayload) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = bus.notify(&event_name, payload).await {
                warn!(event = %event_name, error = %e, "published event had failing listeners");
            }
        })
    }

    /// Broadcast a signal
    pub fn emit(&self, signal: Signal) {
        debug!(kind = signal.kind(), %signal, "signal");
        if let Some(metrics) = &self.metrics {
            metrics.record_signal(signal.kind());
        }
        let _ = self.signal_tx.send(signal);
    }

    /// Subscribe to signals
    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }
}
