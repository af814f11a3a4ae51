//! Model specifications
//!
//! A `ModelSpecification` declares a model type: its ports, the adapters
//! bound to them, its commands and its serializer rules. Specifications are
//! immutable once built.

use crate::domain::event::normalize_model_name;
use crate::domain::ports::{CommandHandlerRef, PortAdapterRef};
use crate::engine::callbacks::{ErrorContext, TimeoutContext};
use crate::engine::graph::WorkflowGraph;
use crate::error::{Error, Result};
use crate::serializer::SerializerRule;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default port timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default retry deadline in seconds
pub const DEFAULT_RETRY_TIMEOUT_SECS: u64 = 900;

/// Runs when a port attempt outlives its timeout
pub type TimeoutCallback = Arc<dyn Fn(TimeoutContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs once when a port gives up
pub type ErrorCallback = Arc<dyn Fn(ErrorContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds the domain fields of a new model from creation arguments
pub type FieldFactory = Arc<dyn Fn(Value) -> Result<Map<String, Value>> + Send + Sync>;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_timeout() -> u64 {
    DEFAULT_RETRY_TIMEOUT_SECS
}

// =============================================================================
// Port Configuration
// =============================================================================

/// Configuration of a single port
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    /// Seconds before an attempt is considered timed out; 0 disables the
    /// timer, and with it retries: a failed attempt then escalates at once
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds after the first attempt during which failures are retried
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout: u64,

    /// Event that triggers this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumes_event: Option<String>,

    /// Event published when this port completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces_event: Option<String>,

    /// Argument passed to the adapter on event-triggered invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<Value>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(skip)]
    pub timeout_callback: Option<TimeoutCallback>,

    #[serde(skip)]
    pub error_callback: Option<ErrorCallback>,

    /// Adapter undoing this port during compensation
    #[serde(skip)]
    pub compensator: Option<PortAdapterRef>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            retry_timeout: DEFAULT_RETRY_TIMEOUT_SECS,
            consumes_event: None,
            produces_event: None,
            callback: None,
            disabled: false,
            timeout_callback: None,
            error_callback: None,
            compensator: None,
        }
    }
}

impl fmt::Debug for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortConfig")
            .field("timeout", &self.timeout)
            .field("retry_timeout", &self.retry_timeout)
            .field("consumes_event", &self.consumes_event)
            .field("produces_event", &self.produces_event)
            .field("callback", &self.callback)
            .field("disabled", &self.disabled)
            .field("timeout_callback", &self.timeout_callback.is_some())
            .field("error_callback", &self.error_callback.is_some())
            .field("compensator", &self.compensator.is_some())
            .finish()
    }
}

impl PortConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumes(mut self, event: impl Into<String>) -> Self {
        self.consumes_event = Some(event.into());
        self
    }

    pub fn produces(mut self, event: impl Into<String>) -> Self {
        self.produces_event = Some(event.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn retry_timeout_secs(mut self, secs: u64) -> Self {
        self.retry_timeout = secs;
        self
    }

    pub fn with_callback(mut self, callback: Value) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn disable(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn compensate_with(mut self, compensator: PortAdapterRef) -> Self {
        self.compensator = Some(compensator);
        self
    }

    /// Override the timeout callback
    pub fn on_timeout<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TimeoutContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.timeout_callback = Some(Arc::new(move |ctx: TimeoutContext| f(ctx).boxed()));
        self
    }

    /// Override the error callback
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_callback = Some(Arc::new(move |ctx: ErrorContext| f(ctx).boxed()));
        self
    }

    /// Timer duration, `None` when the timer is disabled
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn retry_deadline(&self) -> Duration {
        Duration::from_secs(self.retry_timeout)
    }

    /// A retry deadline shorter than the timeout can never be honoured
    pub fn is_misconfigured(&self) -> bool {
        self.retry_timeout < self.timeout
    }
}

// =============================================================================
// Commands
// =============================================================================

/// What a command runs
#[derive(Clone)]
pub enum Command {
    /// Custom handler returning field changes
    Handler(CommandHandlerRef),
    /// A port of the same model
    Port(String),
}

/// A command and the permissions allowed to run it
#[derive(Clone)]
pub struct CommandSpec {
    pub command: Command,
    pub acl: Vec<String>,
}

impl CommandSpec {
    pub fn handler(handler: CommandHandlerRef) -> Self {
        Self {
            command: Command::Handler(handler),
            acl: Vec::new(),
        }
    }

    pub fn port(port_name: impl Into<String>) -> Self {
        Self {
            command: Command::Port(port_name.into()),
            acl: Vec::new(),
        }
    }

    pub fn with_acl<I, S>(mut self, acl: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acl = acl.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match &self.command {
            Command::Handler(_) => "handler".to_string(),
            Command::Port(port) => format!("port:{}", port),
        };
        f.debug_struct("CommandSpec")
            .field("command", &command)
            .field("acl", &self.acl)
            .finish()
    }
}

// =============================================================================
// Model Specification
// =============================================================================

/// Immutable declaration of a model type
pub struct ModelSpecification {
    model_name: String,
    ports: IndexMap<String, Arc<PortConfig>>,
    adapters: HashMap<String, PortAdapterRef>,
    commands: IndexMap<String, CommandSpec>,
    serializers: Vec<SerializerRule>,
    factory: Option<FieldFactory>,
    is_remote: bool,
    graph: WorkflowGraph,
}

impl fmt::Debug for ModelSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSpecification")
            .field("model_name", &self.model_name)
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("serializers", &self.serializers.len())
            .field("is_remote", &self.is_remote)
            .finish()
    }
}

impl ModelSpecification {
    pub fn builder(model_name: impl Into<String>) -> ModelSpecBuilder {
        ModelSpecBuilder::new(model_name)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn ports(&self) -> &IndexMap<String, Arc<PortConfig>> {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Arc<PortConfig>> {
        self.ports.get(name)
    }

    pub fn adapter(&self, port_name: &str) -> Option<&PortAdapterRef> {
        self.adapters.get(port_name)
    }

    pub fn commands(&self) -> &IndexMap<String, CommandSpec> {
        &self.commands
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn serializers(&self) -> &[SerializerRule] {
        &self.serializers
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Domain fields for a new model
    pub(crate) fn fields_from(&self, args: Value) -> Result<Map<String, Value>> {
        match &self.factory {
            Some(factory) => factory(args),
            None => match args {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                other => Err(Error::InvalidArgument(format!(
                    "{} expects an object of fields, got {}",
                    self.model_name, other
                ))),
            },
        }
    }
}

/// Builder for [`ModelSpecification`]
pub struct ModelSpecBuilder {
    model_name: String,
    ports: IndexMap<String, PortConfig>,
    adapters: HashMap<String, PortAdapterRef>,
    commands: IndexMap<String, CommandSpec>,
    serializers: Vec<SerializerRule>,
    factory: Option<FieldFactory>,
    is_remote: bool,
}

impl ModelSpecBuilder {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ports: IndexMap::new(),
            adapters: HashMap::new(),
            commands: IndexMap::new(),
            serializers: Vec::new(),
            factory: None,
            is_remote: false,
        }
    }

    /// Declare a port; the first declaration of a name wins
    pub fn port(mut self, name: impl Into<String>, config: PortConfig) -> Self {
        let name = name.into();
        if self.ports.contains_key(&name) {
            warn!(model = %self.model_name, port = %name, "duplicate port declaration ignored");
            return self;
        }
        self.ports.insert(name, config);
        self
    }

    /// Bind an adapter to a port
    pub fn adapter(mut self, port_name: impl Into<String>, adapter: PortAdapterRef) -> Self {
        self.adapters.insert(port_name.into(), adapter);
        self
    }

    pub fn command(mut self, name: impl Into<String>, command: CommandSpec) -> Self {
        self.commands.insert(name.into(), command);
        self
    }

    pub fn serializer(mut self, rule: SerializerRule) -> Self {
        self.serializers.push(rule);
        self
    }

    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(Value) -> Result<Map<String, Value>> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn remote(mut self, is_remote: bool) -> Self {
        self.is_remote = is_remote;
        self
    }

    pub fn build(self) -> Result<ModelSpecification> {
        let model_name = normalize_model_name(&self.model_name)?;

        for (name, command) in &self.commands {
            if let Command::Port(port) = &command.command {
                if !self.ports.contains_key(port) {
                    return Err(Error::Configuration(format!(
                        "{}: command {} references unknown port {}",
                        model_name, name, port
                    )));
                }
            }
        }

        for port in self.adapters.keys() {
            if !self.ports.contains_key(port) {
                warn!(model = %model_name, port = %port, "adapter bound to undeclared port");
            }
        }

        for (name, config) in &self.ports {
            if config.is_misconfigured() {
                warn!(
                    model = %model_name,
                    port = %name,
                    timeout = config.timeout,
                    retry_timeout = config.retry_timeout,
                    "retryTimeout is shorter than timeout"
                );
            }
        }

        let adapters = self.adapters;
        let graph = WorkflowGraph::from_ports(
            self.ports.iter(),
            |name, config| !config.disabled && adapters.contains_key(name),
        );
        if graph.has_cycle() {
            warn!(model = %model_name, "workflow graph contains a cycle");
        }

        Ok(ModelSpecification {
            model_name,
            ports: self
                .ports
                .into_iter()
                .map(|(name, config)| (name, Arc::new(config)))
                .collect(),
            adapters,
            commands: self.commands,
            serializers: self.serializers,
            factory: self.factory,
            is_remote: self.is_remote,
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{adapter_fn, PortRequest};
    use serde_json::json;

    fn noop() -> PortAdapterRef {
        adapter_fn(|req: PortRequest| async move { Ok(req.model) })
    }

    #[test]
    fn test_port_config_defaults() {
        let config: PortConfig = serde_json::from_value(json!({"consumesEvent": "a"})).unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.retry_timeout, DEFAULT_RETRY_TIMEOUT_SECS);
        assert_eq!(config.consumes_event.as_deref(), Some("a"));
        assert!(!config.is_misconfigured());
        assert_eq!(config.timeout_duration(), Some(Duration::from_secs(60)));

        let no_timer = PortConfig::new().timeout_secs(0);
        assert_eq!(no_timer.timeout_duration(), None);

        let bad = PortConfig::new().timeout_secs(10).retry_timeout_secs(5);
        assert!(bad.is_misconfigured());
    }

    #[test]
    fn test_builder_normalizes_and_keeps_first_port() {
        let spec = ModelSpecification::builder("order")
            .port("reserve", PortConfig::new().timeout_secs(5))
            .port("reserve", PortConfig::new().timeout_secs(99))
            .adapter("reserve", noop())
            .build()
            .unwrap();

        assert_eq!(spec.model_name(), "ORDER");
        assert_eq!(spec.ports().len(), 1);
        assert_eq!(spec.port("reserve").unwrap().timeout, 5);
    }

    #[test]
    fn test_builder_rejects_dangling_command() {
        let result = ModelSpecification::builder("order")
            .command("ship", CommandSpec::port("ship").with_acl(["write"]))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_default_field_factory() {
        let spec = ModelSpecification::builder("order").build().unwrap();
        let fields = spec.fields_from(json!({"qty": 1})).unwrap();
        assert_eq!(fields.get("qty"), Some(&json!(1)));
        assert!(spec.fields_from(json!(5)).is_err());
    }
}
