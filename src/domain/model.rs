//! Model instances
//!
//! A model is an immutable value: every change produces a new `Model`.
//! Models created through the registry carry a runtime binding to their
//! specification, event bus, repository and bound ports. The binding is
//! never serialized.

use crate::bus::{EventBus, Signal};
use crate::domain::ports::{Repository, RepositoryRef};
use crate::domain::spec::ModelSpecification;
use crate::engine::{compensation, CompensationReport, PortOutcome, PortTable};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::warn;
use uuid::Uuid;

/// Keys owned by the engine; domain changes may not overwrite them
pub const RESERVED_KEYS: [&str; 7] = [
    "id",
    "modelName",
    "createTime",
    "updateTime",
    "deletedTime",
    "portFlow",
    "workflowState",
];

/// Model identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a model is running forward or being compensated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    #[default]
    Normal,
    Compensating,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Normal => write!(f, "normal"),
            WorkflowState::Compensating => write!(f, "compensating"),
        }
    }
}

/// Runtime wiring of a model
pub(crate) struct ModelBinding {
    pub(crate) spec: Arc<ModelSpecification>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) repository: Weak<dyn Repository>,
    pub(crate) ports: Arc<PortTable>,
}

impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBinding")
            .field("spec", &self.spec.model_name())
            .field("bus", &self.bus.id())
            .field("ports", &self.ports.len())
            .finish()
    }
}

/// A domain model instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    id: ModelId,
    #[serde(default)]
    model_name: String,
    #[serde(default = "Utc::now")]
    create_time: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_time: Option<DateTime<Utc>>,
    #[serde(default)]
    port_flow: Vec<String>,
    #[serde(default)]
    workflow_state: WorkflowState,
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(skip)]
    binding: Option<Arc<ModelBinding>>,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.model_name == other.model_name
            && self.create_time == other.create_time
            && self.update_time == other.update_time
            && self.deleted_time == other.deleted_time
            && self.port_flow == other.port_flow
            && self.workflow_state == other.workflow_state
            && self.fields == other.fields
    }
}

impl Model {
    pub(crate) fn new(
        model_name: String,
        fields: Map<String, Value>,
        binding: Option<Arc<ModelBinding>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ModelId::generate(),
            model_name,
            create_time: now,
            update_time: now,
            deleted_time: None,
            port_flow: Vec::new(),
            workflow_state: WorkflowState::Normal,
            fields: strip_reserved(fields),
            binding,
        }
    }

    /// Deserialize an unbound model from its persisted document
    pub fn from_value(raw: Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// Serialize the model (without its binding)
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }

    pub fn deleted_time(&self) -> Option<DateTime<Utc>> {
        self.deleted_time
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_time.is_some()
    }

    /// Domain fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Ports completed so far, oldest first
    pub fn port_flow(&self) -> &[String] {
        &self.port_flow
    }

    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow_state
    }

    pub fn is_compensating(&self) -> bool {
        self.workflow_state == WorkflowState::Compensating
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn spec(&self) -> Option<&Arc<ModelSpecification>> {
        self.binding.as_ref().map(|b| &b.spec)
    }

    pub fn bus(&self) -> Option<&Arc<EventBus>> {
        self.binding.as_ref().map(|b| &b.bus)
    }

    /// Repository the model was created against, if still alive
    pub fn repository(&self) -> Option<RepositoryRef> {
        self.binding.as_ref().and_then(|b| b.repository.upgrade())
    }

    pub(crate) fn binding(&self) -> Result<&Arc<ModelBinding>> {
        self.binding.as_ref().ok_or_else(|| Error::UnboundModel {
            id: self.id.to_string(),
        })
    }

    // =========================================================================
    // Transformations
    // =========================================================================

    /// Merge `changes` into a new model value
    ///
    /// Reserved keys in `changes` are ignored.
    pub fn update(&self, changes: Map<String, Value>) -> Model {
        let mut next = self.clone();
        for (key, value) in strip_reserved(changes) {
            next.fields.insert(key, value);
        }
        next.update_time = Utc::now();
        next
    }

    /// Mark the model deleted
    pub fn delete(&self) -> Model {
        let mut next = self.clone();
        let now = Utc::now();
        next.deleted_time = Some(now);
        next.update_time = now;
        next
    }

    pub(crate) fn with_port_recorded(&self, port_name: &str) -> Model {
        let mut next = self.clone();
        next.port_flow.push(port_name.to_string());
        next
    }

    pub(crate) fn with_flow(&self, port_flow: Vec<String>) -> Model {
        let mut next = self.clone();
        next.port_flow = port_flow;
        next
    }

    pub(crate) fn with_state(&self, state: WorkflowState) -> Model {
        let mut next = self.clone();
        next.workflow_state = state;
        next
    }

    pub(crate) fn with_model_name(mut self, model_name: String) -> Model {
        self.model_name = model_name;
        self
    }

    pub(crate) fn bind(mut self, binding: Arc<ModelBinding>) -> Model {
        self.binding = Some(binding);
        self
    }

    /// Carry over `other`'s binding when this value has none
    pub(crate) fn rebind_from(mut self, other: &Model) -> Model {
        if self.binding.is_none() {
            self.binding = other.binding.clone();
        }
        self
    }

    // =========================================================================
    // Runtime
    // =========================================================================

    /// Invoke a bound port with `args`
    pub async fn invoke(&self, port_name: &str, args: Vec<Value>) -> Result<PortOutcome> {
        let binding = self.binding()?;
        let port = binding
            .ports
            .get(port_name)
            .cloned()
            .ok_or_else(|| Error::PortNotFound {
                model_name: self.model_name.clone(),
                port_name: port_name.to_string(),
            })?;
        Ok(port.invoke(self.clone(), args).await)
    }

    /// Undo completed ports in reverse order
    pub async fn compensate(&self) -> Result<CompensationReport> {
        compensation::compensate(self).await
    }

    /// Broadcast a signal on the model's event bus
    pub fn emit(&self, signal: Signal) {
        match &self.binding {
            Some(binding) => binding.bus.emit(signal),
            None => warn!(model = %self.model_name, id = %self.id, kind = signal.kind(), "signal dropped, model is unbound"),
        }
    }
}

fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        if fields.remove(key).is_some() {
            warn!(key, "ignoring reserved key in model fields");
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_update_returns_new_value() {
        let model = Model::new("ORDER".into(), fields(json!({"qty": 1})), None);
        let updated = model.update(fields(json!({"qty": 2, "id": "hijack"})));

        assert_eq!(model.get("qty"), Some(&json!(1)));
        assert_eq!(updated.get("qty"), Some(&json!(2)));
        assert_eq!(updated.id(), model.id());
        assert!(updated.update_time() >= model.update_time());
    }

    #[test]
    fn test_serialization_flattens_fields() {
        let model = Model::new("ORDER".into(), fields(json!({"qty": 3})), None)
            .with_port_recorded("reserve");
        let value = model.to_value().unwrap();

        assert_eq!(value["modelName"], json!("ORDER"));
        assert_eq!(value["qty"], json!(3));
        assert_eq!(value["portFlow"], json!(["reserve"]));
        assert_eq!(value["workflowState"], json!("normal"));
        assert!(value.get("deletedTime").is_none());

        let restored = Model::from_value(value).unwrap();
        assert_eq!(restored, model);
        assert!(!restored.is_bound());
    }

    #[test]
    fn test_delete_marks_time() {
        let model = Model::new("ORDER".into(), Map::new(), None);
        let deleted = model.delete();
        assert!(deleted.is_deleted());
        assert!(!model.is_deleted());
    }

    #[tokio::test]
    async fn test_unbound_invoke_fails() {
        let model = Model::new("ORDER".into(), Map::new(), None);
        let err = model.invoke("reserve", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::UnboundModel { .. }));
    }
}
