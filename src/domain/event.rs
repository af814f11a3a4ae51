//! Domain events and event naming
//!
//! Event names are the concatenation of the upper-cased event type and the
//! upper-cased model name, e.g. `CREATEORDER`.

use crate::domain::model::{Model, ModelId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Prefix of inbound edit request events
pub const EDIT_REQUEST_PREFIX: &str = "EDITMODEL";

/// Normalize a model name: trimmed, non-empty, upper-cased
pub fn normalize_model_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("modelName missing or invalid".into()));
    }
    Ok(trimmed.to_uppercase())
}

/// Lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Create, EventType::Update, EventType::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CREATE" => Ok(EventType::Create),
            "UPDATE" => Ok(EventType::Update),
            "DELETE" => Ok(EventType::Delete),
            _ => Err(Error::InvalidArgument(format!(
                "eventType missing or invalid: {:?}",
                s
            ))),
        }
    }
}

/// Conversion accepted wherever an event type is expected
pub trait IntoEventType {
    fn into_event_type(self) -> Result<EventType>;
}

impl IntoEventType for EventType {
    fn into_event_type(self) -> Result<EventType> {
        Ok(self)
    }
}

impl IntoEventType for &str {
    fn into_event_type(self) -> Result<EventType> {
        self.parse()
    }
}

impl IntoEventType for &String {
    fn into_event_type(self) -> Result<EventType> {
        self.parse()
    }
}

impl IntoEventType for String {
    fn into_event_type(self) -> Result<EventType> {
        self.parse()
    }
}

/// Topic name on the event bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventName(String);

impl EventName {
    /// Use `name` verbatim, e.g. a port's `producesEvent`
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `TYPE` + `MODELNAME`
    pub fn for_model(event_type: EventType, model_name: &str) -> Result<Self> {
        Ok(Self(format!(
            "{}{}",
            event_type,
            normalize_model_name(model_name)?
        )))
    }

    /// `EDITMODEL` + `MODELNAME`
    pub fn edit_request(model_name: &str) -> Result<Self> {
        Ok(Self(format!(
            "{}{}",
            EDIT_REQUEST_PREFIX,
            normalize_model_name(model_name)?
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Arguments handed to an event factory
#[derive(Debug, Clone, Default)]
pub struct EventArgs {
    /// Model the event is about, if any
    pub model: Option<Model>,
    /// Additional event data, e.g. `{"changes": {...}}`
    pub data: Value,
}

impl EventArgs {
    pub fn new(model: Option<Model>, data: Value) -> Self {
        Self { model, data }
    }

    pub fn for_model(model: Model) -> Self {
        Self {
            model: Some(model),
            data: Value::Null,
        }
    }
}

/// Builds the payload of an event from its arguments
pub type EventFactory = Arc<dyn Fn(&EventArgs) -> Result<Value> + Send + Sync>;

/// Factory embedding the serialized model and the event data
pub fn passthrough_factory() -> EventFactory {
    Arc::new(|args: &EventArgs| {
        let model = match &args.model {
            Some(model) => serde_json::to_value(model)?,
            None => Value::Null,
        };
        Ok(json!({ "model": model, "data": args.data }))
    })
}

/// An instance of a lifecycle event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub model_name: String,
    pub event_name: EventName,
    pub payload: Value,
    /// Live model the event refers to; carried in-process only
    #[serde(skip)]
    pub model: Option<Model>,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent {
    pub(crate) fn new(
        event_type: EventType,
        model_name: &str,
        payload: Value,
        model: Option<Model>,
    ) -> Result<Self> {
        let model_name = normalize_model_name(model_name)?;
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            event_name: EventName::for_model(event_type, &model_name)?,
            model_name,
            payload,
            model,
            created_at: Utc::now(),
        })
    }
}

/// Inbound request to edit a persisted model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub id: ModelId,
    #[serde(default)]
    pub changes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        assert_eq!("create".parse::<EventType>().unwrap(), EventType::Create);
        assert_eq!(" Update ".parse::<EventType>().unwrap(), EventType::Update);
        assert!("upsert".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_name() {
        let name = EventName::for_model(EventType::Update, "order").unwrap();
        assert_eq!(name.as_str(), "UPDATEORDER");

        let edit = EventName::edit_request("Order").unwrap();
        assert_eq!(edit.to_string(), "EDITMODELORDER");

        assert!(EventName::for_model(EventType::Create, "  ").is_err());
    }

    #[test]
    fn test_domain_event_naming() {
        let event = DomainEvent::new(EventType::Delete, "invoice", json!({}), None).unwrap();
        assert_eq!(event.model_name, "INVOICE");
        assert_eq!(event.event_name.as_str(), "DELETEINVOICE");
    }

    #[test]
    fn test_edit_request_deserialize() {
        let req: EditRequest =
            serde_json::from_value(json!({"id": "42", "changes": {"qty": 2}})).unwrap();
        assert_eq!(req.id.as_str(), "42");
        assert!(req.command.is_none());
        assert_eq!(req.changes.get("qty"), Some(&json!(2)));
    }
}
