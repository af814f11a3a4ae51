//! Serializer hooks
//!
//! Rules rewrite JSON values on their way to and from persistence. A rule
//! matches on the phase, the key (exact, glob or predicate) and the value
//! kind (or a predicate). The first matching rule wins.
//!
//! Serialization walks the tree top-down, so a rule sees the original value
//! and its output is then walked. Deserialization walks bottom-up, so a rule
//! sees children that were already revived. The root document itself is
//! never rewritten.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// When a rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Serialize,
    Deserialize,
}

/// JSON value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

pub type Predicate = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;
pub type Transform = Arc<dyn Fn(&str, Value) -> Value + Send + Sync>;

/// Key selector of a rule
#[derive(Clone)]
pub enum KeyMatch {
    Any,
    Exact(String),
    Glob(glob::Pattern),
    Predicate(Predicate),
}

impl KeyMatch {
    pub fn exact(key: impl Into<String>) -> Self {
        KeyMatch::Exact(key.into())
    }

    pub fn glob(pattern: &str) -> Result<Self> {
        Ok(KeyMatch::Glob(glob::Pattern::new(pattern)?))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        KeyMatch::Predicate(Arc::new(f))
    }

    fn matches(&self, key: &str, value: &Value) -> bool {
        match self {
            KeyMatch::Any => true,
            KeyMatch::Exact(expected) => expected == key,
            KeyMatch::Glob(pattern) => pattern.matches(key),
            KeyMatch::Predicate(f) => f(key, value),
        }
    }
}

impl fmt::Debug for KeyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatch::Any => write!(f, "Any"),
            KeyMatch::Exact(key) => write!(f, "Exact({:?})", key),
            KeyMatch::Glob(pattern) => write!(f, "Glob({:?})", pattern.as_str()),
            KeyMatch::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

/// Value selector of a rule
#[derive(Clone)]
pub enum TypeMatch {
    Kind(ValueKind),
    Predicate(Predicate),
}

impl TypeMatch {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        TypeMatch::Predicate(Arc::new(f))
    }

    fn matches(&self, key: &str, value: &Value) -> bool {
        match self {
            TypeMatch::Kind(kind) => ValueKind::of(value) == *kind,
            TypeMatch::Predicate(f) => f(key, value),
        }
    }
}

impl fmt::Debug for TypeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeMatch::Kind(kind) => write!(f, "Kind({:?})", kind),
            TypeMatch::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

/// A rewrite rule
#[derive(Clone)]
pub struct SerializerRule {
    pub on: Phase,
    pub key: KeyMatch,
    pub value_type: TypeMatch,
    pub transform: Transform,
}

impl SerializerRule {
    pub fn new<F>(on: Phase, key: KeyMatch, value_type: TypeMatch, transform: F) -> Self
    where
        F: Fn(&str, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            on,
            key,
            value_type,
            transform: Arc::new(transform),
        }
    }

    fn applies(&self, key: &str, value: &Value) -> bool {
        self.key.matches(key, value) && self.value_type.matches(key, value)
    }
}

impl fmt::Debug for SerializerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRule")
            .field("on", &self.on)
            .field("key", &self.key)
            .field("value_type", &self.value_type)
            .finish()
    }
}

/// Ordered rule set
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    serialize: Vec<SerializerRule>,
    deserialize: Vec<SerializerRule>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: SerializerRule) {
        match rule.on {
            Phase::Serialize => self.serialize.push(rule),
            Phase::Deserialize => self.deserialize.push(rule),
        }
    }

    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = SerializerRule>) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    pub fn len(&self) -> usize {
        self.serialize.len() + self.deserialize.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite a single value for persistence
    pub fn serialize(&self, key: &str, value: Value) -> Value {
        apply(&self.serialize, key, value)
    }

    /// Rewrite a single persisted value
    pub fn deserialize(&self, key: &str, value: Value) -> Value {
        apply(&self.deserialize, key, value)
    }

    /// Rewrite every nested value of `document`, top-down
    pub fn serialize_tree(&self, document: Value) -> Value {
        if self.serialize.is_empty() {
            return document;
        }
        map_children(document, &mut |key, value| {
            let value = self.serialize(key, value);
            self.serialize_tree(value)
        })
    }

    /// Revive every nested value of `document`, bottom-up
    pub fn deserialize_tree(&self, document: Value) -> Value {
        if self.deserialize.is_empty() {
            return document;
        }
        map_children(document, &mut |key, value| {
            let value = self.deserialize_tree(value);
            self.deserialize(key, value)
        })
    }

    /// Rules storing non-empty objects under matching keys as `[key, value]`
    /// pair lists, and reviving such lists into objects
    pub fn map_rules(key: KeyMatch) -> [SerializerRule; 2] {
        [
            SerializerRule::new(
                Phase::Serialize,
                key.clone(),
                TypeMatch::predicate(|_, value| value.as_object().is_some_and(|m| !m.is_empty())),
                |_, value| match value {
                    Value::Object(map) => Value::Array(
                        map.into_iter()
                            .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                            .collect(),
                    ),
                    other => other,
                },
            ),
            SerializerRule::new(
                Phase::Deserialize,
                key,
                TypeMatch::predicate(|_, value| is_entry_list(value)),
                |_, value| match value {
                    Value::Array(items) => Value::Object(
                        items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::Array(mut pair) if pair.len() == 2 => {
                                    let v = pair.pop()?;
                                    match pair.pop()? {
                                        Value::String(k) => Some((k, v)),
                                        _ => None,
                                    }
                                }
                                _ => None,
                            })
                            .collect::<Map<String, Value>>(),
                    ),
                    other => other,
                },
            ),
        ]
    }
}

fn apply(rules: &[SerializerRule], key: &str, value: Value) -> Value {
    match rules.iter().find(|rule| rule.applies(key, &value)) {
        Some(rule) => (rule.transform)(key, value),
        None => value,
    }
}

fn map_children(value: Value, f: &mut dyn FnMut(&str, Value) -> Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, child)| {
                    let child = f(&key, child);
                    (key, child)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, child)| f(&index.to_string(), child))
                .collect(),
        ),
        other => other,
    }
}

fn is_entry_list(value: &Value) -> bool {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().all(|item| {
            matches!(item, Value::Array(pair) if pair.len() == 2 && pair[0].is_string())
        }),
        _ => false,
    }
}
