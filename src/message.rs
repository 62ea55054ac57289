use std::collections::HashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The value carried from a source to its sinks.
///
/// The payload is opaque to the engine: linked nodes agree on its shape by
/// convention and a handler that gets something it did not expect returns
/// an error instead of panicking.
#[derive(Debug, Clone, JsonSchema, Serialize, Deserialize, PartialEq)]
pub struct Message {
    id: String,
    payload: Value,
    metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.payload.as_bool()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Metadata set by the engine, e.g. the cause of an error record.
    pub fn get(&self, name: &str) -> Option<&String> {
        self.metadata.get(name)
    }

    pub fn add(&mut self, name: String, value: String) {
        self.metadata.insert(name, value);
    }
}

impl From<bool> for Message {
    fn from(value: bool) -> Self {
        Message::new(value)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::new(value)
    }
}
