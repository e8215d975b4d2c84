use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// `module` value carrying event notifications
pub const MESSAGE_MODULE: &str = "message";

/// Event name for a newly created user
pub const USER_CREATED_EVENT: &str = "user.created";

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "module")]
pub enum OutboundMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Outer wrapper of every inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

impl InboundEnvelope {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AppError::MalformedMessage(format!("invalid envelope: {}", e)))
    }

    pub fn is_message(&self) -> bool {
        self.module.as_deref() == Some(MESSAGE_MODULE)
    }

    /// Decode `content`, which arrives either as a JSON-encoded string or as
    /// an object.
    pub fn event_content(&self) -> Result<EventContent> {
        match &self.content {
            Some(Value::String(encoded)) => {
                let inner: Value = serde_json::from_str(encoded)
                    .map_err(|e| AppError::MalformedMessage(format!("invalid content: {}", e)))?;
                EventContent::from_value(inner)
            }
            Some(value @ Value::Object(_)) => EventContent::from_value(value.clone()),
            Some(other) => Err(AppError::MalformedMessage(format!(
                "content must be an object or a JSON string, got {}",
                json_type(other)
            ))),
            None => Err(AppError::MalformedMessage("content missing".to_string())),
        }
    }
}

/// Event notification carried in a `message` envelope.
///
/// Only `event` is interpreted; `event_ts` and `payload` are kept as sent.
#[derive(Debug, Clone, Serialize)]
pub struct EventContent {
    pub event: Option<String>,
    pub event_ts: Value,
    pub payload: Value,
}

impl EventContent {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(AppError::MalformedMessage(format!(
                    "content must decode to an object, got {}",
                    json_type(&other)
                )))
            }
        };

        Ok(Self {
            event: fields.get("event").and_then(Value::as_str).map(str::to_owned),
            event_ts: fields.remove("event_ts").unwrap_or(Value::Null),
            payload: fields.remove("payload").unwrap_or(Value::Null),
        })
    }

    pub fn is_user_created(&self) -> bool {
        self.event.as_deref() == Some(USER_CREATED_EVENT)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
