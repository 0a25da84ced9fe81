//! Uniform result envelope and the normalizer that produces it.

use std::any::Any;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ToolFault;

use super::schema::HandlerResult;

const FALLBACK_ERROR: &str = "tool failed without an error message";
const ENVELOPE_KEYS: [&str; 4] = ["success", "data", "error", "meta"];

/// `{success, data | error, meta?}`.
///
/// `data` is present iff `success`, `error` is present iff not. The fields are
/// private so that the only way to build one is through [`ToolResultEnvelope::ok`],
/// [`ToolResultEnvelope::failure`], or parsing an already-shaped value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultEnvelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl ToolResultEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    /// Failed envelope. An empty message is replaced so `error` is never blank.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            FALLBACK_ERROR.to_string()
        } else {
            error
        };
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        self.meta.as_ref()
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("success".to_string(), Value::Bool(self.success));
        if let Some(data) = &self.data {
            object.insert("data".to_string(), data.clone());
        }
        if let Some(error) = &self.error {
            object.insert("error".to_string(), Value::String(error.clone()));
        }
        if let Some(meta) = &self.meta {
            object.insert("meta".to_string(), Value::Object(meta.clone()));
        }
        Value::Object(object)
    }

    /// Stable, parseable serialization used as the downstream `content`.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|error| {
            format!(r#"{{"success":false,"error":"failed to serialize envelope: {error}"}}"#)
        })
    }

    /// Read a value that is already shaped like an envelope.
    ///
    /// The value must be an object whose keys are drawn from
    /// `success`/`data`/`error`/`meta`, with a boolean `success`, a string `error` on
    /// failure and no `error` on success. A successful envelope without `data` reads
    /// as `data: null`.
    pub fn from_shaped(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object
            .keys()
            .any(|key| !ENVELOPE_KEYS.contains(&key.as_str()))
        {
            return None;
        }
        let success = object.get("success")?.as_bool()?;
        let meta = match object.get("meta") {
            None => None,
            Some(Value::Object(meta)) => Some(meta.clone()),
            Some(_) => return None,
        };
        let envelope = if success {
            if object.contains_key("error") {
                return None;
            }
            Self::ok(object.get("data").cloned().unwrap_or(Value::Null))
        } else {
            if object.contains_key("data") {
                return None;
            }
            Self::failure(object.get("error")?.as_str()?)
        };
        Some(Self { meta, ..envelope })
    }
}

impl TryFrom<Value> for ToolResultEnvelope {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_shaped(&value).ok_or_else(|| "value is not a tool result envelope".to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ToolResultEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<ToolFault> for ToolResultEnvelope {
    fn from(fault: ToolFault) -> Self {
        Self::failure(fault.to_string())
    }
}

/// Convert a raw handler outcome into an envelope.
///
/// Values that already look like an envelope pass through unchanged, so
/// normalizing twice never double-wraps.
pub fn normalize(outcome: HandlerResult) -> ToolResultEnvelope {
    match outcome {
        Ok(value) => normalize_value(value),
        Err(error) => ToolResultEnvelope::failure(error.to_string()),
    }
}

pub fn normalize_value(value: Value) -> ToolResultEnvelope {
    ToolResultEnvelope::from_shaped(&value).unwrap_or_else(|| ToolResultEnvelope::ok(value))
}

/// Human-readable text for a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("handler panicked: {detail}")
}
