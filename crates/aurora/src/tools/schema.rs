//! Capability descriptors, handler types, and argument schema validation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolFault;

/// Ordered argument mapping handed to a handler.
pub type Arguments = Map<String, Value>;

/// Error raised by a handler. Anything that implements `std::error::Error` converts into it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raw outcome of a handler invocation, before normalization.
pub type HandlerResult = Result<Value, HandlerError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Handler that runs to completion on the calling thread.
pub type BlockingHandler = Arc<dyn Fn(Arguments) -> HandlerResult + Send + Sync>;

/// Handler that may suspend; only ever polled inside the concurrent lane.
pub type SuspendableHandler = Arc<dyn Fn(Arguments) -> HandlerFuture + Send + Sync>;

pub fn boxed_handler_future<F>(future: F) -> HandlerFuture
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Box::pin(future)
}

/// How a capability is invoked, declared once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    Blocking,
    Suspendable,
}

impl InvocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationMode::Blocking => "blocking",
            InvocationMode::Suspendable => "suspendable",
        }
    }
}

/// The callable half of a descriptor. The variant is the declared invocation mode.
#[derive(Clone)]
pub enum CapabilityHandler {
    Blocking(BlockingHandler),
    Suspendable(SuspendableHandler),
}

impl CapabilityHandler {
    pub fn mode(&self) -> InvocationMode {
        match self {
            CapabilityHandler::Blocking(_) => InvocationMode::Blocking,
            CapabilityHandler::Suspendable(_) => InvocationMode::Suspendable,
        }
    }
}

/// Registry entry declaring an operation's name, invocation mode, and handler.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// Unique operation name.
    pub operation_name: String,
    /// Human-readable description surfaced to the reasoning layer.
    pub description: Option<String>,
    /// JSON Schema for validating input arguments. `{}` accepts any object.
    pub input_schema: Value,
    pub handler: CapabilityHandler,
}

impl CapabilityDescriptor {
    /// Declare a blocking capability.
    pub fn blocking<F>(operation_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            operation_name: operation_name.into(),
            description: None,
            input_schema: Value::Object(Map::new()),
            handler: CapabilityHandler::Blocking(Arc::new(handler)),
        }
    }

    /// Declare a suspendable capability.
    pub fn suspendable<F, Fut>(operation_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: SuspendableHandler =
            Arc::new(move |arguments| boxed_handler_future(handler(arguments)));
        Self {
            operation_name: operation_name.into(),
            description: None,
            input_schema: Value::Object(Map::new()),
            handler: CapabilityHandler::Suspendable(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn invocation_mode(&self) -> InvocationMode {
        self.handler.mode()
    }

    /// Check raw arguments against the declared schema and return the argument map.
    ///
    /// `null` is read as an empty object; any other non-object value is rejected.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<Arguments, ToolFault> {
        let empty = Value::Object(Map::new());
        let candidate = match arguments {
            Value::Null => &empty,
            Value::Object(_) => arguments,
            other => {
                return Err(ToolFault::Validation(format!(
                    "arguments for '{}' must be an object, got {}",
                    self.operation_name,
                    json_type_name(other)
                )));
            }
        };
        validate_schema(candidate, &self.input_schema).map_err(|detail| {
            ToolFault::Validation(format!("{}: {detail}", self.operation_name))
        })?;
        Ok(candidate.as_object().cloned().unwrap_or_default())
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CapabilityDescriptor")
            .field("operation_name", &self.operation_name)
            .field("invocation_mode", &self.invocation_mode())
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Validate a JSON value against a minimal JSON Schema subset.
///
/// Supports: `type`, `required`, `properties` (recursive).
/// An empty schema `{}` passes anything.
pub fn validate_schema(value: &Value, schema: &Value) -> Result<(), String> {
    let schema_obj = match schema.as_object() {
        Some(obj) => obj,
        None => return Ok(()),
    };

    if schema_obj.is_empty() {
        return Ok(());
    }

    if let Some(type_val) = schema_obj.get("type") {
        let type_str = type_val
            .as_str()
            .ok_or_else(|| "schema 'type' must be a string".to_string())?;

        let matches = match type_str {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            other => return Err(format!("unknown schema type: {other}")),
        };

        if !matches {
            return Err(format!(
                "expected type '{type_str}', got {}",
                json_type_name(value)
            ));
        }
    }

    if let (Some(required), Some(obj)) = (
        schema_obj.get("required").and_then(Value::as_array),
        value.as_object(),
    ) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(format!("missing required field: '{key}'"));
            }
        }
    }

    if let (Some(props_obj), Some(val_obj)) = (
        schema_obj.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        for (key, prop_schema) in props_obj {
            if let Some(prop_value) = val_obj.get(key) {
                validate_schema(prop_value, prop_schema)
                    .map_err(|detail| format!("field '{key}': {detail}"))?;
            }
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
