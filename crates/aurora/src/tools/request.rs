//! Batch input and output types exchanged with the reasoning layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::envelope::ToolResultEnvelope;
use super::invocation::InvocationRecord;

/// One requested operation, created by the upstream reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub operation_name: String,
    /// Raw arguments; validated into an ordered map before the handler sees them.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        operation_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            operation_name: operation_name.into(),
            arguments,
        }
    }
}

/// Tool call as emitted by a chat model: `{id, name, args}`.
///
/// `args` may be an object or a JSON-encoded string; a string that does not parse
/// is kept verbatim so that validation reports it against the operation.
#[derive(Debug, Clone, Deserialize)]
struct RawToolCall {
    id: String,
    name: String,
    #[serde(default, alias = "arguments")]
    args: Value,
}

impl From<RawToolCall> for ToolCallRequest {
    fn from(raw: RawToolCall) -> Self {
        let arguments = match raw.args {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        };
        ToolCallRequest::new(raw.id, raw.name, arguments)
    }
}

/// Ordered requests with unique, non-empty call ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionBatch {
    requests: Vec<ToolCallRequest>,
}

impl ExecutionBatch {
    pub fn new(requests: Vec<ToolCallRequest>) -> CoreResult<Self> {
        let mut seen = HashSet::with_capacity(requests.len());
        for request in &requests {
            if request.call_id.is_empty() {
                return Err(CoreError::InvalidBatch(format!(
                    "empty call_id for operation '{}'",
                    request.operation_name
                )));
            }
            if !seen.insert(request.call_id.as_str()) {
                return Err(CoreError::InvalidBatch(format!(
                    "duplicate call_id '{}'",
                    request.call_id
                )));
            }
        }
        Ok(Self { requests })
    }

    /// Parse the upstream tool call list (`[{id, name, args}]`).
    pub fn from_json(value: Value) -> CoreResult<Self> {
        let raw: Vec<RawToolCall> = serde_json::from_value(value)
            .map_err(|error| CoreError::InvalidBatch(format!("malformed tool calls: {error}")))?;
        Self::new(raw.into_iter().map(ToolCallRequest::from).collect())
    }

    pub fn requests(&self) -> &[ToolCallRequest] {
        &self.requests
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.requests
            .iter()
            .map(|request| request.call_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn into_requests(self) -> Vec<ToolCallRequest> {
        self.requests
    }
}

/// A request paired with its envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub request: ToolCallRequest,
    pub envelope: ToolResultEnvelope,
}

/// Downstream item: the call id and the serialized envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub call_id: String,
    pub content: String,
}

/// An executed batch, in submission order.
#[derive(Debug, Clone, Default)]
pub struct CompletedBatch {
    pub results: Vec<ToolCallResult>,
    /// One record per executed call, in completion-independent submission order.
    pub invocations: Vec<InvocationRecord>,
}

impl CompletedBatch {
    pub fn envelopes(&self) -> Vec<&ToolResultEnvelope> {
        self.results.iter().map(|result| &result.envelope).collect()
    }

    pub fn call_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .map(|result| result.request.call_id.as_str())
            .collect()
    }

    pub fn outputs(&self) -> Vec<ToolCallOutput> {
        self.results
            .iter()
            .map(|result| ToolCallOutput {
                call_id: result.request.call_id.clone(),
                content: result.envelope.to_content(),
            })
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| !result.envelope.is_success())
            .count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
