//! Structured tracing of scheduling events.
//!
//! The scheduler reports through a [`TraceSink`], which owns no tracing logic of
//! its own: it forwards to a [`Tracer`] collaborator and contains whatever the
//! collaborator does wrong.

pub mod jsonl;
pub mod memory;
pub mod sink;

use serde_json::{Map, Value};

pub use jsonl::JsonLinesTracer;
pub use memory::{MemoryTracer, TraceRecord};
pub use sink::{LogTracer, NoopTracer, TraceSink};

pub type TracePayload = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tracer unavailable: {0}")]
    Unavailable(String),
}

/// Receiver of structured start/end/error events.
pub trait Tracer: Send + Sync {
    fn log(&self, event: &str, payload: &TracePayload) -> Result<(), TraceError>;
}

/// Event names emitted by the runtime.
pub mod events {
    pub const BATCH_START: &str = "batch_start";
    pub const BATCH_END: &str = "batch_end";
    pub const TOOL_CALL_START: &str = "tool_call_start";
    pub const TOOL_CALL_END: &str = "tool_call_end";
    pub const TOOL_CALL_ERROR: &str = "tool_call_error";
    pub const TOOL_CALL_MISSING: &str = "tool_call_missing";
    pub const TOOL_CALL_TIMEOUT: &str = "tool_call_timeout";
    pub const SCHEDULING_REFUSED: &str = "scheduling_refused";
    pub const DEPTH_CEILING_REACHED: &str = "depth_ceiling_reached";
    pub const DEPTH_DECISION: &str = "depth_decision";
}

/// Build a payload from a `json!` object literal. Non-objects yield an empty payload.
pub fn payload(value: Value) -> TracePayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
