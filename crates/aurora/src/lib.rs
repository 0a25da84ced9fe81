pub mod config;
pub mod error;

pub mod tools;
pub mod trace;
pub mod runtime;
pub mod builtins;

pub use crate::config::{ContinuePolicy, EngineConfig};
pub use crate::error::{ConsistencyError, CoreError, CoreResult, ToolFault};
pub use crate::runtime::{
    ConversationRegistry, ConversationRuntime, DepthGuard, DepthState, EscalationDecision,
    ResultMapper, RoundOutcome, Scheduler,
};
pub use crate::tools::{
    CapabilityDescriptor, CapabilityRegistry, CapabilityRegistryBuilder, CompletedBatch,
    ExecutionBatch, InvocationMode, ToolCallOutput, ToolCallRequest, ToolResultEnvelope,
};
pub use crate::trace::{TraceSink, Tracer};
