//! Capability registry, result envelopes, and batch types.

pub mod envelope;
pub mod invocation;
pub mod registry;
pub mod request;
pub mod schema;

pub use envelope::{normalize, normalize_value, ToolResultEnvelope};
pub use invocation::{InvocationRecord, InvocationStatus};
pub use registry::{CapabilityRegistry, CapabilityRegistryBuilder};
pub use request::{CompletedBatch, ExecutionBatch, ToolCallOutput, ToolCallRequest, ToolCallResult};
pub use schema::{
    boxed_handler_future, validate_schema, Arguments, BlockingHandler, CapabilityDescriptor,
    CapabilityHandler, HandlerError, HandlerFuture, HandlerResult, InvocationMode,
    SuspendableHandler,
};
