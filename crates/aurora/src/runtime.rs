//! Batch execution, result reassembly, and per-conversation depth control.

pub mod conversation;
pub mod depth;
pub mod mapper;
pub mod registry;
pub mod scheduler;

pub use conversation::{ConversationRuntime, RoundOutcome};
pub use depth::{DepthGuard, DepthSnapshot, DepthState, EscalationDecision};
pub use mapper::ResultMapper;
pub use registry::{ConversationHandle, ConversationRegistry};
pub use scheduler::Scheduler;
