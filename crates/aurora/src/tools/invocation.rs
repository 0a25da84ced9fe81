//! Invocation records capturing per-call timing and status.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::schema::InvocationMode;

/// Status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// The handler returned a successful envelope.
    Success,
    /// The handler failed, panicked, or returned a failed envelope.
    Failed,
    /// The batch deadline elapsed first.
    TimedOut,
    /// The call never reached a handler (unknown operation, bad arguments, refused scheduling).
    Rejected,
}

/// Record of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub call_id: String,
    pub operation_name: String,
    /// Lane the call ran in; `None` when it was rejected before a lane was chosen.
    pub mode: Option<InvocationMode>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub duration_ms: u64,
    pub status: InvocationStatus,
    pub error: Option<String>,
}

impl InvocationRecord {
    /// Computes `duration_ms` from the difference between `ended_at` and `started_at`.
    pub fn new(
        call_id: impl Into<String>,
        operation_name: impl Into<String>,
        mode: Option<InvocationMode>,
        started_at: SystemTime,
        ended_at: SystemTime,
        status: InvocationStatus,
    ) -> Self {
        let duration_ms = ended_at
            .duration_since(started_at)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            call_id: call_id.into(),
            operation_name: operation_name.into(),
            mode,
            started_at,
            ended_at,
            duration_ms,
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
