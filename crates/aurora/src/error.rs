use std::path::PathBuf;

/// Faults raised while scheduling a single tool call.
///
/// Every variant is recovered locally: the scheduler turns it into a failed
/// envelope for the affected request and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolFault {
    /// Unknown operation or arguments that do not match the declared schema.
    #[error("invalid_call:{0}")]
    Validation(String),

    /// The handler returned an error or panicked.
    #[error("{0}")]
    Execution(String),

    /// The batch deadline elapsed before the call finished.
    #[error("timeout")]
    Timeout,

    /// The standalone entry was used while a driver was already active.
    #[error("reentrant_scheduling:{0}")]
    ReentrantScheduling(String),
}

impl ToolFault {
    /// Short, stable name used in trace payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolFault::Validation(_) => "validation",
            ToolFault::Execution(_) => "execution",
            ToolFault::Timeout => "timeout",
            ToolFault::ReentrantScheduling(_) => "reentrant_scheduling",
        }
    }
}

/// Internal-consistency faults detected while reassembling a batch.
///
/// These indicate a scheduler defect rather than a tool failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("duplicate result for call_id '{0}'")]
    DuplicateCallId(String),

    #[error("missing result for call_id '{0}'")]
    MissingCallId(String),

    #[error("result for unknown call_id '{0}'")]
    UnknownCallId(String),
}

/// Unified error type for the aurora crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Result reassembly found a duplicate, missing, or foreign call id.
    #[error("consistency fault: {0}")]
    Consistency(#[from] ConsistencyError),

    /// A batch could not be constructed from the given requests.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Two capabilities were registered under the same operation name.
    #[error("duplicate capability: {0}")]
    DuplicateCapability(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
