use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::tools::envelope::panic_message;

use super::{TraceError, TracePayload, Tracer};

/// Fault-isolating front for a [`Tracer`].
///
/// Errors and panics raised by the tracer are logged and dropped; scheduling
/// outcomes never depend on them.
#[derive(Clone)]
pub struct TraceSink {
    tracer: Arc<dyn Tracer>,
}

impl TraceSink {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopTracer))
    }

    pub fn emit(&self, event: &str, payload: TracePayload) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.tracer.log(event, &payload)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!("tracer failed to record {}: {}", event, error);
            }
            Err(panic) => {
                tracing::warn!(
                    "tracer panicked while recording {}: {}",
                    event,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("TraceSink").finish_non_exhaustive()
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn log(&self, _event: &str, _payload: &TracePayload) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Forwards events to the `tracing` subscriber installed by the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn log(&self, event: &str, payload: &TracePayload) -> Result<(), TraceError> {
        let payload = Value::Object(payload.clone());
        tracing::info!(target: "aurora::trace", trace_event = event, payload = %payload);
        Ok(())
    }
}
