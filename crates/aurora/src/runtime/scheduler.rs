//! Execution scheduler: one blocking lane, one concurrent join lane.
//!
//! A batch is partitioned by declared invocation mode. Blocking calls run one
//! after another on the calling thread, in submission order. Suspendable calls
//! are then launched together and joined at a single `join_all`; each one is
//! isolated, so a failure or panic in one never cancels the others. Every
//! outcome goes through the envelope normalizer and the result mapper restores
//! submission order before anything is returned.
//!
//! There is one join routine and two ways in:
//!
//! - [`Scheduler::execute`] for callers that are already inside a Tokio runtime;
//! - [`Scheduler::execute_blocking`] for synchronous callers. It is the only path
//!   that starts a driver, and it refuses to do so when a runtime context is
//!   already present on the thread, reporting a `reentrant_scheduling` envelope
//!   per request instead of nesting.
//!
//! Blocking-lane calls cannot be cancelled once started. A batch deadline only
//! stops calls that have not started yet; suspendable calls already running are
//! dropped at their next suspension point.
//!
//! The concurrency limit applies to the outermost join only. A suspendable
//! handler that awaits [`Scheduler::execute`] already holds a permit, so the
//! nested join runs its units without taking more.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::{EngineConfig, DEFAULT_MAX_CONCURRENT_TOOLS};
use crate::error::{CoreResult, ToolFault};
use crate::tools::envelope::{normalize, panic_message};
use crate::tools::{
    Arguments, BlockingHandler, CapabilityHandler, CapabilityRegistry, CompletedBatch,
    ExecutionBatch, InvocationMode, InvocationRecord, InvocationStatus, SuspendableHandler,
    ToolCallRequest, ToolCallResult, ToolResultEnvelope,
};
use crate::trace::{events, payload, TraceSink};

use super::mapper::ResultMapper;

tokio::task_local! {
    static JOIN_LANE: ();
}

/// How a standalone run ended: scheduled on a fresh driver, or refused before any work.
#[derive(Debug)]
pub(crate) enum StandaloneRun {
    Scheduled(CoreResult<CompletedBatch>),
    Refused(CoreResult<CompletedBatch>),
}

#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<CapabilityRegistry>,
    trace: TraceSink,
    batch_timeout: Option<Duration>,
    permits: Arc<Semaphore>,
}

struct PendingCall<'a, H> {
    request: &'a ToolCallRequest,
    arguments: Arguments,
    handler: H,
}

struct CallOutcome {
    call_id: String,
    envelope: ToolResultEnvelope,
    record: InvocationRecord,
}

impl Scheduler {
    pub fn new(registry: Arc<CapabilityRegistry>, trace: TraceSink) -> Self {
        Self {
            registry,
            trace,
            batch_timeout: None,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_TOOLS)),
        }
    }

    pub fn from_config(registry: Arc<CapabilityRegistry>, config: &EngineConfig) -> Self {
        Self::new(registry, TraceSink::new(config.tracer()))
            .with_batch_timeout(config.batch_timeout())
            .with_max_concurrent_tools(config.max_concurrent_tools)
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Option<Duration>) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    /// Bound on suspendable calls in flight at once. Zero is treated as one.
    pub fn with_max_concurrent_tools(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn trace(&self) -> &TraceSink {
        &self.trace
    }

    /// Suspendable entry: run the batch on the caller's runtime.
    ///
    /// Never creates a driver of its own. Must be awaited inside a Tokio runtime
    /// when a batch timeout is configured.
    pub async fn execute(&self, batch: &ExecutionBatch) -> CoreResult<CompletedBatch> {
        self.join(batch).await
    }

    /// Standalone entry: start a current-thread driver and run the batch on it.
    ///
    /// Refused with a `reentrant_scheduling` envelope per request when a runtime
    /// context is already active on this thread.
    pub fn execute_blocking(&self, batch: &ExecutionBatch) -> CoreResult<CompletedBatch> {
        match self.run_standalone(batch) {
            StandaloneRun::Scheduled(completed) | StandaloneRun::Refused(completed) => completed,
        }
    }

    pub(crate) fn run_standalone(&self, batch: &ExecutionBatch) -> StandaloneRun {
        if Handle::try_current().is_ok() {
            return StandaloneRun::Refused(self.refuse(
                batch,
                ToolFault::ReentrantScheduling(
                    "a concurrency driver is already active on this thread; await Scheduler::execute instead"
                        .to_string(),
                ),
            ));
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(error) => {
                return StandaloneRun::Refused(self.refuse(
                    batch,
                    ToolFault::Execution(format!("failed to start scheduling driver: {error}")),
                ));
            }
        };
        StandaloneRun::Scheduled(runtime.block_on(self.join(batch)))
    }

    async fn join(&self, batch: &ExecutionBatch) -> CoreResult<CompletedBatch> {
        let clock = Instant::now();
        let deadline = self.batch_timeout.map(|timeout| clock + timeout);
        self.trace
            .emit(events::BATCH_START, payload(json!({ "size": batch.len() })));

        let mut outcomes = Vec::with_capacity(batch.len());
        let mut blocking = Vec::new();
        let mut suspendable = Vec::new();

        for request in batch.requests() {
            self.trace_start(request);
            let descriptor = match self.registry.lookup(&request.operation_name) {
                Ok(descriptor) => descriptor,
                Err(fault) => {
                    self.trace.emit(
                        events::TOOL_CALL_MISSING,
                        payload(json!({
                            "tool": request.operation_name,
                            "tool_call_id": request.call_id,
                        })),
                    );
                    self.trace_error(request, &fault);
                    outcomes.push(self.rejected(request, None, fault));
                    continue;
                }
            };
            let mode = descriptor.invocation_mode();
            let arguments = match descriptor.validate_arguments(&request.arguments) {
                Ok(arguments) => arguments,
                Err(fault) => {
                    self.trace_error(request, &fault);
                    outcomes.push(self.rejected(request, Some(mode), fault));
                    continue;
                }
            };
            match &descriptor.handler {
                CapabilityHandler::Blocking(handler) => blocking.push(PendingCall {
                    request,
                    arguments,
                    handler: handler.clone(),
                }),
                CapabilityHandler::Suspendable(handler) => suspendable.push(PendingCall {
                    request,
                    arguments,
                    handler: handler.clone(),
                }),
            }
        }

        for call in blocking {
            outcomes.push(self.invoke_blocking(call, deadline));
        }

        let limited = JOIN_LANE.try_with(|_| ()).is_err();
        let units = suspendable
            .into_iter()
            .map(|call| self.invoke_suspendable(call, deadline, limited));
        outcomes.extend(JOIN_LANE.scope((), join_all(units)).await);

        let completed = self.assemble(batch, outcomes);
        match &completed {
            Ok(completed) => self.trace.emit(
                events::BATCH_END,
                payload(json!({
                    "size": completed.len(),
                    "failures": completed.failure_count(),
                    "elapsed_ms": clock.elapsed().as_millis() as u64,
                })),
            ),
            Err(error) => {
                tracing::error!("batch reassembly failed: {}", error);
                self.trace.emit(
                    events::BATCH_END,
                    payload(json!({
                        "size": batch.len(),
                        "error": error.to_string(),
                        "elapsed_ms": clock.elapsed().as_millis() as u64,
                    })),
                );
            }
        }
        completed
    }

    fn invoke_blocking(
        &self,
        call: PendingCall<'_, BlockingHandler>,
        deadline: Option<Instant>,
    ) -> CallOutcome {
        let PendingCall {
            request,
            arguments,
            handler,
        } = call;

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return self.timed_out(request, InvocationMode::Blocking, SystemTime::now());
        }

        let started_at = SystemTime::now();
        let envelope = match catch_unwind(AssertUnwindSafe(|| handler(arguments))) {
            Ok(outcome) => normalize(outcome),
            Err(panic) => ToolResultEnvelope::failure(panic_message(panic.as_ref())),
        };
        self.finished(request, InvocationMode::Blocking, started_at, envelope)
    }

    async fn invoke_suspendable(
        &self,
        call: PendingCall<'_, SuspendableHandler>,
        deadline: Option<Instant>,
        limited: bool,
    ) -> CallOutcome {
        let PendingCall {
            request,
            arguments,
            handler,
        } = call;
        let started_at = SystemTime::now();
        let expired = move || deadline.is_some_and(|deadline| Instant::now() >= deadline);

        if expired() {
            return self.timed_out(request, InvocationMode::Suspendable, started_at);
        }

        // `None` means the deadline passed while waiting for a permit.
        let unit = async {
            let _permit = if limited {
                match self.permits.acquire().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Some(ToolResultEnvelope::failure("tool semaphore closed")),
                }
            } else {
                None
            };
            if expired() {
                return None;
            }
            let invocation = AssertUnwindSafe(async move { handler(arguments).await });
            Some(match invocation.catch_unwind().await {
                Ok(outcome) => normalize(outcome),
                Err(panic) => ToolResultEnvelope::failure(panic_message(panic.as_ref())),
            })
        };

        let envelope = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, unit).await.ok().flatten(),
            None => unit.await,
        };
        match envelope {
            Some(envelope) => {
                self.finished(request, InvocationMode::Suspendable, started_at, envelope)
            }
            None => self.timed_out(request, InvocationMode::Suspendable, started_at),
        }
    }

    /// Refuse a whole batch with one fault, still producing one envelope per request.
    fn refuse(&self, batch: &ExecutionBatch, fault: ToolFault) -> CoreResult<CompletedBatch> {
        tracing::warn!("refusing batch of {}: {}", batch.len(), fault);
        self.trace.emit(
            events::SCHEDULING_REFUSED,
            payload(json!({
                "size": batch.len(),
                "error": fault.to_string(),
                "fault": fault.kind(),
            })),
        );
        let outcomes = batch
            .requests()
            .iter()
            .map(|request| self.rejected(request, None, fault.clone()))
            .collect();
        self.assemble(batch, outcomes)
    }

    fn assemble(
        &self,
        batch: &ExecutionBatch,
        outcomes: Vec<CallOutcome>,
    ) -> CoreResult<CompletedBatch> {
        let order = batch.call_ids();
        let mut tagged_envelopes = Vec::with_capacity(outcomes.len());
        let mut tagged_records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            tagged_envelopes.push((outcome.call_id.clone(), outcome.envelope));
            tagged_records.push((outcome.call_id, outcome.record));
        }

        let envelopes = ResultMapper::map(&order, tagged_envelopes)?;
        let invocations = ResultMapper::map(&order, tagged_records)?;
        let results = batch
            .requests()
            .iter()
            .cloned()
            .zip(envelopes)
            .map(|(request, envelope)| ToolCallResult { request, envelope })
            .collect();

        Ok(CompletedBatch {
            results,
            invocations,
        })
    }

    fn finished(
        &self,
        request: &ToolCallRequest,
        mode: InvocationMode,
        started_at: SystemTime,
        envelope: ToolResultEnvelope,
    ) -> CallOutcome {
        let ended_at = SystemTime::now();
        let status = if envelope.is_success() {
            InvocationStatus::Success
        } else {
            InvocationStatus::Failed
        };
        let mut record = InvocationRecord::new(
            request.call_id.clone(),
            request.operation_name.clone(),
            Some(mode),
            started_at,
            ended_at,
            status,
        );

        match envelope.error() {
            None => self.trace.emit(
                events::TOOL_CALL_END,
                payload(json!({
                    "tool": request.operation_name,
                    "tool_call_id": request.call_id,
                    "elapsed_ms": record.duration_ms,
                })),
            ),
            Some(error) => {
                record = record.with_error(error);
                self.trace.emit(
                    events::TOOL_CALL_ERROR,
                    payload(json!({
                        "tool": request.operation_name,
                        "tool_call_id": request.call_id,
                        "error": error,
                        "elapsed_ms": record.duration_ms,
                    })),
                );
            }
        }

        CallOutcome {
            call_id: request.call_id.clone(),
            envelope,
            record,
        }
    }

    fn timed_out(
        &self,
        request: &ToolCallRequest,
        mode: InvocationMode,
        started_at: SystemTime,
    ) -> CallOutcome {
        let fault = ToolFault::Timeout;
        let record = InvocationRecord::new(
            request.call_id.clone(),
            request.operation_name.clone(),
            Some(mode),
            started_at,
            SystemTime::now(),
            InvocationStatus::TimedOut,
        )
        .with_error(fault.to_string());
        self.trace.emit(
            events::TOOL_CALL_TIMEOUT,
            payload(json!({
                "tool": request.operation_name,
                "tool_call_id": request.call_id,
                "elapsed_ms": record.duration_ms,
            })),
        );
        CallOutcome {
            call_id: request.call_id.clone(),
            envelope: fault.into(),
            record,
        }
    }

    fn rejected(
        &self,
        request: &ToolCallRequest,
        mode: Option<InvocationMode>,
        fault: ToolFault,
    ) -> CallOutcome {
        let now = SystemTime::now();
        let record = InvocationRecord::new(
            request.call_id.clone(),
            request.operation_name.clone(),
            mode,
            now,
            now,
            InvocationStatus::Rejected,
        )
        .with_error(fault.to_string());
        CallOutcome {
            call_id: request.call_id.clone(),
            envelope: fault.into(),
            record,
        }
    }

    fn trace_start(&self, request: &ToolCallRequest) {
        self.trace.emit(
            events::TOOL_CALL_START,
            payload(json!({
                "tool": request.operation_name,
                "tool_call_id": request.call_id,
            })),
        );
    }

    fn trace_error(&self, request: &ToolCallRequest, fault: &ToolFault) {
        self.trace.emit(
            events::TOOL_CALL_ERROR,
            payload(json!({
                "tool": request.operation_name,
                "tool_call_id": request.call_id,
                "error": fault.to_string(),
                "fault": fault.kind(),
            })),
        );
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Scheduler")
            .field("operations", &self.registry.operation_names())
            .field("batch_timeout", &self.batch_timeout)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests;
