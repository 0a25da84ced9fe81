//! One conversation: a scheduler plus the depth guard for its rounds.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::CoreResult;
use crate::tools::{CapabilityRegistry, CompletedBatch, ExecutionBatch};
use crate::trace::TraceSink;

use super::depth::{DepthGuard, DepthSnapshot, DepthState, EscalationDecision};
use super::scheduler::{Scheduler, StandaloneRun};

/// What happened to a batch submitted as a round.
#[derive(Debug)]
pub enum RoundOutcome {
    /// The batch was scheduled, or refused by the standalone entry. `depth` is
    /// the guard after the round.
    Completed {
        batch: CompletedBatch,
        depth: DepthSnapshot,
    },
    /// The ceiling was reached earlier; nothing ran. The batch is handed back so
    /// it can be resubmitted after a decision.
    Escalated {
        depth: DepthSnapshot,
        batch: ExecutionBatch,
    },
    /// The conversation was stopped; nothing ran.
    Stopped { batch: ExecutionBatch },
}

impl RoundOutcome {
    pub fn completed(&self) -> Option<&CompletedBatch> {
        match self {
            RoundOutcome::Completed { batch, .. } => Some(batch),
            _ => None,
        }
    }

    pub fn into_completed(self) -> Option<CompletedBatch> {
        match self {
            RoundOutcome::Completed { batch, .. } => Some(batch),
            _ => None,
        }
    }

    /// State the guard is in after this outcome.
    pub fn state(&self) -> DepthState {
        match self {
            RoundOutcome::Completed { depth, .. } => depth.state,
            RoundOutcome::Escalated { .. } => DepthState::Escalate,
            RoundOutcome::Stopped { .. } => DepthState::Stopped,
        }
    }
}

/// Runs successive rounds of one conversation.
///
/// Rounds are taken through `&mut self`, so one conversation never has two
/// rounds in flight and the guard is consulted and updated once per round.
#[derive(Debug)]
pub struct ConversationRuntime {
    id: Uuid,
    scheduler: Scheduler,
    depth: DepthGuard,
}

impl ConversationRuntime {
    pub fn new(scheduler: Scheduler, depth: DepthGuard) -> Self {
        Self::with_id(Uuid::now_v7(), scheduler, depth)
    }

    pub fn with_id(id: Uuid, scheduler: Scheduler, depth: DepthGuard) -> Self {
        Self {
            id,
            scheduler,
            depth,
        }
    }

    pub fn from_config(registry: Arc<CapabilityRegistry>, config: &EngineConfig) -> Self {
        let scheduler = Scheduler::from_config(registry, config);
        let depth = DepthGuard::from_config(config, scheduler.trace().clone());
        Self::new(scheduler, depth)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn depth(&self) -> DepthSnapshot {
        self.depth.snapshot()
    }

    /// Run one round on the caller's runtime.
    pub async fn run_round(&mut self, batch: ExecutionBatch) -> CoreResult<RoundOutcome> {
        let batch = match self.admit(batch) {
            Ok(batch) => batch,
            Err(outcome) => return Ok(outcome),
        };
        let executed = self.scheduler.execute(&batch).await;
        self.finish(executed)
    }

    /// Run one round from synchronous code through the standalone entry.
    ///
    /// A refused round (a driver is already active) returns its refusal
    /// envelopes without counting toward the depth ceiling.
    pub fn run_round_blocking(&mut self, batch: ExecutionBatch) -> CoreResult<RoundOutcome> {
        let batch = match self.admit(batch) {
            Ok(batch) => batch,
            Err(outcome) => return Ok(outcome),
        };
        match self.scheduler.run_standalone(&batch) {
            StandaloneRun::Scheduled(executed) => self.finish(executed),
            StandaloneRun::Refused(refused) => {
                tracing::debug!("conversation {} round refused; depth unchanged", self.id);
                Ok(RoundOutcome::Completed {
                    batch: refused?,
                    depth: self.depth.snapshot(),
                })
            }
        }
    }

    pub fn resolve(&mut self, decision: EscalationDecision) -> DepthState {
        self.depth.resolve(decision)
    }

    /// Start over at depth zero, leaving any stop or escalation behind.
    pub fn restart(&mut self) {
        tracing::debug!("restarting conversation {}", self.id);
        self.depth.reset();
    }

    fn admit(&self, batch: ExecutionBatch) -> Result<ExecutionBatch, RoundOutcome> {
        let depth = self.depth.snapshot();
        match depth.state {
            DepthState::Continue => Ok(batch),
            DepthState::Escalate => {
                tracing::debug!(
                    "conversation {} is escalated at depth {}; round held",
                    self.id,
                    depth.depth
                );
                Err(RoundOutcome::Escalated { depth, batch })
            }
            DepthState::Stopped => {
                tracing::debug!("conversation {} is stopped; round dropped", self.id);
                Err(RoundOutcome::Stopped { batch })
            }
        }
    }

    // The round counts even when reassembly failed: it was scheduled.
    fn finish(&self, executed: CoreResult<CompletedBatch>) -> CoreResult<RoundOutcome> {
        self.depth.complete_round();
        let batch = executed?;
        Ok(RoundOutcome::Completed {
            batch,
            depth: self.depth.snapshot(),
        })
    }
}
