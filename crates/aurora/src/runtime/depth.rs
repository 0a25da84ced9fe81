//! Round-depth guard for one conversation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ContinuePolicy, EngineConfig};
use crate::trace::{events, payload, TraceSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthState {
    /// Rounds may run.
    Continue,
    /// The ceiling was reached; a decision is required before the next round.
    Escalate,
    /// Terminal for this conversation until it is restarted.
    Stopped,
}

impl DepthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthState::Continue => "continue",
            DepthState::Escalate => "escalate",
            DepthState::Stopped => "stopped",
        }
    }
}

/// Answer to an escalation, supplied by whoever drives the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    Continue,
    Pause,
    Stop,
}

impl EscalationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationDecision::Continue => "continue",
            EscalationDecision::Pause => "pause",
            EscalationDecision::Stop => "stop",
        }
    }
}

/// Point-in-time view of a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthSnapshot {
    pub depth: u32,
    pub ceiling: u32,
    pub state: DepthState,
}

#[derive(Debug)]
struct DepthCounter {
    depth: u32,
    ceiling: u32,
    state: DepthState,
}

impl DepthCounter {
    fn fresh(ceiling: u32) -> Self {
        Self {
            depth: 0,
            ceiling,
            state: DepthState::Continue,
        }
    }

    fn snapshot(&self) -> DepthSnapshot {
        DepthSnapshot {
            depth: self.depth,
            ceiling: self.ceiling,
            state: self.state,
        }
    }
}

/// Counts completed scheduling rounds and stops at a ceiling.
///
/// The counter is updated once per round under a single lock, never per call.
/// Reaching the ceiling moves the guard to [`DepthState::Escalate`]; only
/// [`DepthGuard::resolve`] or [`DepthGuard::reset`] leave it.
pub struct DepthGuard {
    counter: Mutex<DepthCounter>,
    initial_ceiling: u32,
    policy: ContinuePolicy,
    trace: TraceSink,
}

impl DepthGuard {
    /// A zero ceiling is treated as one.
    pub fn new(ceiling: u32, policy: ContinuePolicy, trace: TraceSink) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            counter: Mutex::new(DepthCounter::fresh(ceiling)),
            initial_ceiling: ceiling,
            policy,
            trace,
        }
    }

    pub fn from_config(config: &EngineConfig, trace: TraceSink) -> Self {
        Self::new(config.max_depth, config.continue_policy, trace)
    }

    pub fn state(&self) -> DepthState {
        self.counter.lock().state
    }

    pub fn depth(&self) -> u32 {
        self.counter.lock().depth
    }

    pub fn ceiling(&self) -> u32 {
        self.counter.lock().ceiling
    }

    pub fn snapshot(&self) -> DepthSnapshot {
        self.counter.lock().snapshot()
    }

    pub fn policy(&self) -> ContinuePolicy {
        self.policy
    }

    /// Record one finished round and return the state for the next one.
    ///
    /// Ignored unless the guard is in [`DepthState::Continue`]: a round that was
    /// not admitted does not count.
    pub fn complete_round(&self) -> DepthState {
        let reached = {
            let mut counter = self.counter.lock();
            if counter.state != DepthState::Continue {
                return counter.state;
            }
            counter.depth = counter.depth.saturating_add(1);
            if counter.depth < counter.ceiling {
                return DepthState::Continue;
            }
            counter.state = DepthState::Escalate;
            counter.snapshot()
        };

        tracing::warn!(
            "round depth {} reached ceiling {}; escalating",
            reached.depth,
            reached.ceiling
        );
        self.trace.emit(
            events::DEPTH_CEILING_REACHED,
            payload(json!({ "depth": reached.depth, "ceiling": reached.ceiling })),
        );
        reached.state
    }

    /// Apply a decision.
    ///
    /// `Stop` is honoured from any state. `Continue` and `Pause` only matter while
    /// escalated: continue resets or extends according to the policy, pause
    /// leaves the guard escalated. A stopped guard stays stopped.
    pub fn resolve(&self, decision: EscalationDecision) -> DepthState {
        let (before, after) = {
            let mut counter = self.counter.lock();
            let before = counter.state;
            match (counter.state, decision) {
                (DepthState::Stopped, _) => {}
                (_, EscalationDecision::Stop) => counter.state = DepthState::Stopped,
                (DepthState::Escalate, EscalationDecision::Continue) => {
                    match self.policy {
                        ContinuePolicy::Reset => counter.depth = 0,
                        ContinuePolicy::Extend { by } => {
                            counter.ceiling = counter.ceiling.saturating_add(by.max(1));
                        }
                    }
                    counter.state = DepthState::Continue;
                }
                (_, EscalationDecision::Continue | EscalationDecision::Pause) => {}
            }
            (before, counter.snapshot())
        };

        tracing::debug!(
            "depth decision {} moved {} -> {}",
            decision.as_str(),
            before.as_str(),
            after.state.as_str()
        );
        self.trace.emit(
            events::DEPTH_DECISION,
            payload(json!({
                "decision": decision.as_str(),
                "from": before.as_str(),
                "to": after.state.as_str(),
                "depth": after.depth,
                "ceiling": after.ceiling,
            })),
        );
        after.state
    }

    /// Back to depth zero, the configured ceiling, and [`DepthState::Continue`].
    pub fn reset(&self) {
        *self.counter.lock() = DepthCounter::fresh(self.initial_ceiling);
    }
}

impl std::fmt::Debug for DepthGuard {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DepthGuard")
            .field("counter", &self.snapshot())
            .field("policy", &self.policy)
            .finish()
    }
}
