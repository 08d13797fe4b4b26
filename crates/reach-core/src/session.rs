//! Autonomous-loop session state (spec.md §3 "Autonomous Session").

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why an autonomous session stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Caller cancelled the session.
    Cancelled,
    /// `iteration_count` reached `max_iterations`.
    MaxIterations,
    /// `tool_call_count` reached `max_tool_calls`.
    MaxToolCalls,
    /// Wall-clock runtime exceeded `max_runtime`.
    MaxRuntime,
    /// The planner reported the goal satisfied.
    Done,
    /// `failure_streak` reached its cap.
    RepeatedFailures,
    /// `no_progress_streak` reached its cap.
    NoProgress,
    /// Writing a checkpoint event or audit record failed.
    CheckpointFailed,
}

/// Mutable state of one autonomous-loop run.
///
/// Counters (`iteration_count`, `tool_call_count`, `failure_streak`,
/// `no_progress_streak`) only ever grow within a session; the session
/// transitions to a [`TerminationReason`] exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AutonomousSession {
    /// Natural-language goal driving this session.
    pub goal: String,
    /// Iterations completed so far.
    pub iteration_count: u32,
    /// Hard cap on iterations.
    pub max_iterations: u32,
    /// Tool calls made so far.
    pub tool_call_count: u32,
    /// Hard cap on tool calls.
    pub max_tool_calls: u32,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Hard cap on wall-clock runtime, in seconds.
    pub max_runtime_secs: u64,
    /// Consecutive iterations ending in failure.
    pub failure_streak: u32,
    /// Consecutive iterations producing no measurable progress.
    pub no_progress_streak: u32,
    /// Capability ids this session is permitted to invoke.
    pub allowed_capabilities: Vec<String>,
    /// Last time any counter changed.
    pub updated_at: DateTime<Utc>,
    /// Set once the session reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
}

/// Default cap on consecutive iteration failures before termination.
pub const DEFAULT_FAILURE_STREAK_CAP: u32 = 3;
/// Default cap on consecutive no-progress iterations before termination.
pub const DEFAULT_NO_PROGRESS_CAP: u32 = 3;

impl AutonomousSession {
    /// Start a fresh session with the given goal and caps.
    #[must_use]
    pub fn new(goal: impl Into<String>, max_iterations: u32, max_tool_calls: u32, max_runtime_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            goal: goal.into(),
            iteration_count: 0,
            max_iterations,
            tool_call_count: 0,
            max_tool_calls,
            started_at: now,
            max_runtime_secs,
            failure_streak: 0,
            no_progress_streak: 0,
            allowed_capabilities: Vec::new(),
            updated_at: now,
            termination_reason: None,
        }
    }

    /// `true` once a terminal reason has been recorded.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.termination_reason.is_some()
    }

    /// Checked before each iteration, in priority order: cancelled (by the
    /// caller, via [`Self::terminate`] prior to calling this) →
    /// `max_iterations` → `max_tool_calls` → `max_runtime`. Caller-supplied
    /// `elapsed_secs` decouples this from wall-clock reads so it stays pure
    /// and testable.
    pub fn check_pre_iteration_caps(&mut self, elapsed_secs: u64) {
        if self.is_terminal() {
            return;
        }
        let reason = if self.iteration_count >= self.max_iterations {
            Some(TerminationReason::MaxIterations)
        } else if self.tool_call_count >= self.max_tool_calls {
            Some(TerminationReason::MaxToolCalls)
        } else if elapsed_secs >= self.max_runtime_secs {
            Some(TerminationReason::MaxRuntime)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.terminate(reason);
        }
    }

    /// Checked after each completed step, in priority order: done →
    /// `failure_streak` cap → `no_progress_streak` cap. Checkpoint failure is
    /// recorded by the caller via [`Self::terminate`], since it isn't a
    /// counter this type owns.
    pub fn check_post_step_caps(&mut self, done: bool) {
        if self.is_terminal() {
            return;
        }
        let reason = if done {
            Some(TerminationReason::Done)
        } else if self.failure_streak >= DEFAULT_FAILURE_STREAK_CAP {
            Some(TerminationReason::RepeatedFailures)
        } else if self.no_progress_streak >= DEFAULT_NO_PROGRESS_CAP {
            Some(TerminationReason::NoProgress)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.terminate(reason);
        }
    }

    /// Record a terminal reason, if one isn't already set.
    pub fn terminate(&mut self, reason: TerminationReason) {
        if self.termination_reason.is_none() {
            self.termination_reason = Some(reason);
            self.updated_at = Utc::now();
        }
    }

    /// Record one completed iteration and whether it made progress.
    pub fn record_iteration(&mut self, succeeded: bool, made_progress: bool) {
        self.iteration_count += 1;
        self.failure_streak = if succeeded { 0 } else { self.failure_streak + 1 };
        self.no_progress_streak = if made_progress { 0 } else { self.no_progress_streak + 1 };
        self.updated_at = Utc::now();
    }

    /// Record one tool call.
    pub fn record_tool_call(&mut self) {
        self.tool_call_count += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminates_exactly_once() {
        let mut s = AutonomousSession::new("do the thing", 10, 10, 3600);
        s.terminate(TerminationReason::Done);
        s.terminate(TerminationReason::Cancelled);
        assert_eq!(s.termination_reason, Some(TerminationReason::Done));
    }

    #[test]
    fn failure_streak_resets_on_success() {
        let mut s = AutonomousSession::new("goal", 100, 100, 3600);
        s.record_iteration(false, true);
        s.record_iteration(false, true);
        assert_eq!(s.failure_streak, 2);
        s.record_iteration(true, true);
        assert_eq!(s.failure_streak, 0);
        assert_eq!(s.iteration_count, 3);
    }

    #[test]
    fn pre_iteration_caps_terminate_in_priority_order() {
        let mut s = AutonomousSession::new("goal", 1, 100, 3600);
        s.iteration_count = 1;
        s.check_pre_iteration_caps(0);
        assert_eq!(s.termination_reason, Some(TerminationReason::MaxIterations));
    }

    #[test]
    fn failure_streak_cap_terminates() {
        let mut s = AutonomousSession::new("goal", 100, 100, 3600);
        for _ in 0..DEFAULT_FAILURE_STREAK_CAP {
            s.record_iteration(false, false);
        }
        s.check_post_step_caps(false);
        assert_eq!(s.termination_reason, Some(TerminationReason::RepeatedFailures));
    }

    #[test]
    fn no_progress_cap_terminates_after_failure_streak_checked() {
        let mut s = AutonomousSession::new("goal", 100, 100, 3600);
        for _ in 0..DEFAULT_NO_PROGRESS_CAP {
            s.record_iteration(true, false);
        }
        s.check_post_step_caps(false);
        assert_eq!(s.termination_reason, Some(TerminationReason::NoProgress));
    }
}
