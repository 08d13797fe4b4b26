// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-autonomy
//!
//! The autonomous loop: a cooperative, single-threaded scheduler that
//! drives a pluggable [`Engine`] under iteration, wall-clock, tool-call,
//! no-progress, and repeated-failure caps. Emits a checkpoint event (plus
//! an audit record) every iteration and pauses/resumes on [`RuntimeSignals`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;

pub use cancel::CancellationToken;

use async_trait::async_trait;
use chrono::Utc;
use reach_core::session::TerminationReason;
use reach_core::AutonomousSession;
use reach_error::{ErrorCode, ReachError};
use serde::Serialize;
use std::time::Duration;

/// A unit of work the engine produced from a goal and iteration number.
pub type Plan = serde_json::Value;

/// Outcome of executing one [`Plan`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// `true` if the step completed without error.
    pub succeeded: bool,
    /// `true` if the step moved the session measurably closer to its goal.
    pub made_progress: bool,
    /// `true` if the engine considers the overall goal achieved.
    pub done: bool,
    /// Number of tool calls this step made.
    pub tool_calls: u32,
    /// Opaque result payload, folded into the checkpoint hash.
    pub result: serde_json::Value,
}

/// A pluggable planner/executor pair the loop drives each iteration.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Produce a plan for `goal` at the given iteration number.
    async fn plan(&self, goal: &str, iteration: u32) -> Result<Plan, ReachError>;
    /// Execute a plan and report its outcome.
    async fn execute(&self, plan: &Plan) -> Result<StepOutcome, ReachError>;
}

/// Environmental conditions the loop checks before each iteration.
pub trait RuntimeSignals: Send + Sync {
    /// `true` if the node currently has network connectivity.
    fn network_available(&self) -> bool;
    /// `true` if the battery is at a critical level (loop should pause).
    fn battery_critical(&self) -> bool;
}

/// Always-available, never-critical signals. Suitable for nodes on mains
/// power with a wired connection, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReadySignals;

impl RuntimeSignals for AlwaysReadySignals {
    fn network_available(&self) -> bool {
        true
    }
    fn battery_critical(&self) -> bool {
        false
    }
}

/// A swappable sleep function, so tests can inject a synchronous/instant
/// implementation instead of waiting on real wall-clock time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for (approximately) `dur`.
    async fn sleep(&self, dur: Duration);
}

/// Sleeps via `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// A tamper-evident checkpoint emitted once per completed iteration.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    /// Session goal.
    pub goal: String,
    /// Iteration number this checkpoint covers.
    pub iteration: u32,
    /// Cumulative tool-call count at checkpoint time.
    pub tool_call_count: u32,
    /// The plan that was executed.
    pub plan: Plan,
    /// The step's result payload.
    pub result: serde_json::Value,
    /// Wall-clock time the checkpoint was recorded.
    pub timestamp: chrono::DateTime<Utc>,
}

impl Checkpoint {
    /// Canonical content hash of `{goal, iteration, tool_call_count, plan,
    /// result, timestamp}`, per spec.md §4.6.
    pub fn content_hash(&self) -> Result<String, ReachError> {
        reach_hash::hash(self).map_err(|e| ReachError::new(ErrorCode::Internal, "failed to hash checkpoint").with_source(e))
    }
}

/// Receives checkpoint events and their paired audit record. Both must
/// succeed or the loop terminates with [`TerminationReason::CheckpointFailed`].
pub trait CheckpointSink: Send + Sync {
    /// Persist/emit one checkpoint (`autonomous.checkpoint`) plus its audit
    /// record.
    fn emit(&self, checkpoint: &Checkpoint, content_hash: &str) -> Result<(), ReachError>;
}

/// Emits checkpoints via `tracing`, never failing. Useful as a default /
/// for tests that don't care about checkpoint delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCheckpointSink;

impl CheckpointSink for TracingCheckpointSink {
    fn emit(&self, checkpoint: &Checkpoint, content_hash: &str) -> Result<(), ReachError> {
        tracing::info!(
            iteration = checkpoint.iteration,
            hash = content_hash,
            "autonomous.checkpoint"
        );
        Ok(())
    }
}

/// Pause/resume notifications the loop emits around network/battery gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Emitted when the loop pauses due to unavailable signals.
    Paused,
    /// Emitted when the loop resumes after signals recover.
    Resumed,
}

/// Drives one [`AutonomousSession`] through an [`Engine`] until it reaches
/// a [`TerminationReason`].
pub struct AutonomousLoop<E, S = AlwaysReadySignals, Sl = TokioSleeper, C = TracingCheckpointSink> {
    engine: E,
    signals: S,
    sleeper: Sl,
    checkpoints: C,
    cancel: CancellationToken,
    pause_poll_interval: Duration,
}

impl<E: Engine> AutonomousLoop<E, AlwaysReadySignals, TokioSleeper, TracingCheckpointSink> {
    /// Build a loop with default signals (always ready), a real sleeper, and
    /// a tracing-based checkpoint sink.
    pub fn new(engine: E, cancel: CancellationToken) -> Self {
        Self {
            engine,
            signals: AlwaysReadySignals,
            sleeper: TokioSleeper,
            checkpoints: TracingCheckpointSink,
            cancel,
            pause_poll_interval: Duration::from_secs(5),
        }
    }
}

impl<E: Engine, S: RuntimeSignals, Sl: Sleeper, C: CheckpointSink> AutonomousLoop<E, S, Sl, C> {
    /// Build a loop with fully custom collaborators.
    pub fn with_collaborators(engine: E, signals: S, sleeper: Sl, checkpoints: C, cancel: CancellationToken) -> Self {
        Self { engine, signals, sleeper, checkpoints, cancel, pause_poll_interval: Duration::from_secs(5) }
    }

    /// Override the poll interval used while paused (default 5s).
    #[must_use]
    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    /// Run `session` to completion, invoking `on_lifecycle` for
    /// pause/resume transitions. Pause/resume cycles do not count against
    /// any iteration cap.
    pub async fn run(
        &self,
        session: &mut AutonomousSession,
        on_lifecycle: impl Fn(LifecycleEvent) + Send + Sync,
    ) -> TerminationReason {
        let started = std::time::Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                session.terminate(TerminationReason::Cancelled);
            }
            session.check_pre_iteration_caps(started.elapsed().as_secs());
            if let Some(reason) = session.termination_reason {
                return reason;
            }

            if !self.signals.network_available() || self.signals.battery_critical() {
                on_lifecycle(LifecycleEvent::Paused);
                while !self.cancel.is_cancelled() && (!self.signals.network_available() || self.signals.battery_critical()) {
                    self.sleeper.sleep(self.pause_poll_interval).await;
                }
                on_lifecycle(LifecycleEvent::Resumed);
                continue;
            }

            let iteration = session.iteration_count;
            let plan = match self.engine.plan(&session.goal, iteration).await {
                Ok(p) => p,
                Err(_) => {
                    session.record_iteration(false, false);
                    session.check_post_step_caps(false);
                    if let Some(reason) = session.termination_reason {
                        return reason;
                    }
                    continue;
                }
            };

            let outcome = match self.engine.execute(&plan).await {
                Ok(o) => o,
                Err(_) => {
                    session.record_iteration(false, false);
                    session.check_post_step_caps(false);
                    if let Some(reason) = session.termination_reason {
                        return reason;
                    }
                    continue;
                }
            };

            for _ in 0..outcome.tool_calls {
                session.record_tool_call();
            }
            session.record_iteration(outcome.succeeded, outcome.made_progress);

            let checkpoint = Checkpoint {
                goal: session.goal.clone(),
                iteration,
                tool_call_count: session.tool_call_count,
                plan,
                result: outcome.result.clone(),
                timestamp: Utc::now(),
            };
            let emitted = checkpoint
                .content_hash()
                .and_then(|hash| self.checkpoints.emit(&checkpoint, &hash));
            if emitted.is_err() {
                session.terminate(TerminationReason::CheckpointFailed);
                return TerminationReason::CheckpointFailed;
            }

            session.check_post_step_caps(outcome.done);
            if let Some(reason) = session.termination_reason {
                return reason;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingEngine {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Engine for CountingEngine {
        async fn plan(&self, _goal: &str, iteration: u32) -> Result<Plan, ReachError> {
            Ok(serde_json::json!({"iteration": iteration}))
        }

        async fn execute(&self, _plan: &Plan) -> Result<StepOutcome, ReachError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome {
                succeeded: true,
                made_progress: true,
                done: false,
                tool_calls: 1,
                result: serde_json::json!({"ok": true}),
            })
        }
    }

    #[tokio::test]
    async fn stops_at_max_iterations() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = CountingEngine { calls: calls.clone() };
        let cancel = CancellationToken::new();
        let lp = AutonomousLoop::new(engine, cancel);
        let mut session = AutonomousSession::new("goal", 3, 100, 3600);
        let reason = lp.run(&mut session, |_| {}).await;
        assert_eq!(reason, TerminationReason::MaxIterations);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    struct DoneOnceEngine;

    #[async_trait]
    impl Engine for DoneOnceEngine {
        async fn plan(&self, _goal: &str, _iteration: u32) -> Result<Plan, ReachError> {
            Ok(serde_json::json!({}))
        }
        async fn execute(&self, _plan: &Plan) -> Result<StepOutcome, ReachError> {
            Ok(StepOutcome { succeeded: true, made_progress: true, done: true, tool_calls: 0, result: serde_json::json!({}) })
        }
    }

    #[tokio::test]
    async fn stops_when_done() {
        let cancel = CancellationToken::new();
        let lp = AutonomousLoop::new(DoneOnceEngine, cancel);
        let mut session = AutonomousSession::new("goal", 100, 100, 3600);
        let reason = lp.run(&mut session, |_| {}).await;
        assert_eq!(reason, TerminationReason::Done);
        assert_eq!(session.iteration_count, 1);
    }

    struct AlwaysFailsEngine;

    #[async_trait]
    impl Engine for AlwaysFailsEngine {
        async fn plan(&self, _goal: &str, _iteration: u32) -> Result<Plan, ReachError> {
            Ok(serde_json::json!({}))
        }
        async fn execute(&self, _plan: &Plan) -> Result<StepOutcome, ReachError> {
            Ok(StepOutcome { succeeded: false, made_progress: false, done: false, tool_calls: 0, result: serde_json::json!({}) })
        }
    }

    #[tokio::test]
    async fn stops_on_repeated_failures() {
        let cancel = CancellationToken::new();
        let lp = AutonomousLoop::new(AlwaysFailsEngine, cancel);
        let mut session = AutonomousSession::new("goal", 100, 100, 3600);
        let reason = lp.run(&mut session, |_| {}).await;
        assert_eq!(reason, TerminationReason::RepeatedFailures);
    }

    #[tokio::test]
    async fn cancellation_token_stops_loop_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let lp = AutonomousLoop::new(DoneOnceEngine, cancel);
        let mut session = AutonomousSession::new("goal", 100, 100, 3600);
        let reason = lp.run(&mut session, |_| {}).await;
        assert_eq!(reason, TerminationReason::Cancelled);
        assert_eq!(session.iteration_count, 0);
    }

    struct FailingCheckpointSink;
    impl CheckpointSink for FailingCheckpointSink {
        fn emit(&self, _checkpoint: &Checkpoint, _hash: &str) -> Result<(), ReachError> {
            Err(ReachError::new(ErrorCode::StorageWriteFailed, "disk full"))
        }
    }

    #[tokio::test]
    async fn checkpoint_failure_terminates_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = CountingEngine { calls };
        let cancel = CancellationToken::new();
        let lp = AutonomousLoop::with_collaborators(engine, AlwaysReadySignals, TokioSleeper, FailingCheckpointSink, cancel);
        let mut session = AutonomousSession::new("goal", 100, 100, 3600);
        let reason = lp.run(&mut session, |_| {}).await;
        assert_eq!(reason, TerminationReason::CheckpointFailed);
    }
}
