//! Orchestration loop runner.
//!
//! [`run_orchestration_loop`] drives control-ticks on a fixed wall-clock
//! interval with support for:
//!
//! - **Bounded runs**: stop after exactly `max_ticks` control-ticks
//! - **Cooperative stop**: [`LoopControl::request_stop`] ends the loop at
//!   its next wait
//! - **Variable speed**: the interval is re-read from [`LoopControl`]
//!   before every wait
//!
//! The orchestrator's write lock is held only while a single control-tick
//! runs, so API callers can register games and publish events between
//! ticks.

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::control::{LoopControl, LoopEndReason};
use crate::orchestrator::{ControlTickSummary, Orchestrator, OrchestratorError};

/// Errors that can occur during the orchestration loop.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A control-tick failed.
    #[error("control tick error: {source}")]
    ControlTick {
        /// The underlying orchestrator error.
        #[from]
        source: OrchestratorError,
    },
}

/// Result of an orchestration loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopResult {
    /// Why the loop ended.
    pub end_reason: LoopEndReason,
    /// Control-ticks executed by this run.
    pub total_ticks: u64,
    /// Summary of the last control-tick, if any ran.
    pub last_summary: Option<ControlTickSummary>,
}

/// Callback invoked after each control-tick completes.
pub trait ControlTickCallback: Send {
    /// Called after a control-tick completes successfully.
    fn on_control_tick(&mut self, summary: &ControlTickSummary);
}

impl<F> ControlTickCallback for F
where
    F: FnMut(&ControlTickSummary) + Send,
{
    fn on_control_tick(&mut self, summary: &ControlTickSummary) {
        self(summary);
    }
}

/// A callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl ControlTickCallback for NoOpCallback {
    fn on_control_tick(&mut self, _summary: &ControlTickSummary) {}
}

/// Run control-ticks until `max_ticks` have executed or a stop is
/// requested. `None` runs until stopped.
///
/// # Errors
///
/// Returns [`RunnerError`] if a control-tick fails.
pub async fn run_orchestration_loop(
    orchestrator: &RwLock<Orchestrator>,
    control: &LoopControl,
    max_ticks: Option<u64>,
    callback: &mut dyn ControlTickCallback,
) -> Result<LoopResult, RunnerError> {
    let mut last_summary: Option<ControlTickSummary> = None;
    let mut total_ticks: u64 = 0;

    info!(
        max_ticks,
        tick_interval_ms = control.tick_interval_ms(),
        "Orchestration loop starting"
    );

    loop {
        // --- Check stop request (before tick) ---
        if control.is_stop_requested() {
            return Ok(LoopResult {
                end_reason: LoopEndReason::StopRequested,
                total_ticks,
                last_summary,
            });
        }

        // --- Check tick limit (before tick) ---
        if max_ticks.is_some_and(|max| total_ticks >= max) {
            return Ok(LoopResult {
                end_reason: LoopEndReason::MaxTicksReached,
                total_ticks,
                last_summary,
            });
        }

        // --- Execute control-tick ---
        let summary = orchestrator.write().await.execute_control_tick()?;
        total_ticks = total_ticks.saturating_add(1);
        callback.on_control_tick(&summary);

        // --- Check tick limit (after tick) ---
        if max_ticks.is_some_and(|max| total_ticks >= max) {
            info!(total_ticks, "Control tick limit reached");
            return Ok(LoopResult {
                end_reason: LoopEndReason::MaxTicksReached,
                total_ticks,
                last_summary: Some(summary),
            });
        }
        last_summary = Some(summary);

        // --- Wait for the next tick or a stop ---
        tokio::select! {
            () = tokio::time::sleep(control.tick_interval()) => {}
            () = control.stopped() => {}
        }
    }
}

/// Log how an orchestration loop ended.
pub fn log_loop_end(result: &LoopResult) {
    info!(
        reason = %result.end_reason,
        total_ticks = result.total_ticks,
        last_control_tick = result.last_summary.as_ref().map(|s| s.control_tick_id),
        "Orchestration loop ended"
    );

    if let Some(ref summary) = result.last_summary {
        info!(
            control_tick_id = summary.control_tick_id,
            games_synced = summary.games_synced,
            events_delivered = summary.events_delivered,
            "Final control tick summary"
        );
    } else {
        warn!("Orchestration loop ended with no control ticks executed");
    }
}
