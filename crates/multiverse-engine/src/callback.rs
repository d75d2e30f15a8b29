//! Control-tick callback that reports progress through `tracing`.

use multiverse_core::orchestrator::ControlTickSummary;
use multiverse_core::runner::ControlTickCallback;
use tracing::{debug, info};

/// Logs every control-tick at `debug` and a running summary at `info`
/// every `report_every` ticks.
#[derive(Debug, Clone)]
pub struct SummaryLogger {
    report_every: u64,
    events_delivered: u64,
}

impl SummaryLogger {
    /// Report at `info` every `report_every` ticks (at least 1).
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
            events_delivered: 0,
        }
    }

    /// Deliveries seen so far.
    pub const fn events_delivered(&self) -> u64 {
        self.events_delivered
    }
}

impl ControlTickCallback for SummaryLogger {
    fn on_control_tick(&mut self, summary: &ControlTickSummary) {
        let delivered = u64::try_from(summary.events_delivered).unwrap_or(u64::MAX);
        self.events_delivered = self.events_delivered.saturating_add(delivered);

        debug!(
            control_tick_id = summary.control_tick_id,
            games_synced = summary.games_synced,
            events_delivered = summary.events_delivered,
            elapsed_ms = summary.elapsed_ms,
            "Control tick"
        );
        if summary.control_tick_id.checked_rem(self.report_every) == Some(0) {
            info!(
                control_tick_id = summary.control_tick_id,
                games_synced = summary.games_synced,
                total_delivered = self.events_delivered,
                "Orchestration progress"
            );
        }
    }
}
