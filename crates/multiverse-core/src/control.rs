//! Shared loop control for the orchestration loop and realm drivers.
//!
//! A [`LoopControl`] is wrapped in an `Arc` and handed to every periodic
//! task. It carries a stop flag with a wake-up notification and the
//! orchestration loop's runtime-adjustable interval. Cancellation is
//! cooperative: a task only observes the stop at its next yield point
//! (the inter-tick wait), never in the middle of a tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Reason a periodic loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopEndReason {
    /// Ran the requested number of ticks.
    MaxTicksReached,
    /// A stop was requested through [`LoopControl::request_stop`].
    StopRequested,
}

impl core::fmt::Display for LoopEndReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MaxTicksReached => f.write_str("max_ticks_reached"),
            Self::StopRequested => f.write_str("stop_requested"),
        }
    }
}

/// Shared stop flag and tick interval.
#[derive(Debug)]
pub struct LoopControl {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes tasks waiting in [`stopped`](Self::stopped).
    stop_notify: Notify,

    /// Control-tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Wall-clock time the control was created.
    started_at: DateTime<Utc>,
}

impl LoopControl {
    /// Create a control with the given control-tick interval.
    ///
    /// A zero interval is raised to 1ms.
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            tick_interval_ms: AtomicU64::new(tick_interval_ms.max(1)),
            started_at: Utc::now(),
        }
    }

    /// Request every loop sharing this control to stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
        tracing::info!("Stop requested");
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            // Register before checking the flag so a concurrent
            // `request_stop` cannot slip between the two.
            let notified = self.stop_notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Current control-tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Current control-tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms())
    }

    /// Set the control-tick interval. Takes effect at the next wait.
    ///
    /// Returns the previous interval, or `None` if `ms` is zero.
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms == 0 {
            return None;
        }
        Some(self.tick_interval_ms.swap(ms, Ordering::AcqRel))
    }

    /// Wall-clock time the control was created.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn stop_flag() {
        let control = LoopControl::new(100);
        assert!(!control.is_stop_requested());
        control.request_stop();
        assert!(control.is_stop_requested());
    }

    #[test]
    fn interval_adjustment() {
        let control = LoopControl::new(1000);
        assert_eq!(control.tick_interval(), Duration::from_secs(1));
        assert_eq!(control.set_tick_interval_ms(0), None);
        assert_eq!(control.set_tick_interval_ms(250), Some(1000));
        assert_eq!(control.tick_interval_ms(), 250);
    }

    #[test]
    fn zero_interval_is_raised() {
        assert_eq!(LoopControl::new(0).tick_interval_ms(), 1);
    }

    #[tokio::test]
    async fn stopped_resolves_after_request() {
        let control = Arc::new(LoopControl::new(100));
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.stopped().await })
        };
        tokio::task::yield_now().await;
        control.request_stop();
        assert!(waiter.await.is_ok());
    }

    #[tokio::test]
    async fn stopped_returns_immediately_when_already_stopped() {
        let control = LoopControl::new(100);
        control.request_stop();
        control.stopped().await;
    }
}
