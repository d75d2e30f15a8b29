//! Per-realm clock.
//!
//! Each realm owns one [`RealmClock`]. The tick counter is the source of
//! truth for the realm's local time: it starts at 0, the first executed
//! tick is tick 1, and it only ever moves forward. The clock also knows
//! the realm's fixed cadence, which lets the driver tell how far a slow
//! realm has fallen behind wall-clock time.
//!
//! # Design Principles
//!
//! - All counter arithmetic is checked (no silent overflow).
//! - Lag is reported, never corrected: a late realm is not paused, skipped
//!   or aborted by its clock.
//! - Instants come from [`tokio::time`] so paused-time tests are exact.

use std::time::Duration;

use multiverse_types::RealmId;
use tokio::time::Instant;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Invalid clock configuration (e.g. a zero interval).
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Local clock of a single realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmClock {
    /// Realm this clock belongs to.
    realm_id: RealmId,

    /// Number of ticks executed so far.
    tick: u64,

    /// Tick count the clock was restored at.
    base_tick: u64,

    /// Fixed wall-clock interval between ticks.
    interval: Duration,

    /// When the first tick ran.
    started_at: Option<Instant>,

    /// When the most recent tick ran.
    last_tick_at: Option<Instant>,
}

impl RealmClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `interval` is zero.
    pub fn new(realm_id: RealmId, interval: Duration) -> Result<Self, ClockError> {
        Self::from_parts(realm_id, 0, interval)
    }

    /// Create a clock resuming from `tick` (useful for restoring a realm
    /// whose tick count was recovered from its stream).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `interval` is zero.
    pub fn from_parts(
        realm_id: RealmId,
        tick: u64,
        interval: Duration,
    ) -> Result<Self, ClockError> {
        if interval.is_zero() {
            return Err(ClockError::InvalidConfig {
                reason: format!("tick interval for realm {realm_id} must be greater than zero"),
            });
        }
        Ok(Self {
            realm_id,
            tick,
            base_tick: tick,
            interval,
            started_at: None,
            last_tick_at: None,
        })
    }

    /// Advance the clock by one tick executed at `now`. Returns the new
    /// tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self, now: Instant) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.last_tick_at = Some(now);
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Return the realm this clock belongs to.
    pub const fn realm_id(&self) -> &RealmId {
        &self.realm_id
    }

    /// Return the fixed tick interval.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Return when the most recent tick ran.
    pub const fn last_tick_at(&self) -> Option<Instant> {
        self.last_tick_at
    }

    /// Number of ticks that should have run by `now` at the fixed cadence,
    /// counting the first local tick at the start instant.
    pub fn expected_ticks(&self, now: Instant) -> u64 {
        let Some(started_at) = self.started_at else {
            return self.base_tick;
        };
        let elapsed = now.saturating_duration_since(started_at);
        let periods = elapsed
            .as_nanos()
            .checked_div(self.interval.as_nanos())
            .unwrap_or(0);
        u64::try_from(periods)
            .unwrap_or(u64::MAX)
            .saturating_add(1)
            .saturating_add(self.base_tick)
    }

    /// How many ticks the realm would still owe if the next tick ran at
    /// `now` (0 when on schedule).
    pub fn ticks_behind(&self, now: Instant) -> u64 {
        self.expected_ticks(now)
            .saturating_sub(self.tick.saturating_add(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn clock(interval_ms: u64) -> RealmClock {
        RealmClock::new(RealmId::new("alpha"), Duration::from_millis(interval_ms)).unwrap()
    }

    #[test]
    fn clock_starts_at_zero() {
        let clock = clock(100);
        assert_eq!(clock.tick(), 0);
        assert!(clock.last_tick_at().is_none());
        assert_eq!(clock.realm_id().as_str(), "alpha");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = RealmClock::new(RealmId::new("alpha"), Duration::ZERO);
        assert!(matches!(result, Err(ClockError::InvalidConfig { .. })));
    }

    #[test]
    fn advance_is_strictly_increasing() {
        let mut clock = clock(100);
        let now = Instant::now();
        let mut previous = 0;
        for step in 0..5 {
            let tick = clock.advance(now + Duration::from_millis(step * 100)).unwrap();
            assert!(tick > previous);
            previous = tick;
        }
        assert_eq!(clock.tick(), 5);
    }

    #[test]
    fn advance_overflow() {
        let mut clock =
            RealmClock::from_parts(RealmId::new("alpha"), u64::MAX, Duration::from_millis(1))
                .unwrap();
        assert!(matches!(
            clock.advance(Instant::now()),
            Err(ClockError::TickOverflow)
        ));
        assert_eq!(clock.tick(), u64::MAX);
    }

    #[test]
    fn on_schedule_clock_is_not_behind() {
        let mut clock = clock(100);
        let start = Instant::now();
        clock.advance(start).unwrap();
        assert_eq!(clock.ticks_behind(start + Duration::from_millis(100)), 0);
        clock.advance(start + Duration::from_millis(100)).unwrap();
        assert_eq!(clock.ticks_behind(start + Duration::from_millis(200)), 0);
    }

    #[test]
    fn slow_clock_reports_lag() {
        let mut clock = clock(100);
        let start = Instant::now();
        clock.advance(start).unwrap();
        // Next tick should have run at 100ms; at 450ms ticks 2..=5 were due.
        assert_eq!(clock.ticks_behind(start + Duration::from_millis(450)), 3);
    }

    #[test]
    fn restored_clock_counts_from_base() {
        let mut clock =
            RealmClock::from_parts(RealmId::new("alpha"), 40, Duration::from_millis(100))
                .unwrap();
        let start = Instant::now();
        assert_eq!(clock.advance(start).unwrap(), 41);
        assert_eq!(clock.ticks_behind(start + Duration::from_millis(100)), 0);
    }
}
