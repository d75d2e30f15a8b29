//! Per-realm tick driver.
//!
//! A [`TickDriver`] owns one realm's [`RealmClock`] and its
//! [`RealmTickHandler`]. Every tick it:
//!
//! 1. Advances the clock (strictly increasing, checked)
//! 2. Calls the handler with a [`TickContext`]
//! 3. Appends the returned events to the realm's stream in order, all
//!    sharing one correlation id and the realm id as actor
//! 4. Optionally snapshots the stream on a fixed tick cadence
//!
//! Drivers are independent: each runs on its own tokio task and a slow
//! handler only delays its own realm's next tick. A late tick is logged,
//! never skipped.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use multiverse_events::{AppendMetadata, EventStore, StoreError};
use multiverse_types::{CorrelationId, ErrorKind, EventType, Payload, RealmId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{ClockError, RealmClock};
use crate::control::{LoopControl, LoopEndReason};

/// Stream holding a realm's events.
pub fn realm_stream_id(realm_id: &RealmId) -> String {
    format!("realm/{realm_id}")
}

/// Failure reported by a realm's tick handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// What went wrong.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that stop a tick driver.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The realm clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// Appending or snapshotting failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The realm's handler failed.
    #[error("handler for realm {realm_id} failed at tick {tick}: {source}")]
    Handler {
        /// Realm whose handler failed.
        realm_id: RealmId,
        /// Tick being executed.
        tick: u64,
        /// The handler's error.
        source: HandlerError,
    },
}

impl TickError {
    /// Coarse classification of the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Clock { .. } | Self::Handler { .. } => ErrorKind::Internal,
            Self::Store { source } => source.kind(),
        }
    }
}

/// An event a handler wants appended to its realm's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    /// Event type.
    pub event_type: EventType,
    /// Event payload.
    pub payload: Payload,
}

impl PendingEvent {
    /// Create a pending event.
    pub const fn new(event_type: EventType, payload: Payload) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    /// A `StateSet` event.
    pub const fn set(payload: Payload) -> Self {
        Self::new(EventType::StateSet, payload)
    }

    /// A `StateIncrement` event.
    pub const fn increment(payload: Payload) -> Self {
        Self::new(EventType::StateIncrement, payload)
    }
}

/// What a handler sees when its realm ticks.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Realm being ticked.
    pub realm_id: &'a RealmId,
    /// Stream the realm's events go to.
    pub stream_id: &'a str,
    /// The tick being executed (1 for the first tick).
    pub tick: u64,
    /// Ticks the realm was behind schedule when this one started.
    pub ticks_behind: u64,
    /// Correlation id shared by every event of this tick.
    pub correlation_id: CorrelationId,
}

/// Simulation logic of one realm.
pub trait RealmTickHandler: Send {
    /// Produce the events for one tick.
    ///
    /// # Errors
    ///
    /// A [`HandlerError`] stops the realm's driver.
    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Result<Vec<PendingEvent>, HandlerError>;
}

impl<F> RealmTickHandler for F
where
    F: FnMut(&TickContext<'_>) -> Result<Vec<PendingEvent>, HandlerError> + Send,
{
    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Result<Vec<PendingEvent>, HandlerError> {
        self(ctx)
    }
}

/// Outcome of one realm tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Realm that ticked.
    pub realm_id: RealmId,
    /// Tick number.
    pub tick: u64,
    /// Events appended during the tick.
    pub events_appended: usize,
    /// Stream head after the tick.
    pub stream_version: u64,
    /// Version captured if a snapshot was taken.
    pub snapshot_version: Option<u64>,
    /// Wall-clock duration of the tick.
    pub elapsed_ms: u64,
}

/// Result of a driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverResult {
    /// Realm that was driven.
    pub realm_id: RealmId,
    /// Why the driver stopped.
    pub end_reason: LoopEndReason,
    /// Ticks executed by this run.
    pub total_ticks: u64,
    /// Report of the last tick, if any ran.
    pub last_report: Option<TickReport>,
}

/// Drives one realm's clock and handler.
pub struct TickDriver {
    clock: RealmClock,
    stream_id: String,
    store: Arc<EventStore>,
    handler: Box<dyn RealmTickHandler>,
    snapshot_every: Option<NonZeroU64>,
}

impl core::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickDriver")
            .field("clock", &self.clock)
            .field("stream_id", &self.stream_id)
            .field("snapshot_every", &self.snapshot_every)
            .finish_non_exhaustive()
    }
}

impl TickDriver {
    /// Create a driver for `realm_id` ticking every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::Clock`] if `interval` is zero.
    pub fn new(
        realm_id: RealmId,
        interval: Duration,
        store: Arc<EventStore>,
        handler: impl RealmTickHandler + 'static,
    ) -> Result<Self, TickError> {
        let stream_id = realm_stream_id(&realm_id);
        Ok(Self {
            clock: RealmClock::new(realm_id, interval)?,
            stream_id,
            store,
            handler: Box::new(handler),
            snapshot_every: None,
        })
    }

    /// Snapshot the realm's stream every `ticks` ticks.
    #[must_use]
    pub const fn with_snapshot_every(mut self, ticks: NonZeroU64) -> Self {
        self.snapshot_every = Some(ticks);
        self
    }

    /// The realm being driven.
    pub const fn realm_id(&self) -> &RealmId {
        self.clock.realm_id()
    }

    /// The realm's stream id.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The last executed tick (0 before the first).
    pub const fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Execute one tick immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the clock overflows, the handler fails, or
    /// an append or snapshot fails. Events appended before the failure stay
    /// in the stream.
    pub async fn tick_once(&mut self) -> Result<TickReport, TickError> {
        let now = Instant::now();
        let ticks_behind = self.clock.ticks_behind(now);
        let tick = self.clock.advance(now)?;
        let realm_id = self.clock.realm_id().clone();

        if ticks_behind > 0 {
            warn!(realm_id = %realm_id, tick, ticks_behind, "Realm is behind schedule");
        }

        let correlation_id = CorrelationId::new();
        let ctx = TickContext {
            realm_id: &realm_id,
            stream_id: &self.stream_id,
            tick,
            ticks_behind,
            correlation_id,
        };
        let events = self
            .handler
            .on_tick(&ctx)
            .map_err(|source| TickError::Handler {
                realm_id: realm_id.clone(),
                tick,
                source,
            })?;

        let mut events_appended: usize = 0;
        let mut stream_version = self.store.stream_version(&self.stream_id).await?;
        for event in events {
            let metadata =
                AppendMetadata::actor(realm_id.as_str()).with_correlation_id(correlation_id);
            let envelope = self
                .store
                .append_event(&self.stream_id, event.event_type, event.payload, metadata)
                .await?;
            stream_version = envelope.version;
            events_appended = events_appended.saturating_add(1);
        }

        let snapshot_version = match self.snapshot_every {
            Some(every) if tick.checked_rem(every.get()) == Some(0) => {
                Some(Self::snapshot(&self.store, &self.stream_id).await?)
            }
            _ => None,
        };

        let report = TickReport {
            realm_id,
            tick,
            events_appended,
            stream_version,
            snapshot_version,
            elapsed_ms: u64::try_from(now.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        debug!(
            realm_id = %report.realm_id,
            tick,
            events_appended,
            stream_version,
            snapshot_version = report.snapshot_version,
            "Realm tick complete"
        );
        Ok(report)
    }

    /// Tick on the realm's interval until `max_ticks` ticks have run or a
    /// stop is requested. The first tick runs immediately; missed ticks are
    /// delayed, never burst.
    ///
    /// # Errors
    ///
    /// Returns the first [`TickError`]; the driver stops at that tick.
    pub async fn run(
        mut self,
        control: Arc<LoopControl>,
        max_ticks: Option<u64>,
    ) -> Result<DriverResult, TickError> {
        let mut interval = tokio::time::interval(self.clock.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut total_ticks: u64 = 0;
        let mut last_report = None;
        info!(
            realm_id = %self.realm_id(),
            interval_ms = u64::try_from(self.clock.interval().as_millis()).unwrap_or(u64::MAX),
            max_ticks,
            "Realm driver starting"
        );

        let end_reason = loop {
            if max_ticks.is_some_and(|max| total_ticks >= max) {
                break LoopEndReason::MaxTicksReached;
            }
            tokio::select! {
                _ = interval.tick() => {}
                () = control.stopped() => break LoopEndReason::StopRequested,
            }
            if control.is_stop_requested() {
                break LoopEndReason::StopRequested;
            }

            let report = self.tick_once().await.inspect_err(|err| {
                warn!(
                    realm_id = %self.clock.realm_id(),
                    error = %err,
                    "Realm driver stopped by error"
                );
            })?;
            total_ticks = total_ticks.saturating_add(1);
            last_report = Some(report);
        };

        info!(
            realm_id = %self.realm_id(),
            reason = %end_reason,
            total_ticks,
            "Realm driver ended"
        );
        Ok(DriverResult {
            realm_id: self.clock.realm_id().clone(),
            end_reason,
            total_ticks,
            last_report,
        })
    }

    /// Run the driver on its own tokio task.
    pub fn spawn(
        self,
        control: Arc<LoopControl>,
        max_ticks: Option<u64>,
    ) -> JoinHandle<Result<DriverResult, TickError>> {
        tokio::spawn(self.run(control, max_ticks))
    }

    /// Replay `stream_id` from its latest snapshot and persist a new one.
    ///
    /// Must not borrow `self`: the handler is not `Sync`, and `run` has to
    /// stay `Send`.
    async fn snapshot(store: &EventStore, stream_id: &str) -> Result<u64, TickError> {
        let latest = store.get_latest_snapshot(stream_id).await?;
        let state = store.replay_state(stream_id, latest.as_ref()).await?;
        let snapshot = store.create_snapshot(stream_id, &state).await?;
        Ok(snapshot.version())
    }
}
