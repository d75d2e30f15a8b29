//! Inbox relay between the orchestrator and the event store.
//!
//! Games are not attached to this process, so the relay stands in for
//! them: it drains each game's inbox and appends the delivered events to
//! the game's inbox stream (`game/<id>/inbox`), and every period it has
//! each game broadcast a `realm_pulse` carrying its realm stream version.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use multiverse_core::control::LoopControl;
use multiverse_core::orchestrator::SharedOrchestrator;
use multiverse_core::tick::realm_stream_id;
use multiverse_events::{AppendMetadata, EventStore};
use multiverse_types::{CrossGameEvent, EventType, GameId, Payload, SYSTEM_ACTOR};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;

/// Stream receiving a game's delivered cross-game events.
pub fn inbox_stream_id(game_id: &GameId) -> String {
    format!("game/{game_id}/inbox")
}

/// Totals from relay passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Delivered events appended to inbox streams.
    pub relayed: u64,
    /// Pulses published.
    pub pulses: u64,
}

/// Move every delivered event into its game's inbox stream. Returns the
/// number of events appended.
///
/// The orchestrator lock is released before anything is written. If an
/// append fails, every event not yet written goes back to the front of its
/// game's inbox before the error is returned.
///
/// # Errors
///
/// Returns [`EngineError`] if draining or appending fails.
pub async fn relay_once(
    orchestrator: &SharedOrchestrator,
    store: &EventStore,
) -> Result<u64, EngineError> {
    let drained: Vec<(GameId, Vec<CrossGameEvent>)> = {
        let mut guard = orchestrator.write().await;
        let mut drained = Vec::new();
        for game in guard.list_registered_games() {
            let events = guard.drain_inbox(&game.game_id)?;
            if !events.is_empty() {
                drained.push((game.game_id, events));
            }
        }
        drained
    };

    let mut relayed: u64 = 0;
    let mut games = drained.into_iter();
    while let Some((game_id, events)) = games.next() {
        let stream_id = inbox_stream_id(&game_id);
        let mut pending: VecDeque<CrossGameEvent> = events.into();
        while let Some(event) = pending.front() {
            let appended = store
                .append_event(
                    &stream_id,
                    EventType::custom(event.event_type.clone()),
                    event.payload.clone(),
                    AppendMetadata::actor(event.source_game_id.as_str()),
                )
                .await;
            if let Err(err) = appended {
                let unwritten = std::iter::once((game_id, Vec::from(pending))).chain(games);
                restore_unwritten(orchestrator, unwritten).await;
                return Err(err.into());
            }
            pending.pop_front();
            relayed = relayed.saturating_add(1);
        }
    }
    if relayed > 0 {
        debug!(relayed, "Relayed cross-game events");
    }
    Ok(relayed)
}

/// Return events that could not be written to their inboxes.
async fn restore_unwritten(
    orchestrator: &SharedOrchestrator,
    unwritten: impl IntoIterator<Item = (GameId, Vec<CrossGameEvent>)>,
) {
    let mut guard = orchestrator.write().await;
    for (game_id, events) in unwritten {
        let count = events.len();
        match guard.restore_inbox(&game_id, events) {
            Ok(()) => warn!(game_id = %game_id, count, "Returned unrelayed events to inbox"),
            Err(err) => warn!(game_id = %game_id, count, error = %err, "Dropped unrelayed events"),
        }
    }
}

/// Have every registered game broadcast its realm stream version.
/// Returns the number of pulses published.
///
/// # Errors
///
/// Returns [`EngineError`] if reading the store or publishing fails.
pub async fn publish_pulses(
    orchestrator: &SharedOrchestrator,
    store: &EventStore,
) -> Result<u64, EngineError> {
    let games = orchestrator.read().await.list_registered_games();

    let mut versions = Vec::with_capacity(games.len());
    for game in games {
        let version = store
            .stream_version(&realm_stream_id(&game.realm_id))
            .await?;
        versions.push((game.game_id, version));
    }

    let mut guard = orchestrator.write().await;
    let mut pulses: u64 = 0;
    for (game_id, version) in versions {
        let mut data = Payload::new();
        data.insert("stream_version".to_owned(), json!(version));
        guard.publish_cross_game_event(SYSTEM_ACTOR, &game_id, None, "realm_pulse", data)?;
        pulses = pulses.saturating_add(1);
    }
    Ok(pulses)
}

/// Relay and pulse every `period` until a stop is requested, then relay
/// once more so nothing delivered is left behind.
///
/// A failure requests a stop on `control`, so the control loop does not
/// keep filling inboxes that nothing drains.
///
/// # Errors
///
/// Returns the first [`EngineError`].
pub async fn run_relay(
    orchestrator: SharedOrchestrator,
    store: Arc<EventStore>,
    control: Arc<LoopControl>,
    period: Duration,
) -> Result<RelayStats, EngineError> {
    let stats = relay_until_stopped(&orchestrator, &store, &control, period)
        .await
        .inspect_err(|err| {
            error!(error = %err, "Inbox relay failed, requesting stop");
            control.request_stop();
        })?;
    info!(relayed = stats.relayed, pulses = stats.pulses, "Inbox relay stopped");
    Ok(stats)
}

async fn relay_until_stopped(
    orchestrator: &SharedOrchestrator,
    store: &EventStore,
    control: &LoopControl,
    period: Duration,
) -> Result<RelayStats, EngineError> {
    let mut stats = RelayStats::default();
    loop {
        tokio::select! {
            () = tokio::time::sleep(period) => {}
            () = control.stopped() => break,
        }
        stats.relayed = stats
            .relayed
            .saturating_add(relay_once(orchestrator, store).await?);
        stats.pulses = stats
            .pulses
            .saturating_add(publish_pulses(orchestrator, store).await?);
    }
    stats.relayed = stats
        .relayed
        .saturating_add(relay_once(orchestrator, store).await?);
    Ok(stats)
}
