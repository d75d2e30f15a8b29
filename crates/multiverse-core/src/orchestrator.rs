//! Multiverse orchestrator: game registry, cross-game routing and
//! control-ticks.
//!
//! The [`Orchestrator`] exclusively owns the registry of games, the
//! aggregate [`UniverseMetadata`] counters, the queue of published but not
//! yet delivered cross-game events, and each game's inbox. Nothing here is
//! global: callers share one orchestrator through [`SharedOrchestrator`].
//!
//! # Event routing
//!
//! ```text
//! publish_cross_game_event --> validate --> outbox (publish order)
//!                                              |
//!                      execute_control_tick ---+--> per-game inboxes
//!                                                        |
//!                                        drain_inbox <---+
//! ```
//!
//! Publishing validates the source and target and resolves a broadcast's
//! recipients immediately; delivery happens at the next control-tick. A
//! recipient unregistered in between is skipped.
//!
//! Every operation is all-or-nothing: permission, validation and counter
//! overflow are checked before any state is touched.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use multiverse_types::{
    CrossGameEvent, CrossGameEventId, ErrorKind, GameId, GameRegistration, Operation, Payload,
    RealmId, UniverseMetadata,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::coordinate::{self, CoordinateError, PlacementHints};
use crate::governance::{AllowAll, PermissionCheck};

/// An orchestrator shared between the control loop and API callers.
pub type SharedOrchestrator = Arc<RwLock<Orchestrator>>;

/// Errors returned by orchestrator operations. None of them leaves a trace
/// in the registry or the counters.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The game id is already registered.
    #[error("game {game_id} is already registered")]
    RegistrationConflict {
        /// The conflicting id.
        game_id: GameId,
    },

    /// The publishing game is unknown.
    #[error("source not registered: {game_id}")]
    SourceNotRegistered {
        /// The unknown source.
        game_id: GameId,
    },

    /// The target game is unknown.
    #[error("target not registered: {game_id}")]
    TargetNotRegistered {
        /// The unknown target.
        game_id: GameId,
    },

    /// An operation referenced an unknown game.
    #[error("game {game_id} not found")]
    GameNotFound {
        /// The unknown id.
        game_id: GameId,
    },

    /// A parameter was malformed.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong.
        reason: String,
    },

    /// The permission predicate declined the operation.
    #[error("actor {actor:?} is not permitted to {operation}")]
    GovernanceRejected {
        /// The calling actor.
        actor: String,
        /// The declined operation.
        operation: Operation,
    },

    /// An aggregate counter would overflow.
    #[error("counter {counter} overflow")]
    CounterOverflow {
        /// Name of the counter.
        counter: &'static str,
    },
}

impl OrchestratorError {
    /// Coarse classification of the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RegistrationConflict { .. } => ErrorKind::RegistrationConflict,
            Self::SourceNotRegistered { .. }
            | Self::TargetNotRegistered { .. }
            | Self::GameNotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::GovernanceRejected { .. } => ErrorKind::GovernanceRejected,
            Self::CounterOverflow { .. } => ErrorKind::Internal,
        }
    }
}

impl From<CoordinateError> for OrchestratorError {
    fn from(source: CoordinateError) -> Self {
        Self::Validation {
            reason: source.to_string(),
        }
    }
}

/// Input to [`Orchestrator::register_game`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRegistrationRequest {
    /// Unique game identifier.
    pub game_id: GameId,
    /// Realm the game simulates.
    pub realm_id: RealmId,
    /// Developer responsible for the game.
    pub developer_name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Realm classification hint.
    #[serde(default)]
    pub realm_type: Option<String>,
    /// Neighbouring realms.
    #[serde(default)]
    pub adjacency: Vec<RealmId>,
    /// Resonance hint in `[0, 1]`.
    #[serde(default)]
    pub resonance: Option<f64>,
    /// Density hint in `[0, 1]`.
    #[serde(default)]
    pub density: Option<f64>,
}

impl GameRegistrationRequest {
    /// A request with no placement hints.
    pub fn new(
        game_id: impl Into<GameId>,
        realm_id: impl Into<RealmId>,
        developer_name: &str,
        description: &str,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            realm_id: realm_id.into(),
            developer_name: developer_name.to_owned(),
            description: description.to_owned(),
            realm_type: None,
            adjacency: Vec::new(),
            resonance: None,
            density: None,
        }
    }

    /// Set the realm type hint.
    #[must_use]
    pub fn with_realm_type(mut self, realm_type: &str) -> Self {
        self.realm_type = Some(realm_type.to_owned());
        self
    }

    /// Set the neighbouring realms.
    #[must_use]
    pub fn with_adjacency(mut self, adjacency: Vec<RealmId>) -> Self {
        self.adjacency = adjacency;
        self
    }

    /// Set the resonance hint.
    #[must_use]
    pub const fn with_resonance(mut self, resonance: f64) -> Self {
        self.resonance = Some(resonance);
        self
    }

    /// Set the density hint.
    #[must_use]
    pub const fn with_density(mut self, density: f64) -> Self {
        self.density = Some(density);
        self
    }
}

/// Outcome of one control-tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTickSummary {
    /// Sequential id, starting at 1.
    pub control_tick_id: u64,
    /// Games registered when the tick ran.
    pub games_synced: usize,
    /// Cross-game deliveries flushed into inboxes.
    pub events_delivered: usize,
    /// Wall-clock duration of the tick.
    pub elapsed_ms: u64,
    /// When the tick ran.
    pub executed_at: DateTime<Utc>,
}

/// A published event waiting for the next control-tick.
#[derive(Debug, Clone)]
struct PendingDelivery {
    event: CrossGameEvent,
    recipients: Vec<GameId>,
}

/// Owner of the registry, counters and cross-game queues.
pub struct Orchestrator {
    registry: BTreeMap<GameId, GameRegistration>,
    inboxes: BTreeMap<GameId, Vec<CrossGameEvent>>,
    outbox: VecDeque<PendingDelivery>,
    metadata: UniverseMetadata,
    permissions: Arc<dyn PermissionCheck>,
}

impl core::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("games", &self.registry.len())
            .field("pending", &self.outbox.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// An empty orchestrator that permits every operation.
    pub fn new() -> Self {
        Self::with_permission_check(Arc::new(AllowAll))
    }

    /// An empty orchestrator guarded by `permissions`.
    pub fn with_permission_check(permissions: Arc<dyn PermissionCheck>) -> Self {
        Self {
            registry: BTreeMap::new(),
            inboxes: BTreeMap::new(),
            outbox: VecDeque::new(),
            metadata: UniverseMetadata::default(),
            permissions,
        }
    }

    /// Wrap this orchestrator for sharing.
    pub fn into_shared(self) -> SharedOrchestrator {
        Arc::new(RwLock::new(self))
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register a game and derive its realm coordinate.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::GovernanceRejected`] if `actor` may not register.
    /// - [`OrchestratorError::Validation`] on blank ids or developer name,
    ///   or out-of-range placement hints.
    /// - [`OrchestratorError::RegistrationConflict`] if the id is taken.
    pub fn register_game(
        &mut self,
        actor: &str,
        request: GameRegistrationRequest,
    ) -> Result<GameRegistration, OrchestratorError> {
        self.authorize(actor, Operation::RegisterGame)?;

        if request.game_id.is_blank() {
            return Err(validation("game id must not be blank"));
        }
        if request.realm_id.is_blank() {
            return Err(validation("realm id must not be blank"));
        }
        if request.developer_name.trim().is_empty() {
            return Err(validation("developer name must not be blank"));
        }
        if self.registry.contains_key(&request.game_id) {
            return Err(OrchestratorError::RegistrationConflict {
                game_id: request.game_id,
            });
        }

        let coordinate = coordinate::derive_coordinate(
            &request.realm_id,
            &PlacementHints {
                realm_type: request.realm_type.as_deref(),
                adjacency: &request.adjacency,
                resonance: request.resonance,
                density: request.density,
            },
        )?;
        let total = bump(self.metadata.total_games_registered, "total_games_registered")?;

        let registration = GameRegistration {
            game_id: request.game_id,
            realm_id: request.realm_id,
            developer_name: request.developer_name,
            description: request.description,
            coordinate,
            registered_at: Utc::now(),
        };

        self.metadata.total_games_registered = total;
        self.inboxes.insert(registration.game_id.clone(), Vec::new());
        self.registry
            .insert(registration.game_id.clone(), registration.clone());

        info!(
            actor,
            game_id = %registration.game_id,
            realm_id = %registration.realm_id,
            coordinate = %registration.coordinate.key,
            "Game registered"
        );
        Ok(registration)
    }

    /// Remove a game. Its inbox is discarded and queued deliveries to it
    /// are dropped, so a later registration under the same id never sees
    /// them. Counters are not decremented.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::GovernanceRejected`] if `actor` may not
    /// unregister, or [`OrchestratorError::GameNotFound`] for unknown ids.
    pub fn unregister_game(
        &mut self,
        actor: &str,
        game_id: &GameId,
    ) -> Result<GameRegistration, OrchestratorError> {
        self.authorize(actor, Operation::UnregisterGame)?;

        let registration =
            self.registry
                .remove(game_id)
                .ok_or_else(|| OrchestratorError::GameNotFound {
                    game_id: game_id.clone(),
                })?;
        let undelivered = self.inboxes.remove(game_id).map_or(0, |inbox| inbox.len());

        let mut dropped: usize = 0;
        for pending in &mut self.outbox {
            let before = pending.recipients.len();
            pending.recipients.retain(|recipient| recipient != game_id);
            dropped = dropped.saturating_add(before.saturating_sub(pending.recipients.len()));
        }
        self.outbox.retain(|pending| !pending.recipients.is_empty());

        info!(actor, game_id = %game_id, undelivered, dropped, "Game unregistered");
        Ok(registration)
    }

    /// All registrations, sorted by game id. The result is a copy.
    pub fn list_registered_games(&self) -> Vec<GameRegistration> {
        self.registry.values().cloned().collect()
    }

    /// A copy of one registration.
    pub fn get_game(&self, game_id: &GameId) -> Option<GameRegistration> {
        self.registry.get(game_id).cloned()
    }

    /// Number of registered games.
    pub fn game_count(&self) -> usize {
        self.registry.len()
    }

    // =========================================================================
    // Cross-game events
    // =========================================================================

    /// Queue an event from `source` to `target`, or to every registered
    /// game (the source included) when `target` is `None`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::GovernanceRejected`] if `actor` may not publish.
    /// - [`OrchestratorError::Validation`] on a blank event type.
    /// - [`OrchestratorError::SourceNotRegistered`] /
    ///   [`OrchestratorError::TargetNotRegistered`] for unknown games.
    pub fn publish_cross_game_event(
        &mut self,
        actor: &str,
        source: &GameId,
        target: Option<&GameId>,
        event_type: &str,
        data: Payload,
    ) -> Result<CrossGameEventId, OrchestratorError> {
        self.authorize(actor, Operation::PublishCrossGameEvent)?;

        if event_type.trim().is_empty() {
            return Err(validation("event type must not be blank"));
        }
        if !self.registry.contains_key(source) {
            return Err(OrchestratorError::SourceNotRegistered {
                game_id: source.clone(),
            });
        }
        let recipients = match target {
            Some(target) if !self.registry.contains_key(target) => {
                return Err(OrchestratorError::TargetNotRegistered {
                    game_id: target.clone(),
                });
            }
            Some(target) => vec![target.clone()],
            None => self.registry.keys().cloned().collect(),
        };
        let total = bump(self.metadata.total_cross_game_events, "total_cross_game_events")?;

        let event = CrossGameEvent {
            id: CrossGameEventId::new(),
            source_game_id: source.clone(),
            target_game_id: target.cloned(),
            event_type: event_type.to_owned(),
            payload: data,
            published_at: Utc::now(),
            published_by: actor.to_owned(),
        };
        let event_id = event.id;

        self.metadata.total_cross_game_events = total;
        debug!(
            actor,
            event_id = %event_id,
            source = %source,
            target = ?target,
            event_type,
            recipients = recipients.len(),
            "Cross-game event queued"
        );
        self.outbox.push_back(PendingDelivery { event, recipients });
        Ok(event_id)
    }

    /// Take every event delivered to `game_id`, in delivery order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::GameNotFound`] for unknown games.
    pub fn drain_inbox(
        &mut self,
        game_id: &GameId,
    ) -> Result<Vec<CrossGameEvent>, OrchestratorError> {
        self.inboxes
            .get_mut(game_id)
            .map(std::mem::take)
            .ok_or_else(|| OrchestratorError::GameNotFound {
                game_id: game_id.clone(),
            })
    }

    /// Put drained events back at the front of `game_id`'s inbox, ahead of
    /// anything delivered since, so a consumer that failed to process them
    /// sees them again in the original order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::GameNotFound`] if the game was
    /// unregistered in the meantime; the events are dropped.
    pub fn restore_inbox(
        &mut self,
        game_id: &GameId,
        mut events: Vec<CrossGameEvent>,
    ) -> Result<(), OrchestratorError> {
        let inbox = self
            .inboxes
            .get_mut(game_id)
            .ok_or_else(|| OrchestratorError::GameNotFound {
                game_id: game_id.clone(),
            })?;
        events.append(inbox);
        *inbox = events;
        Ok(())
    }

    /// Number of published events not yet flushed by a control-tick.
    pub fn pending_events(&self) -> usize {
        self.outbox.len()
    }

    // =========================================================================
    // Control-ticks
    // =========================================================================

    /// Run one control-tick: flush queued cross-game events into inboxes in
    /// publish order and advance the control-tick counter.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CounterOverflow`] if the control-tick
    /// counter is exhausted; nothing is flushed in that case.
    pub fn execute_control_tick(&mut self) -> Result<ControlTickSummary, OrchestratorError> {
        let started = std::time::Instant::now();
        let control_tick_id = bump(self.metadata.total_control_ticks, "total_control_ticks")?;

        let mut events_delivered: usize = 0;
        while let Some(pending) = self.outbox.pop_front() {
            for recipient in &pending.recipients {
                if let Some(inbox) = self.inboxes.get_mut(recipient) {
                    inbox.push(pending.event.clone());
                    events_delivered = events_delivered.saturating_add(1);
                }
            }
        }

        self.metadata.total_control_ticks = control_tick_id;
        let summary = ControlTickSummary {
            control_tick_id,
            games_synced: self.registry.len(),
            events_delivered,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            executed_at: Utc::now(),
        };
        debug!(
            control_tick_id,
            games_synced = summary.games_synced,
            events_delivered,
            elapsed_ms = summary.elapsed_ms,
            "Control tick executed"
        );
        Ok(summary)
    }

    /// A copy of the aggregate counters.
    pub const fn metadata(&self) -> UniverseMetadata {
        self.metadata
    }

    fn authorize(&self, actor: &str, operation: Operation) -> Result<(), OrchestratorError> {
        if self.permissions.permits(actor, operation) {
            Ok(())
        } else {
            warn!(actor, %operation, "Operation rejected by permission check");
            Err(OrchestratorError::GovernanceRejected {
                actor: actor.to_owned(),
                operation,
            })
        }
    }
}

fn validation(reason: &str) -> OrchestratorError {
    OrchestratorError::Validation {
        reason: reason.to_owned(),
    }
}

fn bump(counter: u64, name: &'static str) -> Result<u64, OrchestratorError> {
    counter
        .checked_add(1)
        .ok_or(OrchestratorError::CounterOverflow { counter: name })
}
