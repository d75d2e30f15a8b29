//! Core data structs: envelopes, snapshots, registrations and notifications.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::EventType;
use crate::ids::{
    CorrelationId, CrossGameEventId, EntityId, EventId, GameId, RealmId, SnapshotId,
};

/// String-keyed JSON map used for event payloads and materialized state.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Actor recorded when a caller does not supply one.
pub const SYSTEM_ACTOR: &str = "system";

// =============================================================================
// Event Store
// =============================================================================

/// The immutable wrapper around one persisted event.
///
/// Serialized field names are the on-disk record format: one envelope per
/// line in the stream's log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventEnvelope {
    /// Stream this event belongs to.
    pub stream_id: String,
    /// Kind of event.
    #[ts(type = "string")]
    pub event_type: EventType,
    /// Event data.
    pub payload: Payload,
    /// When the event was appended (never earlier than its predecessor).
    pub timestamp_utc: DateTime<Utc>,
    /// Unique event identifier.
    pub event_id: EventId,
    /// Groups causally related events.
    pub correlation_id: CorrelationId,
    /// Identity of the caller that appended the event.
    pub actor: String,
    /// Per-stream version, 1-indexed and gapless.
    pub version: u64,
}

/// State materialized by replaying a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MaterializedState {
    /// Stream the state was replayed from.
    pub stream_id: String,
    /// Version of the last applied event (0 when nothing was applied).
    pub version: u64,
    /// Timestamp of the last applied event.
    pub timestamp_utc: Option<DateTime<Utc>>,
    /// Materialized key/value state.
    pub values: Payload,
}

impl MaterializedState {
    /// An empty state at version 0.
    pub fn empty(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            version: 0,
            timestamp_utc: None,
            values: Payload::new(),
        }
    }

    /// Look up a single value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// A materialized state checkpoint used to bound replay cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Stream the snapshot belongs to.
    pub stream_id: String,
    /// State as of the snapshot's version cutoff.
    pub state: MaterializedState,
    /// When the snapshot was taken.
    pub timestamp_utc: DateTime<Utc>,
    /// Unique snapshot identifier.
    pub snapshot_id: SnapshotId,
}

impl Snapshot {
    /// Version cutoff: replay resumes strictly after this version.
    pub const fn version(&self) -> u64 {
        self.state.version
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Composite placement key of a realm within the multiverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RealmCoordinate {
    /// Kind of realm (e.g. `material`, `astral`).
    pub realm_type: String,
    /// Realms this one borders, sorted and deduplicated.
    pub adjacency: Vec<RealmId>,
    /// Resonance in `[0, 1]`.
    pub resonance: f64,
    /// Density in `[0, 1]`.
    pub density: f64,
    /// Derived placement key.
    pub key: String,
}

/// A game registered with the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GameRegistration {
    /// Unique game identifier.
    pub game_id: GameId,
    /// Realm the game simulates.
    pub realm_id: RealmId,
    /// Name of the developer who registered the game.
    pub developer_name: String,
    /// Free-form description.
    pub description: String,
    /// Derived placement of the realm.
    pub coordinate: RealmCoordinate,
    /// When the registration succeeded.
    pub registered_at: DateTime<Utc>,
}

/// Aggregate counters maintained by the orchestrator.
///
/// Every counter increments by exactly one per successful operation and is
/// never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UniverseMetadata {
    /// Successful `register_game` calls.
    pub total_games_registered: u64,
    /// Executed control-ticks.
    pub total_control_ticks: u64,
    /// Successful `publish_cross_game_event` calls.
    pub total_cross_game_events: u64,
}

/// An event routed from one game to another (or to all games).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CrossGameEvent {
    /// Unique event identifier.
    pub id: CrossGameEventId,
    /// Publishing game.
    pub source_game_id: GameId,
    /// Receiving game; `None` broadcasts to every registered game.
    pub target_game_id: Option<GameId>,
    /// Domain-specific event name.
    pub event_type: String,
    /// Event data.
    pub payload: Payload,
    /// When the event was published.
    pub published_at: DateTime<Utc>,
    /// Actor that published the event.
    pub published_by: String,
}

impl CrossGameEvent {
    /// Whether the event targets every registered game.
    pub const fn is_broadcast(&self) -> bool {
        self.target_game_id.is_none()
    }
}

// =============================================================================
// Command Harness
// =============================================================================

/// Notification emitted to subscribers when a command changes a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateChange {
    /// Entity whose state changed.
    pub entity_id: EntityId,
    /// Changed key.
    pub key: String,
    /// Previous value, absent if the key was new.
    pub old: Option<serde_json::Value>,
    /// New value.
    pub new: serde_json::Value,
    /// Entity version produced by the command.
    pub version: u64,
    /// When the command was applied.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the triggering command.
    pub correlation_id: CorrelationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> EventEnvelope {
        let mut payload = Payload::new();
        payload.insert("hp".to_owned(), serde_json::json!(100));
        EventEnvelope {
            stream_id: "entity/1".to_owned(),
            event_type: EventType::StateSet,
            payload,
            timestamp_utc: Utc::now(),
            event_id: EventId::new(),
            correlation_id: CorrelationId::new(),
            actor: SYSTEM_ACTOR.to_owned(),
            version: 1,
        }
    }

    #[test]
    fn envelope_uses_log_field_names() {
        let value = serde_json::to_value(sample_envelope()).unwrap_or_default();
        for field in [
            "stream_id",
            "event_type",
            "payload",
            "timestamp_utc",
            "event_id",
            "correlation_id",
            "actor",
            "version",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value.get("event_type"), Some(&serde_json::json!("StateSet")));
    }

    #[test]
    fn snapshot_version_is_state_version() {
        let mut state = MaterializedState::empty("entity/1");
        state.version = 7;
        let snapshot = Snapshot {
            stream_id: "entity/1".to_owned(),
            state,
            timestamp_utc: Utc::now(),
            snapshot_id: SnapshotId::new(),
        };
        assert_eq!(snapshot.version(), 7);
    }

    #[test]
    fn empty_state_starts_at_version_zero() {
        let state = MaterializedState::empty("realm/overworld");
        assert_eq!(state.version, 0);
        assert!(state.timestamp_utc.is_none());
        assert!(state.values.is_empty());
    }
}
