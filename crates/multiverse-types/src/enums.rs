//! Enumeration types shared across the workspace.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

/// The kind of an appended event.
///
/// Only the three generic primitives carry built-in replay semantics.
/// Every other name is preserved verbatim as [`EventType::Custom`] so
/// callers can compose domain meaning on top of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Shallow-merge payload keys into state (last write wins).
    StateSet,
    /// Numerically accumulate payload values per key.
    StateIncrement,
    /// Delete the keys listed under the payload's `keys` array.
    StateRemove,
    /// A domain-specific event with no built-in replay semantics.
    Custom(String),
}

impl EventType {
    /// Wire name of the `StateSet` primitive.
    pub const STATE_SET: &'static str = "StateSet";
    /// Wire name of the `StateIncrement` primitive.
    pub const STATE_INCREMENT: &'static str = "StateIncrement";
    /// Wire name of the `StateRemove` primitive.
    pub const STATE_REMOVE: &'static str = "StateRemove";

    /// Build a domain-specific event type.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// The name written to the log.
    pub fn as_str(&self) -> &str {
        match self {
            Self::StateSet => Self::STATE_SET,
            Self::StateIncrement => Self::STATE_INCREMENT,
            Self::StateRemove => Self::STATE_REMOVE,
            Self::Custom(name) => name,
        }
    }

    /// Whether this is one of the three built-in state primitives.
    pub const fn is_primitive(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match name.as_str() {
            Self::STATE_SET => Self::StateSet,
            Self::STATE_INCREMENT => Self::StateIncrement,
            Self::STATE_REMOVE => Self::StateRemove,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self::from(name.to_owned())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Coarse error classification shared by every crate in the workspace.
///
/// Library errors expose `kind()` so an API gateway can map failures to
/// responses without matching on crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum ErrorKind {
    /// A game id was registered twice.
    RegistrationConflict,
    /// An unknown game, stream, entity or target was referenced.
    NotFound,
    /// A command, payload or parameter was malformed.
    Validation,
    /// A durable append failed; nothing was recorded.
    StorageWrite,
    /// Reading durable storage failed or found a corrupt record.
    Storage,
    /// An admission or permission predicate declined the operation.
    GovernanceRejected,
    /// An internal invariant failed (counter overflow, handler failure).
    Internal,
}

/// State-mutating operations guarded by the permission predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Operation {
    /// Register a new game with the orchestrator.
    RegisterGame,
    /// Remove a registered game.
    UnregisterGame,
    /// Publish a cross-game event.
    PublishCrossGameEvent,
    /// Submit a command to the harness.
    SubmitCommand,
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::RegisterGame => "register_game",
            Self::UnregisterGame => "unregister_game",
            Self::PublishCrossGameEvent => "publish_cross_game_event",
            Self::SubmitCommand => "submit_command",
        };
        f.write_str(name)
    }
}
