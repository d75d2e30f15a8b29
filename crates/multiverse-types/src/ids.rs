//! Type-safe identifier wrappers.
//!
//! Generated identifiers (events, snapshots, correlations, cross-game
//! events) wrap a UUID v7 so they sort by creation time. Caller-chosen
//! identifiers (games, realms, entities) wrap a `String` so they keep the
//! exact spelling a developer registered them under.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a newtype wrapper around a caller-supplied `String` name.
macro_rules! define_name {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the name is empty or whitespace only.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an appended event envelope.
    EventId
}

define_id! {
    /// Unique identifier for a persisted snapshot.
    SnapshotId
}

define_id! {
    /// Groups causally related events and commands.
    CorrelationId
}

define_id! {
    /// Unique identifier for a published cross-game event.
    CrossGameEventId
}

define_id! {
    /// Handle returned when subscribing to an entity's state changes.
    SubscriptionId
}

define_name! {
    /// Identifier of a game registered with the orchestrator.
    GameId
}

define_name! {
    /// Identifier of the realm a game simulates.
    RealmId
}

define_name! {
    /// Identifier of an entity tracked by the command harness.
    EntityId
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn generated_ids_are_unique_and_time_ordered() {
        let first = EventId::new();
        let second = EventId::new();
        assert_ne!(first, second);
        assert!(first < second);
        assert_ne!(first.into_inner(), Uuid::nil());
    }

    #[test]
    fn names_serialize_as_plain_strings() {
        let id = GameId::from("dungeon_a");
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json.as_deref(), Some("\"dungeon_a\""));
    }

    #[test]
    fn names_can_be_looked_up_by_str() {
        let mut map = BTreeMap::new();
        map.insert(GameId::from("dungeon_a"), 1_u32);
        assert_eq!(map.get("dungeon_a"), Some(&1));
    }

    #[test]
    fn blank_names_are_detected() {
        assert!(RealmId::from("  ").is_blank());
        assert!(!RealmId::from("overworld").is_blank());
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = CorrelationId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
