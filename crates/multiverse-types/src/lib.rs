//! Shared type definitions for the Multiverse coordination engine.
//!
//! This crate is the single source of truth for the data that crosses
//! component boundaries: event envelopes and snapshots written by the event
//! store, game registrations and cross-game events owned by the
//! orchestrator, and state-change notifications emitted by the command
//! harness. Types flow downstream to `TypeScript` via `ts-rs` for the API
//! gateway.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier wrappers
//! - [`enums`] -- Event types, error classification, guarded operations
//! - [`structs`] -- Envelopes, snapshots, registrations, notifications

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ErrorKind, EventType, Operation};
pub use ids::{
    CorrelationId, CrossGameEventId, EntityId, EventId, GameId, RealmId, SnapshotId,
    SubscriptionId,
};
pub use structs::{
    CrossGameEvent, EventEnvelope, GameRegistration, MaterializedState, Payload,
    RealmCoordinate, SYSTEM_ACTOR, Snapshot, StateChange, UniverseMetadata,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the gateway.

    #[test]
    fn export_bindings() {
        // The files are written to the `bindings/` directory relative to
        // the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::EventId::export_all();
        let _ = crate::ids::SnapshotId::export_all();
        let _ = crate::ids::CorrelationId::export_all();
        let _ = crate::ids::CrossGameEventId::export_all();
        let _ = crate::ids::SubscriptionId::export_all();
        let _ = crate::ids::GameId::export_all();
        let _ = crate::ids::RealmId::export_all();
        let _ = crate::ids::EntityId::export_all();

        // Enums
        let _ = crate::enums::ErrorKind::export_all();
        let _ = crate::enums::Operation::export_all();

        // Structs
        let _ = crate::structs::EventEnvelope::export_all();
        let _ = crate::structs::MaterializedState::export_all();
        let _ = crate::structs::Snapshot::export_all();
        let _ = crate::structs::RealmCoordinate::export_all();
        let _ = crate::structs::GameRegistration::export_all();
        let _ = crate::structs::UniverseMetadata::export_all();
        let _ = crate::structs::CrossGameEvent::export_all();
        let _ = crate::structs::StateChange::export_all();
    }
}
