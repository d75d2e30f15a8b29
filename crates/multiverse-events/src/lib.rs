//! Durable event store for the Multiverse coordination engine.
//!
//! Every state change is an immutable [`EventEnvelope`] appended to a
//! per-stream log. State is never stored directly: it is rebuilt by
//! replaying the log, optionally starting from a [`Snapshot`] to bound
//! replay cost. The store is the only component that touches the log files.
//!
//! # Architecture
//!
//! ```text
//! append_event --> validate --> write + sync (streams/<id>.jsonl) --> index
//!                                                                       |
//! read_stream / read_as_of / replay_state <-----------------------------+
//!                  |
//!                  +-- snapshots/<id>.json (SnapshotStore)
//! ```
//!
//! # Modules
//!
//! - [`event_store`] -- The [`EventStore`]: append, read, replay, snapshots
//! - [`snapshot_store`] -- Snapshot file persistence
//! - [`replay`] -- The three built-in state primitives
//! - [`layout`] -- Stream id to file path mapping
//! - [`error`] -- Shared error types
//!
//! [`EventEnvelope`]: multiverse_types::EventEnvelope
//! [`Snapshot`]: multiverse_types::Snapshot

pub mod error;
pub mod event_store;
pub mod layout;
pub mod replay;
pub mod snapshot_store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use event_store::{AppendMetadata, EventStore};
pub use layout::StoreLayout;
pub use snapshot_store::SnapshotStore;
