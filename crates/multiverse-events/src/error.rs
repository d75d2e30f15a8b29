//! Error types for the event store.
//!
//! All errors are propagated via [`StoreError`]. Write failures carry the
//! stream they were aimed at so callers can tell which append was lost;
//! nothing is retried internally.

use std::path::PathBuf;

use multiverse_types::ErrorKind;

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stream identifier cannot be used.
    #[error("invalid stream id {stream_id:?}: {reason}")]
    InvalidStreamId {
        /// The rejected identifier.
        stream_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The payload does not fit the event type's shape.
    #[error("invalid {event_type} payload for stream {stream_id}: {reason}")]
    InvalidPayload {
        /// Target stream.
        stream_id: String,
        /// Event type the payload was submitted with.
        event_type: String,
        /// What is wrong with the payload.
        reason: String,
    },

    /// A snapshot does not belong to the stream or is ahead of it.
    #[error("invalid snapshot for stream {stream_id}: {reason}")]
    InvalidSnapshot {
        /// Stream the snapshot was used with.
        stream_id: String,
        /// What is wrong with the snapshot.
        reason: String,
    },

    /// Applying an event during replay failed.
    #[error("replay of stream {stream_id} failed at version {version}: {reason}")]
    Replay {
        /// Stream being replayed.
        stream_id: String,
        /// Version of the offending event.
        version: u64,
        /// Why the event could not be applied.
        reason: String,
    },

    /// The durable append failed; the event was not recorded.
    #[error("failed to append to stream {stream_id}: {source}")]
    StorageWrite {
        /// Stream the append was aimed at.
        stream_id: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading or preparing durable storage failed.
    #[error("storage I/O error at {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A persisted record could not be decoded.
    #[error("corrupt record in {} at line {line}: {source}", path.display())]
    CorruptRecord {
        /// File containing the record.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The underlying decode error.
        source: serde_json::Error,
    },

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stream's version counter would overflow.
    #[error("version counter overflow on stream {0}")]
    VersionOverflow(String),
}

impl StoreError {
    /// Coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStreamId { .. }
            | Self::InvalidPayload { .. }
            | Self::InvalidSnapshot { .. }
            | Self::Replay { .. } => ErrorKind::Validation,
            Self::StorageWrite { .. } => ErrorKind::StorageWrite,
            Self::Io { .. } | Self::CorruptRecord { .. } => ErrorKind::Storage,
            Self::Serialization(_) | Self::VersionOverflow(_) => ErrorKind::Internal,
        }
    }
}
