//! Append-only, per-stream event store.
//!
//! Every state change is captured as an immutable [`EventEnvelope`]
//! appended to its stream's log file. Versions are assigned per stream,
//! start at 1 and never skip. The durable write always happens before the
//! in-memory index is touched, so a failed append is invisible to readers.
//!
//! # Concurrency
//!
//! A single writer per stream is assumed: two tasks appending to the same
//! stream at the same time may be assigned the same version, so callers
//! that need strict ordering under concurrent writers must serialize their
//! appends. Appends to distinct streams need no coordination. The index
//! lock is never held across file I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use multiverse_types::{
    CorrelationId, EventEnvelope, EventId, EventType, MaterializedState, Payload, SYSTEM_ACTOR,
    Snapshot, SnapshotId,
};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::layout::{self, STREAM_EXTENSION, StoreLayout};
use crate::replay;
use crate::snapshot_store::{SnapshotStore, read_optional};

/// Optional metadata attached to an append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendMetadata {
    /// Correlation id to group the event with; generated when absent.
    pub correlation_id: Option<CorrelationId>,
    /// Identity of the caller; `"system"` when absent.
    pub actor: Option<String>,
}

impl AppendMetadata {
    /// Metadata carrying only an actor.
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            actor: Some(actor.into()),
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Cached contents of one non-empty stream.
#[derive(Debug)]
struct StreamLog {
    events: Vec<EventEnvelope>,
    /// State after the last event. `None` when the log loaded from disk
    /// cannot be replayed.
    head_state: Option<MaterializedState>,
}

/// Version, timestamp and state after the last event of a stream.
struct StreamHead {
    version: u64,
    timestamp: Option<DateTime<Utc>>,
    state: Option<MaterializedState>,
}

/// Durable event store backed by one JSON-lines file per stream.
#[derive(Debug)]
pub struct EventStore {
    layout: StoreLayout,
    snapshots: SnapshotStore,
    /// Cached non-empty streams, loaded lazily from disk on first touch.
    index: RwLock<HashMap<String, StreamLog>>,
}

impl EventStore {
    /// Open (or create) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directories cannot be created.
    pub async fn open(data_dir: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(data_dir);
        layout.ensure_dirs().await?;
        tracing::info!(data_dir = %layout.root().display(), "Event store opened");
        Ok(Self {
            snapshots: SnapshotStore::new(layout.clone()),
            layout,
            index: RwLock::new(HashMap::new()),
        })
    }

    /// The store's on-disk layout.
    pub const fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Append an event to `stream_id`.
    ///
    /// Assigns the next version, a fresh UTC timestamp (never earlier than
    /// the previous event's), a fresh event id, and the caller's correlation
    /// id or a new one. The envelope is written and synced to disk before
    /// the in-memory index is updated.
    ///
    /// The event is applied to the stream's current state before it is
    /// written, so an accepted append never leaves the stream unreplayable.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidStreamId`] / [`StoreError::InvalidPayload`]
    ///   if the input is malformed or cannot be applied to the current
    ///   state (an increment of a non-numeric value, an integer overflow);
    ///   nothing is written.
    /// - [`StoreError::StorageWrite`] if the durable append fails; the
    ///   index is left untouched.
    pub async fn append_event(
        &self,
        stream_id: &str,
        event_type: EventType,
        payload: Payload,
        metadata: AppendMetadata,
    ) -> Result<EventEnvelope, StoreError> {
        layout::validate_stream_id(stream_id)?;
        replay::validate_payload(stream_id, &event_type, &payload)?;

        let head = self.head(stream_id).await?;
        let version = head
            .version
            .checked_add(1)
            .ok_or_else(|| StoreError::VersionOverflow(stream_id.to_owned()))?;
        let now = Utc::now();
        let timestamp_utc = head.timestamp.map_or(now, |previous| previous.max(now));

        let envelope = EventEnvelope {
            stream_id: stream_id.to_owned(),
            event_type,
            payload,
            timestamp_utc,
            event_id: EventId::new(),
            correlation_id: metadata.correlation_id.unwrap_or_default(),
            actor: metadata.actor.unwrap_or_else(|| SYSTEM_ACTOR.to_owned()),
            version,
        };

        let next_state = head
            .state
            .map(|mut state| replay::apply_event(&mut state, &envelope).map(|()| state))
            .transpose()
            .map_err(|err| StoreError::InvalidPayload {
                stream_id: stream_id.to_owned(),
                event_type: envelope.event_type.to_string(),
                reason: match err {
                    StoreError::Replay { reason, .. } => reason,
                    other => other.to_string(),
                },
            })?;

        self.write_durably(&envelope).await?;

        let mut index = self.index.write().await;
        let log = index
            .entry(stream_id.to_owned())
            .or_insert_with(|| StreamLog {
                events: Vec::new(),
                head_state: None,
            });
        log.events.push(envelope.clone());
        log.head_state = next_state;
        drop(index);

        tracing::debug!(
            stream_id,
            version,
            event_type = %envelope.event_type,
            correlation_id = %envelope.correlation_id,
            "Appended event"
        );
        Ok(envelope)
    }

    /// Read events of `stream_id` with `version >= from_version`, in order.
    ///
    /// An unknown stream reads as empty.
    pub async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        self.ensure_loaded(stream_id).await?;
        let index = self.index.read().await;
        Ok(index
            .get(stream_id)
            .map(|log| {
                log.events
                    .iter()
                    .filter(|event| event.version >= from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Read events of `stream_id` appended at or before `timestamp`.
    ///
    /// Timestamps never decrease within a stream, so the result is always
    /// a prefix of [`read_stream`](Self::read_stream).
    pub async fn read_as_of(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        self.ensure_loaded(stream_id).await?;
        let index = self.index.read().await;
        Ok(index
            .get(stream_id)
            .map(|log| {
                log.events
                    .iter()
                    .take_while(|event| event.timestamp_utc <= timestamp)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Rebuild the state of `stream_id`.
    ///
    /// Starts from `snapshot` (or an empty state at version 0) and applies
    /// every later event in version order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSnapshot`] if the snapshot belongs to
    /// another stream or is ahead of the log, or [`StoreError::Replay`] if
    /// an event cannot be applied.
    pub async fn replay_state(
        &self,
        stream_id: &str,
        snapshot: Option<&Snapshot>,
    ) -> Result<MaterializedState, StoreError> {
        let mut state = match snapshot {
            Some(snapshot) => {
                if snapshot.stream_id != stream_id || snapshot.state.stream_id != stream_id {
                    return Err(StoreError::InvalidSnapshot {
                        stream_id: stream_id.to_owned(),
                        reason: format!("snapshot belongs to stream {}", snapshot.stream_id),
                    });
                }
                snapshot.state.clone()
            }
            None => MaterializedState::empty(stream_id),
        };

        let from_version = state.version.saturating_add(1);
        let events = self.read_stream(stream_id, from_version).await?;
        if snapshot.is_some() && events.is_empty() {
            let head = self.stream_version(stream_id).await?;
            if state.version > head {
                return Err(StoreError::InvalidSnapshot {
                    stream_id: stream_id.to_owned(),
                    reason: format!(
                        "snapshot version {} is ahead of stream head {head}",
                        state.version
                    ),
                });
            }
        }
        replay::apply_all(&mut state, &events)?;
        Ok(state)
    }

    /// Persist `state` as the latest snapshot of `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSnapshot`] if the state belongs to
    /// another stream or is ahead of the log, or
    /// [`StoreError::StorageWrite`] if it cannot be written.
    pub async fn create_snapshot(
        &self,
        stream_id: &str,
        state: &MaterializedState,
    ) -> Result<Snapshot, StoreError> {
        layout::validate_stream_id(stream_id)?;
        if state.stream_id != stream_id {
            return Err(StoreError::InvalidSnapshot {
                stream_id: stream_id.to_owned(),
                reason: format!("state was materialized from stream {}", state.stream_id),
            });
        }
        let head = self.stream_version(stream_id).await?;
        if state.version > head {
            return Err(StoreError::InvalidSnapshot {
                stream_id: stream_id.to_owned(),
                reason: format!(
                    "state version {} is ahead of stream head {head}",
                    state.version
                ),
            });
        }

        let snapshot = Snapshot {
            stream_id: stream_id.to_owned(),
            state: state.clone(),
            timestamp_utc: Utc::now(),
            snapshot_id: SnapshotId::new(),
        };
        self.snapshots.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// The latest snapshot of `stream_id`, if any.
    pub async fn get_latest_snapshot(
        &self,
        stream_id: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        self.snapshots.latest(stream_id).await
    }

    /// Current head version of `stream_id` (0 for an empty stream).
    pub async fn stream_version(&self, stream_id: &str) -> Result<u64, StoreError> {
        self.ensure_loaded(stream_id).await?;
        let index = self.index.read().await;
        Ok(index
            .get(stream_id)
            .and_then(|log| log.events.last())
            .map_or(0, |last| last.version))
    }

    /// All stream ids with a log on disk, sorted.
    ///
    /// Derived from the storage directory rather than the in-memory cache
    /// so streams written by a previous process are listed too.
    pub async fn list_streams(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.streams_dir();
        let io_error = |source| StoreError::Io {
            path: dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error)?;

        let mut streams = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(STREAM_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match layout::decode_stream_id(stem) {
                Some(stream_id) => streams.push(stream_id),
                None => tracing::warn!(path = %path.display(), "Ignoring unrecognised stream file"),
            }
        }
        streams.sort();
        Ok(streams)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Version, timestamp and state after the last event in `stream_id`.
    ///
    /// The state is `None` only for a stream loaded from a log that cannot
    /// be replayed.
    async fn head(&self, stream_id: &str) -> Result<StreamHead, StoreError> {
        self.ensure_loaded(stream_id).await?;
        let index = self.index.read().await;
        let Some(log) = index.get(stream_id) else {
            return Ok(StreamHead {
                version: 0,
                timestamp: None,
                state: Some(MaterializedState::empty(stream_id)),
            });
        };
        let (version, timestamp) = log
            .events
            .last()
            .map_or((0, None), |last| (last.version, Some(last.timestamp_utc)));
        Ok(StreamHead {
            version,
            timestamp,
            state: log.head_state.clone(),
        })
    }

    /// Load `stream_id` from disk into the index if it is not cached yet.
    ///
    /// Streams with no events are not cached, so reads of unknown ids leave
    /// the index unchanged.
    async fn ensure_loaded(&self, stream_id: &str) -> Result<(), StoreError> {
        if self.index.read().await.contains_key(stream_id) {
            return Ok(());
        }

        let events = self.load_from_disk(stream_id).await?;
        if events.is_empty() {
            return Ok(());
        }

        let mut state = MaterializedState::empty(stream_id);
        let head_state = replay::apply_all(&mut state, &events)
            .inspect_err(|err| {
                tracing::warn!(stream_id, error = %err, "Loaded stream cannot be replayed");
            })
            .ok()
            .map(|()| state);
        tracing::debug!(stream_id, count = events.len(), "Loaded stream from disk");

        // Another task may have loaded it meanwhile; keep whichever is first.
        self.index
            .write()
            .await
            .entry(stream_id.to_owned())
            .or_insert(StreamLog { events, head_state });
        Ok(())
    }

    async fn load_from_disk(&self, stream_id: &str) -> Result<Vec<EventEnvelope>, StoreError> {
        let path = self.layout.stream_path(stream_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };

        let mut events: Vec<EventEnvelope> = Vec::new();
        for (index, line) in bytes.split(|byte| *byte == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let line_number = index.saturating_add(1);
            let envelope: EventEnvelope =
                serde_json::from_slice(line).map_err(|source| StoreError::CorruptRecord {
                    path: path.clone(),
                    line: line_number,
                    source,
                })?;
            let expected = events.last().map_or(1, |last| last.version.saturating_add(1));
            if envelope.version != expected {
                return Err(StoreError::Replay {
                    stream_id: stream_id.to_owned(),
                    version: envelope.version,
                    reason: format!("log is not gapless: expected version {expected}"),
                });
            }
            events.push(envelope);
        }
        Ok(events)
    }

    /// Append one line to the stream's log and sync it to disk.
    ///
    /// On failure the file is truncated back to its previous length so a
    /// partial line never survives to be read back.
    async fn write_durably(&self, envelope: &EventEnvelope) -> Result<(), StoreError> {
        let path = self.layout.stream_path(&envelope.stream_id);
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');

        let write_error = |source| StoreError::StorageWrite {
            stream_id: envelope.stream_id.clone(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_error)?;
        let offset = file.metadata().await.map_err(write_error)?.len();

        let mut written = file.write_all(&line).await;
        if written.is_ok() {
            written = file.sync_data().await;
        }

        if let Err(source) = written {
            if let Err(rollback) = file.set_len(offset).await {
                tracing::error!(
                    stream_id = %envelope.stream_id,
                    path = %path.display(),
                    error = %rollback,
                    "Failed to roll back partial append"
                );
            }
            return Err(write_error(source));
        }
        Ok(())
    }
}
