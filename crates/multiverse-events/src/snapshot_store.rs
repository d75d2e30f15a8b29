//! Snapshot persistence.
//!
//! One JSON object per stream, stored beside the stream's log. Saving a
//! snapshot replaces the previous one atomically (write to a temporary
//! file, then rename), so a crash mid-write leaves the old snapshot intact.

use std::path::Path;

use multiverse_types::Snapshot;

use crate::error::StoreError;
use crate::layout::StoreLayout;

/// Operations on the `snapshots/` directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: StoreLayout,
}

impl SnapshotStore {
    /// Create a snapshot store over the given layout.
    pub const fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Persist `snapshot` as the latest snapshot of its stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageWrite`] if the file cannot be written.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let path = self.layout.snapshot_path(&snapshot.stream_id);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        let write_error = |source: std::io::Error| StoreError::StorageWrite {
            stream_id: snapshot.stream_id.clone(),
            source,
        };
        tokio::fs::write(&tmp_path, &bytes).await.map_err(write_error)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(write_error)?;

        tracing::debug!(
            stream_id = %snapshot.stream_id,
            version = snapshot.version(),
            snapshot_id = %snapshot.snapshot_id,
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load the latest snapshot of `stream_id`, if one was ever saved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::CorruptRecord`] if it cannot be decoded.
    pub async fn latest(&self, stream_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let path = self.layout.snapshot_path(stream_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&bytes).map_err(|source| {
            StoreError::CorruptRecord {
                path: path.clone(),
                line: 1,
                source,
            }
        })?;
        Ok(Some(snapshot))
    }
}

/// Read a file, treating "not found" as `None`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use multiverse_types::{MaterializedState, SnapshotId};
    use serde_json::json;

    use super::*;

    fn snapshot(stream_id: &str, version: u64) -> Snapshot {
        let mut state = MaterializedState::empty(stream_id);
        state.version = version;
        state.values.insert("hp".to_owned(), json!(version));
        Snapshot {
            stream_id: stream_id.to_owned(),
            state,
            timestamp_utc: Utc::now(),
            snapshot_id: SnapshotId::new(),
        }
    }

    async fn store(dir: &tempfile::TempDir) -> SnapshotStore {
        let layout = StoreLayout::new(dir.path());
        layout.ensure_dirs().await.unwrap();
        SnapshotStore::new(layout)
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(store.latest("entity/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_snapshot_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.save(&snapshot("entity/1", 3)).await.unwrap();
        let newer = snapshot("entity/1", 8);
        store.save(&newer).await.unwrap();

        let loaded = store.latest("entity/1").await.unwrap();
        assert_eq!(loaded, Some(newer));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let path = StoreLayout::new(dir.path()).snapshot_path("entity/1");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = store.latest("entity/1").await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }
}
