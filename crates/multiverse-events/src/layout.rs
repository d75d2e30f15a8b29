//! On-disk layout of the event store.
//!
//! ```text
//! <data_dir>/
//!     streams/<encoded>.jsonl    one envelope per line, append-only
//!     snapshots/<encoded>.json   latest snapshot of the stream
//! ```
//!
//! Stream ids are percent-encoded into file names: ASCII alphanumerics,
//! `-`, `_` and `.` are kept, every other byte becomes `%XX`. The mapping
//! is reversible, which is what lets [`list_streams`] rediscover streams
//! after a restart.
//!
//! [`list_streams`]: crate::EventStore::list_streams

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// File extension of stream logs.
pub const STREAM_EXTENSION: &str = "jsonl";

/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "json";

/// Resolves stream ids to file paths under a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding stream logs.
    pub fn streams_dir(&self) -> PathBuf {
        self.root.join("streams")
    }

    /// Directory holding snapshots.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Path of the log file for `stream_id`.
    pub fn stream_path(&self, stream_id: &str) -> PathBuf {
        self.streams_dir()
            .join(format!("{}.{STREAM_EXTENSION}", encode_stream_id(stream_id)))
    }

    /// Path of the snapshot file for `stream_id`.
    pub fn snapshot_path(&self, stream_id: &str) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}.{SNAPSHOT_EXTENSION}", encode_stream_id(stream_id)))
    }

    /// Create both directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [self.streams_dir(), self.snapshots_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

/// Reject stream ids that cannot name a stream.
pub fn validate_stream_id(stream_id: &str) -> Result<(), StoreError> {
    if stream_id.trim().is_empty() {
        return Err(StoreError::InvalidStreamId {
            stream_id: stream_id.to_owned(),
            reason: "stream id must not be empty".to_owned(),
        });
    }
    Ok(())
}

/// Encode a stream id into a file-name-safe stem.
pub fn encode_stream_id(stream_id: &str) -> String {
    let mut encoded = String::with_capacity(stream_id.len());
    for byte in stream_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(char::from(byte));
        } else {
            // Writing to a String cannot fail.
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// Decode a file stem produced by [`encode_stream_id`].
///
/// Returns `None` for stems that were not produced by the encoder.
pub fn decode_stream_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(byte) = iter.next() {
        if byte == b'%' {
            let hi = hex_value(iter.next()?)?;
            let lo = hex_value(iter.next()?)?;
            decoded.push(hi.checked_mul(16)?.checked_add(lo)?);
        } else {
            decoded.push(byte);
        }
    }
    String::from_utf8(decoded).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte)
        .to_digit(16)
        .and_then(|digit| u8::try_from(digit).ok())
}
