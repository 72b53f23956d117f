//! Bulk export of captured chunks into a single clip.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tracing::debug;

use crate::primitives::{ChunkId, Timestamp};
use crate::store::{ChunkStore, StoreError};

/// Contiguous run of chunks concatenated into one payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedClip {
    pub first_id: ChunkId,
    pub last_id: ChunkId,
    pub chunk_count: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(skip)]
    pub payload: Bytes,
}

impl ExportedClip {
    pub fn duration_secs(&self) -> f64 {
        self.end.secs_since(self.start)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Concatenate every retained chunk with an id in `[start, end]`.
///
/// Returns `Ok(None)` when no chunk falls in the range.
pub fn export_range(
    store: &dyn ChunkStore,
    start: ChunkId,
    end: ChunkId,
) -> Result<Option<ExportedClip>, StoreError> {
    let chunks = store.range(start, end)?;
    let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
        debug!("export {}..={} matched no chunks", start, end);
        return Ok(None);
    };

    let total: usize = chunks.iter().map(|c| c.len()).sum();
    let mut payload = BytesMut::with_capacity(total);
    for chunk in &chunks {
        payload.extend_from_slice(&chunk.payload);
    }

    let clip = ExportedClip {
        first_id: first.id,
        last_id: last.id,
        chunk_count: chunks.len(),
        start: first.timestamp,
        end: last.timestamp,
        payload: payload.freeze(),
    };
    debug!(
        "exported chunks {}..={} ({} bytes)",
        clip.first_id,
        clip.last_id,
        clip.len()
    );
    Ok(Some(clip))
}

/// Export up to `radius` chunks either side of `cursor`.
pub fn export_around(
    store: &dyn ChunkStore,
    cursor: ChunkId,
    radius: u64,
) -> Result<Option<ExportedClip>, StoreError> {
    export_range(store, cursor.saturating_sub(radius), cursor.saturating_add(radius))
}
