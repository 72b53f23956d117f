//! Chunk store: append-only, id- and timestamp-indexed media segments.
//!
//! The store lives for one process run. Nothing survives a restart: opening
//! a store always starts from an empty state with ids beginning at 1.
//!
//! Layout:
//! ```text
//! chunks:  BTreeMap<ChunkId, Chunk>           exact lookup, ordered ranges
//! by_time: BTreeSet<(Timestamp, ChunkId)>     nearest-at-or-before lookup
//!
//! nearest_at_or_before(1004) with ts [1000, 1002, 1004, 1004, 1006]:
//!   by_time.range(..=(1004, MAX)).next_back() -> (1004, #4)
//! ```
//!
//! Timestamps are kept non-decreasing in id order, so the last entry at or
//! below a target in `by_time` is also the highest id at or below it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::primitives::{Chunk, ChunkId, SessionBounds, Timestamp};

/// Errors from chunk store operations.
///
/// A chunk that is not (yet) stored is not an error: lookups return
/// `Ok(None)` for that case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("chunk store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for chunk storage backends.
///
/// Implementations must be cheap to call from both the capture task and the
/// playback task; chunk payloads are immutable once stored.
pub trait ChunkStore: Send + Sync {
    /// Store a new chunk and return its assigned id.
    fn append(&self, payload: Bytes, timestamp: Timestamp) -> Result<ChunkId, StoreError>;

    /// Exact lookup. `Ok(None)` if the id was never stored or was evicted.
    fn get(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError>;

    /// The highest-id chunk with `timestamp <= target`.
    ///
    /// `Ok(None)` means every stored chunk is newer than `target`.
    fn nearest_at_or_before(&self, target: Timestamp) -> Result<Option<Chunk>, StoreError>;

    /// Chunks with ids in `start..=end`, in id order. Empty if none.
    fn range(&self, start: ChunkId, end: ChunkId) -> Result<Vec<Chunk>, StoreError>;

    /// Session bounds, `None` until the first chunk is stored.
    fn bounds(&self) -> Result<Option<SessionBounds>, StoreError>;

    /// Oldest chunk still retained.
    fn oldest(&self) -> Result<Option<Chunk>, StoreError>;

    /// Number of chunks currently retained.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the store accepts operations right now.
    fn is_available(&self) -> bool;
}

/// How a store treats data from earlier runs when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPolicy {
    /// Discard everything and start a new session at id 1.
    #[default]
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreState {
    Uninitialized,
    Open,
    Failed(String),
}

#[derive(Debug)]
struct Inner {
    state: StoreState,
    chunks: BTreeMap<ChunkId, Chunk>,
    by_time: BTreeSet<(Timestamp, ChunkId)>,
    next_id: ChunkId,
    bounds: Option<SessionBounds>,
    max_chunks: Option<usize>,
    bytes_retained: u64,
}

impl Inner {
    fn new(max_chunks: Option<usize>) -> Self {
        Self {
            state: StoreState::Uninitialized,
            chunks: BTreeMap::new(),
            by_time: BTreeSet::new(),
            next_id: ChunkId::FIRST,
            bounds: None,
            max_chunks,
            bytes_retained: 0,
        }
    }

    fn check_open(&self) -> Result<(), StoreError> {
        match &self.state {
            StoreState::Open => Ok(()),
            StoreState::Uninitialized => {
                Err(StoreError::Unavailable("store not initialized".to_string()))
            }
            StoreState::Failed(reason) => Err(StoreError::Unavailable(reason.clone())),
        }
    }

    fn evict_over_capacity(&mut self) {
        let Some(max) = self.max_chunks else {
            return;
        };
        while self.chunks.len() > max {
            let Some((id, chunk)) = self.chunks.pop_first() else {
                break;
            };
            self.by_time.remove(&(chunk.timestamp, id));
            self.bytes_retained = self.bytes_retained.saturating_sub(chunk.len() as u64);
            debug!("evicted chunk {} from store (retention {})", id, max);
        }
    }
}

/// In-memory chunk store for a single process run.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an uninitialized store. Every operation fails with
    /// `StoreError::Unavailable` until [`MemoryStore::open`] is called.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new(None)),
        }
    }

    /// Create an uninitialized store that retains at most `max_chunks`.
    pub fn with_retention(max_chunks: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(Inner::new(max_chunks)),
        }
    }

    /// Create and open a fresh store.
    pub fn fresh() -> Self {
        let mut inner = Inner::new(None);
        inner.state = StoreState::Open;
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Open the store according to `policy`.
    pub fn open(&self, policy: InitPolicy) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        match policy {
            InitPolicy::Fresh => {
                let discarded = inner.chunks.len();
                let max_chunks = inner.max_chunks;
                *inner = Inner::new(max_chunks);
                inner.state = StoreState::Open;
                info!(
                    "chunk store opened fresh (discarded {} chunks from a previous session)",
                    discarded
                );
            }
        }
        Ok(())
    }

    /// Mark the store broken. All later operations fail until reopened.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        match self.inner.write() {
            Ok(mut inner) => {
                warn!("chunk store failed: {}", reason);
                inner.state = StoreState::Failed(reason);
            }
            Err(_) => warn!("chunk store failed while already poisoned: {}", reason),
        }
    }

    /// Total payload bytes currently retained.
    pub fn bytes_retained(&self) -> u64 {
        self.inner.read().map(|i| i.bytes_retained).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("store index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("store index lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore for MemoryStore {
    fn append(&self, payload: Bytes, timestamp: Timestamp) -> Result<ChunkId, StoreError> {
        let mut inner = self.write()?;
        inner.check_open()?;

        let id = inner.next_id;
        let timestamp = match inner.bounds {
            Some(bounds) if timestamp < bounds.last => {
                warn!(
                    "chunk {} timestamp {} is older than {}, clamping",
                    id, timestamp, bounds.last
                );
                bounds.last
            }
            _ => timestamp,
        };

        let size = payload.len();
        inner.chunks.insert(
            id,
            Chunk {
                id,
                timestamp,
                payload,
            },
        );
        inner.by_time.insert((timestamp, id));
        inner.next_id = id.next();
        inner.bytes_retained += size as u64;

        inner.bounds = Some(match inner.bounds {
            Some(bounds) => SessionBounds {
                last: timestamp,
                last_id: id,
                ..bounds
            },
            None => SessionBounds {
                start: timestamp,
                last: timestamp,
                first_id: id,
                last_id: id,
            },
        });

        inner.evict_over_capacity();

        debug!("stored chunk {} at {} ({} bytes)", id, timestamp, size);
        Ok(id)
    }

    fn get(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError> {
        let inner = self.read()?;
        inner.check_open()?;
        Ok(inner.chunks.get(&id).cloned())
    }

    fn nearest_at_or_before(&self, target: Timestamp) -> Result<Option<Chunk>, StoreError> {
        let inner = self.read()?;
        inner.check_open()?;

        let found = inner
            .by_time
            .range(..=(target, ChunkId(u64::MAX)))
            .next_back()
            .and_then(|(_, id)| inner.chunks.get(id).cloned());

        if found.is_none() {
            debug!("no chunk at or before {}", target);
        }
        Ok(found)
    }

    fn range(&self, start: ChunkId, end: ChunkId) -> Result<Vec<Chunk>, StoreError> {
        let inner = self.read()?;
        inner.check_open()?;

        if start > end {
            return Ok(Vec::new());
        }
        Ok(inner
            .chunks
            .range(start..=end)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    fn bounds(&self) -> Result<Option<SessionBounds>, StoreError> {
        let inner = self.read()?;
        inner.check_open()?;
        Ok(inner.bounds)
    }

    fn oldest(&self) -> Result<Option<Chunk>, StoreError> {
        let inner = self.read()?;
        inner.check_open()?;
        Ok(inner.chunks.values().next().cloned())
    }

    fn len(&self) -> usize {
        self.inner.read().map(|i| i.chunks.len()).unwrap_or(0)
    }

    fn is_available(&self) -> bool {
        self.inner
            .read()
            .map(|i| i.state == StoreState::Open)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u64) -> Bytes {
        Bytes::from(format!("segment-{}", n))
    }

    fn store_with(timestamps: &[u64]) -> MemoryStore {
        let store = MemoryStore::fresh();
        for (i, ts) in timestamps.iter().enumerate() {
            store.append(payload(i as u64), Timestamp(*ts)).unwrap();
        }
        store
    }

    #[test]
    fn test_first_append_sets_bounds() {
        let store = MemoryStore::fresh();
        let id = store.append(payload(0), Timestamp(1000)).unwrap();

        assert_eq!(id, ChunkId(1));
        let bounds = store.bounds().unwrap().unwrap();
        assert_eq!(bounds.start, Timestamp(1000));
        assert_eq!(bounds.last, Timestamp(1000));
    }

    #[test]
    fn test_ids_are_gapless_in_append_order() {
        let store = MemoryStore::fresh();
        let ids: Vec<_> = (0..50)
            .map(|i| store.append(payload(i), Timestamp(1000 + i * 7)).unwrap())
            .collect();

        let expected: Vec<_> = (1..=50).map(ChunkId).collect();
        assert_eq!(ids, expected);
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_get_by_id() {
        let store = store_with(&[1000, 2000]);

        let chunk = store.get(ChunkId(2)).unwrap().unwrap();
        assert_eq!(chunk.timestamp, Timestamp(2000));
        assert_eq!(chunk.payload, payload(1));

        // Not yet produced is a normal outcome
        assert_eq!(store.get(ChunkId(3)).unwrap(), None);
    }

    #[test]
    fn test_nearest_prefers_highest_id_on_tie() {
        let store = store_with(&[1000, 1002, 1004, 1004, 1006]);

        let chunk = store.nearest_at_or_before(Timestamp(1004)).unwrap().unwrap();
        assert_eq!(chunk.id, ChunkId(4));

        let chunk = store.nearest_at_or_before(Timestamp(1005)).unwrap().unwrap();
        assert_eq!(chunk.id, ChunkId(4));

        let chunk = store.nearest_at_or_before(Timestamp(9999)).unwrap().unwrap();
        assert_eq!(chunk.id, ChunkId(5));
    }

    #[test]
    fn test_nearest_matches_backward_scan() {
        let timestamps = [1000, 1000, 1500, 2000, 2000, 2000, 2600, 3100, 3100];
        let store = store_with(&timestamps);

        for target in (900..3300).step_by(50) {
            let expected = timestamps
                .iter()
                .enumerate()
                .rev()
                .find(|(_, ts)| **ts <= target)
                .map(|(i, _)| ChunkId(i as u64 + 1));

            let found = store
                .nearest_at_or_before(Timestamp(target))
                .unwrap()
                .map(|c| c.id);
            assert_eq!(found, expected, "target {}", target);
        }
    }

    #[test]
    fn test_nearest_before_start_is_none() {
        let store = store_with(&[1000, 2000]);
        assert_eq!(store.nearest_at_or_before(Timestamp(999)).unwrap(), None);
    }

    #[test]
    fn test_range_inclusive_and_empty() {
        let store = store_with(&[1000, 2000, 3000, 4000]);

        let ids: Vec<_> = store
            .range(ChunkId(2), ChunkId(3))
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![ChunkId(2), ChunkId(3)]);

        assert!(store.range(ChunkId(10), ChunkId(20)).unwrap().is_empty());
        assert!(store.range(ChunkId(3), ChunkId(2)).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_store_is_open_and_empty() {
        let store = MemoryStore::fresh();
        assert!(store.is_available());
        assert!(store.is_empty());
        assert_eq!(store.bounds().unwrap(), None);

        let first = store.append(payload(0), Timestamp(1000)).unwrap();
        assert_eq!(first, ChunkId(1));
    }

    #[test]
    fn test_uninitialized_store_is_unavailable() {
        let store = MemoryStore::new();
        assert!(!store.is_available());
        assert!(matches!(
            store.append(payload(0), Timestamp(1000)),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get(ChunkId(1)).is_err());
    }

    #[test]
    fn test_failed_store_rejects_operations() {
        let store = store_with(&[1000]);
        store.fail("disk on fire");

        let err = store.append(payload(1), Timestamp(2000)).unwrap_err();
        assert_eq!(err, StoreError::Unavailable("disk on fire".to_string()));
        assert!(store.nearest_at_or_before(Timestamp(1000)).is_err());
    }

    #[test]
    fn test_open_fresh_discards_previous_session() {
        let store = store_with(&[1000, 2000, 3000]);
        store.open(InitPolicy::Fresh).unwrap();

        assert!(store.is_empty());
        assert_eq!(store.bounds().unwrap(), None);
        assert_eq!(store.append(payload(9), Timestamp(5000)).unwrap(), ChunkId(1));
    }

    #[test]
    fn test_backwards_timestamp_is_clamped() {
        let store = store_with(&[2000, 1500]);

        let chunk = store.get(ChunkId(2)).unwrap().unwrap();
        assert_eq!(chunk.timestamp, Timestamp(2000));

        let nearest = store.nearest_at_or_before(Timestamp(2000)).unwrap().unwrap();
        assert_eq!(nearest.id, ChunkId(2));
    }

    #[test]
    fn test_retention_evicts_oldest_without_reusing_ids() {
        let store = MemoryStore::with_retention(Some(3));
        store.open(InitPolicy::Fresh).unwrap();
        for i in 0..5 {
            store.append(payload(i), Timestamp(1000 + i * 1000)).unwrap();
        }

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(ChunkId(1)).unwrap(), None);
        assert_eq!(store.oldest().unwrap().unwrap().id, ChunkId(3));

        // Session start still reflects the first chunk ever stored
        let bounds = store.bounds().unwrap().unwrap();
        assert_eq!(bounds.start, Timestamp(1000));
        assert_eq!(bounds.last_id, ChunkId(5));

        // Target before retained data resolves to nothing
        assert_eq!(store.nearest_at_or_before(Timestamp(2500)).unwrap(), None);

        assert_eq!(store.append(payload(5), Timestamp(6000)).unwrap(), ChunkId(6));
    }

    #[test]
    fn test_bytes_retained_tracks_eviction() {
        let store = MemoryStore::with_retention(Some(1));
        store.open(InitPolicy::Fresh).unwrap();
        store.append(Bytes::from_static(b"aaaa"), Timestamp(1)).unwrap();
        store.append(Bytes::from_static(b"bb"), Timestamp(2)).unwrap();
        assert_eq!(store.bytes_retained(), 2);
    }
}
