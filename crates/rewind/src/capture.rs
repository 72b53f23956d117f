//! Capture adapter - bridges a push-based segment source into the chunk store.
//!
//! ## Ownership Model
//!
//! - **Ingestion pipeline** (external): produces finished segments on its own
//!   cadence and pushes them through a [`SegmentSender`]. Never waits.
//! - **Capture adapter**: validates the encoding and appends to the store.
//!   A segment that cannot be stored is dropped, never retried.
//!
//! ## Message Flow
//!
//! ```text
//! pipeline → SegmentSender::try_send(segment)   (full queue: drop + count)
//!          → CaptureAdapter::run() task
//!          → encoding check                     (mismatch: drop + warn)
//!          → ChunkStore::append                 (unavailable: drop + warn)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::primitives::{format_clock, ChunkId, Timestamp};
use crate::store::{ChunkStore, StoreError};

/// The single encoding descriptor the core accepts.
///
/// Comparison ignores ASCII case and all whitespace, including whitespace
/// inside a quoted codec list, so `video/webm;codecs="vp8,opus"` matches
/// `video/webm; codecs="vp8, opus"` and `video/webm;codecs="vp 8,opus"`.
#[derive(Debug, Clone)]
pub struct Encoding {
    descriptor: String,
    normalized: String,
}

impl Encoding {
    pub fn new(descriptor: impl Into<String>) -> Self {
        let descriptor = descriptor.into();
        let normalized = normalize(&descriptor);
        Self {
            descriptor,
            normalized,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.descriptor
    }

    pub fn matches(&self, other: &str) -> bool {
        normalize(other) == self.normalized
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::new(rewindconf::DEFAULT_ENCODING)
    }
}

/// Lowercase and drop every whitespace character, quoted or not.
fn normalize(descriptor: &str) -> String {
    descriptor
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A finished segment as delivered by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Segment {
    pub payload: Bytes,
    pub encoding: String,
    pub captured_at: Timestamp,
}

impl Segment {
    /// A segment stamped with the current wall-clock time.
    pub fn now(payload: Bytes, encoding: impl Into<String>) -> Self {
        Self {
            payload,
            encoding: encoding.into(),
            captured_at: Timestamp::now(),
        }
    }
}

/// Why a segment never made it into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    EncodingMismatch { expected: String, actual: String },
    StoreUnavailable(String),
}

/// Result of delivering one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored(ChunkId),
    Dropped(DropReason),
}

impl CaptureOutcome {
    pub fn chunk_id(&self) -> Option<ChunkId> {
        match self {
            CaptureOutcome::Stored(id) => Some(*id),
            CaptureOutcome::Dropped(_) => None,
        }
    }
}

/// Runtime statistics, updated from the capture path without locking.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub segments_received: AtomicU64,
    pub segments_stored: AtomicU64,
    pub dropped_encoding: AtomicU64,
    pub dropped_store: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub bytes_stored: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStatsSnapshot {
    pub segments_received: u64,
    pub segments_stored: u64,
    pub dropped_encoding: u64,
    pub dropped_store: u64,
    pub queue_overflows: u64,
    pub bytes_stored: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            segments_received: self.segments_received.load(Ordering::Relaxed),
            segments_stored: self.segments_stored.load(Ordering::Relaxed),
            dropped_encoding: self.dropped_encoding.load(Ordering::Relaxed),
            dropped_store: self.dropped_store.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
        }
    }
}

/// Writes delivered segments into the chunk store.
///
/// The store owns the session bounds; the adapter is its only writer.
pub struct CaptureAdapter {
    store: Arc<dyn ChunkStore>,
    encoding: Encoding,
    stats: Arc<CaptureStats>,
    started: AtomicBool,
}

impl CaptureAdapter {
    pub fn new(store: Arc<dyn ChunkStore>, encoding: Encoding) -> Self {
        Self::with_stats(store, encoding, Arc::new(CaptureStats::default()))
    }

    pub fn with_stats(
        store: Arc<dyn ChunkStore>,
        encoding: Encoding,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            store,
            encoding,
            stats,
            started: AtomicBool::new(false),
        }
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    /// Push interface for the ingestion pipeline; stamps the segment now.
    pub fn on_segment_ready(&self, payload: Bytes, encoding: &str) -> CaptureOutcome {
        self.ingest(Segment::now(payload, encoding))
    }

    /// Store one segment, or drop it. Never retries.
    pub fn ingest(&self, segment: Segment) -> CaptureOutcome {
        self.stats.segments_received.fetch_add(1, Ordering::Relaxed);

        if !self.encoding.matches(&segment.encoding) {
            self.stats.dropped_encoding.fetch_add(1, Ordering::Relaxed);
            warn!(
                "dropping segment: encoding {:?} does not match {:?}",
                segment.encoding,
                self.encoding.as_str()
            );
            return CaptureOutcome::Dropped(DropReason::EncodingMismatch {
                expected: self.encoding.as_str().to_string(),
                actual: segment.encoding,
            });
        }

        let size = segment.payload.len() as u64;
        match self.store.append(segment.payload, segment.captured_at) {
            Ok(id) => {
                self.stats.segments_stored.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_stored.fetch_add(size, Ordering::Relaxed);
                if !self.started.swap(true, Ordering::Relaxed) {
                    info!(
                        "capture session started at {} (chunk {})",
                        format_clock(segment.captured_at),
                        id
                    );
                }
                CaptureOutcome::Stored(id)
            }
            Err(StoreError::Unavailable(reason)) => {
                self.stats.dropped_store.fetch_add(1, Ordering::Relaxed);
                warn!("dropping segment: {}", reason);
                CaptureOutcome::Dropped(DropReason::StoreUnavailable(reason))
            }
        }
    }

    /// Consume segments until the channel closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut rx: SegmentReceiver, cancel: CancellationToken) {
        info!("capture adapter running ({})", self.encoding.as_str());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("capture adapter shutting down");
                    break;
                }
                segment = rx.rx.recv() => {
                    match segment {
                        Some(segment) => {
                            self.ingest(segment);
                        }
                        None => {
                            debug!("segment channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Producer half of the ingestion queue. Never blocks.
#[derive(Clone)]
pub struct SegmentSender {
    tx: mpsc::Sender<Segment>,
    stats: Arc<CaptureStats>,
}

impl SegmentSender {
    /// Queue a segment; returns false if it was dropped.
    pub fn try_send(&self, segment: Segment) -> bool {
        match self.tx.try_send(segment) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                warn!("capture queue full, dropping segment");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("capture queue closed, dropping segment");
                false
            }
        }
    }

    /// Push interface mirroring [`CaptureAdapter::on_segment_ready`].
    pub fn on_segment_ready(&self, payload: Bytes, encoding: &str) -> bool {
        self.try_send(Segment::now(payload, encoding))
    }
}

/// Consumer half of the ingestion queue.
pub struct SegmentReceiver {
    rx: mpsc::Receiver<Segment>,
}

/// Create a bounded ingestion queue reporting overflows into `stats`.
pub fn channel(depth: usize, stats: Arc<CaptureStats>) -> (SegmentSender, SegmentReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (SegmentSender { tx, stats }, SegmentReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const WEBM: &str = r#"video/webm; codecs="vp8, opus""#;

    fn adapter() -> (Arc<MemoryStore>, CaptureAdapter) {
        let store = Arc::new(MemoryStore::fresh());
        let adapter = CaptureAdapter::new(store.clone(), Encoding::new(WEBM));
        (store, adapter)
    }

    fn segment(ts: u64, encoding: &str) -> Segment {
        Segment {
            payload: Bytes::from_static(b"frame-data"),
            encoding: encoding.to_string(),
            captured_at: Timestamp(ts),
        }
    }

    #[test]
    fn test_encoding_match_ignores_spacing_and_case() {
        let enc = Encoding::new(WEBM);
        assert!(enc.matches(r#"VIDEO/WEBM;codecs="vp8,opus""#));
        assert!(enc.matches(r#"video/webm;codecs=" vp8 , opus ""#));
        assert!(!enc.matches(r#"video/webm; codecs="vp8""#));
        assert!(!enc.matches("video/mp4"));
    }

    #[test]
    fn test_ingest_stores_and_latches_bounds() {
        let (store, adapter) = adapter();

        assert_eq!(adapter.ingest(segment(1000, WEBM)), CaptureOutcome::Stored(ChunkId(1)));
        assert_eq!(adapter.ingest(segment(3000, WEBM)), CaptureOutcome::Stored(ChunkId(2)));

        let bounds = store.bounds().unwrap().unwrap();
        assert_eq!(bounds.start, Timestamp(1000));
        assert_eq!(bounds.last, Timestamp(3000));

        let stats = adapter.stats().snapshot();
        assert_eq!(stats.segments_stored, 2);
        assert_eq!(stats.bytes_stored, 20);
    }

    #[test]
    fn test_mismatched_encoding_is_dropped() {
        let (store, adapter) = adapter();

        let outcome = adapter.ingest(segment(1000, "video/mp4"));
        assert!(matches!(
            outcome,
            CaptureOutcome::Dropped(DropReason::EncodingMismatch { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(adapter.stats().snapshot().dropped_encoding, 1);

        // Capture continues with the next segment
        assert_eq!(adapter.ingest(segment(2000, WEBM)), CaptureOutcome::Stored(ChunkId(1)));
    }

    #[test]
    fn test_store_failure_drops_without_retry() {
        let (store, adapter) = adapter();
        adapter.ingest(segment(1000, WEBM));
        store.fail("write error");

        let outcome = adapter.ingest(segment(2000, WEBM));
        assert!(matches!(
            outcome,
            CaptureOutcome::Dropped(DropReason::StoreUnavailable(_))
        ));
        assert_eq!(adapter.stats().snapshot().dropped_store, 1);
        assert_eq!(adapter.stats().snapshot().segments_received, 2);
    }

    #[test]
    fn test_on_segment_ready_stamps_now() {
        let (store, adapter) = adapter();
        let before = Timestamp::now();
        let outcome = adapter.on_segment_ready(Bytes::from_static(b"x"), WEBM);
        assert_eq!(outcome.chunk_id(), Some(ChunkId(1)));

        let chunk = store.get(ChunkId(1)).unwrap().unwrap();
        assert!(chunk.timestamp >= before);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let stats = Arc::new(CaptureStats::default());
        let (tx, _rx) = channel(1, stats.clone());

        assert!(tx.try_send(segment(1000, WEBM)));
        assert!(!tx.try_send(segment(2000, WEBM)));
        assert_eq!(stats.snapshot().queue_overflows, 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_closed() {
        let (store, adapter) = adapter();
        let adapter = Arc::new(adapter);
        let (tx, rx) = channel(4, adapter.stats().clone());

        tx.try_send(segment(1000, WEBM));
        tx.try_send(segment(2000, "audio/ogg"));
        tx.try_send(segment(3000, WEBM));
        drop(tx);

        adapter.clone().run(rx, CancellationToken::new()).await;

        assert_eq!(store.len(), 2);
        let stats = adapter.stats().snapshot();
        assert_eq!(stats.segments_received, 3);
        assert_eq!(stats.dropped_encoding, 1);
    }
}
