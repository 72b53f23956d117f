//! End-to-end tests for a live session
//!
//! Capture, storage, and playback run on their own tasks against a
//! synthetic source. Time is paused so every timer fires deterministically.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rewind::{
    export_range, ChunkId, ChunkStore, MemoryStore, Renderer, SeekOutcome, Session,
    SessionHandles, SimRenderer, SyntheticSource,
};
use rewindconf::RewindConfig;
use tokio_util::sync::CancellationToken;

struct Harness {
    session: SessionHandles,
    renderer: SimRenderer,
    store: Arc<MemoryStore>,
}

/// Start a session fed by a synthetic source, with the playhead moving in
/// real (virtual) time.
fn start(config: RewindConfig) -> Harness {
    let tick = Duration::from_millis(config.playback.tick_interval_ms);
    let store = Arc::new(MemoryStore::with_retention(config.capture.max_chunks));
    let renderer = SimRenderer::new(tick.as_secs_f64());
    let session = Session::start(&config, store.clone(), Arc::new(renderer.clone())).unwrap();
    let cancel = session.cancel_token();

    let source = SyntheticSource::new(
        session.segments.clone(),
        config.capture.encoding.clone(),
        tick,
    )
    .with_payload_size(64);
    tokio::spawn(source.run(cancel.child_token()));
    tokio::spawn(playhead_clock(renderer.clone(), cancel.child_token()));

    Harness {
        session,
        renderer,
        store,
    }
}

async fn playhead_clock(renderer: SimRenderer, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => renderer.advance(0.5),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_playback_trails_capture() {
    let h = start(RewindConfig::default());

    // Segments are produced at 2, 4, ..., 20 seconds
    tokio::time::sleep(Duration::from_secs(21)).await;

    assert_eq!(h.store.len(), 10);
    let bounds = h.store.bounds().unwrap().unwrap();
    assert_eq!(bounds.first_id, ChunkId(1));
    assert_eq!(bounds.last_id, ChunkId(10));
    assert_eq!(h.session.session_duration_secs(), 18.0);

    assert!(h.renderer.appended() >= 9);
    assert_eq!(h.renderer.bytes_appended(), h.renderer.appended() * 64);
    let status = h.session.playback.status();
    assert!(status.cursor >= ChunkId(10));
    assert!(h.session.current_position().is_some());

    let stats = h.session.stats.snapshot();
    assert_eq!(stats.segments_stored, 10);
    assert_eq!(stats.bytes_stored, 640);

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rewind_then_return_to_live() {
    let h = start(RewindConfig::default());
    tokio::time::sleep(Duration::from_secs(21)).await;

    let back = h.session.playback.seek_by_delta(-10.0).await.unwrap();
    match back {
        SeekOutcome::Repositioned { chunk_id, .. } => assert!(chunk_id < ChunkId(10)),
        SeekOutcome::Staged => {}
        other => panic!("unexpected seek outcome {:?}", other),
    }

    // Let any in-flight append settle before the next seek
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Newest chunk is #10; live lands two ticks behind it
    let live = h.session.playback.return_to_live().await.unwrap();
    assert!(matches!(
        live,
        SeekOutcome::Repositioned {
            chunk_id: ChunkId(8),
            ..
        }
    ));

    let beyond = h
        .session
        .playback
        .seek_to_timestamp(rewind::Timestamp(u64::MAX))
        .await
        .unwrap();
    assert_eq!(beyond, live);

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_encoding_is_dropped() {
    let h = start(RewindConfig::default());

    assert!(h
        .session
        .segments
        .on_segment_ready(Bytes::from_static(b"mp4"), "video/mp4"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = h.session.stats.snapshot();
    assert_eq!(stats.dropped_encoding, 1);
    assert_eq!(stats.segments_stored, 0);
    assert!(h.store.is_empty());

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_stays_inside_core() {
    let h = start(RewindConfig::default());
    tokio::time::sleep(Duration::from_secs(7)).await;
    let appended = h.renderer.appended();

    h.store.fail("disk unplugged");
    tokio::time::sleep(Duration::from_secs(6)).await;

    let stats = h.session.stats.snapshot();
    assert_eq!(stats.segments_stored, 3);
    assert_eq!(stats.dropped_store, 3);
    assert_eq!(h.renderer.appended(), appended);
    assert_eq!(
        h.session.playback.return_to_live().await,
        Ok(SeekOutcome::StoreUnavailable)
    );
    assert!(h.session.playback.is_running());

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retention_bounds_store_size() {
    let mut config = RewindConfig::default();
    config.capture.max_chunks = Some(5);
    let h = start(config);

    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(h.store.len(), 5);
    assert_eq!(h.store.oldest().unwrap().unwrap().id, ChunkId(8));
    assert!(h.store.get(ChunkId(1)).unwrap().is_none());

    let clip = export_range(h.store.as_ref(), ChunkId(1), ChunkId(100))
        .unwrap()
        .unwrap();
    assert_eq!(clip.chunk_count, 5);
    assert_eq!(clip.first_id, ChunkId(8));
    assert_eq!(clip.len(), 5 * 64);

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_window_stays_bounded_and_resume_returns_live() {
    let mut config = RewindConfig::default();
    config.playback.max_window_secs = 10.0;
    let h = start(config);

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.renderer.pause();

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Some(range) = h.renderer.buffered_range() {
            assert!(range.duration() <= 10.0, "window {:?} over ceiling", range);
        }
    }
    assert!(!h.renderer.evictions().is_empty());

    // Content under the paused playhead has been evicted
    let range = h.renderer.buffered_range().unwrap();
    assert!(h.renderer.playhead() < range.start);

    h.renderer.play();
    let outcome = h.session.playback.resume().await.unwrap();
    assert!(outcome.is_some());

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_overflow_counts_drops() {
    let mut config = RewindConfig::default();
    config.capture.queue_depth = 1;
    let h = start(config);

    // Nothing yields between sends, so the capture task cannot drain
    let mut accepted = 0;
    for _ in 0..4 {
        if h.session.segments.on_segment_ready(
            Bytes::from_static(b"x"),
            rewindconf::DEFAULT_ENCODING,
        ) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(h.session.stats.queue_overflows.load(Ordering::Relaxed), 3);

    h.session.shutdown().await;
}
