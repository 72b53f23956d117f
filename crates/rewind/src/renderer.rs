//! Renderer seam - the sink playback feeds segments into.
//!
//! The core only relies on a renderer accepting sequential segments and
//! reporting one continuous playable range in renderer-local seconds. The
//! renderer decides where appended content lands (sequence mode: always at
//! the end of the range), so the controller can only reposition playback to
//! the boundary of freshly appended content.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

/// Continuous playable range held by a renderer, in renderer-local seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    /// Content buffered past `position`.
    pub fn ahead_of(&self, position: f64) -> f64 {
        (self.end - position).max(0.0)
    }
}

/// Error type for renderer operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RendererError {
    #[error("renderer not ready to accept data")]
    NotReady,

    #[error("renderer is closed")]
    Closed,

    #[error("renderer rejected operation: {0}")]
    Rejected(String),
}

/// A sink capable of sequential segment playback.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether an append or eviction may be issued now.
    ///
    /// False while closed, not yet open, or while an operation is in flight.
    fn is_ready(&self) -> bool;

    /// Whether the renderer is permanently unusable.
    fn is_closed(&self) -> bool;

    /// The currently playable range, `None` before the first append.
    fn buffered_range(&self) -> Option<BufferedRange>;

    /// Current playback position in renderer-local seconds.
    fn playhead(&self) -> f64;

    /// Append one segment at the end of the buffered range.
    async fn append(&self, payload: Bytes) -> Result<(), RendererError>;

    /// Remove buffered content between `from` and `to`.
    async fn evict_range(&self, from: f64, to: f64) -> Result<(), RendererError>;

    /// Move the playhead.
    fn seek_to(&self, position: f64);
}

#[derive(Debug)]
struct SimState {
    ready: bool,
    closed: bool,
    updating: bool,
    playing: bool,
    rate: f64,
    range: Option<BufferedRange>,
    playhead: f64,
    appended: u64,
    bytes: u64,
    evictions: Vec<BufferedRange>,
}

/// In-process renderer that models a sequence-mode media buffer.
///
/// Every appended segment extends the buffered range by `segment_secs`.
/// The playhead only moves when [`SimRenderer::advance`] is called, which
/// keeps tests deterministic.
#[derive(Debug, Clone)]
pub struct SimRenderer {
    segment_secs: f64,
    append_latency: Duration,
    state: Arc<Mutex<SimState>>,
}

impl SimRenderer {
    pub fn new(segment_secs: f64) -> Self {
        Self {
            segment_secs,
            append_latency: Duration::ZERO,
            state: Arc::new(Mutex::new(SimState {
                ready: true,
                closed: false,
                updating: false,
                playing: true,
                rate: 1.0,
                range: None,
                playhead: 0.0,
                appended: 0,
                bytes: 0,
                evictions: Vec::new(),
            })),
        }
    }

    /// Hold every append and eviction in flight for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.append_latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // State is plain data; a panic mid-update cannot leave it inconsistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn play(&self) {
        self.lock().playing = true;
    }

    pub fn pause(&self) {
        self.lock().playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// Toggle between normal and slow-motion playback.
    pub fn toggle_rate(&self) -> f64 {
        let mut state = self.lock();
        state.rate = if state.rate == 1.0 { 0.33 } else { 1.0 };
        state.rate
    }

    /// Nudge the playhead within the buffered content.
    ///
    /// Does nothing until something has been buffered.
    pub fn nudge(&self, secs: f64) {
        let mut state = self.lock();
        let Some(range) = state.range else {
            return;
        };
        state.playhead = (state.playhead + secs).clamp(range.start, range.end);
    }

    /// Advance the playhead by `secs` of wall time if playing.
    ///
    /// Playback stalls at the end of the buffered range.
    pub fn advance(&self, secs: f64) {
        let mut state = self.lock();
        if !state.playing {
            return;
        }
        let Some(range) = state.range else {
            return;
        };
        let next = state.playhead + secs * state.rate;
        state.playhead = next.min(range.end);
    }

    pub fn appended(&self) -> u64 {
        self.lock().appended
    }

    pub fn bytes_appended(&self) -> u64 {
        self.lock().bytes
    }

    pub fn evictions(&self) -> Vec<BufferedRange> {
        self.lock().evictions.clone()
    }

    async fn hold(&self) {
        if !self.append_latency.is_zero() {
            tokio::time::sleep(self.append_latency).await;
        }
    }

    fn begin_update(&self) -> Result<(), RendererError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RendererError::Closed);
        }
        if !state.ready || state.updating {
            return Err(RendererError::NotReady);
        }
        state.updating = true;
        Ok(())
    }
}

#[async_trait]
impl Renderer for SimRenderer {
    fn is_ready(&self) -> bool {
        let state = self.lock();
        state.ready && !state.closed && !state.updating
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn buffered_range(&self) -> Option<BufferedRange> {
        self.lock().range
    }

    fn playhead(&self) -> f64 {
        self.lock().playhead
    }

    async fn append(&self, payload: Bytes) -> Result<(), RendererError> {
        self.begin_update()?;
        self.hold().await;

        let mut state = self.lock();
        state.updating = false;
        let range = match state.range {
            Some(range) => BufferedRange::new(range.start, range.end + self.segment_secs),
            None => BufferedRange::new(0.0, self.segment_secs),
        };
        state.range = Some(range);
        state.appended += 1;
        state.bytes += payload.len() as u64;
        debug!(
            "renderer appended {} bytes, buffered {:.1}-{:.1}",
            payload.len(),
            range.start,
            range.end
        );
        Ok(())
    }

    async fn evict_range(&self, from: f64, to: f64) -> Result<(), RendererError> {
        self.begin_update()?;
        self.hold().await;

        let mut state = self.lock();
        state.updating = false;
        let Some(range) = state.range else {
            return Ok(());
        };
        if from > range.start {
            return Err(RendererError::Rejected(format!(
                "can only evict from the start of the range ({:.1} > {:.1})",
                from, range.start
            )));
        }
        let new_start = to.min(range.end);
        state.range = Some(BufferedRange::new(new_start, range.end));
        state.evictions.push(BufferedRange::new(range.start, new_start));
        debug!(
            "renderer evicted {:.1}-{:.1}, buffered {:.1}-{:.1}",
            range.start, new_start, new_start, range.end
        );
        Ok(())
    }

    fn seek_to(&self, position: f64) {
        self.lock().playhead = position.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_range_math() {
        let range = BufferedRange::new(0.0, 65.0);
        assert_eq!(range.duration(), 65.0);
        assert_eq!(range.midpoint(), 32.5);
        assert_eq!(range.ahead_of(60.0), 5.0);
        assert_eq!(range.ahead_of(70.0), 0.0);
    }

    #[tokio::test]
    async fn test_sim_append_extends_range() {
        let renderer = SimRenderer::new(2.0);
        assert_eq!(renderer.buffered_range(), None);

        renderer.append(Bytes::from_static(b"a")).await.unwrap();
        renderer.append(Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(renderer.buffered_range(), Some(BufferedRange::new(0.0, 4.0)));
        assert_eq!(renderer.appended(), 2);
    }

    #[tokio::test]
    async fn test_sim_counts_payload_bytes() {
        let renderer = SimRenderer::new(2.0);
        renderer.append(Bytes::from_static(b"abcd")).await.unwrap();
        renderer.append(Bytes::from_static(b"ef")).await.unwrap();

        assert_eq!(renderer.appended(), 2);
        assert_eq!(renderer.bytes_appended(), 6);
    }

    #[test]
    fn test_slow_motion_halves_advance() {
        let renderer = SimRenderer::new(2.0);
        renderer.lock().range = Some(BufferedRange::new(0.0, 10.0));

        assert_eq!(renderer.toggle_rate(), 0.33);
        renderer.advance(3.0);
        assert!((renderer.playhead() - 0.99).abs() < 1e-9);

        assert_eq!(renderer.toggle_rate(), 1.0);
        renderer.advance(1.0);
        assert!((renderer.playhead() - 1.99).abs() < 1e-9);
    }

    #[test]
    fn test_nudge_stays_inside_buffered_range() {
        let renderer = SimRenderer::new(2.0);
        renderer.nudge(5.0);
        assert_eq!(renderer.playhead(), 0.0);

        renderer.lock().range = Some(BufferedRange::new(4.0, 10.0));
        renderer.seek_to(6.0);
        renderer.nudge(1.5);
        assert_eq!(renderer.playhead(), 7.5);
        renderer.nudge(30.0);
        assert_eq!(renderer.playhead(), 10.0);
        renderer.nudge(-30.0);
        assert_eq!(renderer.playhead(), 4.0);
    }

    #[tokio::test]
    async fn test_sim_evicts_front_of_range() {
        let renderer = SimRenderer::new(5.0);
        for _ in 0..13 {
            renderer.append(Bytes::from_static(b"x")).await.unwrap();
        }
        let range = renderer.buffered_range().unwrap();
        renderer.evict_range(range.start, range.midpoint()).await.unwrap();

        assert_eq!(renderer.buffered_range(), Some(BufferedRange::new(32.5, 65.0)));
        assert_eq!(renderer.evictions(), vec![BufferedRange::new(0.0, 32.5)]);
    }

    #[tokio::test]
    async fn test_sim_rejects_when_closed_or_not_ready() {
        let renderer = SimRenderer::new(2.0);
        renderer.set_ready(false);
        assert_eq!(
            renderer.append(Bytes::new()).await,
            Err(RendererError::NotReady)
        );

        renderer.set_ready(true);
        renderer.close();
        assert!(!renderer.is_ready());
        assert_eq!(renderer.append(Bytes::new()).await, Err(RendererError::Closed));
    }

    #[test]
    fn test_advance_stalls_at_end() {
        let renderer = SimRenderer::new(2.0);
        renderer.lock().range = Some(BufferedRange::new(0.0, 4.0));

        renderer.advance(3.0);
        assert_eq!(renderer.playhead(), 3.0);
        renderer.advance(3.0);
        assert_eq!(renderer.playhead(), 4.0);

        renderer.pause();
        assert!(!renderer.is_playing());
        renderer.seek_to(1.0);
        renderer.advance(1.0);
        assert_eq!(renderer.playhead(), 1.0);

        renderer.play();
        assert!(renderer.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_holds_update_in_flight() {
        let renderer = SimRenderer::new(2.0).with_latency(Duration::from_millis(100));
        let pending = {
            let renderer = renderer.clone();
            tokio::spawn(async move { renderer.append(Bytes::from_static(b"a")).await })
        };
        tokio::task::yield_now().await;
        assert!(!renderer.is_ready());

        pending.await.unwrap().unwrap();
        assert!(renderer.is_ready());
    }
}
