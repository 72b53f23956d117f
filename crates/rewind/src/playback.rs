//! Playback buffer controller
//!
//! Consumes the chunk store while capture keeps writing to it, staying a
//! bounded delay behind production. The controller is a plain state machine:
//! [`PlaybackController::tick`] decides what to do next and returns a
//! [`TickAction`]; whoever drives it performs the renderer I/O and reports
//! back through [`PlaybackController::complete_append`] or
//! [`PlaybackController::complete_evict`].
//!
//! **Key invariant:** at most one renderer operation is in flight. Seeks
//! issued meanwhile are staged and applied when it completes, so stale data
//! is never appended after a reposition.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::primitives::{Chunk, ChunkId, SessionBounds, Timestamp};
use crate::renderer::{BufferedRange, Renderer, RendererError};
use crate::store::ChunkStore;

/// Progress above which playback is considered caught up to production.
pub const NEAR_LIVE_PROGRESS: f64 = 0.95;

/// Runtime playback tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    pub tick_interval: Duration,
    pub max_window_secs: f64,
    pub live_delay_multiplier: u32,
    pub catch_up_multiplier: u32,
}

impl PlaybackConfig {
    pub fn tick_secs(&self) -> f64 {
        self.tick_interval.as_secs_f64()
    }

    /// Renderer-local duration of one chunk.
    pub fn segment_secs(&self) -> f64 {
        self.tick_secs()
    }

    /// How far behind the newest chunk return-to-live lands.
    pub fn live_delay_ms(&self) -> u64 {
        (self.tick_interval.as_millis() as u64).saturating_mul(self.live_delay_multiplier as u64)
    }

    /// Buffered-ahead duration at which fetching pauses.
    pub fn catch_up_threshold_secs(&self) -> f64 {
        self.tick_secs() * self.catch_up_multiplier as f64
    }
}

impl From<&rewindconf::PlaybackTunables> for PlaybackConfig {
    fn from(tunables: &rewindconf::PlaybackTunables) -> Self {
        Self {
            tick_interval: Duration::from_millis(tunables.tick_interval_ms),
            max_window_secs: tunables.max_window_secs,
            live_delay_multiplier: tunables.live_delay_multiplier,
            catch_up_multiplier: tunables.catch_up_multiplier,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::from(&rewindconf::PlaybackTunables::default())
    }
}

/// Where the controller is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "chunk_id", rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    WaitingForChunk,
    Appending(ChunkId),
    WaitingForReady,
    Seeking,
    Evicting,
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A renderer operation has not completed yet.
    InFlight,
    /// The renderer cannot accept data right now.
    RendererUnavailable,
    /// Nothing has been captured yet.
    NoData,
    /// Enough content is buffered ahead of the playhead.
    BufferedAhead,
    /// The store is not initialized or broken.
    StoreUnavailable,
}

/// What the driver should do after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    Skip(SkipReason),
    /// The chunk at the cursor has not been produced yet.
    Pending(ChunkId),
    /// Remove this range from the renderer, then call `complete_evict`.
    Evict(BufferedRange),
    /// Append this chunk to the renderer, then call `complete_append`.
    Append(Chunk),
}

/// Result of a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    Repositioned { chunk_id: ChunkId, target: Timestamp },
    /// Deferred until the in-flight renderer operation completes.
    Staged,
    NoData,
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeekRequest {
    Delta(f64),
    To(Timestamp),
    Live,
}

#[derive(Debug, Clone, Copy)]
enum InFlight {
    Append { id: ChunkId, timestamp: Timestamp },
    Evict,
}

/// Snapshot of controller state for UI glue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub phase: PlaybackPhase,
    pub cursor: ChunkId,
    pub position: Option<Timestamp>,
    pub bounds: Option<SessionBounds>,
    pub buffered: Option<BufferedRange>,
    pub elapsed_secs: f64,
    pub duration_secs: f64,
    pub progress: f64,
    pub near_live: bool,
}

impl PlaybackStatus {
    fn idle() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            cursor: ChunkId::FIRST,
            position: None,
            bounds: None,
            buffered: None,
            elapsed_secs: 0.0,
            duration_secs: 0.0,
            progress: 0.0,
            near_live: false,
        }
    }
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Lagged consumer of a live chunk store.
pub struct PlaybackController {
    store: Arc<dyn ChunkStore>,
    renderer: Arc<dyn Renderer>,
    config: PlaybackConfig,
    phase: PlaybackPhase,
    cursor: ChunkId,
    position: Option<Timestamp>,
    in_flight: Option<InFlight>,
    staged: Option<SeekRequest>,
}

impl PlaybackController {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        renderer: Arc<dyn Renderer>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            config,
            phase: PlaybackPhase::Idle,
            cursor: ChunkId::FIRST,
            position: None,
            in_flight: None,
            staged: None,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Id of the next chunk to fetch.
    pub fn cursor(&self) -> ChunkId {
        self.cursor
    }

    /// Timestamp of the content playback is positioned at.
    pub fn current_position(&self) -> Option<Timestamp> {
        self.position
    }

    /// Elapsed session time from the first chunk to the newest one.
    pub fn session_duration_secs(&self) -> f64 {
        match self.store.bounds() {
            Ok(Some(bounds)) => bounds.duration_secs(),
            _ => 0.0,
        }
    }

    /// Decide the next step of the fetch cycle.
    pub fn tick(&mut self) -> TickAction {
        if self.in_flight.is_some() {
            return TickAction::Skip(SkipReason::InFlight);
        }
        if !self.renderer.is_ready() {
            return TickAction::Skip(SkipReason::RendererUnavailable);
        }

        match self.store.bounds() {
            Ok(Some(_)) => {}
            Ok(None) => return TickAction::Skip(SkipReason::NoData),
            Err(e) => {
                debug!("tick deferred: {}", e);
                return TickAction::Skip(SkipReason::StoreUnavailable);
            }
        }

        let buffered = self.renderer.buffered_range();
        if let Some(range) = buffered {
            let ahead = range.ahead_of(self.renderer.playhead());
            if ahead >= self.config.catch_up_threshold_secs() {
                debug!("{:.1}s buffered ahead, skipping fetch", ahead);
                self.phase = PlaybackPhase::WaitingForReady;
                return TickAction::Skip(SkipReason::BufferedAhead);
            }
        }

        self.clamp_cursor_to_retained();

        let chunk = match self.store.get(self.cursor) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("chunk {} not produced yet", self.cursor);
                self.phase = PlaybackPhase::WaitingForChunk;
                return TickAction::Pending(self.cursor);
            }
            Err(e) => {
                debug!("fetch of chunk {} deferred: {}", self.cursor, e);
                return TickAction::Skip(SkipReason::StoreUnavailable);
            }
        };

        // Accepting this chunk must not push the window past its ceiling;
        // the chunk is fetched again on the tick after the eviction.
        if let Some(range) = buffered {
            if range.duration() + self.config.segment_secs() > self.config.max_window_secs {
                let evict = BufferedRange::new(range.start, range.midpoint());
                debug!(
                    "buffer window {:.1}s at ceiling before chunk {}, evicting {:.1}-{:.1}",
                    range.duration(),
                    chunk.id,
                    evict.start,
                    evict.end
                );
                self.phase = PlaybackPhase::Evicting;
                self.in_flight = Some(InFlight::Evict);
                return TickAction::Evict(evict);
            }
        }

        debug!("fetched chunk {} ({} bytes)", chunk.id, chunk.len());
        self.phase = PlaybackPhase::Appending(chunk.id);
        self.in_flight = Some(InFlight::Append {
            id: chunk.id,
            timestamp: chunk.timestamp,
        });
        TickAction::Append(chunk)
    }

    fn clamp_cursor_to_retained(&mut self) {
        if let Ok(Some(oldest)) = self.store.oldest() {
            if self.cursor < oldest.id {
                debug!(
                    "cursor {} fell out of retention, clamping to {}",
                    self.cursor, oldest.id
                );
                self.cursor = oldest.id;
            }
        }
    }

    /// Report the result of the append issued by the last tick.
    ///
    /// Returns the outcome of a seek staged while the append was in flight.
    pub fn complete_append(&mut self, result: Result<(), RendererError>) -> Option<SeekOutcome> {
        match self.in_flight.take() {
            Some(InFlight::Append { id, timestamp }) => match result {
                Ok(()) => {
                    self.cursor = id.next();
                    self.position = Some(timestamp);
                }
                Err(e @ (RendererError::NotReady | RendererError::Closed)) => {
                    warn!("append of chunk {} deferred, will retry: {}", id, e)
                }
                Err(e @ RendererError::Rejected(_)) => {
                    warn!("dropping chunk {}: {}", id, e);
                    self.cursor = id.next();
                    self.position = Some(timestamp);
                }
            },
            other => {
                debug!("append completion without an append in flight");
                self.in_flight = other;
                return None;
            }
        }
        self.phase = PlaybackPhase::WaitingForReady;
        self.apply_staged()
    }

    /// Report the result of the eviction issued by the last tick.
    pub fn complete_evict(&mut self, result: Result<(), RendererError>) -> Option<SeekOutcome> {
        match self.in_flight.take() {
            Some(InFlight::Evict) => {
                if let Err(e) = result {
                    warn!("eviction failed, will retry: {}", e);
                }
            }
            other => {
                debug!("eviction completion without an eviction in flight");
                self.in_flight = other;
                return None;
            }
        }
        self.phase = PlaybackPhase::WaitingForReady;
        self.apply_staged()
    }

    fn apply_staged(&mut self) -> Option<SeekOutcome> {
        let request = self.staged.take()?;
        debug!("applying staged seek {:?}", request);
        Some(self.seek(request))
    }

    /// Move playback by `delta_secs` relative to the current position.
    pub fn seek_by_delta(&mut self, delta_secs: f64) -> SeekOutcome {
        self.seek(SeekRequest::Delta(delta_secs))
    }

    /// Move playback to the chunk captured at or before `target`.
    ///
    /// A target beyond the newest chunk returns to live.
    pub fn seek_to_timestamp(&mut self, target: Timestamp) -> SeekOutcome {
        self.seek(SeekRequest::To(target))
    }

    /// Track the newest chunk, minus the live safety delay.
    pub fn return_to_live(&mut self) -> SeekOutcome {
        self.seek(SeekRequest::Live)
    }

    /// Return to live if the content under the playhead has been evicted.
    pub fn resume_check(&mut self) -> Option<SeekOutcome> {
        let range = self.renderer.buffered_range()?;
        if self.renderer.playhead() < range.start {
            info!("playhead behind buffered window, returning to live");
            Some(self.return_to_live())
        } else {
            None
        }
    }

    fn seek(&mut self, request: SeekRequest) -> SeekOutcome {
        if self.in_flight.is_some() {
            debug!("staging seek {:?} behind in-flight operation", request);
            self.staged = Some(request);
            return SeekOutcome::Staged;
        }

        let bounds = match self.store.bounds() {
            Ok(Some(bounds)) => bounds,
            Ok(None) => return SeekOutcome::NoData,
            Err(e) => {
                debug!("seek deferred: {}", e);
                return SeekOutcome::StoreUnavailable;
            }
        };

        self.phase = PlaybackPhase::Seeking;
        let target = self.resolve_target(request, &bounds);
        let outcome = self.reposition(target);
        self.phase = PlaybackPhase::WaitingForChunk;
        outcome
    }

    fn resolve_target(&self, request: SeekRequest, bounds: &SessionBounds) -> Timestamp {
        let live = bounds
            .last
            .saturating_sub_ms(self.config.live_delay_ms())
            .max(bounds.start);
        match request {
            SeekRequest::Live => live,
            SeekRequest::To(ts) if ts > bounds.last => live,
            SeekRequest::To(ts) => ts.max(bounds.start),
            SeekRequest::Delta(delta) => {
                let base = self.position.unwrap_or(bounds.start);
                let ts = base.offset_by_secs(delta);
                if ts > bounds.last {
                    live
                } else {
                    ts.max(bounds.start)
                }
            }
        }
    }

    fn reposition(&mut self, target: Timestamp) -> SeekOutcome {
        let chunk = match self.store.nearest_at_or_before(target) {
            Ok(Some(chunk)) => chunk,
            // Target predates everything retained
            Ok(None) => match self.store.oldest() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return SeekOutcome::NoData,
                Err(e) => {
                    debug!("seek deferred: {}", e);
                    return SeekOutcome::StoreUnavailable;
                }
            },
            Err(e) => {
                debug!("seek deferred: {}", e);
                return SeekOutcome::StoreUnavailable;
            }
        };

        self.cursor = chunk.id;
        self.position = Some(target);
        if let Some(range) = self.renderer.buffered_range() {
            self.renderer.seek_to(range.end);
        }
        info!("seek to {} resolved to chunk {}", target, chunk.id);

        SeekOutcome::Repositioned {
            chunk_id: chunk.id,
            target,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        let bounds = self.store.bounds().ok().flatten();
        let duration_secs = bounds.map(|b| b.duration_secs()).unwrap_or(0.0);
        let elapsed_secs = match (bounds, self.position) {
            (Some(b), Some(pos)) => pos.secs_since(b.start),
            _ => 0.0,
        };
        let progress = if duration_secs > 0.0 {
            (elapsed_secs / duration_secs).clamp(0.0, 1.0)
        } else {
            0.0
        };

        PlaybackStatus {
            phase: self.phase,
            cursor: self.cursor,
            position: self.position,
            bounds,
            buffered: self.renderer.buffered_range(),
            elapsed_secs,
            duration_secs,
            progress,
            near_live: progress > NEAR_LIVE_PROGRESS,
        }
    }
}
