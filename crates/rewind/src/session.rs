//! Session wiring - one capture pipeline and one playback driver over a
//! shared store.
//!
//! Initialization is the only place a failure leaves the core: an invalid
//! config, a store that cannot be opened, or a renderer that is already
//! closed is reported once as [`SessionError::Init`] and nothing is spawned.

use std::sync::Arc;

use rewindconf::RewindConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::capture::{self, CaptureAdapter, CaptureStats, Encoding, SegmentSender};
use crate::driver::{PlaybackDriver, PlaybackHandle};
use crate::playback::{PlaybackConfig, PlaybackController};
use crate::primitives::Timestamp;
use crate::renderer::Renderer;
use crate::store::{ChunkStore, InitPolicy, MemoryStore};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("session initialization failed: {0}")]
    Init(String),
}

/// Entry point for starting a live session.
pub struct Session;

impl Session {
    /// Validate `config`, open `store` fresh, check `renderer`, and spawn
    /// capture and playback.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &RewindConfig,
        store: Arc<MemoryStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<SessionHandles, SessionError> {
        if let Err(e) = config.validate() {
            error!("invalid session config: {}", e);
            return Err(SessionError::Init(format!("config: {}", e)));
        }
        if let Err(e) = store.open(InitPolicy::Fresh) {
            error!("chunk store failed to open: {}", e);
            return Err(SessionError::Init(format!("chunk store: {}", e)));
        }
        if renderer.is_closed() {
            error!("renderer is closed");
            return Err(SessionError::Init("renderer is closed".to_string()));
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let stats = Arc::new(CaptureStats::default());
        let encoding = Encoding::new(config.capture.encoding.clone());
        let adapter = Arc::new(CaptureAdapter::with_stats(
            store.clone(),
            encoding,
            stats.clone(),
        ));
        let (segments, rx) = capture::channel(config.capture.queue_depth, stats.clone());
        let capture_task = tokio::spawn(adapter.run(rx, cancel.child_token()));

        let controller = PlaybackController::new(
            store.clone(),
            renderer,
            PlaybackConfig::from(&config.playback),
        );
        let (driver, playback) = PlaybackDriver::new(controller, cancel.child_token());
        let playback_task = driver.spawn();

        info!("session {} started", id);

        Ok(SessionHandles {
            id,
            segments,
            playback,
            stats,
            store,
            cancel,
            tasks: vec![capture_task, playback_task],
        })
    }
}

/// Handles to a running session.
pub struct SessionHandles {
    pub id: Uuid,
    /// Push side of the ingestion queue.
    pub segments: SegmentSender,
    pub playback: PlaybackHandle,
    pub stats: Arc<CaptureStats>,
    pub store: Arc<MemoryStore>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandles {
    /// Seconds from the first captured chunk to the newest.
    pub fn session_duration_secs(&self) -> f64 {
        match self.store.bounds() {
            Ok(Some(bounds)) => bounds.duration_secs(),
            _ => 0.0,
        }
    }

    /// Timestamp playback is currently positioned at.
    pub fn current_position(&self) -> Option<Timestamp> {
        self.playback.status().position
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop capture and playback and wait for both tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("session {} stopped", self.id);
    }
}
