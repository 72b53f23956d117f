//! Rewind: Live DVR Core
//!
//! A capture source is cut into small timed chunks, stored in arrival order,
//! and replayed into a renderer with a deliberate lag, so a viewer can pause,
//! rewind, scrub, and jump back to live without interrupting capture.
//!
//! - **Chunk store** ([`store`]): append-only, indexed by id and timestamp
//! - **Capture adapter** ([`capture`]): ingestion queue into the store
//! - **Playback controller** ([`playback`]): lagged consumer state machine
//! - **Driver** ([`driver`]): runs the controller on its tick cadence
//! - **Renderer** ([`renderer`]): the sink seam

pub mod capture;
pub mod driver;
pub mod export;
pub mod playback;
pub mod primitives;
pub mod renderer;
pub mod session;
pub mod store;
pub mod synthetic;

pub use capture::{
    CaptureAdapter, CaptureOutcome, CaptureStats, CaptureStatsSnapshot, DropReason, Encoding,
    Segment, SegmentReceiver, SegmentSender,
};
pub use driver::{DriverError, PlaybackDriver, PlaybackHandle};
pub use export::{export_around, export_range, ExportedClip};
pub use playback::{
    PlaybackConfig, PlaybackController, PlaybackPhase, PlaybackStatus, SeekOutcome, SkipReason,
    TickAction,
};
pub use primitives::*;
pub use renderer::{BufferedRange, Renderer, RendererError, SimRenderer};
pub use session::{Session, SessionError, SessionHandles};
pub use store::{ChunkStore, InitPolicy, MemoryStore, StoreError};
pub use synthetic::SyntheticSource;
