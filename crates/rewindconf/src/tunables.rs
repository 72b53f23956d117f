//! DVR tunables - playback cadence, buffer window, and capture settings.

use serde::{Deserialize, Serialize};

/// Encoding produced by a capture device recording audio and video.
pub const DEFAULT_ENCODING: &str = r#"video/webm; codecs="vp8, opus""#;

/// Playback buffer controller tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackTunables {
    /// Chunk production interval, also the playback tick cadence.
    /// Default: 2000 ms
    #[serde(default = "PlaybackTunables::default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum duration of content the renderer may hold.
    /// Default: 180 s
    #[serde(default = "PlaybackTunables::default_max_window_secs")]
    pub max_window_secs: f64,

    /// Return-to-live lands this many tick intervals behind the newest chunk.
    /// Default: 2
    #[serde(default = "PlaybackTunables::default_live_delay_multiplier")]
    pub live_delay_multiplier: u32,

    /// Fetching is skipped while the renderer holds at least this many tick
    /// intervals of content ahead of its playhead.
    /// Default: 10
    #[serde(default = "PlaybackTunables::default_catch_up_multiplier")]
    pub catch_up_multiplier: u32,
}

impl PlaybackTunables {
    fn default_tick_interval_ms() -> u64 {
        2_000
    }

    fn default_max_window_secs() -> f64 {
        180.0
    }

    fn default_live_delay_multiplier() -> u32 {
        2
    }

    fn default_catch_up_multiplier() -> u32 {
        10
    }
}

impl Default for PlaybackTunables {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval_ms(),
            max_window_secs: Self::default_max_window_secs(),
            live_delay_multiplier: Self::default_live_delay_multiplier(),
            catch_up_multiplier: Self::default_catch_up_multiplier(),
        }
    }
}

/// Capture adapter and chunk store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureTunables {
    /// The single accepted encoding descriptor. Segments in any other
    /// encoding are dropped.
    #[serde(default = "CaptureTunables::default_encoding")]
    pub encoding: String,

    /// Segments buffered between the ingestion pipeline and the store before
    /// new ones are dropped.
    /// Default: 8
    #[serde(default = "CaptureTunables::default_queue_depth")]
    pub queue_depth: usize,

    /// Retain at most this many chunks in the store. Unset keeps the whole
    /// session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunks: Option<usize>,
}

impl CaptureTunables {
    fn default_encoding() -> String {
        DEFAULT_ENCODING.to_string()
    }

    fn default_queue_depth() -> usize {
        8
    }
}

impl Default for CaptureTunables {
    fn default() -> Self {
        Self {
            encoding: Self::default_encoding(),
            queue_depth: Self::default_queue_depth(),
            max_chunks: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
