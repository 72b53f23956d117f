//! Core time and identity types shared by the store, capture, and playback.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Wall-clock capture instant, milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Shift by a signed number of seconds, saturating at zero.
    pub fn offset_by_secs(self, secs: f64) -> Self {
        let delta_ms = (secs * 1000.0).round();
        if delta_ms >= 0.0 {
            Self(self.0.saturating_add(delta_ms as u64))
        } else {
            Self(self.0.saturating_sub((-delta_ms) as u64))
        }
    }

    pub fn saturating_sub_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_sub(ms))
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn secs_since(self, earlier: Timestamp) -> f64 {
        self.millis_since(earlier) as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Store-assigned sequence id. Gapless, starts at 1, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub const FIRST: ChunkId = ChunkId(1);

    pub fn next(self) -> Self {
        ChunkId(self.0 + 1)
    }

    pub fn saturating_sub(self, n: u64) -> Self {
        ChunkId(self.0.saturating_sub(n).max(Self::FIRST.0))
    }

    pub fn saturating_add(self, n: u64) -> Self {
        ChunkId(self.0.saturating_add(n))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One immutable unit of captured media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Session start and latest production point.
///
/// Only exists once a chunk has been stored; callers hold
/// `Option<SessionBounds>` until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBounds {
    /// Timestamp of the first chunk ever stored this session.
    pub start: Timestamp,
    /// Timestamp of the most recently stored chunk.
    pub last: Timestamp,
    pub first_id: ChunkId,
    pub last_id: ChunkId,
}

impl SessionBounds {
    pub fn duration_secs(&self) -> f64 {
        self.last.secs_since(self.start)
    }

    /// Clamp a timestamp into `[start, last]`.
    pub fn clamp(&self, ts: Timestamp) -> Timestamp {
        ts.max(self.start).min(self.last)
    }
}

/// Format a duration in seconds as `[h:]mm:ss`.
///
/// Hours are only shown when non-zero.
pub fn format_elapsed(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = total / 3600;

    if hours != 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Format a timestamp as local wall-clock `[h:]mm:ss`.
pub fn format_clock(ts: Timestamp) -> String {
    match Local.timestamp_millis_opt(ts.0 as i64).single() {
        Some(dt) => {
            if dt.hour() != 0 {
                format!("{}:{:02}:{:02}", dt.hour(), dt.minute(), dt.second())
            } else {
                format!("{:02}:{:02}", dt.minute(), dt.second())
            }
        }
        None => format!("{}", ts),
    }
}
