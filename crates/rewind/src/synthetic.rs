//! Deterministic stand-in for an ingestion pipeline.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::{Segment, SegmentSender};
use crate::primitives::Timestamp;

/// Emits one segment per interval into a capture queue.
///
/// Timestamps are derived from the tokio clock relative to a wall-clock
/// origin, so paused-time tests see evenly spaced captures.
pub struct SyntheticSource {
    sender: SegmentSender,
    encoding: String,
    interval: Duration,
    payload_size: usize,
}

impl SyntheticSource {
    pub fn new(sender: SegmentSender, encoding: impl Into<String>, interval: Duration) -> Self {
        Self {
            sender,
            encoding: encoding.into(),
            interval,
            payload_size: 1024,
        }
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    /// Payload for the `seq`th segment: a text header padded to size.
    pub fn payload(seq: u64, size: usize) -> Bytes {
        let header = format!("segment:{:08}\n", seq);
        let mut buf = BytesMut::with_capacity(size.max(header.len()));
        buf.put_slice(header.as_bytes());
        while buf.len() < size {
            buf.put_u8((seq % 251) as u8);
        }
        buf.freeze()
    }

    /// Emit segments until cancelled. Returns how many were queued.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let origin = Timestamp::now();
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; a segment is only ready
        // after one full interval of capture.
        ticker.tick().await;

        let mut seq = 0u64;
        let mut queued = 0u64;
        info!("synthetic source emitting every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    seq += 1;
                    let segment = Segment {
                        payload: Self::payload(seq, self.payload_size),
                        encoding: self.encoding.clone(),
                        captured_at: origin.offset_by_secs(started.elapsed().as_secs_f64()),
                    };
                    if self.sender.try_send(segment) {
                        queued += 1;
                    } else {
                        debug!("synthetic segment {} not queued", seq);
                    }
                }
            }
        }

        info!("synthetic source stopped after {} segments", queued);
        queued
    }
}
