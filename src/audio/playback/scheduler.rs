use super::{OutputSink, PlaybackBuffer, PlaybackClock};
use crate::audio::AudioChunk;
use std::collections::VecDeque;
use std::sync::Arc;

/// How far the clock may run past a buffer's end before the buffer is written
/// off as lost.
pub const COMPLETION_GRACE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    end_time: f64,
}

/// Strict FIFO playback queue with at most one buffer in flight.
///
/// Each buffer starts at `max(clock.now(), cursor)` and pushes the cursor to its
/// end, so back-to-back chunks abut without gaps and never overlap. A buffer
/// the device never reports finished (stream error, stalled callback) is
/// counted as an error and the queue moves on.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    clock: Arc<dyn PlaybackClock>,
    queue: VecDeque<AudioChunk>,
    current: Option<InFlight>,
    cursor: f64,
    next_id: u64,
    played: u64,
    errors: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>, clock: Arc<dyn PlaybackClock>) -> Self {
        Self {
            sink,
            clock,
            queue: VecDeque::new(),
            current: None,
            cursor: 0.0,
            next_id: 0,
            played: 0,
            errors: 0,
        }
    }

    /// Queue a decoded chunk; starts playback if nothing is in flight.
    pub fn enqueue(&mut self, chunk: AudioChunk) {
        self.queue.push_back(chunk);
        self.expire_overdue();
        self.pump();
    }

    /// Completion callback from the output device. Returns `false` for ids that
    /// are not in flight (completions from before a `clear`).
    pub fn on_complete(&mut self, id: u64) -> bool {
        match self.current {
            Some(in_flight) if in_flight.id == id => {
                self.current = None;
                self.played += 1;
                self.pump();
                true
            }
            _ => {
                tracing::debug!(id, "ignoring stale playback completion");
                false
            }
        }
    }

    /// The output stream failed. The in-flight buffer will never complete, so
    /// count it as an error and hand its slot to the next chunk.
    pub fn on_device_error(&mut self, reason: &str) {
        if let Some(in_flight) = self.current.take() {
            self.errors += 1;
            tracing::warn!(id = in_flight.id, reason, "output failed mid-buffer; advancing queue");
        }
        self.pump();
    }

    /// Write off the in-flight buffer once the clock is past its end plus
    /// [`COMPLETION_GRACE_SECS`]. Returns whether a buffer was expired.
    pub fn expire_overdue(&mut self) -> bool {
        let Some(in_flight) = self.current else {
            return false;
        };
        let now = self.clock.now();
        if now <= in_flight.end_time + COMPLETION_GRACE_SECS {
            return false;
        }
        self.current = None;
        self.errors += 1;
        tracing::warn!(
            id = in_flight.id,
            end_time = in_flight.end_time,
            now,
            "playback completion overdue; advancing queue"
        );
        self.pump();
        true
    }

    /// Drop queued and in-flight audio and rewind the cursor.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
        self.cursor = 0.0;
        self.sink.clear();
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn played(&self) -> u64 {
        self.played
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    fn pump(&mut self) {
        while self.current.is_none() {
            let Some(chunk) = self.queue.pop_front() else {
                return;
            };
            let id = self.next_id;
            self.next_id += 1;
            let start_time = self.clock.now().max(self.cursor);
            let duration = chunk.duration_secs();
            let buffer = PlaybackBuffer {
                id,
                chunk,
                start_time,
                duration,
            };
            match self.sink.play(buffer) {
                Ok(()) => {
                    self.cursor = start_time + duration;
                    self.current = Some(InFlight {
                        id,
                        end_time: self.cursor,
                    });
                }
                Err(err) => {
                    // Skip the chunk; the next one takes its slot.
                    self.errors += 1;
                    tracing::warn!(id, error = %err, "playback failed; advancing queue");
                }
            }
        }
    }
}
