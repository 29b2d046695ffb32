//! Gapless playback of agent replies.
//!
//! [`PlaybackScheduler`] decides *when* each chunk plays; an [`OutputSink`]
//! renders it. The split keeps scheduling testable against a manual clock.

mod output;
mod scheduler;

use super::{AudioChunk, DeviceError, DeviceGuard};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub use output::{CpalOutput, DeviceClock};
pub use scheduler::{PlaybackScheduler, COMPLETION_GRACE_SECS};

/// A decoded chunk with its slot on the playback timeline (seconds on the
/// output clock).
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub id: u64,
    pub chunk: AudioChunk,
    pub start_time: f64,
    pub duration: f64,
}

impl PlaybackBuffer {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Reported by the output device from its render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The buffer has been fully rendered.
    Finished { id: u64 },
    /// The stream hit an error; whatever was rendering will not finish.
    Failed { reason: String },
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("output device error: {0}")]
    Device(String),
    #[error("output device closed")]
    Closed,
}

/// Renders scheduled buffers. `play` must not block; completion is reported
/// asynchronously as [`PlaybackEvent::Finished`].
pub trait OutputSink: Send {
    fn play(&mut self, buffer: PlaybackBuffer) -> Result<(), PlaybackError>;
    /// Drop everything queued or rendering.
    fn clear(&mut self);
}

/// Monotonic output clock in seconds.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Factory for output streams; one stream per active session.
pub trait OutputDevice: Send + Sync {
    fn open(&self, events: UnboundedSender<PlaybackEvent>) -> Result<OutputStream, DeviceError>;
}

/// An opened speaker: sink, its clock, and the guard holding the hardware.
pub struct OutputStream {
    pub sink: Box<dyn OutputSink>,
    pub clock: Arc<dyn PlaybackClock>,
    pub guard: DeviceGuard,
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
