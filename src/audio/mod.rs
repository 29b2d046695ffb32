//! Audio side of the duplex voice pipeline.
//!
//! Microphone blocks are captured via CPAL, resampled to 16 kHz mono and encoded
//! as base64 PCM16 for the agent. Replies arrive as 24 kHz PCM16 and are queued
//! for gapless playback on the output device.

/// Sample rate of every outbound audio frame.
pub const SEND_RATE: u32 = 16_000;

/// Sample rate of inbound agent audio.
pub const RECEIVE_RATE: u32 = 24_000;

/// Samples per raw capture block, at the device rate.
pub const CAPTURE_BLOCK_SAMPLES: usize = 4096;

pub mod capture;
pub mod codec;
mod device;
mod dispatch;
mod meter;
pub mod playback;
pub mod resample;
#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use capture::{CaptureDevice, CaptureStream, Microphone};
pub use codec::{decode_transport, encode_transport, DecodeError};
pub use device::{DeviceError, DeviceGuard};
pub use meter::{LiveMeter, METER_FLOOR_DB};
pub use playback::{
    CpalOutput, DeviceClock, OutputDevice, OutputSink, OutputStream, PlaybackBuffer,
    PlaybackClock, PlaybackError, PlaybackEvent, PlaybackScheduler,
};
pub use resample::resample;

/// Immutable mono sample block tagged with its sample rate.
///
/// Cloning is cheap; the samples are shared, never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Play length in seconds; zero for a zero sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Return this chunk at `target_rate`, resampling only when the rate differs.
    pub fn to_rate(&self, target_rate: u32) -> AudioChunk {
        if self.sample_rate == target_rate {
            return self.clone();
        }
        AudioChunk::new(
            resample(&self.samples, self.sample_rate, target_rate),
            target_rate,
        )
    }
}
