//! Microphone capture via CPAL.
//!
//! The device callback converts whatever format the hardware delivers to mono
//! f32 and cuts it into fixed blocks at the device's native rate. Rate conversion
//! to the wire rate happens on the session side, off the audio thread.

use super::device::{run_on_device_thread, DeviceError, DeviceGuard};
use super::dispatch::BlockDispatcher;
use super::AudioChunk;
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Source of raw microphone blocks. Implemented by [`Microphone`] for real
/// hardware and by scripted sources in tests.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the device and start emitting `block_samples`-sized blocks into a
    /// queue holding at most `queue_capacity` blocks.
    fn acquire(
        &self,
        block_samples: usize,
        queue_capacity: usize,
    ) -> Result<CaptureStream, DeviceError>;
}

/// An acquired microphone: the block stream plus the guard that releases it.
#[derive(Debug)]
pub struct CaptureStream {
    pub blocks: mpsc::Receiver<AudioChunk>,
    pub device_rate: u32,
    pub guard: DeviceGuard,
    dropped: Arc<AtomicUsize>,
}

impl CaptureStream {
    pub fn new(
        blocks: mpsc::Receiver<AudioChunk>,
        device_rate: u32,
        guard: DeviceGuard,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            blocks,
            device_rate,
            guard,
            dropped,
        }
    }

    /// Shared counter of blocks the device thread dropped because the queue was full.
    pub fn dropped_counter(&self) -> Arc<AtomicUsize> {
        self.dropped.clone()
    }
}

/// CPAL-backed microphone, optionally pinned to a named input device.
#[derive(Debug, Clone, Default)]
pub struct Microphone {
    preferred_device: Option<String>,
}

impl Microphone {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    /// List microphone names so the CLI can offer a selector.
    pub fn list_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }
}

impl CaptureDevice for Microphone {
    fn acquire(
        &self,
        block_samples: usize,
        queue_capacity: usize,
    ) -> Result<CaptureStream, DeviceError> {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let preferred = self.preferred_device.clone();
        let dropped_in_callback = dropped.clone();

        let (guard, device_rate) = run_on_device_thread("microphone".to_string(), move || {
            let device = select_input_device(preferred.as_deref())?;
            let default_config = device
                .default_input_config()
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
            let format = default_config.sample_format();
            let config: StreamConfig = default_config.into();
            let device_rate = config.sample_rate.0;
            let channels = usize::from(config.channels.max(1));
            log_debug(&format!(
                "Microphone config: device={} format={format:?} sample_rate={device_rate}Hz channels={channels}",
                device.name().unwrap_or_else(|_| "unknown".to_string())
            ));

            let mut dispatcher =
                BlockDispatcher::new(block_samples, device_rate, sender, dropped_in_callback);
            let err_fn = |err| log_debug(&format!("microphone_stream_error: {err}"));
            let stream = match format {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _| dispatcher.push(data, channels, |sample| sample),
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        dispatcher.push(data, channels, |sample| sample as f32 / 32_768.0)
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::U16 => device.build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        dispatcher.push(data, channels, |sample| {
                            (sample as f32 - 32_768.0) / 32_768.0
                        })
                    },
                    err_fn,
                    None,
                ),
                other => return Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
            }
            .map_err(|err| DeviceError::Unavailable(format!("{err}. {}", mic_permission_hint())))?;
            Ok((stream, device_rate))
        })?;

        Ok(CaptureStream::new(receiver, device_rate, guard, dropped))
    }
}

fn select_input_device(preferred: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::NotFound(name.to_string()))
        }
        None => host
            .default_input_device()
            .ok_or(DeviceError::NoDefault("input")),
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
