//! CPAL output stream driven by the playback scheduler.

use super::{
    OutputDevice, OutputSink, OutputStream, PlaybackBuffer, PlaybackClock, PlaybackError,
    PlaybackEvent,
};
use crate::audio::codec::sample_to_pcm16;
use crate::audio::device::{run_on_device_thread, DeviceError};
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Output-side clock: frames rendered so far over the device rate.
#[derive(Debug, Clone)]
pub struct DeviceClock {
    frames: Arc<AtomicU64>,
    rate: u32,
}

impl DeviceClock {
    pub fn new(frames: Arc<AtomicU64>, rate: u32) -> Self {
        Self { frames, rate }
    }
}

impl PlaybackClock for DeviceClock {
    fn now(&self) -> f64 {
        if self.rate == 0 {
            return 0.0;
        }
        self.frames.load(Ordering::Relaxed) as f64 / f64::from(self.rate)
    }
}

enum RenderCommand {
    Play(ScheduledVoice),
    Clear,
}

struct ScheduledVoice {
    id: u64,
    samples: Vec<f32>,
    start_frame: u64,
}

impl ScheduledVoice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Lives inside the CPAL callback. Never blocks: commands arrive over a
/// crossbeam channel and completions leave over an unbounded tokio channel.
struct Renderer {
    commands: Receiver<RenderCommand>,
    active: VecDeque<ScheduledVoice>,
    frames: Arc<AtomicU64>,
    channels: usize,
    events: UnboundedSender<PlaybackEvent>,
}

impl Renderer {
    fn drain_commands(&mut self, now: u64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Play(mut voice) => {
                    // A late buffer starts now rather than losing its head.
                    voice.start_frame = voice.start_frame.max(now);
                    self.active.push_back(voice);
                }
                RenderCommand::Clear => self.active.clear(),
            }
        }
    }

    fn render<T, F>(&mut self, data: &mut [T], convert: F)
    where
        T: Copy,
        F: Fn(f32) -> T,
    {
        let mut frame = self.frames.load(Ordering::Relaxed);
        self.drain_commands(frame);

        for out in data.chunks_mut(self.channels) {
            let mut value = 0.0f32;
            for voice in &self.active {
                if frame >= voice.start_frame {
                    if let Some(sample) = voice.samples.get((frame - voice.start_frame) as usize) {
                        value += *sample;
                    }
                }
            }
            let sample = convert(value.clamp(-1.0, 1.0));
            for slot in out.iter_mut() {
                *slot = sample;
            }
            frame += 1;
        }
        self.frames.store(frame, Ordering::Relaxed);

        let events = &self.events;
        self.active.retain(|voice| {
            if frame >= voice.end_frame() {
                let _ = events.send(PlaybackEvent::Finished { id: voice.id });
                false
            } else {
                true
            }
        });
    }
}

/// Stream error callback: latch the failure so later buffers are refused, and
/// tell the scheduler the in-flight buffer is lost.
fn report_stream_error(
    failed: &AtomicBool,
    events: &UnboundedSender<PlaybackEvent>,
    err: impl Display,
) {
    let reason = err.to_string();
    log_debug(&format!("speaker_stream_error: {reason}"));
    failed.store(true, Ordering::Relaxed);
    let _ = events.send(PlaybackEvent::Failed { reason });
}

struct CpalSink {
    commands: Sender<RenderCommand>,
    device_rate: u32,
    failed: Arc<AtomicBool>,
}

impl OutputSink for CpalSink {
    fn play(&mut self, buffer: PlaybackBuffer) -> Result<(), PlaybackError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(PlaybackError::Device("output stream failed".to_string()));
        }
        let samples = buffer.chunk.to_rate(self.device_rate).samples().to_vec();
        let start_frame = (buffer.start_time * f64::from(self.device_rate)).round() as u64;
        self.commands
            .send(RenderCommand::Play(ScheduledVoice {
                id: buffer.id,
                samples,
                start_frame,
            }))
            .map_err(|_| PlaybackError::Closed)
    }

    fn clear(&mut self) {
        let _ = self.commands.send(RenderCommand::Clear);
    }
}

/// Default (or named) speaker via CPAL.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    preferred_device: Option<String>,
}

impl CpalOutput {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    pub fn list_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }
}

impl OutputDevice for CpalOutput {
    fn open(&self, events: UnboundedSender<PlaybackEvent>) -> Result<OutputStream, DeviceError> {
        let (command_tx, command_rx) = unbounded();
        let frames = Arc::new(AtomicU64::new(0));
        let render_frames = frames.clone();
        let failed = Arc::new(AtomicBool::new(false));
        let stream_failed = failed.clone();
        let preferred = self.preferred_device.clone();

        let (guard, device_rate) = run_on_device_thread("speaker".to_string(), move || {
            let device = select_output_device(preferred.as_deref())?;
            let default_config = device
                .default_output_config()
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
            let format = default_config.sample_format();
            let config: StreamConfig = default_config.into();
            let device_rate = config.sample_rate.0;
            let channels = usize::from(config.channels.max(1));
            log_debug(&format!(
                "Speaker config: device={} format={format:?} sample_rate={device_rate}Hz channels={channels}",
                device.name().unwrap_or_else(|_| "unknown".to_string())
            ));

            let error_events = events.clone();
            let mut renderer = Renderer {
                commands: command_rx,
                active: VecDeque::new(),
                frames: render_frames,
                channels,
                events,
            };
            let err_fn = move |err: cpal::StreamError| {
                report_stream_error(&stream_failed, &error_events, err)
            };
            let stream = match format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _| renderer.render(data, |s| s),
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _| renderer.render(data, sample_to_pcm16),
                    err_fn,
                    None,
                ),
                SampleFormat::U16 => device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _| {
                        renderer.render(data, |s| (i32::from(sample_to_pcm16(s)) + 32_768) as u16)
                    },
                    err_fn,
                    None,
                ),
                other => return Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
            }
            .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
            Ok((stream, device_rate))
        })?;

        Ok(OutputStream {
            sink: Box::new(CpalSink {
                commands: command_tx,
                device_rate,
                failed,
            }),
            clock: Arc::new(DeviceClock::new(frames, device_rate)),
            guard,
        })
    }
}

fn select_output_device(preferred: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::NotFound(name.to_string()))
        }
        None => host
            .default_output_device()
            .ok_or(DeviceError::NoDefault("output")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioChunk;
    use tokio::sync::mpsc;

    fn renderer(channels: usize) -> (Renderer, Sender<RenderCommand>, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (command_tx, command_rx) = unbounded();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let renderer = Renderer {
            commands: command_rx,
            active: VecDeque::new(),
            frames: Arc::new(AtomicU64::new(0)),
            channels,
            events: events_tx,
        };
        (renderer, command_tx, events_rx)
    }

    #[test]
    fn renders_voice_at_its_start_frame_on_every_channel() {
        let (mut renderer, commands, mut events) = renderer(2);
        commands
            .send(RenderCommand::Play(ScheduledVoice {
                id: 3,
                samples: vec![0.5, -0.5],
                start_frame: 1,
            }))
            .unwrap();
        let mut out = [9.0f32; 8];
        renderer.render(&mut out, |s| s);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Finished { id: 3 });
    }

    #[test]
    fn clear_drops_active_voices_without_completion() {
        let (mut renderer, commands, mut events) = renderer(1);
        commands
            .send(RenderCommand::Play(ScheduledVoice {
                id: 0,
                samples: vec![0.25; 16],
                start_frame: 0,
            }))
            .unwrap();
        let mut out = [0.0f32; 4];
        renderer.render(&mut out, |s| s);
        commands.send(RenderCommand::Clear).unwrap();
        renderer.render(&mut out, |s| s);
        assert_eq!(out, [0.0; 4]);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn sink_resamples_to_device_rate_and_clock_follows_frames() {
        let (command_tx, command_rx) = unbounded();
        let mut sink = CpalSink {
            commands: command_tx,
            device_rate: 48_000,
            failed: Arc::new(AtomicBool::new(false)),
        };
        sink.play(PlaybackBuffer {
            id: 1,
            chunk: AudioChunk::new(vec![0.1; 240], 24_000),
            start_time: 0.5,
            duration: 0.01,
        })
        .unwrap();
        match command_rx.try_recv().unwrap() {
            RenderCommand::Play(voice) => {
                assert_eq!(voice.samples.len(), 480);
                assert_eq!(voice.start_frame, 24_000);
            }
            RenderCommand::Clear => panic!("expected play command"),
        }

        let frames = Arc::new(AtomicU64::new(12_000));
        let clock = DeviceClock::new(frames, 48_000);
        assert!((clock.now() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn stream_error_reports_failure_and_sink_refuses_later_buffers() {
        let (command_tx, command_rx) = unbounded();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let failed = Arc::new(AtomicBool::new(false));
        let mut sink = CpalSink {
            commands: command_tx,
            device_rate: 24_000,
            failed: failed.clone(),
        };

        report_stream_error(&failed, &events_tx, "device unplugged");

        assert_eq!(
            events_rx.try_recv().unwrap(),
            PlaybackEvent::Failed {
                reason: "device unplugged".to_string()
            }
        );
        let refused = sink.play(PlaybackBuffer {
            id: 0,
            chunk: AudioChunk::new(vec![0.1; 24], 24_000),
            start_time: 0.0,
            duration: 0.001,
        });
        assert!(matches!(refused, Err(PlaybackError::Device(_))));
        assert!(command_rx.try_recv().is_err());
    }
}
