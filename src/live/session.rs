//! Session lifecycle: connect, handshake, stream, teardown.
//!
//! All session state sits behind one mutex. Channel events, capture blocks and
//! playback completions are handled one at a time by a single coordinating task,
//! and `stop()` takes the same lock, so it can run synchronously from any thread.

use super::channel::{
    endpoint_url, redact_url, ChannelEvent, Connector, SignalingChannel, WsConnector,
};
use super::error::SessionError;
use super::prompt::{build_system_instruction, GeoBounds, PositionProvider};
use super::protocol::{parse_server_message, ServerEvent, SetupMessage};
use crate::audio::{
    encode_transport, AudioChunk, CaptureDevice, CaptureStream, CpalOutput, DeviceError,
    DeviceGuard, LiveMeter, Microphone, OutputDevice, OutputStream, PlaybackEvent,
    PlaybackScheduler, CAPTURE_BLOCK_SAMPLES, SEND_RATE,
};
use crate::{lock_or_recover, log_debug, log_debug_content};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::Instrument;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_VOICE: &str = "Aoede";
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CAPTURE_QUEUE_CAPACITY: usize = 8;

/// How often the session task looks for playback that never completed.
const PLAYBACK_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingSetupAck,
    Active,
    Stopping,
    Closed,
}

impl SessionState {
    /// `Idle` and `Closed` are interchangeable rest states.
    pub fn is_at_rest(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }
}

/// Counters for the current (or last) session. Reset by each `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub capture_overruns: u64,
    pub chunks_received: u64,
    pub chunks_played: u64,
    pub decode_errors: u64,
    pub playback_errors: u64,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub api_key: String,
    /// Map or area name used in the persona prompt.
    pub session_name: String,
    pub bounds: Option<GeoBounds>,
    pub position_provider: Option<PositionProvider>,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    /// Deadline for connect plus setup acknowledgment.
    pub setup_timeout: Duration,
    pub capture_queue_capacity: usize,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            session_name: String::new(),
            bounds: None,
            position_provider: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            capture_queue_capacity: DEFAULT_CAPTURE_QUEUE_CAPACITY,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_key", &"***")
            .field("session_name", &self.session_name)
            .field("bounds", &self.bounds)
            .field("position_provider", &self.position_provider.is_some())
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("endpoint", &self.endpoint)
            .field("setup_timeout", &self.setup_timeout)
            .field("capture_queue_capacity", &self.capture_queue_capacity)
            .finish()
    }
}

/// The three collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDevices {
    pub connector: Arc<dyn Connector>,
    pub capture: Arc<dyn CaptureDevice>,
    pub output: Arc<dyn OutputDevice>,
}

impl SessionDevices {
    /// WebSocket transport with CPAL microphone and speaker.
    pub fn system(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            connector: Arc::new(WsConnector),
            capture: Arc::new(Microphone::new(input_device)),
            output: Arc::new(CpalOutput::new(output_device)),
        }
    }
}

struct SessionCore {
    state: SessionState,
    epoch: u64,
    channel: Option<SignalingChannel>,
    capture: Option<DeviceGuard>,
    output: Option<DeviceGuard>,
    scheduler: Option<PlaybackScheduler>,
    overruns: Option<Arc<AtomicUsize>>,
    stats: SessionStats,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            channel: None,
            capture: None,
            output: None,
            scheduler: None,
            overruns: None,
            stats: SessionStats::default(),
        }
    }

    fn is_current(&self, epoch: u64, state: SessionState) -> bool {
        self.epoch == epoch && self.state == state
    }

    fn handle_capture(&mut self, block: AudioChunk, meter: &LiveMeter) {
        let Some(channel) = self.channel.as_mut().filter(|channel| channel.is_open()) else {
            self.stats.frames_dropped += 1;
            return;
        };
        let block = block.to_rate(SEND_RATE);
        meter.observe(block.samples());
        match channel.send_audio(encode_transport(block.samples())) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(err) => {
                self.stats.frames_dropped += 1;
                log_debug(&format!("dropping capture frame: {err}"));
            }
        }
    }

    fn handle_inbound(&mut self, text: &str) {
        let parsed = match parse_server_message(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.stats.decode_errors += 1;
                tracing::warn!(error = %err, "skipping inbound message");
                return;
            }
        };
        for err in &parsed.skipped_parts {
            self.stats.decode_errors += 1;
            tracing::warn!(error = %err, "skipping audio part");
        }
        for event in parsed.events {
            match event {
                ServerEvent::SetupComplete => tracing::info!("setup complete"),
                ServerEvent::Audio(chunk) => {
                    self.stats.chunks_received += 1;
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        scheduler.enqueue(chunk);
                    }
                }
                ServerEvent::TurnComplete => tracing::debug!("turn complete"),
            }
        }
        self.sync_playback_stats();
    }

    fn handle_playback(&mut self, event: PlaybackEvent) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            match event {
                PlaybackEvent::Finished { id } => {
                    scheduler.on_complete(id);
                }
                PlaybackEvent::Failed { reason } => scheduler.on_device_error(&reason),
            }
        }
        self.sync_playback_stats();
    }

    fn check_playback(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            if scheduler.expire_overdue() {
                self.sync_playback_stats();
            }
        }
    }

    fn sync_playback_stats(&mut self) {
        if let Some(scheduler) = self.scheduler.as_ref() {
            self.stats.chunks_played = scheduler.played();
            self.stats.playback_errors = scheduler.errors();
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = self.stats;
        if let Some(overruns) = self.overruns.as_ref() {
            stats.capture_overruns = overruns.load(Ordering::Relaxed) as u64;
        }
        stats
    }

    /// Release everything the session holds and come to rest. No-op at rest.
    fn teardown(&mut self) {
        if self.state.is_at_rest() {
            return;
        }
        self.state = SessionState::Stopping;
        if let Some(mut guard) = self.capture.take() {
            guard.release();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.sync_playback_stats();
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.clear();
        }
        if let Some(mut guard) = self.output.take() {
            guard.release();
        }
        if let Some(overruns) = self.overruns.as_ref() {
            self.stats.capture_overruns = overruns.load(Ordering::Relaxed) as u64;
        }
        self.state = SessionState::Closed;
    }
}

struct Shared {
    core: Mutex<SessionCore>,
    // Bumped by every stop; in-flight starts and the session task watch it.
    stop_signal: watch::Sender<u64>,
    meter: LiveMeter,
}

impl Shared {
    fn with_core<R>(&self, context: &str, f: impl FnOnce(&mut SessionCore) -> R) -> R {
        let mut core = lock_or_recover(&self.core, context);
        f(&mut core)
    }

    /// Run `f` only while the session started as `epoch` is still active.
    fn with_active(&self, epoch: u64, f: impl FnOnce(&mut SessionCore)) -> bool {
        self.with_core("session_task", |core| {
            if core.is_current(epoch, SessionState::Active) {
                f(core);
                true
            } else {
                false
            }
        })
    }
}

/// Unwinds a failed or abandoned `start` back to rest.
struct StartGuard {
    shared: Arc<Shared>,
    epoch: u64,
    armed: bool,
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.with_core("start_abort", |core| {
            if core.epoch == self.epoch && !core.state.is_at_rest() {
                core.teardown();
            }
        });
    }
}

/// A duplex voice conversation with the agent.
///
/// ```no_run
/// # async fn demo() -> Result<(), voxguide::SessionError> {
/// use voxguide::{SessionConfig, VoiceSession};
/// use voxguide::live::SessionDevices;
///
/// let session = VoiceSession::init(
///     SessionConfig::new("api-key"),
///     SessionDevices::system(None, None),
/// );
/// session.start().await?;
/// assert!(session.is_active());
/// session.stop();
/// # Ok(())
/// # }
/// ```
pub struct VoiceSession {
    config: SessionConfig,
    devices: SessionDevices,
    shared: Arc<Shared>,
}

impl VoiceSession {
    /// Store configuration. Performs no I/O.
    pub fn init(config: SessionConfig, devices: SessionDevices) -> Self {
        let (stop_signal, _) = watch::channel(0u64);
        Self {
            config,
            devices,
            shared: Arc::new(Shared {
                core: Mutex::new(SessionCore::new()),
                stop_signal,
                meter: LiveMeter::new(),
            }),
        }
    }

    /// Connect, complete the setup handshake within the deadline, then acquire
    /// the microphone and speaker and begin streaming.
    ///
    /// Fails without side effects unless the session is at rest. Any failure
    /// (or a concurrent [`stop`](Self::stop)) leaves the session `Closed` with
    /// no channel or device held.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (epoch, mut stop_rx) = self.shared.with_core("start", |core| {
            if !core.state.is_at_rest() {
                return Err(SessionError::InvalidState(core.state));
            }
            core.epoch += 1;
            core.state = SessionState::Connecting;
            core.stats = SessionStats::default();
            core.overruns = None;
            Ok((core.epoch, self.shared.stop_signal.subscribe()))
        })?;

        let mut guard = StartGuard {
            shared: self.shared.clone(),
            epoch,
            armed: true,
        };
        let span = tracing::info_span!("voice_session", epoch, session = %self.config.session_name);
        match self.run_start(epoch, &mut stop_rx).instrument(span).await {
            Ok(()) => {
                guard.armed = false;
                tracing::info!(session = %self.config.session_name, "voice session active");
                log_debug("voice session active");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "voice session failed to start");
                log_debug(&format!("voice session failed to start: {err}"));
                Err(err)
            }
        }
    }

    async fn run_start(
        &self,
        epoch: u64,
        stop_rx: &mut watch::Receiver<u64>,
    ) -> Result<(), SessionError> {
        let timeout = self.config.setup_timeout;
        let deadline = Instant::now() + timeout;
        let url = endpoint_url(&self.config.endpoint, &self.config.api_key)?;
        tracing::info!(endpoint = %redact_url(&url), model = %self.config.model, "connecting");

        let connect = self.devices.connector.connect(&url);
        let mut channel = match cancellable(stop_rx, timeout_at(deadline, connect)).await? {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(SessionError::SetupTimeout(timeout)),
        };

        // Bounds and position are read once, here.
        let position = self.config.position_provider.as_ref().and_then(|query| query());
        let instruction = build_system_instruction(
            &self.config.session_name,
            self.config.bounds.as_ref(),
            position,
        );
        log_debug_content(&format!("system instruction: {instruction}"));
        let setup = SetupMessage::new(&self.config.model, &self.config.voice, instruction);

        self.shared.with_core("start_setup", |core| {
            if !core.is_current(epoch, SessionState::Connecting) {
                return Err(SessionError::Cancelled);
            }
            channel
                .send_setup(&setup)
                .map_err(|err| SessionError::Connection(err.to_string()))?;
            core.state = SessionState::AwaitingSetupAck;
            Ok(())
        })?;
        tracing::debug!("setup frame sent");

        let ack = match cancellable(stop_rx, timeout_at(deadline, channel.next_event())).await? {
            Ok(Some(ChannelEvent::Message(text))) => text,
            Ok(Some(ChannelEvent::Closed { reason })) => {
                return Err(SessionError::Connection(format!(
                    "channel closed before setup acknowledgment: {reason}"
                )))
            }
            Ok(None) => {
                return Err(SessionError::Connection(
                    "channel closed before setup acknowledgment".to_string(),
                ))
            }
            Err(_) => return Err(SessionError::SetupTimeout(timeout)),
        };

        let capture = self.acquire_capture(stop_rx).await?;
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let output = self.open_output(stop_rx, playback_tx).await?;
        let events = channel.take_events();

        let overruns = capture.dropped_counter();
        tracing::debug!(device_rate = capture.device_rate, "microphone acquired");
        let CaptureStream {
            blocks,
            guard: capture_guard,
            ..
        } = capture;
        let OutputStream {
            sink,
            clock,
            guard: output_guard,
        } = output;

        let Some(events) = events else {
            return Err(SessionError::Connection(
                "channel event stream unavailable".to_string(),
            ));
        };

        self.shared.with_core("start_activate", |core| {
            if !core.is_current(epoch, SessionState::AwaitingSetupAck) {
                return Err(SessionError::Cancelled);
            }
            core.channel = Some(channel);
            core.capture = Some(capture_guard);
            core.output = Some(output_guard);
            core.scheduler = Some(PlaybackScheduler::new(sink, clock));
            core.overruns = Some(overruns);
            core.state = SessionState::Active;
            // The acknowledgment is also an ordinary message.
            core.handle_inbound(&ack);
            Ok(())
        })?;

        tokio::spawn(
            run_session(
                self.shared.clone(),
                epoch,
                events,
                blocks,
                playback_rx,
                stop_rx.clone(),
            )
            .instrument(tracing::Span::current()),
        );
        Ok(())
    }

    async fn acquire_capture(
        &self,
        stop_rx: &mut watch::Receiver<u64>,
    ) -> Result<CaptureStream, SessionError> {
        let capture = self.devices.capture.clone();
        let capacity = self.config.capture_queue_capacity;
        let acquired = cancellable(
            stop_rx,
            tokio::task::spawn_blocking(move || capture.acquire(CAPTURE_BLOCK_SAMPLES, capacity)),
        )
        .await?;
        let stream = acquired.map_err(|err| DeviceError::Unavailable(err.to_string()))??;
        Ok(stream)
    }

    async fn open_output(
        &self,
        stop_rx: &mut watch::Receiver<u64>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<OutputStream, SessionError> {
        let output = self.devices.output.clone();
        let opened = cancellable(
            stop_rx,
            tokio::task::spawn_blocking(move || output.open(events)),
        )
        .await?;
        let stream = opened.map_err(|err| DeviceError::Unavailable(err.to_string()))??;
        Ok(stream)
    }

    /// Tear the session down from any state. Idempotent; never fails.
    ///
    /// Releases the microphone, closes the channel and drops queued playback.
    /// An in-flight `start` resolves as [`SessionError::Cancelled`].
    pub fn stop(&self) {
        let stopped = self.shared.with_core("stop", |core| {
            let was = core.state;
            core.teardown();
            !was.is_at_rest()
        });
        self.shared.stop_signal.send_modify(|generation| {
            *generation = generation.wrapping_add(1);
        });
        self.shared.meter.reset();
        if stopped {
            tracing::info!("voice session stopped");
            log_debug("voice session stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.shared.with_core("state", |core| core.state)
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.with_core("stats", |core| core.stats())
    }

    /// Microphone level of the last outbound frame.
    pub fn meter(&self) -> LiveMeter {
        self.shared.meter.clone()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceSession")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Race `future` against `stop()`.
async fn cancellable<F: Future>(
    stop_rx: &mut watch::Receiver<u64>,
    future: F,
) -> Result<F::Output, SessionError> {
    tokio::select! {
        output = future => Ok(output),
        _ = stop_rx.changed() => Err(SessionError::Cancelled),
    }
}

async fn run_session(
    shared: Arc<Shared>,
    epoch: u64,
    mut inbound: UnboundedReceiver<ChannelEvent>,
    mut blocks: mpsc::Receiver<AudioChunk>,
    mut playback: UnboundedReceiver<PlaybackEvent>,
    mut stop_rx: watch::Receiver<u64>,
) {
    let mut playback_check = tokio::time::interval(PLAYBACK_CHECK_INTERVAL);
    playback_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            event = inbound.recv() => match event {
                Some(ChannelEvent::Message(text)) => {
                    if !shared.with_active(epoch, |core| core.handle_inbound(&text)) {
                        break;
                    }
                }
                Some(ChannelEvent::Closed { reason }) => {
                    close_from_remote(&shared, epoch, &reason);
                    break;
                }
                None => {
                    close_from_remote(&shared, epoch, "event stream ended");
                    break;
                }
            },
            Some(block) = blocks.recv() => {
                if !shared.with_active(epoch, |core| core.handle_capture(block, &shared.meter)) {
                    break;
                }
            }
            Some(event) = playback.recv() => {
                if !shared.with_active(epoch, |core| core.handle_playback(event)) {
                    break;
                }
            }
            _ = playback_check.tick() => {
                if !shared.with_active(epoch, SessionCore::check_playback) {
                    break;
                }
            }
        }
    }
    tracing::debug!(epoch, "session task finished");
}

fn close_from_remote(shared: &Shared, epoch: u64, reason: &str) {
    let closed = shared.with_core("remote_close", |core| {
        if core.is_current(epoch, SessionState::Active) {
            core.teardown();
            true
        } else {
            false
        }
    });
    if closed {
        shared.meter.reset();
        tracing::info!(reason, "channel closed by remote; session stopped");
        log_debug(&format!("channel closed by remote: {reason}"));
    }
}
