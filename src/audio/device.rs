//! Ownership of CPAL streams.
//!
//! `cpal::Stream` is not `Send` on every host, so each stream is built, played
//! and dropped on its own thread. The session only holds a [`DeviceGuard`] whose
//! release signals that thread. Release never waits for the thread: it is
//! called under the session lock and from async tasks.

use crate::log_debug;
use cpal::traits::StreamTrait;
use crossbeam_channel::bounded;
use std::fmt;
use std::thread;
use thiserror::Error;

/// Microphone or speaker could not be opened.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("audio device '{0}' not found")]
    NotFound(String),
    #[error("no default {0} device available")]
    NoDefault(&'static str),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("audio device unavailable: {0}")]
    Unavailable(String),
}

/// Holds an acquired audio device; releasing it (explicitly or on drop) stops the
/// device and frees the hardware. Release is idempotent.
pub struct DeviceGuard {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceGuard {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.release.is_some()
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(device = %self.label, "audio device released");
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DeviceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGuard")
            .field("label", &self.label)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Build a stream on a dedicated thread, start it, and park the thread until the
/// returned guard is released. `build` also returns whatever the caller needs to
/// know about the opened device (its sample rate, for instance).
///
/// Blocks until the stream is playing or has failed to start, so call it off
/// the async executor. After release the thread pauses and drops the stream on
/// its own.
pub(crate) fn run_on_device_thread<S, T, F>(
    label: String,
    build: F,
) -> Result<(DeviceGuard, T), DeviceError>
where
    S: StreamTrait + 'static,
    T: Send + 'static,
    F: FnOnce() -> Result<(S, T), DeviceError> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<T, DeviceError>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let thread_label = label.clone();

    let handle = thread::Builder::new()
        .name(format!("voxguide-{label}"))
        .spawn(move || {
            let (stream, info) = match build() {
                Ok(built) => built,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(DeviceError::Unavailable(err.to_string())));
                return;
            }
            if ready_tx.send(Ok(info)).is_err() {
                return;
            }
            // Parked until release; a dropped sender also ends the wait.
            let _ = stop_rx.recv();
            if let Err(err) = stream.pause() {
                log_debug(&format!("failed to pause {thread_label} stream: {err}"));
            }
            drop(stream);
        })
        .map_err(|err| DeviceError::Unavailable(err.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(info)) => {
            // The thread is detached; dropping its handle does not stop it.
            drop(handle);
            let guard = DeviceGuard::new(label, move || {
                let _ = stop_tx.send(());
            });
            Ok((guard, info))
        }
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(DeviceError::Unavailable(format!(
                "{label} device thread exited before the stream started"
            )))
        }
    }
}
