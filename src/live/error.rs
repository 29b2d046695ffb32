use super::SessionState;
use crate::audio::DeviceError;
use std::time::Duration;
use thiserror::Error;

/// Why `start` failed. Every variant leaves the session at rest with nothing held.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cannot start while {0:?}")]
    InvalidState(SessionState),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("no setup acknowledgment within {0:?}")]
    SetupTimeout(Duration),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("session stopped while starting")]
    Cancelled,
}

/// Outbound send refused by the channel. Never surfaced past the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel is closed")]
    Closed,
    #[error("setup frame has not been sent")]
    SetupPending,
    #[error("failed to encode frame: {0}")]
    Encode(String),
}
