//! Voice session against the Live conversational agent.
//!
//! [`VoiceSession`] is the entry point: `init` stores configuration, `start`
//! connects and performs the setup handshake, `stop` tears everything down.

mod channel;
mod error;
mod prompt;
pub mod protocol;
mod session;

pub use channel::{endpoint_url, redact_url, ChannelEvent, Connector, SignalingChannel, WsConnector};
pub use error::{SessionError, TransportError};
pub use prompt::{build_system_instruction, GeoBounds, Position, PositionProvider};
pub use session::{
    SessionConfig, SessionDevices, SessionState, SessionStats, VoiceSession,
    DEFAULT_CAPTURE_QUEUE_CAPACITY, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SETUP_TIMEOUT,
    DEFAULT_VOICE,
};
