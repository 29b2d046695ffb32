pub mod app;
pub mod audio;
pub mod config;
pub mod live;
mod lock;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use app::logging::{
    crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic,
};
pub use live::{
    GeoBounds, Position, PositionProvider, SessionConfig, SessionDevices, SessionError,
    SessionState, SessionStats, VoiceSession,
};
pub use telemetry::init_tracing;
