//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use crate::live::{GeoBounds, Position, SessionConfig};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

pub use defaults::{
    DEFAULT_CAPTURE_QUEUE_CAPACITY, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SETUP_TIMEOUT_MS,
    DEFAULT_VOICE, MAX_CAPTURE_QUEUE_CAPACITY, MAX_SETUP_TIMEOUT_MS,
};

/// CLI options for the voxguide tour-guide voice session.
#[derive(Debug, Parser, Clone)]
#[command(about = "Talk to an AI tour guide about the terrain below", author, version)]
pub struct AppConfig {
    /// API key for the Live endpoint
    #[arg(long = "api-key", env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Map or area name the guide is flying over
    #[arg(long = "session-name", default_value = "")]
    pub session_name: String,

    /// Northern map bound (degrees latitude)
    #[arg(long, allow_negative_numbers = true)]
    pub north: Option<f64>,

    /// Southern map bound (degrees latitude)
    #[arg(long, allow_negative_numbers = true)]
    pub south: Option<f64>,

    /// Eastern map bound (degrees longitude)
    #[arg(long, allow_negative_numbers = true)]
    pub east: Option<f64>,

    /// Western map bound (degrees longitude)
    #[arg(long, allow_negative_numbers = true)]
    pub west: Option<f64>,

    /// Current latitude (degrees)
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Current longitude (degrees)
    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Current altitude (meters)
    #[arg(long, allow_negative_numbers = true)]
    pub altitude: Option<f64>,

    /// Model requested in the setup frame
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Prebuilt voice for agent replies
    #[arg(long, default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// WebSocket endpoint (ws:// or wss://); the key is appended as a query parameter
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Deadline for connect plus setup acknowledgment (milliseconds)
    #[arg(long = "setup-timeout-ms", default_value_t = DEFAULT_SETUP_TIMEOUT_MS)]
    pub setup_timeout_ms: u64,

    /// Microphone blocks buffered between the audio thread and the session
    #[arg(long = "capture-queue-capacity", default_value_t = DEFAULT_CAPTURE_QUEUE_CAPACITY)]
    pub capture_queue_capacity: usize,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Preferred audio output device name
    #[arg(long)]
    pub output_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Print detected audio output devices and exit
    #[arg(long = "list-output-devices", default_value_t = false)]
    pub list_output_devices: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXGUIDE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXGUIDE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging the system instruction (debug log only)
    #[arg(
        long = "log-content",
        env = "VOXGUIDE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

impl AppConfig {
    pub fn logging_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }

    /// True when the run only lists devices and never opens a session.
    pub fn lists_devices(&self) -> bool {
        self.list_input_devices || self.list_output_devices
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        Some(GeoBounds {
            north: self.north?,
            south: self.south?,
            east: self.east?,
            west: self.west?,
        })
    }

    pub fn position(&self) -> Option<Position> {
        Some(Position {
            lat: self.lat?,
            lon: self.lon?,
            altitude: self.altitude?,
        })
    }

    /// Library session settings from validated CLI values. The CLI position is
    /// fixed, so the provider always answers with it.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.api_key.clone().unwrap_or_default());
        config.session_name = self.session_name.clone();
        config.bounds = self.bounds();
        if let Some(position) = self.position() {
            config.position_provider = Some(Arc::new(move || Some(position)));
        }
        config.model = self.model.clone();
        config.voice = self.voice.clone();
        config.endpoint = self.endpoint.clone();
        config.setup_timeout = Duration::from_millis(self.setup_timeout_ms);
        config.capture_queue_capacity = self.capture_queue_capacity;
        config
    }
}
