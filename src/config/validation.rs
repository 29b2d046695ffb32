use super::defaults::{MAX_CAPTURE_QUEUE_CAPACITY, MAX_DEVICE_NAME_LEN, MAX_SETUP_TIMEOUT_MS};
use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;
use url::Url;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize strings.
    pub fn validate(&mut self) -> Result<()> {
        self.session_name = self.session_name.trim().to_string();
        self.api_key = self
            .api_key
            .take()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if !self.lists_devices() && self.api_key.is_none() {
            bail!("--api-key (or GEMINI_API_KEY) is required to start a session");
        }
        if let Some(key) = self.api_key.as_deref() {
            if key.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
                bail!("--api-key must not contain whitespace or control characters");
            }
        }

        let endpoint = match Url::parse(&self.endpoint) {
            Ok(endpoint) => endpoint,
            Err(err) => bail!("--endpoint is not a valid URL ({err}): {}", self.endpoint),
        };
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            bail!(
                "--endpoint must start with ws:// or wss://, got {}",
                self.endpoint
            );
        }
        if self.model.trim().is_empty() {
            bail!("--model must not be empty");
        }
        if self.voice.trim().is_empty() {
            bail!("--voice must not be empty");
        }

        validate_bounds(self)?;
        validate_position(self)?;

        if !(1..=MAX_SETUP_TIMEOUT_MS).contains(&self.setup_timeout_ms) {
            bail!(
                "--setup-timeout-ms must be between 1 and {MAX_SETUP_TIMEOUT_MS}, got {}",
                self.setup_timeout_ms
            );
        }
        if !(1..=MAX_CAPTURE_QUEUE_CAPACITY).contains(&self.capture_queue_capacity) {
            bail!(
                "--capture-queue-capacity must be between 1 and {MAX_CAPTURE_QUEUE_CAPACITY}, got {}",
                self.capture_queue_capacity
            );
        }

        for (flag, device) in [
            ("--input-device", &mut self.input_device),
            ("--output-device", &mut self.output_device),
        ] {
            if let Some(name) = device.as_mut() {
                let trimmed = name.trim();
                if trimmed.is_empty()
                    || trimmed.len() > MAX_DEVICE_NAME_LEN
                    || trimmed.chars().any(char::is_control)
                {
                    bail!("{flag} must be 1-{MAX_DEVICE_NAME_LEN} characters with no control characters");
                }
                *name = trimmed.to_string();
            }
        }

        Ok(())
    }
}

fn validate_bounds(config: &AppConfig) -> Result<()> {
    let given = [config.north, config.south, config.east, config.west];
    let count = given.iter().filter(|value| value.is_some()).count();
    if count == 0 {
        return Ok(());
    }
    let Some(bounds) = config.bounds() else {
        bail!("--north, --south, --east and --west must be given together ({count} of 4 set)");
    };
    for (flag, value) in [("--north", bounds.north), ("--south", bounds.south)] {
        if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
            bail!("{flag} must be a latitude between -90 and 90, got {value}");
        }
    }
    for (flag, value) in [("--east", bounds.east), ("--west", bounds.west)] {
        if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
            bail!("{flag} must be a longitude between -180 and 180, got {value}");
        }
    }
    if bounds.north < bounds.south {
        bail!(
            "--north ({}) must not be south of --south ({})",
            bounds.north,
            bounds.south
        );
    }
    Ok(())
}

fn validate_position(config: &AppConfig) -> Result<()> {
    let given = [config.lat, config.lon, config.altitude];
    if given.iter().all(Option::is_none) {
        return Ok(());
    }
    let Some(position) = config.position() else {
        bail!("--lat, --lon and --altitude must be given together");
    };
    if !position.lat.is_finite() || !(-90.0..=90.0).contains(&position.lat) {
        bail!("--lat must be between -90 and 90, got {}", position.lat);
    }
    if !position.lon.is_finite() || !(-180.0..=180.0).contains(&position.lon) {
        bail!("--lon must be between -180 and 180, got {}", position.lon);
    }
    if !position.altitude.is_finite() {
        bail!("--altitude must be a finite number of meters");
    }
    Ok(())
}
