use super::defaults::MAX_DEVICE_NAME_LEN;
use super::{AppConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};
use clap::Parser;
use std::time::Duration;

fn keyed(args: &[&str]) -> AppConfig {
    let mut argv = vec!["test-app", "--api-key", "test-key"];
    argv.extend_from_slice(args);
    AppConfig::parse_from(argv)
}

#[test]
fn defaults_match_live_endpoint() {
    let mut cfg = keyed(&[]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.model, DEFAULT_MODEL);
    assert_eq!(cfg.voice, DEFAULT_VOICE);
    assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(cfg.setup_timeout_ms, 10_000);
    assert!(cfg.bounds().is_none());
    assert!(cfg.position().is_none());
}

#[test]
fn rejects_missing_or_blank_api_key() {
    let mut cfg = keyed(&[]);
    cfg.api_key = None;
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&[]);
    cfg.api_key = Some("   ".to_string());
    assert!(cfg.validate().is_err());
}

#[test]
fn device_listing_does_not_need_api_key() {
    let mut cfg = AppConfig::parse_from(["test-app", "--list-input-devices"]);
    cfg.api_key = None;
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_api_key_with_inner_whitespace() {
    let mut cfg = keyed(&[]);
    cfg.api_key = Some("abc def".to_string());
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_api_key_with_query_metacharacters() {
    let mut cfg = keyed(&[]);
    cfg.api_key = Some("abc&alt=x+1%2#".to_string());
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_non_websocket_endpoint() {
    let mut cfg = keyed(&["--endpoint", "https://example.com/live"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--endpoint", "ws://"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--endpoint", "ws://127.0.0.1:9000/live"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn bounds_must_be_given_together() {
    let mut cfg = keyed(&["--north", "36.5", "--south", "35.9"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&[
        "--north", "36.5", "--south", "35.9", "--east", "-111.8", "--west", "-112.6",
    ]);
    assert!(cfg.validate().is_ok());
    let bounds = cfg.bounds().unwrap();
    assert_eq!(bounds.west, -112.6);
}

#[test]
fn rejects_inverted_or_out_of_range_bounds() {
    let mut cfg = keyed(&[
        "--north", "35.0", "--south", "36.0", "--east", "1", "--west", "0",
    ]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&[
        "--north", "91", "--south", "0", "--east", "1", "--west", "0",
    ]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&[
        "--north", "10", "--south", "0", "--east", "181", "--west", "0",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn position_must_be_complete_and_in_range() {
    let mut cfg = keyed(&["--lat", "36.1", "--lon", "-112.1"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--lat", "-91", "--lon", "0", "--altitude", "100"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--lat", "36.1", "--lon", "-112.1", "--altitude", "2500"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn setup_timeout_bounds() {
    let mut cfg = keyed(&["--setup-timeout-ms", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--setup-timeout-ms", "60001"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--setup-timeout-ms", "60000"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn capture_queue_capacity_bounds() {
    let mut cfg = keyed(&["--capture-queue-capacity", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--capture-queue-capacity", "1025"]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--capture-queue-capacity", "1"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn device_names_are_trimmed_and_bounded() {
    let mut cfg = keyed(&["--input-device", "  USB Mic  "]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.input_device.as_deref(), Some("USB Mic"));

    let long = "x".repeat(MAX_DEVICE_NAME_LEN + 1);
    let mut cfg = keyed(&["--output-device", &long]);
    assert!(cfg.validate().is_err());

    let mut cfg = keyed(&["--input-device", "mic\u{7}"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn logging_flags_resolve_with_no_logs_winning() {
    let cfg = keyed(&["--logs"]);
    assert!(cfg.logging_enabled());

    let cfg = keyed(&["--logs", "--no-logs"]);
    assert!(!cfg.logging_enabled());
}

#[test]
fn session_config_carries_cli_values() {
    let mut cfg = keyed(&[
        "--session-name",
        " Grand Canyon ",
        "--lat",
        "36.1",
        "--lon",
        "-112.1",
        "--altitude",
        "2500",
        "--setup-timeout-ms",
        "2500",
        "--voice",
        "Puck",
    ]);
    cfg.validate().unwrap();
    let session = cfg.session_config();
    assert_eq!(session.api_key, "test-key");
    assert_eq!(session.session_name, "Grand Canyon");
    assert_eq!(session.voice, "Puck");
    assert_eq!(session.setup_timeout, Duration::from_millis(2500));
    let provider = session.position_provider.expect("position provider");
    assert_eq!(provider().map(|p| p.altitude), Some(2500.0));
}
