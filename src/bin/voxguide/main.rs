//! `voxguide`: hold a spoken conversation with the tour-guide agent about the
//! map you are flying over.

mod cli_utils;

use anyhow::{anyhow, Result};
use std::panic;
use std::time::Duration;
use voxguide::config::AppConfig;
use voxguide::live::SessionDevices;
use voxguide::{init_logging, init_tracing, log_debug, log_file_path, log_panic, VoiceSession};

use crate::cli_utils::{format_session_stats, list_input_devices, list_output_devices};

const STATUS_POLL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;

    if config.list_input_devices {
        list_input_devices()?;
    }
    if config.list_output_devices {
        list_output_devices()?;
    }
    if config.lists_devices() {
        return Ok(());
    }

    init_logging(&config);
    init_tracing(&config);
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        default_hook(info);
    }));
    log_debug("=== voxguide started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install the TLS crypto provider"))?;

    let session = VoiceSession::init(
        config.session_config(),
        SessionDevices::system(config.input_device.clone(), config.output_device.clone()),
    );

    println!("Connecting to the tour guide...");
    session.start().await?;
    println!("Connected. Speak to your guide; press Ctrl-C to stop.");

    let mut poll = tokio::time::interval(STATUS_POLL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nStopping...");
                break;
            }
            _ = poll.tick() => {
                if !session.is_active() {
                    println!("The guide closed the connection.");
                    break;
                }
            }
        }
    }

    session.stop();
    print!("{}", format_session_stats(&session.stats()));
    log_debug("=== voxguide stopped ===");
    Ok(())
}
