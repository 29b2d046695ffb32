use anyhow::Result;
use voxguide::audio::{CpalOutput, DeviceError, Microphone};
use voxguide::SessionStats;

/// Devices from a comma-separated override (used by the CLI tests), else `probe`.
fn device_names(
    override_var: &str,
    probe: fn() -> Result<Vec<String>, DeviceError>,
    kind: &str,
) -> Vec<String> {
    if let Ok(raw) = std::env::var(override_var) {
        return raw
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
    probe().unwrap_or_else(|err| {
        eprintln!("Failed to list audio {kind} devices: {err}");
        Vec::new()
    })
}

fn print_devices(kind: &str, devices: &[String]) {
    if devices.is_empty() {
        println!("No audio {kind} devices detected.");
    } else {
        println!("Available audio {kind} devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
}

pub(crate) fn list_input_devices() -> Result<()> {
    let devices = device_names("VOXGUIDE_TEST_INPUT_DEVICES", Microphone::list_devices, "input");
    print_devices("input", &devices);
    Ok(())
}

pub(crate) fn list_output_devices() -> Result<()> {
    let devices = device_names(
        "VOXGUIDE_TEST_OUTPUT_DEVICES",
        CpalOutput::list_devices,
        "output",
    );
    print_devices("output", &devices);
    Ok(())
}

pub(crate) fn format_session_stats(stats: &SessionStats) -> String {
    format!(
        "Session stats: {} frames sent, {} dropped ({} capture overruns), \
         {} replies received, {} played, {} decode errors, {} playback errors\n",
        stats.frames_sent,
        stats.frames_dropped,
        stats.capture_overruns,
        stats.chunks_received,
        stats.chunks_played,
        stats.decode_errors,
        stats.playback_errors,
    )
}
