use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Used when `VOXGUIDE_TRACE` is unset: session and channel events at debug,
/// the rest of the crate at info, dependencies (tungstenite, rustls) at warn.
const DEFAULT_TRACE_FILTER: &str = "warn,voxguide=info,voxguide::live=debug";

fn trace_filter() -> EnvFilter {
    EnvFilter::try_from_env("VOXGUIDE_TRACE").unwrap_or_else(|_| EnvFilter::new(DEFAULT_TRACE_FILTER))
}

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var("VOXGUIDE_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxguide_trace.jsonl"))
}

/// Install the JSON-lines tracing subscriber once, and only when logging is on.
/// Each line carries the `voice_session` span (epoch, session name) it was
/// emitted under, so events from consecutive sessions can be told apart.
pub fn init_tracing(config: &AppConfig) {
    if !config.logging_enabled() {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_env_filter(trace_filter())
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
