pub use crate::live::{DEFAULT_CAPTURE_QUEUE_CAPACITY, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};

pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 10_000;
pub const MAX_SETUP_TIMEOUT_MS: u64 = 60_000;
pub const MAX_CAPTURE_QUEUE_CAPACITY: usize = 1024;
pub(super) const MAX_DEVICE_NAME_LEN: usize = 256;
