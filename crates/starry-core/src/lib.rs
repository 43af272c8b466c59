pub mod config;
pub mod errors;
pub mod types;

pub use config::{CaptureSettings, PersistConfig, PreviewConfig, StarryConfig};
pub use errors::{CaptureError, ConfigError, FormatError, PersistError};
pub use types::*;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
