use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "STARRY_CONFIG";
/// Config file looked up in the working directory when `STARRY_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "starry.json";

/// Top-level configuration for the capture pipeline.
///
/// `selected_window` and `capture_active` only seed the controller at startup;
/// the running selection is never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarryConfig {
    #[serde(alias = "selectedWindow")]
    pub selected_window: Option<String>,
    #[serde(alias = "captureActive")]
    pub capture_active: bool,
    pub capture: CaptureSettings,
    pub persist: PersistConfig,
    pub preview: PreviewConfig,
    /// Register a synthetic test-pattern window (useful where no OS backend exists).
    #[serde(alias = "demoWindow")]
    pub demo_window: bool,
}

impl Default for StarryConfig {
    fn default() -> Self {
        Self {
            selected_window: None,
            capture_active: false,
            capture: CaptureSettings::default(),
            persist: PersistConfig::default(),
            preview: PreviewConfig::default(),
            demo_window: false,
        }
    }
}

impl StarryConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let cfg: Self = serde_json::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `$STARRY_CONFIG`, else `./starry.json`, else defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            info!("Loading config from {} ({})", env_path, CONFIG_ENV);
            return Self::from_file(env_path);
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            info!("Loading config from {}", local.display());
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist.queue_capacity == 0 {
            return Err(ConfigError::Invalid { reason: "persist.queue_capacity must be >= 1".into() });
        }
        if self.persist.every_nth == 0 {
            return Err(ConfigError::Invalid { reason: "persist.every_nth must be >= 1".into() });
        }
        Ok(())
    }
}

// MARK: - CaptureSettings

/// Settings handed to the capture backend when a session binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Frames arriving sooner than this after the last accepted one are dropped.
    #[serde(alias = "minFrameIntervalMs")]
    pub min_frame_interval_ms: u64,
    #[serde(alias = "captureCursor")]
    pub capture_cursor: bool,
    #[serde(alias = "drawBorder")]
    pub draw_border: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 33,
            capture_cursor: false,
            draw_border: false,
        }
    }
}

impl CaptureSettings {
    /// No throttling; every frame the source produces is accepted.
    pub fn unthrottled() -> Self {
        Self { min_frame_interval_ms: 0, ..Default::default() }
    }
}

// MARK: - PersistConfig

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub enabled: bool,
    #[serde(alias = "outputDir")]
    pub output_dir: PathBuf,
    /// Frames waiting to be written; further frames are dropped while full.
    #[serde(alias = "queueCapacity")]
    pub queue_capacity: usize,
    /// Save one frame out of every `every_nth` delivered (1 = every frame).
    #[serde(alias = "everyNth")]
    pub every_nth: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("captures"),
            queue_capacity: 64,
            every_nth: 1,
        }
    }
}

// MARK: - PreviewConfig

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
