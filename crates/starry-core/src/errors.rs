use std::path::PathBuf;

use thiserror::Error;

use crate::types::{PixelFormat, SessionState};

/// Failures that affect a whole capture session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Window \"{name}\" not found")]
    TargetNotFound { name: String },

    #[error("Failed to bind capture: {reason}")]
    BindFailed { reason: String },

    #[error("Capture lost: {reason}")]
    CaptureLost { reason: String },

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: &'static str, state: SessionState },

    #[error("No window selected")]
    NoWindowSelected,

    #[error("Window enumeration failed: {reason}")]
    Enumeration { reason: String },

    #[error("Window capture is not supported on this platform")]
    PlatformNotSupported,
}

/// A single raw frame could not be normalised; only that frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Frame geometry {width}x{height} is empty")]
    EmptyGeometry { width: u32, height: u32 },

    #[error("Frame geometry {width}x{height} overflows the address space")]
    Overflow { width: u32, height: u32 },

    #[error("Unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("Stride {stride} is smaller than one row ({min} bytes)")]
    StrideTooSmall { stride: usize, min: usize },

    #[error("Pixel buffer holds {len} bytes, {needed} required")]
    Truncated { len: usize, needed: usize },
}

/// Saving one frame failed; the pipeline carries on with the next.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("PNG encode failed for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Writing {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading config {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing config failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },
}
