use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{CaptureError, FormatError};

// MARK: - WindowHandle

/// Opaque OS-specific window identifier.
///
/// The pipeline never interprets the value; only the backend that produced it
/// knows how to turn it back into a native handle (an `HWND` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// MARK: - WindowTarget

/// A capturable on-screen window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowTarget {
    /// Title shown to users and used for selection.
    pub display_name: String,
    pub handle: WindowHandle,
}

impl WindowTarget {
    pub fn new(display_name: impl Into<String>, handle: WindowHandle) -> Self {
        Self { display_name: display_name.into(), handle }
    }
}

impl std::fmt::Display for WindowTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" ({})", self.display_name, self.handle)
    }
}

// MARK: - PixelFormat

/// Source-native layout of a raw captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 4 bytes per pixel: Blue, Green, Red, unused.
    Bgrx8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
    /// A platform format code the pipeline does not understand.
    Unknown(u32),
}

impl PixelFormat {
    /// Bytes per pixel, or `None` for an unrecognized format.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Bgra8 | Self::Rgba8 | Self::Bgrx8 => Some(4),
            Self::Rgb8 => Some(3),
            Self::Unknown(_) => None,
        }
    }
}

// MARK: - RawFrame

/// One frame as delivered by the capture source, in its native layout.
///
/// `data` is immutable once created; rows are `stride` bytes apart and may carry
/// padding past `width * bytes_per_pixel`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    /// Bytes per row.
    pub stride: usize,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Capture time, milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
}

// MARK: - Frame

/// Canonical frame: tightly packed RGBA8, exactly `width * height * 4` bytes.
///
/// Cloning is cheap (reference-counted buffer); every sink sees the same pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rgba: Bytes,
    width: u32,
    height: u32,
    timestamp_ms: u64,
}

impl Frame {
    /// Wrap an RGBA buffer, checking the packed-size invariant.
    pub fn from_rgba(
        rgba: impl Into<Bytes>,
        width: u32,
        height: u32,
        timestamp_ms: u64,
    ) -> Result<Self, FormatError> {
        let rgba = rgba.into();
        if width == 0 || height == 0 {
            return Err(FormatError::EmptyGeometry { width, height });
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(4))
            .ok_or(FormatError::Overflow { width, height })?;
        if rgba.len() != expected {
            return Err(FormatError::Truncated { len: rgba.len(), needed: expected });
        }
        Ok(Self { rgba, width, height, timestamp_ms })
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture time, milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

// MARK: - SessionState

/// Lifecycle of a capture session.
///
/// `Idle → Starting → Running → Stopping → Idle`, with `Failed` reachable from
/// `Starting` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle     => "Idle",
            Self::Starting => "Starting…",
            Self::Running  => "Running",
            Self::Stopping => "Stopping…",
            Self::Failed   => "Failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// MARK: - SessionStatus

/// Snapshot of the current session pushed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub target: Option<WindowTarget>,
    pub state: SessionState,
    pub last_error: Option<CaptureError>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self { target: None, state: SessionState::Idle, last_error: None }
    }

    /// True when the bound window disappeared and the user must pick again.
    pub fn needs_reselection(&self) -> bool {
        self.state == SessionState::Failed
            && matches!(self.last_error, Some(CaptureError::CaptureLost { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_length() {
        let err = Frame::from_rgba(vec![0u8; 15], 2, 2, 0).unwrap_err();
        assert_eq!(err, FormatError::Truncated { len: 15, needed: 16 });
    }

    #[test]
    fn frame_rejects_zero_geometry() {
        let err = Frame::from_rgba(Vec::new(), 0, 4, 0).unwrap_err();
        assert_eq!(err, FormatError::EmptyGeometry { width: 0, height: 4 });
    }

    #[test]
    fn frame_clone_shares_buffer() {
        let frame = Frame::from_rgba(vec![7u8; 4 * 3 * 2], 3, 2, 42).unwrap();
        let copy = frame.clone();
        assert_eq!(frame.rgba().as_ptr(), copy.rgba().as_ptr());
        assert_eq!(copy.timestamp_ms(), 42);
    }

    #[test]
    fn only_a_lost_window_asks_for_reselection() {
        let failed = |err: CaptureError| SessionStatus {
            state: SessionState::Failed,
            last_error: Some(err),
            ..SessionStatus::idle()
        };

        assert!(failed(CaptureError::CaptureLost { reason: "closed".into() }).needs_reselection());
        assert!(!failed(CaptureError::BindFailed { reason: "access denied".into() }).needs_reselection());
        assert!(!SessionStatus::idle().needs_reselection());
    }

    #[test]
    fn bytes_per_pixel_by_format() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), Some(3));
        assert_eq!(PixelFormat::Unknown(87).bytes_per_pixel(), None);
    }
}
