//! starry-capture: binds a capture source to one selected application window.
//!
//! The pipeline only depends on two seams:
//!
//! - [`CaptureBackend`] enumerates windows and binds a capture to one of them.
//! - [`FrameHandler`] is the push callback the backend invokes for every new
//!   raw frame (and once when the window goes away).
//!
//! # Windows pipeline
//!
//! ```text
//! EnumWindows → HWND (WindowTarget.handle)
//!   │  IGraphicsCaptureItemInterop::CreateForWindow
//!   ▼
//! GraphicsCaptureItem ──Closed──► FrameHandler::on_closed
//!   │  Direct3D11CaptureFramePool::CreateFreeThreaded (BGRA8, 2 buffers)
//!   ▼
//! GraphicsCaptureSession::StartCapture()
//!   │  FrameArrived callback
//!   ▼
//! ID3D11Texture2D → staging texture → Map (RowPitch = stride)
//!   │
//!   ▼
//! RawFrame (BGRA8, padded rows) → FrameHandler::on_frame_arrived
//! ```
//!
//! On other targets a stub backend reports [`CaptureError::PlatformNotSupported`];
//! [`memory::MemoryBackend`] works everywhere and is driven programmatically.

use std::sync::Arc;

use starry_core::{CaptureError, CaptureSettings, RawFrame, WindowHandle, WindowTarget};

pub mod memory;
mod registry;
mod session;

pub use registry::WindowRegistry;
pub use session::{CaptureSession, SessionCounters};

// ── Interface ─────────────────────────────────────────────────────────────────

/// Push callback driven by the capture source.
///
/// Called from the backend's own thread; implementations must not block.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame_arrived(&self, frame: RawFrame);

    /// The bound window closed or became invalid. No frames follow.
    fn on_closed(&self, reason: String);
}

/// A platform capture API.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Snapshot of the windows capturable right now.
    fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError>;

    /// Bind a capture to `target.handle` and start pushing frames to `handler`.
    fn bind(
        &self,
        target: &WindowTarget,
        settings: &CaptureSettings,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn BoundCapture>, CaptureError>;
}

/// An OS capture bound to one window. Dropping it releases the capture.
pub trait BoundCapture: Send {
    fn handle(&self) -> WindowHandle;
}

// ── Platform split ────────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod wgc;
#[cfg(target_os = "windows")]
pub use wgc::PlatformBackend;

#[cfg(not(target_os = "windows"))]
mod stub;
#[cfg(not(target_os = "windows"))]
pub use stub::PlatformBackend;

/// The native backend for the current target.
pub fn platform_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(PlatformBackend::new())
}
