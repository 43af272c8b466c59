//! Non-Windows stub backend (CI + cross-compilation).

use std::sync::Arc;

use starry_core::{CaptureError, CaptureSettings, WindowTarget};

use crate::{BoundCapture, CaptureBackend, FrameHandler};

#[derive(Debug, Default)]
pub struct PlatformBackend;

impl PlatformBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for PlatformBackend {
    fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError> {
        tracing::warn!("Window capture is only available on Windows; no windows listed");
        Ok(Vec::new())
    }

    fn bind(
        &self,
        target: &WindowTarget,
        _settings: &CaptureSettings,
        _handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn BoundCapture>, CaptureError> {
        tracing::warn!("PlatformBackend::bind stub (non-Windows) target={}", target);
        Err(CaptureError::PlatformNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ignore;

    impl FrameHandler for Ignore {
        fn on_frame_arrived(&self, _frame: starry_core::RawFrame) {}
        fn on_closed(&self, _reason: String) {}
    }

    #[test]
    fn stub_lists_nothing_and_refuses_bind() {
        let backend = PlatformBackend::new();
        assert!(backend.list_windows().unwrap().is_empty());

        let target = WindowTarget::new("Calculator", starry_core::WindowHandle(1));
        let err = backend
            .bind(&target, &CaptureSettings::default(), Arc::new(Ignore))
            .err();
        assert_eq!(err, Some(CaptureError::PlatformNotSupported));
    }
}
