//! CaptureController: the single "current capture" slot.
//!
//! Owns the selected window and at most one [`CaptureSession`]. Selecting a
//! different window while capturing stops the old session and starts a new one;
//! the bus and its sinks stay registered across the switch.

use std::sync::{Arc, Mutex, MutexGuard};

use starry_capture::{CaptureBackend, CaptureSession, FrameHandler, SessionCounters, WindowRegistry};
use starry_core::{
    CaptureError, CaptureSettings, RawFrame, SessionState, SessionStatus, WindowTarget,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::FrameBus;
use crate::convert::convert;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};

// ── PipelineHandler ───────────────────────────────────────────────────────────

/// Raw frame → convert → publish, on the capture thread.
struct PipelineHandler {
    bus:     Arc<FrameBus>,
    metrics: Arc<PipelineMetrics>,
}

impl FrameHandler for PipelineHandler {
    fn on_frame_arrived(&self, raw: RawFrame) {
        self.metrics.record_captured();
        match convert(&raw) {
            Ok(frame) => {
                self.bus.publish(&frame);
                self.metrics.record_published();
            }
            Err(e) => {
                self.metrics.record_format_error();
                warn!("Dropping malformed frame @{}: {}", raw.captured_at_ms, e);
            }
        }
    }

    fn on_closed(&self, reason: String) {
        debug!("Capture source closed: {}", reason);
    }
}

// ── CaptureController ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Slot {
    selection: Option<WindowTarget>,
    session:   Option<CaptureSession>,
}

pub struct CaptureController {
    registry:  WindowRegistry,
    backend:   Arc<dyn CaptureBackend>,
    settings:  CaptureSettings,
    bus:       Arc<FrameBus>,
    metrics:   Arc<PipelineMetrics>,
    counters:  Arc<SessionCounters>,
    status_tx: Option<mpsc::Sender<SessionStatus>>,
    slot:      Mutex<Slot>,
}

impl CaptureController {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: CaptureSettings, bus: Arc<FrameBus>) -> Self {
        Self {
            registry: WindowRegistry::new(Arc::clone(&backend)),
            backend,
            settings,
            bus,
            metrics: Arc::new(PipelineMetrics::new()),
            counters: Arc::default(),
            status_tx: None,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Emit a [`SessionStatus`] on `tx` for every state change.
    pub fn with_status(mut self, tx: mpsc::Sender<SessionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn bus(&self) -> &Arc<FrameBus> {
        &self.bus
    }

    pub fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError> {
        self.registry.list_windows()
    }

    pub fn selection(&self) -> Option<WindowTarget> {
        self.slot().selection.clone()
    }

    pub fn state(&self) -> SessionState {
        self.slot().session.as_ref().map_or(SessionState::Idle, CaptureSession::state)
    }

    pub fn status(&self) -> SessionStatus {
        let slot = self.slot();
        match &slot.session {
            Some(session) => session.status(),
            None => SessionStatus { target: slot.selection.clone(), ..SessionStatus::idle() },
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captured:      self.metrics.captured(),
            throttled:     self.counters.throttled(),
            published:     self.metrics.published(),
            format_errors: self.metrics.format_errors(),
            fps:           self.metrics.fps(),
            sinks:         self.bus.stats(),
        }
    }

    /// Select the window titled `display_name`.
    ///
    /// An unknown title leaves selection and any running capture untouched. If a
    /// capture is running it is switched to the new window; a failed one is
    /// cleared so the status reflects the new selection.
    pub fn select_window(&self, display_name: &str) -> Result<WindowTarget, CaptureError> {
        let target = self.registry.resolve(display_name)?;

        let mut slot = self.slot();
        slot.selection = Some(target.clone());
        info!("Selected {}", target);

        let retarget = slot
            .session
            .as_ref()
            .map_or(false, |s| s.state() == SessionState::Running && s.target().as_ref() != Some(&target));
        if retarget {
            // Dropping the old session stops it and releases its capture.
            slot.session = None;
            self.start_locked(&mut slot, target.clone())?;
        } else if slot.session.as_ref().map_or(true, |s| !s.state().is_active()) {
            if let Some(mut failed) = slot.session.take() {
                failed.stop();
                self.bus.end_session();
            }
            self.notify(SessionStatus { target: Some(target.clone()), ..SessionStatus::idle() });
        }
        Ok(target)
    }

    /// Start capturing the selected window. No-op if it is already running.
    pub fn start_capture(&self) -> Result<(), CaptureError> {
        let mut slot = self.slot();
        let selected = slot.selection.clone().ok_or(CaptureError::NoWindowSelected)?;

        if let Some(session) = &slot.session {
            if session.state().is_active() && session.target().as_ref() == Some(&selected) {
                return Ok(());
            }
        }
        slot.session = None;

        // The selected handle must still be live; never fall back to another window.
        let still_listed = self.registry.list_windows()?.into_iter().any(|w| w.handle == selected.handle);
        if !still_listed {
            let err = CaptureError::TargetNotFound { name: selected.display_name.clone() };
            warn!("Cannot start capture: {}", err);
            return Err(err);
        }

        self.start_locked(&mut slot, selected)
    }

    /// Stop the current capture, if any, and clear per-session sink state.
    pub fn stop_capture(&self) {
        let session = self.slot().session.take();
        if let Some(mut session) = session {
            session.stop();
            self.bus.end_session();
        }
    }

    fn start_locked(&self, slot: &mut Slot, target: WindowTarget) -> Result<(), CaptureError> {
        let handler = Arc::new(PipelineHandler {
            bus:     Arc::clone(&self.bus),
            metrics: Arc::clone(&self.metrics),
        });
        let mut session = CaptureSession::with_options(
            Arc::clone(&self.backend),
            self.settings.clone(),
            handler,
            self.status_tx.clone(),
            Arc::clone(&self.counters),
        );
        let result = session.start(target);
        // A failed session stays in the slot so its state and error stay visible.
        slot.session = Some(session);
        result
    }

    fn notify(&self, status: SessionStatus) {
        if let Some(tx) = &self.status_tx {
            let _ = tx.try_send(status);
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::PreviewSink;
    use bytes::Bytes;
    use starry_capture::memory::MemoryBackend;
    use starry_core::PixelFormat;

    fn bgra(ts: u64) -> RawFrame {
        RawFrame {
            data:           Bytes::from(vec![0x40u8; 2 * 2 * 4]),
            stride:         8,
            format:         PixelFormat::Bgra8,
            width:          2,
            height:         2,
            captured_at_ms: ts,
        }
    }

    fn setup() -> (MemoryBackend, CaptureController, Arc<PreviewSink>) {
        let backend = MemoryBackend::new();
        let bus = Arc::new(FrameBus::new());
        let preview = Arc::new(PreviewSink::new());
        bus.register(preview.clone());
        let controller =
            CaptureController::new(Arc::new(backend.clone()), CaptureSettings::unthrottled(), bus);
        (backend, controller, preview)
    }

    #[test]
    fn start_without_selection_fails() {
        let (_backend, controller, _) = setup();
        assert_eq!(controller.start_capture(), Err(CaptureError::NoWindowSelected));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn unknown_selection_keeps_running_capture() {
        let (backend, controller, _) = setup();
        let calc = backend.add_window("Calculator");
        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();

        let err = controller.select_window("Notepad").unwrap_err();
        assert!(matches!(err, CaptureError::TargetNotFound { .. }));
        assert_eq!(controller.state(), SessionState::Running);
        assert_eq!(controller.selection(), Some(calc.target()));
    }

    #[test]
    fn selecting_another_window_switches_capture() {
        let (backend, controller, preview) = setup();
        let calc = backend.add_window("Calculator");
        let paint = backend.add_window("Paint");

        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();
        calc.push_frame(bgra(1));

        controller.select_window("Paint").unwrap();
        assert_eq!(controller.state(), SessionState::Running);
        assert!(!calc.is_bound());
        assert!(paint.is_bound());
        assert_eq!(backend.releases(), 1);
        // Sinks are untouched by the switch.
        assert_eq!(preview.latest().map(|f| f.timestamp_ms()), Some(1));

        paint.push_frame(bgra(2));
        assert_eq!(preview.latest().map(|f| f.timestamp_ms()), Some(2));
    }

    #[test]
    fn malformed_frame_is_counted_and_skipped() {
        let (backend, controller, preview) = setup();
        let calc = backend.add_window("Calculator");
        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();

        let mut bad = bgra(1);
        bad.stride = 4;
        calc.push_frame(bad);
        calc.push_frame(bgra(2));

        let metrics = controller.metrics();
        assert_eq!((metrics.captured, metrics.format_errors, metrics.published), (2, 1, 1));
        assert_eq!(preview.latest().map(|f| f.timestamp_ms()), Some(2));
    }

    #[test]
    fn capture_lost_is_reported_and_restart_needs_live_window() {
        let (backend, controller, _) = setup();
        let (tx, mut rx) = mpsc::channel(32);
        let controller = controller.with_status(tx);
        let calc = backend.add_window("Calculator");

        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();
        calc.close();

        assert_eq!(controller.state(), SessionState::Failed);
        assert!(controller.status().needs_reselection());
        let mut saw_lost = false;
        while let Ok(status) = rx.try_recv() {
            saw_lost |= status.needs_reselection();
        }
        assert!(saw_lost);

        let err = controller.start_capture().unwrap_err();
        assert!(matches!(err, CaptureError::TargetNotFound { .. }));
        assert_eq!(backend.releases(), 1);
    }

    #[test]
    fn reselecting_after_capture_lost_clears_the_failure() {
        let (backend, controller, _) = setup();
        let (tx, mut rx) = mpsc::channel(32);
        let controller = controller.with_status(tx);
        let calc = backend.add_window("Calculator");
        let paint = backend.add_window("Paint");

        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();
        calc.close();
        assert_eq!(controller.state(), SessionState::Failed);

        controller.select_window("Paint").unwrap();
        let status = controller.status();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.target, Some(paint.target()));
        assert_eq!(status.last_error, None);
        assert_eq!(backend.releases(), 1);

        let mut last = None;
        while let Ok(status) = rx.try_recv() {
            last = Some(status);
        }
        assert_eq!(last.and_then(|s| s.target), Some(paint.target()));

        controller.start_capture().unwrap();
        assert!(paint.is_bound());
    }

    #[test]
    fn refused_bind_does_not_ask_for_reselection() {
        let (backend, controller, _) = setup();
        backend.add_window("Calculator");
        backend.refuse_binds(Some("access denied".into()));

        controller.select_window("Calculator").unwrap();
        let err = controller.start_capture().unwrap_err();
        assert!(matches!(err, CaptureError::BindFailed { .. }));

        let status = controller.status();
        assert_eq!(status.state, SessionState::Failed);
        assert_eq!(status.last_error, Some(err));
        assert!(!status.needs_reselection());
    }

    #[test]
    fn stop_clears_preview_and_is_idempotent() {
        let (backend, controller, preview) = setup();
        let calc = backend.add_window("Calculator");
        controller.select_window("Calculator").unwrap();
        controller.start_capture().unwrap();
        calc.push_frame(bgra(1));
        assert!(preview.latest().is_some());

        controller.stop_capture();
        controller.stop_capture();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(preview.latest().is_none());
        assert!(!calc.push_frame(bgra(2)));
    }
}
