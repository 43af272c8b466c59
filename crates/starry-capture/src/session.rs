//! CaptureSession: one OS capture bound to one window.
//!
//! ```text
//! Idle ──start──► Starting ──bind ok──► Running ──stop──► Stopping ──► Idle
//!                    │                     │
//!                    └──bind err──► Failed ◄──window closed
//!                                     │
//!                                     └──stop──► Idle
//! ```
//!
//! Frames reach the downstream handler only while the session is `Running` and
//! only from the bind that is current. Each `start` bumps an epoch; callbacks
//! still in flight from an earlier bind see a different epoch and are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use starry_core::{
    CaptureError, CaptureSettings, RawFrame, SessionState, SessionStatus, WindowTarget,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{BoundCapture, CaptureBackend, FrameHandler};

// ── Counters ──────────────────────────────────────────────────────────────────

/// Frame accounting at the session boundary. May be shared across sessions.
#[derive(Debug, Default)]
pub struct SessionCounters {
    throttled: AtomicU64,
}

impl SessionCounters {
    /// Frames dropped by the minimum frame interval.
    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Gate {
    epoch:      u64,
    state:      SessionState,
    target:     Option<WindowTarget>,
    last_error: Option<CaptureError>,
}

struct SessionShared {
    gate:          RwLock<Gate>,
    last_accepted: Mutex<Option<u64>>,
    counters:      Arc<SessionCounters>,
    status_tx:     Option<mpsc::Sender<SessionStatus>>,
}

impl SessionShared {
    fn read(&self) -> RwLockReadGuard<'_, Gate> {
        self.gate.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Gate> {
        self.gate.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self) -> SessionStatus {
        let gate = self.read();
        SessionStatus {
            target:     gate.target.clone(),
            state:      gate.state,
            last_error: gate.last_error.clone(),
        }
    }

    /// Push the current status to the presentation layer. Never blocks.
    fn notify(&self) {
        let Some(tx) = &self.status_tx else { return };
        if tx.try_send(self.status()).is_err() {
            debug!("Status channel full or closed; dropping status update");
        }
    }

    /// Minimum-interval check against the capture timestamp.
    fn admit(&self, captured_at_ms: u64, min_interval_ms: u64) -> bool {
        let mut last = self.last_accepted.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            if captured_at_ms >= prev && captured_at_ms - prev < min_interval_ms {
                return false;
            }
        }
        *last = Some(captured_at_ms);
        true
    }
}

// ── Frame handler installed on the backend ────────────────────────────────────

struct SessionFrameHandler {
    shared:          Arc<SessionShared>,
    downstream:      Arc<dyn FrameHandler>,
    epoch:           u64,
    min_interval_ms: u64,
}

impl FrameHandler for SessionFrameHandler {
    fn on_frame_arrived(&self, frame: RawFrame) {
        // The read guard is held across delivery so `stop()` cannot complete
        // while a frame from this session is still being handed downstream.
        let gate = self.shared.read();
        if gate.epoch != self.epoch || gate.state != SessionState::Running {
            return;
        }
        if !self.shared.admit(frame.captured_at_ms, self.min_interval_ms) {
            self.shared.counters.throttled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.downstream.on_frame_arrived(frame);
    }

    fn on_closed(&self, reason: String) {
        {
            let mut gate = self.shared.write();
            if gate.epoch != self.epoch || !gate.state.is_active() {
                return;
            }
            gate.state = SessionState::Failed;
            gate.last_error = Some(CaptureError::CaptureLost { reason: reason.clone() });
        }
        warn!("Capture lost: {}", reason);
        self.shared.notify();
        self.downstream.on_closed(reason);
    }
}

// ── CaptureSession ────────────────────────────────────────────────────────────

/// Owns at most one bound OS capture and its lifecycle.
pub struct CaptureSession {
    backend:    Arc<dyn CaptureBackend>,
    settings:   CaptureSettings,
    downstream: Arc<dyn FrameHandler>,
    shared:     Arc<SessionShared>,
    bound:      Option<Box<dyn BoundCapture>>,
}

impl CaptureSession {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        settings: CaptureSettings,
        downstream: Arc<dyn FrameHandler>,
    ) -> Self {
        Self::with_options(backend, settings, downstream, None, Arc::default())
    }

    /// Like [`CaptureSession::new`], also emitting every transition on `status_tx`
    /// and accounting frames into `counters`.
    pub fn with_options(
        backend: Arc<dyn CaptureBackend>,
        settings: CaptureSettings,
        downstream: Arc<dyn FrameHandler>,
        status_tx: Option<mpsc::Sender<SessionStatus>>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            gate: RwLock::new(Gate {
                epoch:      0,
                state:      SessionState::Idle,
                target:     None,
                last_error: None,
            }),
            last_accepted: Mutex::new(None),
            counters,
            status_tx,
        });
        Self { backend, settings, downstream, shared, bound: None }
    }

    pub fn state(&self) -> SessionState {
        self.shared.read().state
    }

    pub fn target(&self) -> Option<WindowTarget> {
        self.shared.read().target.clone()
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        self.shared.read().last_error.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.shared.counters)
    }

    /// Bind a capture to `target`. Only valid from `Idle`.
    pub fn start(&mut self, target: WindowTarget) -> Result<(), CaptureError> {
        let epoch = {
            let mut gate = self.shared.write();
            if gate.state != SessionState::Idle {
                return Err(CaptureError::InvalidState { action: "start", state: gate.state });
            }
            gate.epoch += 1;
            gate.state = SessionState::Starting;
            gate.target = Some(target.clone());
            gate.last_error = None;
            gate.epoch
        };
        *self.shared.last_accepted.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        info!("Starting capture of {}", target);
        self.shared.notify();

        let handler = Arc::new(SessionFrameHandler {
            shared:          Arc::clone(&self.shared),
            downstream:      Arc::clone(&self.downstream),
            epoch,
            min_interval_ms: self.settings.min_frame_interval_ms,
        });

        match self.backend.bind(&target, &self.settings, handler) {
            Ok(bound) => {
                // Kept even if the window closed during bind; `stop()` releases it.
                self.bound = Some(bound);
                let lost = {
                    let mut gate = self.shared.write();
                    if gate.state == SessionState::Starting {
                        gate.state = SessionState::Running;
                        None
                    } else {
                        gate.last_error.clone()
                    }
                };
                match lost {
                    None => {
                        info!("Capture running for {}", target);
                        self.shared.notify();
                        Ok(())
                    }
                    Some(err) => Err(err),
                }
            }
            Err(err) => {
                {
                    let mut gate = self.shared.write();
                    gate.state = SessionState::Failed;
                    gate.last_error = Some(err.clone());
                }
                warn!("Capture of {} failed to start: {}", target, err);
                self.shared.notify();
                Err(err)
            }
        }
    }

    /// Release the capture and return to `Idle`. No-op when already `Idle`.
    pub fn stop(&mut self) {
        {
            let mut gate = self.shared.write();
            if gate.state == SessionState::Idle {
                return;
            }
            gate.state = SessionState::Stopping;
        }
        self.shared.notify();

        // Outside the gate: backends may wait for in-flight callbacks on release.
        if let Some(bound) = self.bound.take() {
            debug!("Releasing capture of {}", bound.handle());
            drop(bound);
        }

        {
            let mut gate = self.shared.write();
            gate.state = SessionState::Idle;
        }
        info!("Capture stopped");
        self.shared.notify();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use bytes::Bytes;
    use starry_core::PixelFormat;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<u64>>,
        closed: AtomicUsize,
    }

    impl FrameHandler for Recorder {
        fn on_frame_arrived(&self, frame: RawFrame) {
            self.frames.lock().unwrap().push(frame.captured_at_ms);
        }
        fn on_closed(&self, _reason: String) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn raw(ts: u64) -> RawFrame {
        RawFrame {
            data:           Bytes::from(vec![0u8; 16]),
            stride:         8,
            format:         PixelFormat::Bgra8,
            width:          2,
            height:         2,
            captured_at_ms: ts,
        }
    }

    fn session(backend: &MemoryBackend, settings: CaptureSettings) -> (CaptureSession, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let session = CaptureSession::new(Arc::new(backend.clone()), settings, recorder.clone());
        (session, recorder)
    }

    #[test]
    fn start_runs_and_forwards_frames() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        let (mut session, recorder) = session(&backend, CaptureSettings::unthrottled());

        session.start(window.target()).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        window.push_frame(raw(1));
        window.push_frame(raw(2));
        assert_eq!(*recorder.frames.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn start_twice_is_invalid() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        let (mut session, _) = session(&backend, CaptureSettings::unthrottled());

        session.start(window.target()).unwrap();
        let err = session.start(window.target()).unwrap_err();
        assert_eq!(err, CaptureError::InvalidState { action: "start", state: SessionState::Running });
    }

    #[test]
    fn bind_failure_enters_failed_without_frames() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        backend.refuse_binds(Some("access denied".into()));
        let (mut session, recorder) = session(&backend, CaptureSettings::unthrottled());

        let err = session.start(window.target()).unwrap_err();
        assert!(matches!(err, CaptureError::BindFailed { .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.last_error(), Some(err));
        assert!(!window.push_frame(raw(1)));
        assert!(recorder.frames.lock().unwrap().is_empty());

        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.releases(), 0);
    }

    #[test]
    fn stop_twice_is_noop_and_releases_once() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        let (mut session, _) = session(&backend, CaptureSettings::unthrottled());

        session.start(window.target()).unwrap();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.releases(), 1);
        assert!(!window.is_bound());

        drop(session);
        assert_eq!(backend.releases(), 1);
    }

    #[test]
    fn window_close_fails_session_and_stop_releases() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        let (tx, mut rx) = mpsc::channel(16);
        let recorder = Arc::new(Recorder::default());
        let mut session = CaptureSession::with_options(
            Arc::new(backend.clone()),
            CaptureSettings::unthrottled(),
            recorder.clone(),
            Some(tx),
            Arc::default(),
        );

        session.start(window.target()).unwrap();
        window.close();
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.last_error(), Some(CaptureError::CaptureLost { .. })));
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);

        let mut last = None;
        while let Ok(status) = rx.try_recv() {
            last = Some(status);
        }
        assert!(last.unwrap().needs_reselection());

        session.stop();
        assert_eq!(backend.releases(), 1);
    }

    #[test]
    fn throttle_drops_frames_inside_interval() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Calculator");
        let settings = CaptureSettings { min_frame_interval_ms: 33, ..Default::default() };
        let (mut session, recorder) = session(&backend, settings);

        session.start(window.target()).unwrap();
        for ts in [100, 110, 132, 133, 150, 170] {
            window.push_frame(raw(ts));
        }
        assert_eq!(*recorder.frames.lock().unwrap(), vec![100, 133, 170]);
        assert_eq!(session.counters().throttled(), 3);
    }

    #[test]
    fn restart_after_stop_binds_again() {
        let backend = MemoryBackend::new();
        let calc = backend.add_window("Calculator");
        let paint = backend.add_window("Paint");
        let (mut session, recorder) = session(&backend, CaptureSettings::unthrottled());

        session.start(calc.target()).unwrap();
        calc.push_frame(raw(1));
        session.stop();
        session.start(paint.target()).unwrap();
        assert!(!calc.push_frame(raw(2)));
        paint.push_frame(raw(3));

        assert_eq!(*recorder.frames.lock().unwrap(), vec![1, 3]);
        assert_eq!(session.target(), Some(paint.target()));
        assert_eq!(backend.binds(), 2);
    }
}
