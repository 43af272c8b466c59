//! In-process capture backend.
//!
//! Windows are registered programmatically and frames are pushed by the caller
//! through a [`MemoryWindow`]. Behaves like an OS backend: a window can be bound
//! by one capture at a time, binding a closed window fails, and closing a bound
//! window fires [`FrameHandler::on_closed`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use starry_core::{CaptureError, CaptureSettings, RawFrame, WindowHandle, WindowTarget};
use tracing::debug;

use crate::{BoundCapture, CaptureBackend, FrameHandler};

#[derive(Default)]
struct Entry {
    name: String,
    handler: Option<Arc<dyn FrameHandler>>,
}

#[derive(Default)]
struct State {
    windows: BTreeMap<u64, Entry>,
    next_handle: u64,
    refuse_bind: Option<String>,
    fail_listing: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    binds: AtomicUsize,
    releases: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capture backend whose windows live in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window and return a handle for driving it.
    pub fn add_window(&self, name: impl Into<String>) -> MemoryWindow {
        let name = name.into();
        let mut state = self.shared.lock();
        state.next_handle += 1;
        let handle = WindowHandle(0x1000 + state.next_handle);
        state.windows.insert(handle.0, Entry { name: name.clone(), handler: None });
        MemoryWindow { shared: Arc::clone(&self.shared), target: WindowTarget::new(name, handle) }
    }

    /// Make the next bind attempts fail with `reason` (e.g. permission denied).
    pub fn refuse_binds(&self, reason: Option<String>) {
        self.shared.lock().refuse_bind = reason;
    }

    /// Make window enumeration fail with `reason` until cleared.
    pub fn fail_listing(&self, reason: Option<String>) {
        self.shared.lock().fail_listing = reason;
    }

    /// Total successful binds.
    pub fn binds(&self) -> usize {
        self.shared.binds.load(Ordering::SeqCst)
    }

    /// Total released captures.
    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for MemoryBackend {
    fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError> {
        let state = self.shared.lock();
        if let Some(reason) = &state.fail_listing {
            return Err(CaptureError::Enumeration { reason: reason.clone() });
        }
        Ok(state
            .windows
            .iter()
            .map(|(handle, entry)| WindowTarget::new(entry.name.clone(), WindowHandle(*handle)))
            .collect())
    }

    fn bind(
        &self,
        target: &WindowTarget,
        _settings: &CaptureSettings,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn BoundCapture>, CaptureError> {
        let mut state = self.shared.lock();
        if let Some(reason) = &state.refuse_bind {
            return Err(CaptureError::BindFailed { reason: reason.clone() });
        }
        let entry = state.windows.get_mut(&target.handle.0).ok_or_else(|| {
            CaptureError::BindFailed { reason: format!("window {} no longer exists", target.handle) }
        })?;
        if entry.handler.is_some() {
            return Err(CaptureError::BindFailed {
                reason: format!("window {} is already being captured", target.handle),
            });
        }
        entry.handler = Some(handler);
        self.shared.binds.fetch_add(1, Ordering::SeqCst);
        debug!("MemoryBackend bound {}", target);

        Ok(Box::new(MemoryCapture { shared: Arc::clone(&self.shared), handle: target.handle }))
    }
}

// ── MemoryCapture ─────────────────────────────────────────────────────────────

struct MemoryCapture {
    shared: Arc<Shared>,
    handle: WindowHandle,
}

impl BoundCapture for MemoryCapture {
    fn handle(&self) -> WindowHandle {
        self.handle
    }
}

impl Drop for MemoryCapture {
    fn drop(&mut self) {
        if let Some(entry) = self.shared.lock().windows.get_mut(&self.handle.0) {
            entry.handler = None;
        }
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
        debug!("MemoryBackend released {}", self.handle);
    }
}

// ── MemoryWindow ──────────────────────────────────────────────────────────────

/// Driver side of a registered in-memory window.
#[derive(Clone)]
pub struct MemoryWindow {
    shared: Arc<Shared>,
    target: WindowTarget,
}

impl MemoryWindow {
    pub fn target(&self) -> WindowTarget {
        self.target.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.shared
            .lock()
            .windows
            .get(&self.target.handle.0)
            .map_or(false, |e| e.handler.is_some())
    }

    /// Push a frame to the bound capture. Returns `false` if nothing is bound.
    pub fn push_frame(&self, frame: RawFrame) -> bool {
        // Invoke the handler outside the lock so it may call back into the backend.
        let handler = self
            .shared
            .lock()
            .windows
            .get(&self.target.handle.0)
            .and_then(|e| e.handler.clone());
        match handler {
            Some(h) => {
                h.on_frame_arrived(frame);
                true
            }
            None => false,
        }
    }

    /// Remove the window, notifying a bound capture.
    pub fn close(&self) {
        let entry = self.shared.lock().windows.remove(&self.target.handle.0);
        if let Some(handler) = entry.and_then(|e| e.handler) {
            handler.on_closed(format!("window {} was closed", self.target));
        }
    }
}
