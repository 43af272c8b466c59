use starry_core::Frame;
use tokio::sync::watch;

use super::{Delivery, FrameSink};

/// Latest-frame-wins sink feeding the live preview.
///
/// Holds exactly one frame; a newer frame replaces an undrawn older one.
/// Subscribers are woken on each replacement and read the current value.
pub struct PreviewSink {
    tx: watch::Sender<Option<Frame>>,
}

impl Default for PreviewSink {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }
}

impl PreviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for the "new frame ready" notification.
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl FrameSink for PreviewSink {
    fn name(&self) -> &str {
        "preview"
    }

    fn deliver(&self, frame: &Frame) -> Delivery {
        self.tx.send_replace(Some(frame.clone()));
        Delivery::Delivered
    }

    fn on_session_end(&self) {
        self.clear();
    }
}
