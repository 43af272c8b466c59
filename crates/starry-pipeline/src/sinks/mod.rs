//! Frame consumers registered on the [`FrameBus`](crate::FrameBus).

use starry_core::Frame;

mod persist;
mod preview;

pub use persist::{PersistSink, PersistStats};
pub use preview::PreviewSink;

/// Outcome of handing one frame to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The sink took the frame (queued it, or replaced its latest).
    Delivered,
    /// The sink could not keep up and discarded the frame.
    Dropped,
}

/// A consumer of canonical frames.
///
/// `deliver` runs on the capture thread and must return without blocking; a
/// sink that cannot accept a frame right now drops it and says so.
pub trait FrameSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn deliver(&self, frame: &Frame) -> Delivery;

    /// The capture was stopped. No frames of that session follow.
    fn on_session_end(&self) {}
}
