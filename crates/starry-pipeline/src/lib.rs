//! starry-pipeline: turns raw window captures into frames for every consumer.
//!
//! ```text
//! CaptureBackend (OS thread)
//!   │  FrameHandler::on_frame_arrived(RawFrame)
//!   ▼
//! CaptureSession gate (Running + current epoch, min frame interval)
//!   │
//!   ▼
//! convert()  ── FormatError → counted, frame dropped
//!   │  Frame (packed RGBA8)
//!   ▼
//! FrameBus::publish ──► PreviewSink  → watch<Option<Frame>> → UI
//!                   └─► PersistSink  → queue → writer task → PNG files
//! ```
//!
//! [`CaptureController`] owns the single current session and is what the
//! presentation layer talks to.

pub mod bus;
pub mod controller;
pub mod convert;
pub mod metrics;
pub mod sinks;

pub use bus::{FrameBus, SinkId, SinkStats};
pub use controller::CaptureController;
pub use convert::convert;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use sinks::{Delivery, FrameSink, PersistSink, PersistStats, PreviewSink};
