//! FrameBus: fan-out of canonical frames to every registered sink.
//!
//! ```text
//!                    ┌──► [gate] PreviewSink  (watch, latest wins)
//! publish(&Frame) ───┤
//!                    └──► [gate] PersistSink  (bounded queue → writer task)
//! ```
//!
//! Publishers are serialised, so each sink sees frames in publish order. Every
//! registration carries a gate that `deregister` closes; a closed gate is never
//! passed again, even by a publish that already took its snapshot.
//!
//! Sinks are called one after another on the publishing thread. A sink that
//! blocks in `deliver` delays every sink after it and the capture source, so
//! each delivery is timed and one slower than [`SLOW_DELIVERY`] is logged and
//! counted in [`SinkStats::slow`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use starry_core::Frame;
use tracing::{debug, warn};

use crate::sinks::{Delivery, FrameSink};

/// Delivery time above which a sink is reported as blocking the bus.
pub const SLOW_DELIVERY: Duration = Duration::from_millis(10);

/// Handle returned by [`FrameBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Per-sink delivery counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStats {
    pub id:        SinkId,
    pub name:      String,
    pub delivered: u64,
    pub dropped:   u64,
    /// Deliveries that took longer than [`SLOW_DELIVERY`].
    pub slow:      u64,
}

struct Registration {
    id:        SinkId,
    sink:      Arc<dyn FrameSink>,
    /// `true` while registered. Held for the duration of each delivery.
    active:    Mutex<bool>,
    delivered: AtomicU64,
    dropped:   AtomicU64,
    slow:      AtomicU64,
}

impl Registration {
    fn gate(&self) -> MutexGuard<'_, bool> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
pub struct FrameBus {
    sinks:        Mutex<Vec<Arc<Registration>>>,
    publish_lock: Mutex<()>,
    next_id:      AtomicU64,
    published:    AtomicU64,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Arc<Registration>>> {
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a sink. It receives every frame published after this returns.
    pub fn register(&self, sink: Arc<dyn FrameSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("FrameBus: registered sink {:?} ({})", id, sink.name());
        self.registry().push(Arc::new(Registration {
            id,
            sink,
            active: Mutex::new(true),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            slow: AtomicU64::new(0),
        }));
        id
    }

    /// Remove a sink. Once this returns the sink receives no further frames.
    ///
    /// Must not be called from inside that sink's own `deliver`.
    pub fn deregister(&self, id: SinkId) -> bool {
        let removed = {
            let mut sinks = self.registry();
            let pos = sinks.iter().position(|r| r.id == id);
            pos.map(|i| sinks.remove(i))
        };
        match removed {
            Some(reg) => {
                // Waits out a delivery to this sink that is already running.
                *reg.gate() = false;
                debug!("FrameBus: deregistered sink {:?} ({})", id, reg.sink.name());
                true
            }
            None => false,
        }
    }

    /// Deliver `frame` to every registered sink. Returns how many accepted it.
    pub fn publish(&self, frame: &Frame) -> usize {
        let _order = self.publish_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot: Vec<Arc<Registration>> = self.registry().clone();
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut accepted = 0;
        for reg in &snapshot {
            let gate = reg.gate();
            if !*gate {
                continue;
            }
            let started = Instant::now();
            let outcome = reg.sink.deliver(frame);
            let elapsed = started.elapsed();
            if elapsed > SLOW_DELIVERY {
                reg.slow.fetch_add(1, Ordering::Relaxed);
                warn!("FrameBus: sink {} took {:?} to accept a frame", reg.sink.name(), elapsed);
            }
            match outcome {
                Delivery::Delivered => {
                    reg.delivered.fetch_add(1, Ordering::Relaxed);
                    accepted += 1;
                }
                Delivery::Dropped => {
                    reg.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        accepted
    }

    /// Tell every sink the capture session ended.
    pub fn end_session(&self) {
        let snapshot: Vec<Arc<Registration>> = self.registry().clone();
        for reg in &snapshot {
            reg.sink.on_session_end();
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Vec<SinkStats> {
        self.registry()
            .iter()
            .map(|r| SinkStats {
                id:        r.id,
                name:      r.sink.name().to_string(),
                delivered: r.delivered.load(Ordering::Relaxed),
                dropped:   r.dropped.load(Ordering::Relaxed),
                slow:      r.slow.load(Ordering::Relaxed),
            })
            .collect()
    }
}
