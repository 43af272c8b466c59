use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::bus::SinkStats;

// ── PipelineMetrics ───────────────────────────────────────────────────────────

/// Counters on the capture → convert → publish path.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    captured:      AtomicU64,
    published:     AtomicU64,
    format_errors: AtomicU64,
    fps:           Mutex<FpsCounter>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.fps.lock().unwrap_or_else(|p| p.into_inner()).tick();
    }

    pub(crate) fn record_format_error(&self) {
        self.format_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn format_errors(&self) -> u64 {
        self.format_errors.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f32 {
        self.fps.lock().unwrap_or_else(|p| p.into_inner()).fps()
    }
}

// ── MetricsSnapshot ───────────────────────────────────────────────────────────

/// Point-in-time view of the whole pipeline, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub captured:      u64,
    pub throttled:     u64,
    pub published:     u64,
    pub format_errors: u64,
    pub fps:           f32,
    pub sinks:         Vec<SinkStats>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} fps | captured {} | published {} | throttled {} | bad {}",
            self.fps, self.captured, self.published, self.throttled, self.format_errors
        )?;
        for s in &self.sinks {
            write!(f, " | {} {}/{} dropped", s.name, s.delivered, s.dropped)?;
            if s.slow > 0 {
                write!(f, " ({} slow)", s.slow)?;
            }
        }
        Ok(())
    }
}

// ── FpsCounter ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FpsCounter {
    timestamps: VecDeque<Instant>,
}

impl FpsCounter {
    fn tick(&mut self) {
        let now = Instant::now();
        self.timestamps.push_back(now);
        while self.timestamps.front().map_or(false, |t| now - *t > Duration::from_secs(1)) {
            self.timestamps.pop_front();
        }
    }

    fn fps(&self) -> f32 { self.timestamps.len() as f32 }
}
