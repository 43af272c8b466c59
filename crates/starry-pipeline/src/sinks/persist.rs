//! PersistSink: saves delivered frames as PNG files.
//!
//! ```text
//! deliver() ──try_send──► [bounded queue] ──► writer task ──spawn_blocking──► <ts>_<seq>.png
//!      │ full
//!      ▼
//!   dropped
//! ```
//!
//! The capture thread never waits on the disk: a full queue drops the frame.
//! Every frame that made it into the queue is written, in order, even after
//! the session that produced it has stopped.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use starry_core::{Frame, PersistConfig, PersistError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Delivery, FrameSink};

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PersistStats {
    queued:      AtomicU64,
    written:     AtomicU64,
    failed:      AtomicU64,
    dropped:     AtomicU64,
    sampled_out: AtomicU64,
}

impl PersistStats {
    /// Frames accepted into the write queue.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Files successfully written.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Frames whose write failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames skipped by `every_nth` sampling.
    pub fn sampled_out(&self) -> u64 {
        self.sampled_out.load(Ordering::Relaxed)
    }
}

enum Job {
    Frame(Frame),
    Flush(oneshot::Sender<()>),
}

// ── PersistSink ───────────────────────────────────────────────────────────────

pub struct PersistSink {
    tx:          mpsc::Sender<Job>,
    output_dir:  PathBuf,
    every_nth:   u64,
    seen:        AtomicU64,
    stats:       Arc<PersistStats>,
    closed_warn: AtomicBool,
}

impl PersistSink {
    /// Create the output directory and spawn the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &PersistConfig) -> Result<Self, PersistError> {
        let output_dir = config.output_dir.clone();
        fs::create_dir_all(&output_dir)
            .map_err(|source| PersistError::Io { path: output_dir.clone(), source })?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(PersistStats::default());
        tokio::spawn(run_writer(rx, output_dir.clone(), Arc::clone(&stats)));
        info!(
            "PersistSink writing to {} (queue={}, every_nth={})",
            output_dir.display(), config.queue_capacity, config.every_nth
        );

        Ok(Self {
            tx,
            output_dir,
            every_nth: u64::from(config.every_nth.max(1)),
            seen: AtomicU64::new(0),
            stats,
            closed_warn: AtomicBool::new(false),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stats(&self) -> Arc<PersistStats> {
        Arc::clone(&self.stats)
    }

    /// Wait until every frame queued before this call has been written (or failed).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl FrameSink for PersistSink {
    fn name(&self) -> &str {
        "persist"
    }

    fn deliver(&self, frame: &Frame) -> Delivery {
        if self.seen.fetch_add(1, Ordering::Relaxed) % self.every_nth != 0 {
            self.stats.sampled_out.fetch_add(1, Ordering::Relaxed);
            return Delivery::Delivered;
        }

        match self.tx.try_send(Job::Frame(frame.clone())) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("PersistSink queue full; dropping frame @{}", frame.timestamp_ms());
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if !self.closed_warn.swap(true, Ordering::Relaxed) {
                    warn!("PersistSink writer task is gone; frames are no longer saved");
                }
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
        }
    }

    fn on_session_end(&self) {
        self.seen.store(0, Ordering::Relaxed);
        debug!("PersistSink: session ended, {} frames queued so far", self.stats.queued());
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

async fn run_writer(mut rx: mpsc::Receiver<Job>, dir: PathBuf, stats: Arc<PersistStats>) {
    let mut namer = FileNamer::default();

    while let Some(job) = rx.recv().await {
        let frame = match job {
            Job::Frame(frame) => frame,
            Job::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        let dir = dir.clone();
        let mut next = namer;
        let result = tokio::task::spawn_blocking(move || {
            let path = next.next_free(&dir, frame.timestamp_ms());
            let result = write_png(&path, &frame);
            (next, result)
        })
        .await;

        match result {
            Ok((advanced, Ok(path))) => {
                namer = advanced;
                stats.written.fetch_add(1, Ordering::Relaxed);
                debug!("Saved {}", path.display());
            }
            Ok((advanced, Err(e))) => {
                namer = advanced;
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Frame not saved: {}", e);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Frame writer panicked: {}", e);
            }
        }
    }
    debug!("PersistSink writer finished");
}

/// Encode to `<path>.part`, then rename, so a final name never holds a partial file.
fn write_png(path: &Path, frame: &Frame) -> Result<PathBuf, PersistError> {
    let part = path.with_extension("png.part");
    let io_err = |source| PersistError::Io { path: part.clone(), source };

    let file = File::create(&part).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let encoded = PngEncoder::new(&mut writer).write_image(
        frame.rgba(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgba8,
    );
    if let Err(e) = encoded {
        drop(writer);
        let _ = fs::remove_file(&part);
        return Err(PersistError::Encode { path: path.to_path_buf(), source: Box::new(e) });
    }
    if let Err(e) = writer.flush() {
        drop(writer);
        let _ = fs::remove_file(&part);
        return Err(io_err(e));
    }
    drop(writer);

    fs::rename(&part, path)
        .map_err(|source| PersistError::Io { path: path.to_path_buf(), source })?;
    Ok(path.to_path_buf())
}

// ── FileNamer ─────────────────────────────────────────────────────────────────

/// Produces strictly increasing `<timestamp_ms>_<seq>.png` names.
///
/// Frames sharing a millisecond get increasing `seq`; a timestamp older than
/// the last one used is clamped to it so names never go backwards.
#[derive(Debug, Clone, Copy, Default)]
struct FileNamer {
    last: Option<(u64, u32)>,
}

impl FileNamer {
    fn next(&mut self, ts: u64) -> (u64, u32) {
        let key = match self.last {
            Some((last_ts, seq)) if ts <= last_ts => (last_ts, seq + 1),
            _ => (ts, 0),
        };
        self.last = Some(key);
        key
    }

    /// Next name whose file does not exist yet in `dir`.
    fn next_free(&mut self, dir: &Path, ts: u64) -> PathBuf {
        loop {
            let (ts_key, seq) = self.next(ts);
            let path = dir.join(file_name(ts_key, seq));
            if !path.exists() {
                return path;
            }
        }
    }
}

fn file_name(ts: u64, seq: u32) -> String {
    format!("{ts:013}_{seq:06}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameBus;
    use tempfile::tempdir;

    fn frame(ts: u64) -> Frame {
        Frame::from_rgba(vec![(ts % 251) as u8; 4 * 4 * 3], 4, 3, ts).unwrap()
    }

    fn config(dir: &Path, queue_capacity: usize) -> PersistConfig {
        PersistConfig {
            enabled: true,
            output_dir: dir.to_path_buf(),
            queue_capacity,
            every_nth: 1,
        }
    }

    fn saved_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn namer_breaks_ties_and_never_goes_backwards() {
        let mut namer = FileNamer::default();
        assert_eq!(namer.next(1000), (1000, 0));
        assert_eq!(namer.next(1000), (1000, 1));
        assert_eq!(namer.next(999), (1000, 2));
        assert_eq!(namer.next(1001), (1001, 0));
        assert!(file_name(1000, 2) < file_name(1001, 0));
    }

    #[tokio::test]
    async fn fifty_frames_give_fifty_ordered_files() {
        let dir = tempdir().unwrap();
        let bus = FrameBus::new();
        let defaults = PersistConfig { output_dir: dir.path().to_path_buf(), ..Default::default() };
        let sink = Arc::new(PersistSink::spawn(&defaults).unwrap());
        bus.register(sink.clone());

        // Pairs of frames share a millisecond.
        for i in 0..50u64 {
            bus.publish(&frame(1_700_000_000_000 + i / 2));
        }
        sink.flush().await;

        let names = saved_names(dir.path());
        assert_eq!(names.len(), 50);
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.iter().all(|n| n.ends_with(".png")));
        assert_eq!(names[0], "1700000000000_000000.png");
        assert_eq!(names[1], "1700000000000_000001.png");
        assert_eq!(sink.stats().written(), 50);
        assert_eq!(sink.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn written_file_decodes_to_the_frame() {
        let dir = tempdir().unwrap();
        let sink = PersistSink::spawn(&config(dir.path(), 4)).unwrap();
        let original = frame(42);
        sink.deliver(&original);
        sink.flush().await;

        let path = dir.path().join(file_name(42, 0));
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.as_raw().as_slice(), original.rgba());
    }

    #[tokio::test]
    async fn existing_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(file_name(5, 0)), b"keep").unwrap();

        let sink = PersistSink::spawn(&config(dir.path(), 4)).unwrap();
        sink.deliver(&frame(5));
        sink.flush().await;

        assert_eq!(fs::read(dir.path().join(file_name(5, 0))).unwrap(), b"keep");
        assert!(dir.path().join(file_name(5, 1)).exists());
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_later_frames() {
        let dir = tempdir().unwrap();
        let sink = PersistSink::spawn(&config(dir.path(), 8)).unwrap();

        // A directory squatting on the `.part` name makes that one write fail.
        fs::create_dir(dir.path().join("0000000000010_000000.png.part")).unwrap();
        sink.deliver(&frame(10));
        sink.deliver(&frame(11));
        sink.flush().await;

        let stats = sink.stats();
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.written(), 1);
        assert!(dir.path().join(file_name(11, 0)).exists());
    }

    #[tokio::test]
    async fn every_nth_samples_frames() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), 16);
        cfg.every_nth = 3;
        let sink = PersistSink::spawn(&cfg).unwrap();

        for ts in 0..9 {
            assert_eq!(sink.deliver(&frame(100 + ts)), Delivery::Delivered);
        }
        sink.flush().await;

        assert_eq!(saved_names(dir.path()).len(), 3);
        assert_eq!(sink.stats().sampled_out(), 6);
    }
}
