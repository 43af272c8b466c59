//! Synthetic test-pattern window for running the viewer without an OS backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use starry_capture::memory::MemoryWindow;
use starry_core::{now_ms, PixelFormat, RawFrame};

pub const DEMO_TITLE: &str = "Starry Demo Pattern";

const WIDTH: u32 = 320;
const HEIGHT: u32 = 200;
/// Extra bytes per row, like a GPU row pitch.
const ROW_PADDING: usize = 64;

/// Background thread pushing a moving BGRA pattern into a [`MemoryWindow`].
pub struct DemoSource {
    stop:   Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DemoSource {
    pub fn spawn(window: MemoryWindow, fps: u32) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = Duration::from_millis(1000 / u64::from(fps.max(1)));

        let thread = thread::Builder::new()
            .name("starry-demo".into())
            .spawn(move || {
                let mut tick = 0u32;
                while !stop_flag.load(Ordering::Relaxed) {
                    window.push_frame(pattern(tick));
                    tick = tick.wrapping_add(1);
                    thread::sleep(interval);
                }
            })?;

        Ok(Self { stop, thread: Some(thread) })
    }
}

impl Drop for DemoSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Diagonal colour bands scrolling one pixel per tick.
fn pattern(tick: u32) -> RawFrame {
    let stride = WIDTH as usize * 4 + ROW_PADDING;
    let mut data = vec![0u8; stride * HEIGHT as usize];
    for (y, row) in data.chunks_mut(stride).enumerate() {
        for (x, px) in row[..WIDTH as usize * 4].chunks_exact_mut(4).enumerate() {
            let band = ((x + y) as u32 + tick) / 16 % 3;
            let [b, g, r] = match band {
                0 => [0x40, 0x20, 0xE0],
                1 => [0x30, 0xC0, 0x30],
                _ => [0xE0, 0x60, 0x20],
            };
            px.copy_from_slice(&[b, g, r, 0xFF]);
        }
    }
    RawFrame {
        data:           Bytes::from(data),
        stride,
        format:         PixelFormat::Bgra8,
        width:          WIDTH,
        height:         HEIGHT,
        captured_at_ms: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_converts_to_packed_rgba() {
        let frame = starry_pipeline::convert(&pattern(0)).unwrap();
        assert_eq!((frame.width(), frame.height()), (WIDTH, HEIGHT));
        assert_eq!(frame.rgba().len(), (WIDTH * HEIGHT * 4) as usize);
        // band 0 at the origin: BGRA (0x40, 0x20, 0xE0) → RGBA (0xE0, 0x20, 0x40)
        assert_eq!(&frame.rgba()[..4], &[0xE0, 0x20, 0x40, 0xFF]);
    }

    #[test]
    fn pattern_scrolls_with_tick() {
        assert_ne!(pattern(0).data, pattern(16).data);
    }
}
