//! Starry Bot viewer: live minimap of one selected application window.
//!
//! # Architecture
//!
//! ```text
//! egui (main thread)                      tokio runtime (worker threads)
//! ─────────────────────────────────────── ──────────────────────────────────
//! ViewerApp                               PersistSink writer task
//!   │ select / start / stop                 └─ spawn_blocking → PNG files
//!   ▼
//! CaptureController ── CaptureSession ── CaptureBackend (WGC / demo thread)
//!                                             │ RawFrame
//!                                             ▼
//!                                 convert → FrameBus ─┬─► PreviewSink ──watch──► ViewerApp
//!                                                     └─► PersistSink
//! ```
//!
//! Configuration comes from `$STARRY_CONFIG`, `./starry.json`, or defaults.

mod demo;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use starry_capture::{memory::MemoryBackend, platform_backend, CaptureBackend};
use starry_core::StarryConfig;
use starry_pipeline::{CaptureController, FrameBus, PersistSink, PreviewSink};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use demo::DemoSource;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starry Bot viewer v{}", env!("CARGO_PKG_VERSION"));

    let config = StarryConfig::load().context("Failed to load configuration")?;

    // ── Runtime ───────────────────────────────────────────────────────────
    // egui owns the main thread; async work runs on the runtime's workers.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let _guard = rt.enter();

    // ── Capture backend ───────────────────────────────────────────────────
    let mut demo_source: Option<DemoSource> = None;
    let backend: Arc<dyn CaptureBackend> = if config.demo_window {
        let memory = MemoryBackend::new();
        let window = memory.add_window(demo::DEMO_TITLE);
        demo_source = Some(DemoSource::spawn(window, 30).context("Failed to start demo source")?);
        info!("Demo window \"{}\" registered", demo::DEMO_TITLE);
        Arc::new(memory)
    } else {
        platform_backend()
    };

    // ── Bus + sinks ───────────────────────────────────────────────────────
    let bus = Arc::new(FrameBus::new());
    let preview = Arc::new(PreviewSink::new());
    if config.preview.enabled {
        bus.register(preview.clone());
    }
    let persist = if config.persist.enabled {
        let sink = Arc::new(PersistSink::spawn(&config.persist).context("Failed to start frame writer")?);
        bus.register(sink.clone());
        Some(sink)
    } else {
        None
    };

    // ── Controller ────────────────────────────────────────────────────────
    let (status_tx, status_rx) = mpsc::channel(64);
    let controller = Arc::new(
        CaptureController::new(backend, config.capture.clone(), bus).with_status(status_tx),
    );

    if let Some(name) = &config.selected_window {
        match controller.select_window(name) {
            Ok(_) if config.capture_active => {
                if let Err(e) = controller.start_capture() {
                    warn!("Initial capture of \"{}\" failed: {}", name, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Configured window not available: {}", e),
        }
    }

    // ── Window ────────────────────────────────────────────────────────────
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Starry Bot")
            .with_inner_size([720.0, 640.0])
            .with_min_inner_size([420.0, 360.0])
            .with_resizable(true),
        ..Default::default()
    };

    let app_controller = Arc::clone(&controller);
    let preview_rx = preview.subscribe();
    let rt_handle = rt.handle().clone();
    eframe::run_native(
        "Starry Bot",
        options,
        Box::new(move |cc| {
            Ok(Box::new(ui::ViewerApp::new(cc, rt_handle, app_controller, preview_rx, status_rx)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("eframe: {e}"))?;

    // ── Shutdown ──────────────────────────────────────────────────────────
    controller.stop_capture();
    drop(demo_source);
    if let Some(sink) = persist {
        rt.block_on(sink.flush());
        let stats = sink.stats();
        info!(
            "Saved {} frames to {} ({} dropped, {} failed)",
            stats.written(), sink.output_dir().display(), stats.dropped(), stats.failed()
        );
    }
    info!("Starry Bot viewer exited");
    Ok(())
}
