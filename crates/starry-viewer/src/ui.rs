//! egui front end: window picker, start/stop, live minimap and status.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Starry Bot                                            │
//! ├────────────────────────────────────────────────────────┤
//! │  Window [Calculator_____________▼]  [⟳ Refresh]        │
//! │  [▶ Start Capture]                 [■ Stop]            │
//! │  ● Running  "Calculator" (0x2a04f2)                    │
//! │  30 fps | captured 912 | published 912 | ...           │
//! ├────────────────────────────────────────────────────────┤
//! │                                                        │
//! │                 live minimap preview                   │
//! │                                                        │
//! └────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use eframe::egui::{self, Color32, RichText};
use starry_core::{Frame, SessionState, SessionStatus, WindowTarget};
use starry_pipeline::CaptureController;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

pub struct ViewerApp {
    controller: Arc<CaptureController>,

    // ── Window picker ──
    windows:      Vec<WindowTarget>,
    action_error: Option<String>,

    // ── Status ──
    status_rx: mpsc::Receiver<SessionStatus>,
    status:    SessionStatus,

    // ── Preview ──
    preview_rx: watch::Receiver<Option<Frame>>,
    texture:    Option<egui::TextureHandle>,
}

impl ViewerApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        rt_handle: Handle,
        controller: Arc<CaptureController>,
        preview_rx: watch::Receiver<Option<Frame>>,
        status_rx: mpsc::Receiver<SessionStatus>,
    ) -> Self {
        // Repaint as soon as the preview changes instead of waiting for input.
        let mut wake_rx = preview_rx.clone();
        let ctx = cc.egui_ctx.clone();
        rt_handle.spawn(async move {
            while wake_rx.changed().await.is_ok() {
                ctx.request_repaint();
            }
        });

        let status = controller.status();
        let mut app = Self {
            controller,
            windows: Vec::new(),
            action_error: None,
            status_rx,
            status,
            preview_rx,
            texture: None,
        };
        app.refresh_windows();
        app
    }

    fn refresh_windows(&mut self) {
        match self.controller.list_windows() {
            Ok(list) => {
                tracing::debug!("{} windows available", list.len());
                self.windows = list;
            }
            Err(e) => self.action_error = Some(e.to_string()),
        }
    }

    fn select(&mut self, name: &str) {
        self.action_error = self.controller.select_window(name).err().map(|e| e.to_string());
        self.status = self.controller.status();
    }

    fn start(&mut self) {
        self.action_error = self.controller.start_capture().err().map(|e| e.to_string());
        self.status = self.controller.status();
    }

    fn stop(&mut self) {
        self.controller.stop_capture();
        self.action_error = None;
        self.status = self.controller.status();
    }

    fn poll_status(&mut self) {
        while let Ok(s) = self.status_rx.try_recv() {
            self.status = s;
        }
    }

    fn poll_preview(&mut self, ctx: &egui::Context) {
        if !self.preview_rx.has_changed().unwrap_or(false) {
            return;
        }
        let latest = self.preview_rx.borrow_and_update().clone();
        match latest {
            Some(frame) => {
                let size = [frame.width() as usize, frame.height() as usize];
                let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.rgba());
                match &mut self.texture {
                    Some(tex) => tex.set(image, egui::TextureOptions::LINEAR),
                    None => {
                        self.texture =
                            Some(ctx.load_texture("minimap", image, egui::TextureOptions::LINEAR));
                    }
                }
            }
            None => self.texture = None,
        }
    }

    fn status_line(&self, ui: &mut egui::Ui) {
        let target = self
            .status
            .target
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "no window selected".to_owned());

        ui.horizontal(|ui| {
            match self.status.state {
                SessionState::Idle => {
                    ui.label(RichText::new("○ Idle").color(Color32::GRAY));
                }
                SessionState::Starting | SessionState::Stopping => {
                    ui.label(RichText::new(format!("⟳ {}", self.status.state)).color(Color32::YELLOW));
                }
                SessionState::Running => {
                    ui.label(RichText::new("● Running").color(Color32::GREEN));
                }
                SessionState::Failed => {
                    let msg = self
                        .status
                        .last_error
                        .as_ref()
                        .map_or_else(|| "failed".to_owned(), ToString::to_string);
                    ui.label(RichText::new(format!("✗ {msg}")).color(Color32::RED));
                }
            }
            ui.label(RichText::new(target).color(Color32::GRAY));
        });

        if self.status.needs_reselection() {
            ui.label(
                RichText::new("The window is gone. Pick a window and press Start again.")
                    .color(Color32::LIGHT_RED),
            );
        }
        if let Some(err) = &self.action_error {
            ui.label(RichText::new(err).color(Color32::LIGHT_RED));
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_status();
        self.poll_preview(ctx);
        ctx.request_repaint_after(Duration::from_millis(500));

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.spacing_mut().item_spacing = egui::vec2(8.0, 6.0);
            ui.heading("Starry Bot");
            ui.separator();

            // ── Window picker ─────────────────────────────────────────────
            let mut picked: Option<String> = None;
            ui.horizontal(|ui| {
                ui.label("Window:");
                let selected = self
                    .controller
                    .selection()
                    .map(|t| t.display_name)
                    .unwrap_or_else(|| "(select a window)".to_owned());
                egui::ComboBox::from_id_source("window")
                    .selected_text(selected.clone())
                    .width(260.0)
                    .show_ui(ui, |ui| {
                        for w in &self.windows {
                            if ui.selectable_label(w.display_name == selected, &w.display_name).clicked() {
                                picked = Some(w.display_name.clone());
                            }
                        }
                    });
                if ui.small_button("⟳ Refresh").clicked() {
                    self.refresh_windows();
                }
            });
            if let Some(name) = picked {
                self.select(&name);
            }

            // ── Buttons ───────────────────────────────────────────────────
            ui.horizontal(|ui| {
                if !self.status.state.is_active() {
                    if ui.add_sized([160.0, 32.0], egui::Button::new("▶  Start Capture")).clicked() {
                        self.start();
                    }
                } else if ui.add_sized([120.0, 32.0], egui::Button::new("■  Stop")).clicked() {
                    self.stop();
                }
            });

            self.status_line(ui);
            ui.small(self.controller.metrics().to_string());
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| match &self.texture {
            Some(tex) => {
                // Scale to fit the panel, keeping the aspect ratio.
                let size = tex.size_vec2();
                let avail = ui.available_size();
                let scale = (avail.x / size.x).min(avail.y / size.y).max(0.0);
                ui.centered_and_justified(|ui| {
                    ui.image((tex.id(), size * scale));
                });
            }
            None => {
                ui.centered_and_justified(|ui| {
                    ui.label(RichText::new("No preview. Select a window and press Start.").color(Color32::GRAY));
                });
            }
        });
    }
}
