use std::time::Duration;

use eframe::egui::{self, Align, Color32, Layout, RichText, Stroke, Vec2};
use log::{info, warn};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot;

use crate::engine::state::{EventReceiver, LauncherEvent, Phase, SyncProgress};
use crate::util::format_bytes;

pub mod console;

const WINDOW_TITLE: &str = "Updraft";
const REPAINT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThemePalette {
    bg: Color32,
    surface: Color32,
    border: Color32,
    text_primary: Color32,
    text_muted: Color32,
    accent: Color32,
    accent_soft: Color32,
    warning: Color32,
    danger: Color32,
}

impl ThemePalette {
    const fn dark() -> Self {
        Self {
            bg: Color32::from_rgb(11, 14, 19),
            surface: Color32::from_rgb(24, 31, 39),
            border: Color32::from_rgb(45, 57, 72),
            text_primary: Color32::from_rgb(228, 235, 244),
            text_muted: Color32::from_rgb(167, 182, 197),
            accent: Color32::from_rgb(92, 219, 195),
            accent_soft: Color32::from_rgb(63, 140, 125),
            warning: Color32::from_rgb(246, 195, 111),
            danger: Color32::from_rgb(239, 117, 117),
        }
    }
}

fn apply_theme(ctx: &egui::Context, colors: &ThemePalette) {
    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = colors.bg;
    visuals.window_fill = colors.bg;
    visuals.override_text_color = Some(colors.text_primary);
    visuals.widgets.inactive.bg_fill = colors.surface;
    visuals.widgets.inactive.weak_bg_fill = colors.surface;
    visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, colors.border);
    visuals.widgets.hovered.bg_fill = colors.accent_soft;
    visuals.widgets.hovered.weak_bg_fill = colors.accent_soft;
    visuals.widgets.active.bg_fill = colors.accent;
    visuals.selection.bg_fill = colors.accent;
    visuals.extreme_bg_color = colors.surface;
    ctx.set_visuals(visuals);

    let mut style = (*ctx.style()).clone();
    style.spacing.item_spacing = Vec2::new(10.0, 10.0);
    style.spacing.button_padding = Vec2::new(14.0, 8.0);
    ctx.set_style(style);
}

/// What the operator reads while a phase runs.
fn phase_status(phase: Phase) -> &'static str {
    match phase {
        Phase::ResolveManifest => "Checking for updates…",
        Phase::PlanSync => "Comparing installed files…",
        Phase::SkipSync => "Starting installed version…",
        Phase::SyncFiles => "Downloading update…",
        Phase::ComposeApplication => "Preparing application…",
        Phase::InitApplication => "Initialising application…",
        Phase::StartApplication | Phase::StopApplication => "Handing off…",
    }
}

/// "120.0 KB / 1.5 MB"
fn progress_label(progress: &SyncProgress) -> String {
    format!(
        "{} / {}",
        format_bytes(progress.written),
        format_bytes(progress.total)
    )
}

struct PendingUpdate {
    artifacts: usize,
    total_bytes: u64,
    reply: oneshot::Sender<bool>,
}

/// Progress window shown while the background sequence runs. It closes
/// itself once the application is ready to take over.
pub struct LauncherWindow {
    events: EventReceiver,
    colors: ThemePalette,
    status: &'static str,
    progress: Option<SyncProgress>,
    pending: Option<PendingUpdate>,
    warning: Option<String>,
    failure: Option<String>,
    closing: bool,
}

impl LauncherWindow {
    pub fn new(cc: &eframe::CreationContext<'_>, events: EventReceiver) -> Self {
        let colors = ThemePalette::dark();
        apply_theme(&cc.egui_ctx, &colors);
        Self {
            events,
            colors,
            status: phase_status(Phase::ResolveManifest),
            progress: None,
            pending: None,
            warning: None,
            failure: None,
            closing: false,
        }
    }

    /// Open the window and block until it closes.
    pub fn run(events: EventReceiver) -> Result<(), String> {
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_title(WINDOW_TITLE)
                .with_decorations(false)
                .with_resizable(false)
                .with_inner_size(egui::vec2(460.0, 240.0)),
            ..Default::default()
        };
        eframe::run_native(
            WINDOW_TITLE,
            options,
            Box::new(move |cc| Ok(Box::new(LauncherWindow::new(cc, events)))),
        )
        .map_err(|e| format!("launcher window failed: {e}"))
    }

    fn sync_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.failure.is_none() {
                        self.closing = true;
                    }
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: LauncherEvent) {
        match event {
            LauncherEvent::Phase(phase) => self.status = phase_status(phase),
            LauncherEvent::UpdateAvailable {
                artifacts,
                total_bytes,
                decision,
            } => {
                if let Some(reply) = decision {
                    self.pending = Some(PendingUpdate {
                        artifacts,
                        total_bytes,
                        reply,
                    });
                }
            }
            LauncherEvent::Progress(progress) => self.progress = Some(progress),
            LauncherEvent::SyncFailed(failure) => self.warning = Some(failure.to_string()),
            LauncherEvent::Failed(failure) => {
                self.pending = None;
                self.failure = Some(failure.to_string());
            }
            LauncherEvent::ReadyToHandOff { version } => {
                info!("ui: releasing window for version {version}");
                self.closing = true;
            }
        }
    }

    fn answer(&mut self, accept: bool) {
        if let Some(pending) = self.pending.take() {
            if pending.reply.send(accept).is_err() {
                warn!("ui: update decision arrived after the engine stopped waiting");
            }
        }
    }

    fn render_progress(&self, ui: &mut egui::Ui) {
        ui.label(RichText::new(self.status).color(self.colors.text_muted));
        if let Some(progress) = &self.progress {
            ui.add(
                egui::ProgressBar::new(progress.ratio as f32)
                    .fill(self.colors.accent)
                    .desired_height(20.0)
                    .show_percentage(),
            );
            ui.label(RichText::new(progress_label(progress)).color(self.colors.text_muted));
        } else {
            ui.add(egui::Spinner::new());
        }
        if let Some(warning) = &self.warning {
            ui.colored_label(self.colors.warning, warning);
        }
    }

    fn render_prompt(&mut self, ui: &mut egui::Ui) {
        let Some(pending) = &self.pending else {
            return;
        };
        ui.label(
            RichText::new(format!(
                "An update is available: {} files, {}.",
                pending.artifacts,
                format_bytes(pending.total_bytes)
            ))
            .strong(),
        );
        let mut decision = None;
        ui.with_layout(Layout::left_to_right(Align::Center), |ui| {
            if ui.button("Update now").clicked() {
                decision = Some(true);
            }
            if ui.button("Not now").clicked() {
                decision = Some(false);
            }
        });
        if let Some(accept) = decision {
            self.answer(accept);
        }
    }

    fn render_failure(&mut self, ui: &mut egui::Ui) {
        let Some(report) = &self.failure else {
            return;
        };
        ui.colored_label(self.colors.danger, RichText::new("Launch failed").strong());
        egui::ScrollArea::vertical().max_height(110.0).show(ui, |ui| {
            ui.add(
                egui::TextEdit::multiline(&mut report.as_str())
                    .desired_width(f32::INFINITY)
                    .code_editor(),
            );
        });
        if ui.button("Close").clicked() {
            self.closing = true;
        }
    }
}

impl eframe::App for LauncherWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sync_events();
        if self.closing {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(RichText::new(WINDOW_TITLE).color(self.colors.accent));
            ui.add_space(6.0);
            if self.failure.is_some() {
                self.render_failure(ui);
            } else if self.pending.is_some() {
                self.render_prompt(ui);
            } else {
                self.render_progress(ui);
            }
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_has_a_status_line() {
        for phase in [
            Phase::ResolveManifest,
            Phase::PlanSync,
            Phase::SkipSync,
            Phase::SyncFiles,
            Phase::ComposeApplication,
            Phase::InitApplication,
            Phase::StartApplication,
            Phase::StopApplication,
        ] {
            assert!(!phase_status(phase).is_empty());
        }
    }

    #[test]
    fn progress_label_shows_written_over_total() {
        let progress = SyncProgress {
            written: 2_048,
            total: 5_242_880,
            ratio: 0.0004,
        };
        assert_eq!(progress_label(&progress), "2.0 KB / 5.0 MB");
    }
}
