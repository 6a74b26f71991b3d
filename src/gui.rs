// src/gui.rs
use eframe::egui;
use egui::{Color32, RichText, TextEdit};
use egui_plot::{HLine, Legend, Line, Plot, PlotPoints};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::control::{ChannelForm, CyclerForm};
use crate::drivers;
use crate::session::{SessionController, SessionState, StartRequest, StopOutcome};
use crate::settings::{BoardKind, Settings, SETTINGS_FILE};
use crate::types::*;

const HISTORY_LEN: usize = 600;
const REPAINT_EVERY: Duration = Duration::from_millis(250);
const ORANGE: Color32 = Color32::from_rgb(255, 165, 0);
const TRACE_COLORS: [Color32; 4] = [
    Color32::from_rgb(0, 255, 255),
    Color32::YELLOW,
    Color32::from_rgb(255, 0, 255),
    Color32::LIGHT_GREEN,
];

pub struct OxyRegApp {
    settings: Settings,
    variant: Variant,
    board_kind: BoardKind,
    controller: SessionController,

    // forms
    single: ChannelForm,
    four: Vec<ChannelForm>,
    cycler: CyclerForm,

    // live display
    readings: Vec<ChannelReading>,
    countdown: Option<String>,
    history: Vec<Vec<[f64; 2]>>,
    session_start: Option<Instant>,
    log_messages: Vec<String>,
}

fn build_controller(settings: &Settings) -> SessionController {
    let board = settings.board.clone();
    SessionController::new(settings, Box::new(move || drivers::open_board(&board)))
}

impl OxyRegApp {
    pub fn new(settings: Settings) -> Self {
        let controller = build_controller(&settings);
        Self {
            variant: Variant::SingleChannel,
            board_kind: settings.board.kind,
            controller,
            single: ChannelForm::from_settings(&settings.single_channel),
            four: settings
                .four_channel
                .iter()
                .map(ChannelForm::from_settings)
                .collect(),
            cycler: CyclerForm::from_settings(&settings.flush_cycler),
            readings: Vec::new(),
            countdown: None,
            history: Vec::new(),
            session_start: None,
            log_messages: vec!["O₂ control ready.".to_owned()],
            settings,
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {}", msg));
        if self.log_messages.len() > 8 {
            self.log_messages.remove(0);
        }
    }

    fn set_board_kind(&mut self, kind: BoardKind) {
        if kind == self.board_kind || self.controller.is_active() {
            return;
        }
        self.board_kind = kind;
        self.settings.board.kind = kind;
        self.controller = build_controller(&self.settings);
        if let Err(e) = self.settings.save(Path::new(SETTINGS_FILE)) {
            log::warn!("{e:#}");
        }
        self.log(match kind {
            BoardKind::Simulated => "Using simulated board",
            BoardKind::Mcc => "Using MCC board",
        });
    }

    fn start_request(&self) -> StartRequest {
        match self.variant {
            Variant::SingleChannel => StartRequest::Regulate(vec![self.single.clone()]),
            Variant::FourChannel => StartRequest::Regulate(self.four.clone()),
            Variant::FlushCycler => StartRequest::Cycle(self.cycler.clone()),
        }
    }

    fn on_button(&mut self) {
        match self.controller.state() {
            SessionState::Idle => {
                let request = self.start_request();
                match self.controller.start(&request) {
                    Ok(()) => {
                        self.readings.clear();
                        self.countdown = None;
                        self.history = vec![Vec::new(); self.channel_count()];
                        self.session_start = Some(Instant::now());
                        let msg = match self.controller.log_path() {
                            Some(path) => format!("Started, logging to {}", path.display()),
                            None => "Started".to_owned(),
                        };
                        self.log(&msg);
                    }
                    Err(e) => self.log(&e.to_string()),
                }
            }
            _ => match self.controller.request_stop(Instant::now()) {
                StopOutcome::Armed => self.log("Press again to confirm stop"),
                StopOutcome::Stopped => {
                    self.countdown = None;
                    let status = self.controller.status().to_owned();
                    self.log(&status);
                }
                StopOutcome::Ignored => {}
            },
        }
    }

    fn channel_count(&self) -> usize {
        match self.variant {
            Variant::SingleChannel => 1,
            Variant::FourChannel => self.four.len(),
            Variant::FlushCycler => 0,
        }
    }

    fn handle_events(&mut self) {
        for event in self.controller.poll(Instant::now()) {
            match event {
                ControlEvent::Tick(readings) => {
                    let t = self
                        .session_start
                        .map(|s| s.elapsed().as_secs_f64())
                        .unwrap_or(0.0);
                    for r in &readings {
                        if let Some(buf) = self.history.get_mut(r.channel) {
                            buf.push([t, r.percent]);
                            if buf.len() > HISTORY_LEN {
                                buf.remove(0);
                            }
                        }
                    }
                    self.readings = readings;
                }
                ControlEvent::Countdown {
                    relay_on,
                    remaining_secs,
                } => {
                    self.countdown = Some(ControlEvent::countdown_text(relay_on, remaining_secs));
                }
                ControlEvent::Fault(msg) => {
                    self.countdown = None;
                    self.log(&format!("Fault: {msg}"));
                }
                ControlEvent::Finished => {}
            }
        }
    }

    fn channel_grid(ui: &mut egui::Ui, id: &str, forms: &mut [ChannelForm], enabled: bool) {
        egui::Grid::new(id).striped(true).show(ui, |ui| {
            ui.label("");
            for n in 1..=forms.len() {
                ui.strong(if forms.len() == 1 {
                    "Value".to_owned()
                } else {
                    format!("Ch{n}")
                });
            }
            ui.end_row();
            let rows: [(&str, fn(&mut ChannelForm) -> &mut String); 4] = [
                ("0% voltage (V)", |f| &mut f.v0),
                ("100% voltage (V)", |f| &mut f.v100),
                ("Low threshold (%)", |f| &mut f.low),
                ("High threshold (%)", |f| &mut f.high),
            ];
            for (label, field) in rows {
                ui.label(label);
                for form in forms.iter_mut() {
                    ui.add_enabled(enabled, TextEdit::singleline(field(form)).desired_width(60.0));
                }
                ui.end_row();
            }
        });
    }

    fn cycler_grid(ui: &mut egui::Ui, form: &mut CyclerForm, enabled: bool) {
        egui::Grid::new("cycler_form").show(ui, |ui| {
            ui.label("Flushing period (s)");
            ui.add_enabled(enabled, TextEdit::singleline(&mut form.on_secs).desired_width(60.0));
            ui.end_row();
            ui.label("Closed period (s)");
            ui.add_enabled(enabled, TextEdit::singleline(&mut form.off_secs).desired_width(60.0));
            ui.end_row();
        });
    }

    fn readouts(&self, ui: &mut egui::Ui) {
        if self.variant == Variant::FlushCycler {
            if let Some(text) = &self.countdown {
                ui.label(RichText::new(text).size(18.0).strong());
            }
            return;
        }
        ui.horizontal_wrapped(|ui| {
            for r in &self.readings {
                ui.group(|ui| {
                    ui.vertical(|ui| {
                        if self.readings.len() > 1 {
                            ui.strong(format!("Ch{}", r.channel + 1));
                        }
                        ui.label(RichText::new(r.percent_text()).size(18.0).strong());
                        ui.label(r.volts_text());
                        let colour = if r.relay_on { Color32::LIGHT_GREEN } else { Color32::GRAY };
                        ui.label(RichText::new(r.relay_text()).color(colour));
                    });
                });
            }
        });
    }

    fn thresholds(&self) -> Vec<(f64, f64)> {
        let forms: &[ChannelForm] = match self.variant {
            Variant::SingleChannel => std::slice::from_ref(&self.single),
            Variant::FourChannel => &self.four,
            Variant::FlushCycler => &[],
        };
        forms
            .iter()
            .filter_map(|f| Some((f.low.trim().parse().ok()?, f.high.trim().parse().ok()?)))
            .collect()
    }

    fn trend(&self, ui: &mut egui::Ui) {
        let bands = self.thresholds();
        Plot::new("do_trend")
            .legend(Legend::default())
            .include_y(0.0)
            .include_y(100.0)
            .auto_bounds_x()
            .show(ui, |plot_ui| {
                for (i, buf) in self.history.iter().enumerate() {
                    if buf.is_empty() {
                        continue;
                    }
                    let colour = TRACE_COLORS[i % TRACE_COLORS.len()];
                    plot_ui.line(
                        Line::new(PlotPoints::new(buf.clone()))
                            .name(format!("DO{}", i + 1))
                            .color(colour),
                    );
                }
                // band of the first channel only; four bands clutter the plot
                if let Some((low, high)) = bands.first() {
                    plot_ui.hline(HLine::new(*low).color(Color32::DARK_GRAY));
                    plot_ui.hline(HLine::new(*high).color(Color32::DARK_GRAY));
                }
            });
    }
}

impl eframe::App for OxyRegApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events();
        let state = self.controller.state();
        let idle = state == SessionState::Idle;

        egui::SidePanel::left("controls").min_width(300.0).show(ctx, |ui| {
            ui.add_space(10.0);
            ui.heading(self.variant.title());
            ui.separator();

            ui.add_enabled_ui(idle, |ui| {
                ui.horizontal(|ui| {
                    for v in [Variant::SingleChannel, Variant::FourChannel, Variant::FlushCycler] {
                        if ui.selectable_label(self.variant == v, v.label()).clicked() && self.variant != v {
                            self.variant = v;
                            self.readings.clear();
                            self.history.clear();
                            self.countdown = None;
                        }
                    }
                });
                ui.horizontal(|ui| {
                    if ui.selectable_label(self.board_kind == BoardKind::Simulated, "SIM").clicked() {
                        self.set_board_kind(BoardKind::Simulated);
                    }
                    if ui.selectable_label(self.board_kind == BoardKind::Mcc, "REAL").clicked() {
                        self.set_board_kind(BoardKind::Mcc);
                    }
                });
            });
            ui.add_space(10.0);

            match self.variant {
                Variant::SingleChannel => {
                    Self::channel_grid(ui, "single_form", std::slice::from_mut(&mut self.single), idle)
                }
                Variant::FourChannel => Self::channel_grid(ui, "four_form", &mut self.four, idle),
                Variant::FlushCycler => Self::cycler_grid(ui, &mut self.cycler, idle),
            }
            ui.add_space(10.0);

            let fill = match state {
                SessionState::Idle => Color32::LIGHT_GREEN,
                SessionState::Running => Color32::RED,
                SessionState::StopPending => ORANGE,
            };
            let button = egui::Button::new(RichText::new(state.button_label()).color(Color32::BLACK).strong())
                .fill(fill)
                .min_size(egui::vec2(140.0, 32.0));
            if ui.add(button).clicked() {
                self.on_button();
            }

            ui.add_space(6.0);
            ui.label(RichText::new(self.controller.status()).strong());
            if let Some(started) = self.controller.started_at() {
                ui.label(RichText::new(format!("since {}", started.format("%H:%M:%S"))).small());
            }

            ui.add_space(10.0);
            ui.separator();
            egui::ScrollArea::vertical().max_height(140.0).show(ui, |ui| {
                for m in &self.log_messages {
                    ui.monospace(m);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.readouts(ui);
            ui.add_space(10.0);
            if self.variant != Variant::FlushCycler {
                self.trend(ui);
            }
        });

        // keeps the confirmation timer and readouts current without input
        if self.controller.is_active() {
            ctx.request_repaint_after(REPAINT_EVERY);
        }
    }
}
