// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod control;
mod drivers;
mod engine;
mod gui;
mod recorder;
mod session;
mod settings;
mod types;
use eframe::egui;
use env_logger::Env;
use std::path::Path;

use settings::{Settings, SETTINGS_FILE};

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let settings = Settings::load_or_default(Path::new(SETTINGS_FILE));
    log::info!(
        "Board: {:?}, tick {} ms, logs in {}",
        settings.board.kind,
        settings.tick_ms,
        settings.log_dir.display()
    );

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([960.0, 640.0])
        .with_min_inner_size([720.0, 480.0])
        .with_title("O₂ Control");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "O₂ Control",
        options,
        Box::new(move |_cc| Box::new(gui::OxyRegApp::new(settings))),
    )
}
