use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::drivers::{AnalogRange, DigitalPort};

pub const SETTINGS_FILE: &str = "oxyreg.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardKind {
    Simulated,
    Mcc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub kind: BoardKind,
    /// Board number as registered in InstaCal.
    pub board_num: i32,
    pub relay_port: DigitalPort,
    pub analog_range: AnalogRange,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            kind: BoardKind::Simulated,
            board_num: 0,
            relay_port: DigitalPort::FirstPortA,
            analog_range: AnalogRange::Bip5Volts,
        }
    }
}

/// Wiring and form defaults for one DO channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub analog_input: u8,
    pub relay_bit: u8,
    pub v0: f64,
    pub v100: f64,
    pub low: f64,
    pub high: f64,
}

impl ChannelSettings {
    fn four_channel(index: u8) -> Self {
        Self {
            analog_input: index,
            relay_bit: index,
            v0: 0.0,
            v100: 2.0,
            low: 60.0,
            high: 70.0,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            analog_input: 0,
            relay_bit: 0,
            v0: 0.1,
            v100: 2.1,
            low: 60.0,
            high: 70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CyclerSettings {
    pub relay_bit: u8,
    pub on_secs: f64,
    pub off_secs: f64,
}

impl Default for CyclerSettings {
    fn default() -> Self {
        Self {
            relay_bit: 0,
            on_secs: 300.0,
            off_secs: 600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub board: BoardSettings,
    pub tick_ms: u64,
    pub stop_confirm_ms: u64,
    pub log_dir: PathBuf,
    pub single_channel: ChannelSettings,
    pub four_channel: Vec<ChannelSettings>,
    pub flush_cycler: CyclerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            board: BoardSettings::default(),
            tick_ms: 1000,
            stop_confirm_ms: 3000,
            log_dir: PathBuf::from("."),
            single_channel: ChannelSettings::default(),
            four_channel: (0..4).map(ChannelSettings::four_channel).collect(),
            flush_cycler: CyclerSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Defaults when the file is missing; a broken file is reported and ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No {} found, using default settings", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e:#}; using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn stop_confirm_window(&self) -> Duration {
        Duration::from_millis(self.stop_confirm_ms)
    }
}
