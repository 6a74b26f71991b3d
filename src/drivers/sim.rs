use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::drivers::{AnalogRange, Daq, DaqError, DigitalPort, PortDirection};

/// 16-bit converter.
const FULL_SCALE: f64 = 65535.0;

#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitWrite {
    pub port: DigitalPort,
    pub bit: u8,
    pub high: bool,
}

/// Sensor model used in SIM mode: a channel climbs while the relay bit with the
/// same index is high and decays otherwise.
#[derive(Clone, Copy, Debug)]
struct Aeration {
    rise: f64,
    decay: f64,
    floor: f64,
    ceiling: f64,
}

#[derive(Default)]
struct SimState {
    levels: HashMap<u8, f64>,
    scripts: HashMap<u8, VecDeque<f64>>,
    outputs: HashMap<u8, bool>,
    #[cfg(test)]
    writes: Vec<BitWrite>,
    #[cfg(test)]
    configured: Vec<(DigitalPort, PortDirection)>,
    reads: usize,
    fail_reads_after: Option<usize>,
    fail_writes: bool,
    drift: f64,
    aeration: Option<Aeration>,
}

impl SimState {
    fn bit_high(&self, bit: u8) -> bool {
        self.outputs.get(&bit).copied().unwrap_or(false)
    }

    fn next_level(&mut self, channel: u8) -> f64 {
        let scripted = self.scripts.get_mut(&channel).and_then(VecDeque::pop_front);
        let level = match (scripted, self.aeration) {
            (Some(v), _) => v,
            (None, Some(model)) => {
                let current = self.levels.get(&channel).copied().unwrap_or(model.floor);
                let next = if self.bit_high(channel) {
                    current + model.rise
                } else {
                    current - model.decay
                };
                next.clamp(model.floor, model.ceiling)
            }
            (None, None) => self.levels.get(&channel).copied().unwrap_or(0.0),
        };
        self.levels.insert(channel, level);
        if self.drift > 0.0 {
            level + rand::thread_rng().gen_range(-self.drift..=self.drift)
        } else {
            level
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory board for tests and SIM mode.
///
/// Sensor voltages are set or scripted through a [`SimProbe`], which also
/// exposes every digital write the board received.
pub struct SimulatedBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Board with a crude aeration model and a little sensor noise, for demos.
    pub fn with_aeration(start_volts: f64, rise: f64, decay: f64, ceiling: f64) -> Self {
        let board = Self::new();
        {
            let mut state = lock(&board.state);
            state.aeration = Some(Aeration {
                rise,
                decay,
                floor: 0.0,
                ceiling,
            });
            state.drift = 0.002;
            for ch in 0..4 {
                state.levels.insert(ch, start_volts);
            }
        }
        board
    }

    #[cfg(test)]
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Daq for SimulatedBoard {
    fn configure_port(
        &mut self,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), DaqError> {
        log::debug!("sim: {port:?} configured for {direction:?}");
        #[cfg(test)]
        lock(&self.state).configured.push((port, direction));
        Ok(())
    }

    fn write_bit(&mut self, port: DigitalPort, bit: u8, high: bool) -> Result<(), DaqError> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(DaqError::Simulated("digital write"));
        }
        log::trace!("sim: {port:?} bit {bit} -> {high}");
        state.outputs.insert(bit, high);
        #[cfg(test)]
        state.writes.push(BitWrite { port, bit, high });
        Ok(())
    }

    fn analog_in(&mut self, channel: u8, range: AnalogRange) -> Result<u16, DaqError> {
        let mut state = lock(&self.state);
        if state.fail_reads_after.is_some_and(|limit| state.reads >= limit) {
            return Err(DaqError::Simulated("analog read"));
        }
        state.reads += 1;
        let volts = state.next_level(channel);
        let (lo, hi) = range.span();
        let counts = ((volts - lo) / (hi - lo) * FULL_SCALE)
            .round()
            .clamp(0.0, FULL_SCALE);
        Ok(counts as u16)
    }

    fn to_eng_units(&mut self, range: AnalogRange, counts: u16) -> Result<f32, DaqError> {
        let (lo, hi) = range.span();
        Ok((lo + f64::from(counts) / FULL_SCALE * (hi - lo)) as f32)
    }
}

/// Test-side handle onto a [`SimulatedBoard`]; stays valid after the board
/// has moved into a worker thread.
#[cfg(test)]
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

#[cfg(test)]
impl SimProbe {
    pub fn set_volts(&self, channel: u8, volts: f64) {
        lock(&self.state).levels.insert(channel, volts);
    }

    /// Queue readings returned one per sample before falling back to the held level.
    pub fn script(&self, channel: u8, volts: impl IntoIterator<Item = f64>) {
        lock(&self.state)
            .scripts
            .entry(channel)
            .or_default()
            .extend(volts);
    }

    pub fn writes(&self) -> Vec<BitWrite> {
        lock(&self.state).writes.clone()
    }

    /// Last level commanded on `bit`, if it was ever written.
    pub fn last_write(&self, bit: u8) -> Option<bool> {
        lock(&self.state)
            .writes
            .iter()
            .rev()
            .find(|w| w.bit == bit)
            .map(|w| w.high)
    }

    pub fn configured(&self) -> Vec<(DigitalPort, PortDirection)> {
        lock(&self.state).configured.clone()
    }

    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    pub fn fail_reads_after(&self, reads: usize) {
        lock(&self.state).fail_reads_after = Some(reads);
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }
}
