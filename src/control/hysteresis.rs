/// Switching band in percent air saturation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Hold,
    TurnOn,
    TurnOff,
}

impl Transition {
    /// Relay level to command, if any.
    pub fn target(self) -> Option<bool> {
        match self {
            Transition::Hold => None,
            Transition::TurnOn => Some(true),
            Transition::TurnOff => Some(false),
        }
    }
}

/// Two-threshold on/off controller for one channel.
///
/// The relay switches on once the reading drops below `low` and stays on until
/// it rises above `high`. Readings inside `[low, high]` never cause a flip.
#[derive(Clone, Debug)]
pub struct Hysteresis {
    thresholds: Thresholds,
    relay_on: bool,
}

impl Hysteresis {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            relay_on: false,
        }
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    pub fn step(&mut self, percent: f64) -> Transition {
        if percent < self.thresholds.low && !self.relay_on {
            self.relay_on = true;
            Transition::TurnOn
        } else if percent > self.thresholds.high && self.relay_on {
            self.relay_on = false;
            Transition::TurnOff
        } else {
            Transition::Hold
        }
    }

    pub fn reset(&mut self) {
        self.relay_on = false;
    }
}
