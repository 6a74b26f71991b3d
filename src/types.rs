// src/types.rs

/// Which program the operator is running.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Variant {
    SingleChannel,
    FourChannel,
    FlushCycler,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Variant::SingleChannel => "1 CH",
            Variant::FourChannel => "4 CH",
            Variant::FlushCycler => "FLUSH",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Variant::SingleChannel => "O₂ Control",
            Variant::FourChannel => "4-channel O₂ Control",
            Variant::FlushCycler => "Flush Pump Control",
        }
    }
}

/// One channel's result for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelReading {
    pub channel: usize,
    pub volts: f64,
    pub percent: f64,
    pub relay_on: bool,
}

impl ChannelReading {
    pub fn percent_text(&self) -> String {
        format!("DO: {:.2}% air sat", self.percent)
    }

    pub fn volts_text(&self) -> String {
        format!("Voltage: {:.4} V", self.volts)
    }

    pub fn relay_text(&self) -> &'static str {
        relay_text(self.relay_on)
    }
}

pub fn relay_text(on: bool) -> &'static str {
    if on {
        "Supplying aerated water"
    } else {
        "Pump closed"
    }
}

/// Worker → UI messages.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    /// One regulation tick, every channel sampled in order.
    Tick(Vec<ChannelReading>),
    /// Flush cycler second, counting down to the next switch.
    Countdown { relay_on: bool, remaining_secs: u64 },
    /// The loop died; relays were switched off and the log closed.
    Fault(String),
    Finished,
}

impl ControlEvent {
    pub fn countdown_text(relay_on: bool, remaining_secs: u64) -> String {
        if relay_on {
            format!("Flush pump ON - switching off in {remaining_secs}s")
        } else {
            format!("Flush pump OFF - switching on in {remaining_secs}s")
        }
    }
}
