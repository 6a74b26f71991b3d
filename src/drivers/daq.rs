use serde::{Deserialize, Serialize};

use crate::drivers::DaqError;

/// Digital port selector, numbered as in the Universal Library headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitalPort {
    FirstPortA,
    FirstPortB,
}

impl DigitalPort {
    pub fn code(self) -> i32 {
        match self {
            DigitalPort::FirstPortA => 10,
            DigitalPort::FirstPortB => 11,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Output,
}

impl PortDirection {
    pub fn code(self) -> i32 {
        match self {
            PortDirection::Output => 1,
        }
    }
}

/// Analog input range (gain) codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogRange {
    Bip5Volts,
    Bip10Volts,
    Uni5Volts,
    Uni10Volts,
}

impl AnalogRange {
    pub fn code(self) -> i32 {
        match self {
            AnalogRange::Bip5Volts => 0,
            AnalogRange::Bip10Volts => 1,
            AnalogRange::Uni10Volts => 100,
            AnalogRange::Uni5Volts => 101,
        }
    }

    /// Lower and upper voltage of the range.
    pub fn span(self) -> (f64, f64) {
        match self {
            AnalogRange::Bip5Volts => (-5.0, 5.0),
            AnalogRange::Bip10Volts => (-10.0, 10.0),
            AnalogRange::Uni5Volts => (0.0, 5.0),
            AnalogRange::Uni10Volts => (0.0, 10.0),
        }
    }
}

/// Synchronous single-sample access to a DAQ board.
///
/// Every call blocks until the board answers. There is no timeout and no retry;
/// callers decide what a failure means for them.
pub trait Daq: Send {
    fn configure_port(&mut self, port: DigitalPort, direction: PortDirection)
        -> Result<(), DaqError>;

    fn write_bit(&mut self, port: DigitalPort, bit: u8, high: bool) -> Result<(), DaqError>;

    /// Raw A/D counts for one analog channel.
    fn analog_in(&mut self, channel: u8, range: AnalogRange) -> Result<u16, DaqError>;

    fn to_eng_units(&mut self, range: AnalogRange, counts: u16) -> Result<f32, DaqError>;

    fn read_volts(&mut self, channel: u8, range: AnalogRange) -> Result<f64, DaqError> {
        let counts = self.analog_in(channel, range)?;
        Ok(f64::from(self.to_eng_units(range, counts)?))
    }
}
