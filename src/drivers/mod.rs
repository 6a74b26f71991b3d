// src/drivers/mod.rs
pub mod daq;
pub mod error;
pub mod mcc;
pub mod relay;
pub mod sim;

pub use daq::{AnalogRange, Daq, DigitalPort, PortDirection};
pub use error::{ConfigError, DaqError, LogError, LoopError, SessionError};
pub use mcc::MccBoard;
pub use relay::RelayDriver;
pub use sim::SimulatedBoard;
#[cfg(test)]
pub use sim::{BitWrite, SimProbe};

use crate::settings::{BoardKind, BoardSettings};

/// Opens the board selected in the settings.
pub fn open_board(settings: &BoardSettings) -> Result<Box<dyn Daq>, DaqError> {
    match settings.kind {
        BoardKind::Simulated => Ok(Box::new(SimulatedBoard::with_aeration(1.0, 0.04, 0.015, 2.3))),
        BoardKind::Mcc => Ok(Box::new(MccBoard::open(settings.board_num)?)),
    }
}
