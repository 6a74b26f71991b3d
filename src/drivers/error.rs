use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the DAQ board binding.
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("board library unavailable: {0}")]
    LibraryUnavailable(String),
    #[error("{func} failed (UL error {code}: {message})")]
    Call {
        func: &'static str,
        code: i32,
        message: String,
    },
    #[error("no relay configured at index {0}")]
    NoSuchRelay(usize),
    #[error("simulated {0} fault")]
    Simulated(&'static str),
}

/// Operator input that cannot start a session.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} is not a number: {value:?}")]
    NotNumeric { field: String, value: String },
    #[error("channel {channel}: 0% and 100% calibration voltages must differ")]
    DegenerateCalibration { channel: usize },
    #[error("{field} must be at least 1 second")]
    PeriodTooShort { field: String },
    #[error("no channels configured")]
    NoChannels,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write log row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush log: {0}")]
    Io(#[from] io::Error),
}

/// Anything that ends a polling loop early.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Daq(#[from] DaqError),
    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a session is already active")]
    AlreadyActive,
    #[error("board unavailable: {0}")]
    Board(#[from] DaqError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}
