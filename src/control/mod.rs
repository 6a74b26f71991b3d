pub mod calibration;
pub mod hysteresis;
pub mod params;

pub use calibration::Calibration;
pub use hysteresis::{Hysteresis, Thresholds};
pub use params::{
    parse_channels, parse_cycler, ChannelForm, ChannelParams, CyclerForm, CyclerParams,
};
