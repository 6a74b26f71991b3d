use crate::drivers::ConfigError;

pub const O2_MIN: f64 = 0.0;
pub const O2_MAX: f64 = 100.0;

/// Two-point linear sensor calibration: the voltages read at 0 % and 100 % air
/// saturation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    v0: f64,
    v100: f64,
}

impl Calibration {
    /// Rejects equal (or non-finite) calibration points, which would make every
    /// conversion undefined.
    pub fn new(v0: f64, v100: f64, channel: usize) -> Result<Self, ConfigError> {
        if !v0.is_finite() || !v100.is_finite() || v0 == v100 {
            return Err(ConfigError::DegenerateCalibration { channel });
        }
        Ok(Self { v0, v100 })
    }

    pub fn v0(&self) -> f64 {
        self.v0
    }

    pub fn v100(&self) -> f64 {
        self.v100
    }

    /// Percent air saturation for a sensor voltage. Not clamped: readings outside
    /// the calibrated span extrapolate past 0 or 100.
    pub fn percent(&self, volts: f64) -> f64 {
        O2_MIN + (volts - self.v0) * (O2_MAX - O2_MIN) / (self.v100 - self.v0)
    }
}
